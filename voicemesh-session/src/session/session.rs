use crate::connection::{ConnectionManager, StateOutcome, TransportEvent};
use crate::media::{AudioOutput, CaptureHandle, LocalMediaController};
use crate::membership::MembershipTracker;
use crate::session::{
    SessionCommand, SessionEvent, SessionEventKind, SessionEvents, SessionStatus, Watchdog,
    WatchdogConfig,
};
use crate::signaling::{SignalingChannel, Subscription};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use voicemesh_core::{JoinError, ParticipantId, PresenceInfo, RoomId};

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Session-wide tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub watchdog: WatchdogConfig,
    /// Capacity of the internal event funnel and of each watch channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            watchdog: WatchdogConfig::default(),
            event_capacity: 256,
        }
    }
}

/// Wiring of the currently joined room. Dropping it cancels every
/// subscription exactly once and stops the forwarder tasks.
struct ActiveRoom {
    room: RoomId,
    joined_at_ms: u64,
    tracker: MembershipTracker,
    connections: ConnectionManager,
    subscriptions: Vec<Subscription>,
    forwarders: Vec<JoinHandle<()>>,
}

/// The session event loop. All signaling callbacks, transport events and
/// coordinator commands are funneled into this single task and handled one
/// at a time, so state mutation is fully serialized.
pub(crate) struct Session {
    local: ParticipantId,
    channel: Arc<dyn SignalingChannel>,
    transports: Arc<dyn crate::connection::PeerTransportFactory>,
    media: LocalMediaController,
    callbacks: Arc<dyn SessionEvents>,
    output: Arc<dyn AudioOutput>,
    config: SessionConfig,

    cmd_rx: mpsc::Receiver<SessionCommand>,
    cmd_weak: mpsc::WeakSender<SessionCommand>,
    evt_tx: mpsc::Sender<SessionEvent>,
    evt_rx: mpsc::Receiver<SessionEvent>,

    connected: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,

    /// Monotonically increasing wiring generation. Bumped on every join and
    /// teardown; any event or continuation stamped with an older epoch is a
    /// no-op by the time it is seen.
    epoch: u64,
    /// Room the session is supposed to be in, kept across connection drops
    /// so the watchdog knows to rejoin.
    wanted: Option<RoomId>,
    active: Option<ActiveRoom>,
    watchdog: Option<Watchdog>,
    rejoin_failures: u32,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        local: ParticipantId,
        channel: Arc<dyn SignalingChannel>,
        transports: Arc<dyn crate::connection::PeerTransportFactory>,
        media: LocalMediaController,
        callbacks: Arc<dyn SessionEvents>,
        output: Arc<dyn AudioOutput>,
        config: SessionConfig,
        cmd_rx: mpsc::Receiver<SessionCommand>,
        cmd_weak: mpsc::WeakSender<SessionCommand>,
        connected: Arc<AtomicBool>,
        muted: Arc<AtomicBool>,
    ) -> Self {
        let (evt_tx, evt_rx) = mpsc::channel(config.event_capacity);
        Self {
            local,
            channel,
            transports,
            media,
            callbacks,
            output,
            config,
            cmd_rx,
            cmd_weak,
            evt_tx,
            evt_rx,
            connected,
            muted,
            epoch: 0,
            wanted: None,
            active: None,
            watchdog: None,
            rejoin_failures: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(participant = %self.local, "session loop started");
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    // Coordinator handle dropped; clean up and stop.
                    None => break,
                },
                Some(event) = self.evt_rx.recv() => self.handle_event(event).await,
            }
        }
        self.teardown().await;
        info!(participant = %self.local, "session loop finished");
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Join { room, reply } => {
                let result = self.join(room).await;
                let _ = reply.send(result);
            }
            SessionCommand::Leave { reply } => {
                self.teardown().await;
                let _ = reply.send(());
            }
            SessionCommand::SetMuted { muted, reply } => {
                let now_muted = self.set_muted(muted).await;
                let _ = reply.send(now_muted);
            }
            SessionCommand::Inspect { reply } => {
                let _ = reply.send(self.status());
            }
            SessionCommand::HealthCheck => self.health_check().await,
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        if event.epoch != self.epoch {
            debug!(
                participant = %self.local,
                event_epoch = event.epoch,
                current_epoch = self.epoch,
                "dropping event from superseded session wiring"
            );
            return;
        }
        if self.active.is_none() {
            return;
        }
        match event.kind {
            SessionEventKind::Presence(snapshot) => self.on_presence(snapshot).await,
            SessionEventKind::Offer(message) => self.on_offer(message).await,
            SessionEventKind::Answer(message) => self.on_answer(message).await,
            SessionEventKind::Candidate(message) => self.on_candidate(message).await,
            SessionEventKind::Peer(peer, event) => self.on_peer_event(peer, event).await,
        }
    }

    async fn join(&mut self, room: RoomId) -> Result<(), JoinError> {
        match &self.active {
            Some(active) if active.room == room && self.connected.load(Ordering::SeqCst) => {
                debug!(room = %room, participant = %self.local, "already joined, keeping connections");
                return Ok(());
            }
            Some(active) if active.room != room => {
                info!(
                    old_room = %active.room,
                    new_room = %room,
                    participant = %self.local,
                    "switching rooms, leaving the old one first"
                );
                self.teardown().await;
            }
            // Same room but the session was deemed dropped: rewire in place.
            Some(_) => self.unwire().await,
            None => {}
        }

        self.epoch += 1;
        let capture = self.media.acquire().await?;

        match self.wire(&room, self.epoch, capture).await {
            Ok(active) => {
                info!(room = %room, participant = %self.local, "joined room");
                self.active = Some(active);
                self.wanted = Some(room);
                self.connected.store(true, Ordering::SeqCst);
                self.rejoin_failures = 0;
                if self.watchdog.is_none() {
                    self.watchdog = Some(Watchdog::start(
                        self.config.watchdog.interval,
                        self.cmd_weak.clone(),
                    ));
                }
                Ok(())
            }
            Err(e) => {
                warn!(room = %room, participant = %self.local, error = %e, "join failed");
                self.connected.store(false, Ordering::SeqCst);
                self.media.release().await;
                Err(e.into())
            }
        }
    }

    /// Subscribe to the room's signaling topics and announce presence. On any
    /// failure the partially created subscriptions are disposed by drop and
    /// no presence record is left behind.
    async fn wire(
        &mut self,
        room: &RoomId,
        epoch: u64,
        capture: CaptureHandle,
    ) -> Result<ActiveRoom, voicemesh_core::SignalingError> {
        let capacity = self.config.event_capacity;
        let mut subscriptions = Vec::with_capacity(4);
        let mut forwarders = Vec::with_capacity(4);

        let (tx, rx) = mpsc::channel(capacity);
        subscriptions.push(self.channel.watch_presence(room, tx).await?);
        forwarders.push(self.forward(rx, epoch, SessionEventKind::Presence));

        let (tx, rx) = mpsc::channel(capacity);
        subscriptions.push(self.channel.watch_offers(room, &self.local, tx).await?);
        forwarders.push(self.forward(rx, epoch, SessionEventKind::Offer));

        let (tx, rx) = mpsc::channel(capacity);
        subscriptions.push(self.channel.watch_answers(room, &self.local, tx).await?);
        forwarders.push(self.forward(rx, epoch, SessionEventKind::Answer));

        let (tx, rx) = mpsc::channel(capacity);
        subscriptions.push(self.channel.watch_candidates(room, &self.local, tx).await?);
        forwarders.push(self.forward(rx, epoch, SessionEventKind::Candidate));

        let joined_at_ms = now_ms();
        let info = PresenceInfo {
            joined_at_ms,
            muted: self.muted.load(Ordering::SeqCst),
        };
        match self.channel.announce_presence(room, &self.local, info).await {
            Ok(()) => {}
            Err(e) => {
                for forwarder in forwarders {
                    forwarder.abort();
                }
                return Err(e);
            }
        }

        let connections = ConnectionManager::new(
            room.clone(),
            epoch,
            self.transports.clone(),
            self.output.clone(),
            self.evt_tx.clone(),
            capture,
        );

        Ok(ActiveRoom {
            room: room.clone(),
            joined_at_ms,
            tracker: MembershipTracker::new(self.local.clone()),
            connections,
            subscriptions,
            forwarders,
        })
    }

    fn forward<T: Send + 'static>(
        &self,
        mut rx: mpsc::Receiver<T>,
        epoch: u64,
        wrap: impl Fn(T) -> SessionEventKind + Send + 'static,
    ) -> JoinHandle<()> {
        let events = self.evt_tx.clone();
        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let event = SessionEvent {
                    epoch,
                    kind: wrap(item),
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
        })
    }

    /// Undo the room wiring: close connections, dispose subscriptions, stop
    /// forwarders. Keeps the capture device and the wanted room.
    async fn unwire(&mut self) {
        self.epoch += 1;
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut active) = self.active.take() {
            active.connections.close_all().await;
            for subscription in active.subscriptions.drain(..) {
                subscription.cancel();
            }
            for forwarder in active.forwarders.drain(..) {
                forwarder.abort();
            }
        }
    }

    /// Full leave: remove presence, unwire, release media, stop the watchdog.
    /// Safe to call when not joined.
    async fn teardown(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.cancel();
        }
        self.wanted = None;
        self.rejoin_failures = 0;

        if let Some(active) = &self.active {
            info!(room = %active.room, participant = %self.local, "leaving room");
            if let Err(e) = self.channel.remove_presence(&active.room, &self.local).await {
                warn!(
                    room = %active.room,
                    participant = %self.local,
                    error = %e,
                    "failed to remove presence record on leave"
                );
            }
        }
        self.unwire().await;
        self.media.release().await;
    }

    async fn set_muted(&mut self, muted: bool) -> bool {
        self.media.set_muted(muted);
        self.muted.store(muted, Ordering::SeqCst);
        info!(participant = %self.local, muted, "local audio transmit gate changed");

        // Keep the shared presence record in step so other participants can
        // render the mute state.
        if self.connected.load(Ordering::SeqCst) {
            if let Some(active) = &self.active {
                let info = PresenceInfo {
                    joined_at_ms: active.joined_at_ms,
                    muted,
                };
                if let Err(e) = self
                    .channel
                    .announce_presence(&active.room, &self.local, info)
                    .await
                {
                    warn!(
                        room = %active.room,
                        participant = %self.local,
                        error = %e,
                        "failed to update presence mute flag, session deemed dropped"
                    );
                    self.connected.store(false, Ordering::SeqCst);
                }
            }
        }
        muted
    }

    fn status(&self) -> SessionStatus {
        match &self.active {
            Some(active) => SessionStatus {
                room: Some(active.room.clone()),
                participants: active.tracker.remote_participants(),
                connections: active.connections.states(),
            },
            None => SessionStatus::default(),
        }
    }

    /// Watchdog tick: rejoin if the session is supposed to be in a room but
    /// is no longer connected. Failures are logged and counted, never thrown.
    async fn health_check(&mut self) {
        let Some(room) = self.wanted.clone() else {
            return;
        };
        if self.connected.load(Ordering::SeqCst) {
            self.rejoin_failures = 0;
            return;
        }

        warn!(room = %room, participant = %self.local, "session dropped, attempting rejoin");
        match self.join(room.clone()).await {
            Ok(()) => {
                info!(room = %room, participant = %self.local, "rejoined after connection loss");
            }
            Err(e) => {
                self.rejoin_failures += 1;
                // join() clears the wanted room only on explicit teardown.
                self.wanted = Some(room.clone());
                error!(
                    room = %room,
                    participant = %self.local,
                    error = %e,
                    consecutive_failures = self.rejoin_failures,
                    "rejoin attempt failed"
                );
                if self.rejoin_failures >= self.config.watchdog.max_consecutive_failures {
                    error!(
                        room = %room,
                        participant = %self.local,
                        "giving up on automatic rejoin"
                    );
                    self.teardown().await;
                }
            }
        }
    }

    async fn on_presence(&mut self, snapshot: crate::signaling::PresenceSnapshot) {
        let channel = Arc::clone(&self.channel);
        let callbacks = Arc::clone(&self.callbacks);
        let local = self.local.clone();
        let Some(active) = self.active.as_mut() else {
            return;
        };

        let diff = active.tracker.apply(&snapshot);
        for peer in diff.joined {
            info!(room = %active.room, participant = %peer, "participant joined");
            callbacks.on_participant_joined(peer.clone()).await;

            // Initiator rule: the lexicographically smaller id always sends
            // the offer, so the two sides can never glare.
            if local < peer {
                match active.connections.open_to(&peer).await {
                    Ok(Some(offer)) => {
                        if let Err(e) = channel.send_offer(&active.room, &local, &peer, offer).await
                        {
                            warn!(
                                room = %active.room,
                                participant = %peer,
                                error = %e,
                                "failed to send offer"
                            );
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            room = %active.room,
                            participant = %peer,
                            error = %e,
                            "failed to open connection"
                        );
                    }
                }
            }
        }

        for peer in diff.left {
            info!(room = %active.room, participant = %peer, "participant left");
            active.connections.remove(&peer).await;
            callbacks.on_participant_left(peer).await;
        }
    }

    async fn on_offer(&mut self, message: crate::signaling::AddressedSdp) {
        let channel = Arc::clone(&self.channel);
        let local = self.local.clone();
        let Some(active) = self.active.as_mut() else {
            return;
        };

        // Offers are only honored from participants currently in the room;
        // a replayed offer from a departed peer must not recreate state.
        if !active.tracker.is_present(&message.from) {
            debug!(
                room = %active.room,
                participant = %message.from,
                "offer from a participant not in the room discarded"
            );
            return;
        }

        match active.connections.accept_from(&message.from, message.description).await {
            Ok(Some(answer)) => {
                if let Err(e) = channel
                    .send_answer(&active.room, &local, &message.from, answer)
                    .await
                {
                    warn!(
                        room = %active.room,
                        participant = %message.from,
                        error = %e,
                        "failed to send answer"
                    );
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    room = %active.room,
                    participant = %message.from,
                    error = %e,
                    "failed to answer offer"
                );
            }
        }
    }

    async fn on_answer(&mut self, message: crate::signaling::AddressedSdp) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if let Err(e) = active
            .connections
            .apply_answer(&message.from, message.description)
            .await
        {
            warn!(
                room = %active.room,
                participant = %message.from,
                error = %e,
                "failed to apply answer"
            );
        }
    }

    async fn on_candidate(&mut self, message: crate::signaling::AddressedCandidate) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if let Err(e) = active
            .connections
            .add_candidate(&message.from, message.candidate)
            .await
        {
            debug!(
                room = %active.room,
                participant = %message.from,
                error = %e,
                "discarding unusable candidate"
            );
        }
    }

    async fn on_peer_event(&mut self, peer: ParticipantId, event: TransportEvent) {
        let channel = Arc::clone(&self.channel);
        let callbacks = Arc::clone(&self.callbacks);
        let local = self.local.clone();
        let Some(active) = self.active.as_mut() else {
            return;
        };

        match event {
            TransportEvent::CandidateGenerated(candidate) => {
                if let Err(e) = channel
                    .send_candidate(&active.room, &local, &peer, candidate)
                    .await
                {
                    warn!(
                        room = %active.room,
                        participant = %peer,
                        error = %e,
                        "failed to publish candidate"
                    );
                }
            }
            TransportEvent::StateChanged(state) => {
                match active.connections.on_transport_state(&peer, state).await {
                    StateOutcome::Nothing => {}
                    StateOutcome::Resend(offer) => {
                        if let Err(e) = channel.send_offer(&active.room, &local, &peer, offer).await
                        {
                            warn!(
                                room = %active.room,
                                participant = %peer,
                                error = %e,
                                "failed to send restart offer"
                            );
                        }
                    }
                    StateOutcome::Unreachable => {
                        warn!(
                            room = %active.room,
                            participant = %peer,
                            "peer unreachable after retry, mesh continues without it"
                        );
                        callbacks.on_peer_unreachable(peer).await;
                    }
                }
            }
            TransportEvent::TrackReceived(source) => {
                active.connections.attach_track(&peer, source);
            }
        }
    }
}
