use crate::connection::{PeerTransport, PeerTransportFactory, TransportState};
use crate::media::{AudioOutput, AudioSource, CaptureHandle};
use crate::session::{SessionEvent, SessionEventKind};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use voicemesh_core::{IceCandidate, NegotiationError, ParticipantId, RoomId, SessionDescription};

const TRANSPORT_EVENT_CAPACITY: usize = 64;

/// Lifecycle of one connection to a remote participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Negotiating,
    Connected,
    Failed,
    Closed,
}

impl ConnectionState {
    fn is_live(self) -> bool {
        matches!(self, Self::Negotiating | Self::Connected)
    }
}

/// What the session must do after a transport state change.
pub(crate) enum StateOutcome {
    Nothing,
    /// Re-send this ICE-restart offer to the peer.
    Resend(SessionDescription),
    /// Recovery exhausted; the connection was dropped and the peer is
    /// effectively unreachable.
    Unreachable,
}

struct Connection {
    state: ConnectionState,
    transport: Box<dyn PeerTransport>,
    restart_attempted: bool,
    forwarder: JoinHandle<()>,
    playback: Option<JoinHandle<()>>,
}

impl Connection {
    async fn shut_down(mut self) {
        self.forwarder.abort();
        if let Some(playback) = self.playback.take() {
            playback.abort();
        }
        self.transport.close().await;
    }
}

/// Owns every connection of the joined room, exclusively: the map is only
/// mutated here, driven by serialized session events. `remove` is safe at any
/// point of a connection's life; whatever negotiation was in flight is
/// cancelled and late messages for the peer fall through to a missing entry.
pub(crate) struct ConnectionManager {
    room: RoomId,
    epoch: u64,
    factory: Arc<dyn PeerTransportFactory>,
    output: Arc<dyn AudioOutput>,
    events: mpsc::Sender<SessionEvent>,
    capture: CaptureHandle,
    connections: HashMap<ParticipantId, Connection>,
}

impl ConnectionManager {
    pub(crate) fn new(
        room: RoomId,
        epoch: u64,
        factory: Arc<dyn PeerTransportFactory>,
        output: Arc<dyn AudioOutput>,
        events: mpsc::Sender<SessionEvent>,
        capture: CaptureHandle,
    ) -> Self {
        Self {
            room,
            epoch,
            factory,
            output,
            events,
            capture,
            connections: HashMap::new(),
        }
    }

    /// Open a connection to a newly observed peer and produce the initial
    /// offer. Returns `None` without touching anything if a live connection
    /// for the peer already exists.
    pub(crate) async fn open_to(
        &mut self,
        peer: &ParticipantId,
    ) -> Result<Option<SessionDescription>, NegotiationError> {
        if self.has_live(peer) {
            debug!(room = %self.room, participant = %peer, "connection already live, not re-offering");
            return Ok(None);
        }
        self.drop_connection(peer).await;

        let (transport, forwarder) = self.create_transport(peer).await?;
        let offer = match transport.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                forwarder.abort();
                transport.close().await;
                return Err(e);
            }
        };
        self.insert(peer.clone(), transport, forwarder);
        Ok(Some(offer))
    }

    /// Accept an inbound offer from a peer and produce the answer. A
    /// duplicate offer while a live connection exists is ignored.
    pub(crate) async fn accept_from(
        &mut self,
        peer: &ParticipantId,
        offer: SessionDescription,
    ) -> Result<Option<SessionDescription>, NegotiationError> {
        if self.has_live(peer) {
            debug!(room = %self.room, participant = %peer, "duplicate offer for live connection ignored");
            return Ok(None);
        }
        self.drop_connection(peer).await;

        let (transport, forwarder) = self.create_transport(peer).await?;
        let answer = match transport.apply_remote_offer(offer).await {
            Ok(answer) => answer,
            Err(e) => {
                forwarder.abort();
                transport.close().await;
                return Err(e);
            }
        };
        self.insert(peer.clone(), transport, forwarder);
        Ok(Some(answer))
    }

    pub(crate) async fn apply_answer(
        &mut self,
        peer: &ParticipantId,
        answer: SessionDescription,
    ) -> Result<(), NegotiationError> {
        match self.connections.get(peer) {
            Some(conn) => conn.transport.apply_remote_answer(answer).await,
            None => {
                debug!(room = %self.room, participant = %peer, "answer for unknown connection ignored");
                Ok(())
            }
        }
    }

    pub(crate) async fn add_candidate(
        &mut self,
        peer: &ParticipantId,
        candidate: IceCandidate,
    ) -> Result<(), NegotiationError> {
        match self.connections.get(peer) {
            Some(conn) => conn.transport.add_remote_candidate(candidate).await,
            None => {
                debug!(room = %self.room, participant = %peer, "candidate for unknown connection ignored");
                Ok(())
            }
        }
    }

    /// React to a transport-level state signal. One in-place recovery is
    /// attempted per connection; a second failure drops it.
    pub(crate) async fn on_transport_state(
        &mut self,
        peer: &ParticipantId,
        state: TransportState,
    ) -> StateOutcome {
        if !self.connections.contains_key(peer) {
            return StateOutcome::Nothing;
        }
        match state {
            TransportState::Connecting => StateOutcome::Nothing,
            TransportState::Connected => {
                if let Some(conn) = self.connections.get_mut(peer) {
                    if conn.state != ConnectionState::Connected {
                        info!(room = %self.room, participant = %peer, "connection established");
                    }
                    conn.state = ConnectionState::Connected;
                }
                StateOutcome::Nothing
            }
            TransportState::Disconnected | TransportState::Failed => {
                self.attempt_recovery(peer).await
            }
            TransportState::Closed => {
                self.drop_connection(peer).await;
                StateOutcome::Nothing
            }
        }
    }

    async fn attempt_recovery(&mut self, peer: &ParticipantId) -> StateOutcome {
        let restart = match self.connections.get_mut(peer) {
            Some(conn) if !conn.restart_attempted => {
                conn.restart_attempted = true;
                conn.state = ConnectionState::Negotiating;
                conn.transport.restart_offer().await
            }
            Some(_) => {
                warn!(
                    room = %self.room,
                    participant = %peer,
                    "transport failed again after restart, giving up"
                );
                self.fail_connection(peer).await;
                return StateOutcome::Unreachable;
            }
            None => return StateOutcome::Nothing,
        };

        match restart {
            Ok(offer) => {
                info!(room = %self.room, participant = %peer, "restarting negotiation in place");
                StateOutcome::Resend(offer)
            }
            Err(e) => {
                warn!(
                    room = %self.room,
                    participant = %peer,
                    error = %e,
                    "negotiation restart failed"
                );
                self.fail_connection(peer).await;
                StateOutcome::Unreachable
            }
        }
    }

    /// Route a freshly received remote track into a playback sink for the
    /// peer, replacing any prior sink.
    pub(crate) fn attach_track(&mut self, peer: &ParticipantId, mut source: Box<dyn AudioSource>) {
        if !self.connections.contains_key(peer) {
            debug!(room = %self.room, participant = %peer, "track for unknown connection dropped");
            return;
        }

        let mut sink = self.output.create_sink(peer);
        let id = peer.clone();
        let playback = tokio::spawn(async move {
            while let Some(frame) = source.next_frame().await {
                sink.write(frame).await;
            }
            debug!(participant = %id, "remote audio stream ended");
        });

        if let Some(conn) = self.connections.get_mut(peer) {
            if let Some(prior) = conn.playback.replace(playback) {
                prior.abort();
            }
            // Audio flowing in means negotiation completed even if the
            // transport's own connected signal has not fired yet.
            if conn.state == ConnectionState::Negotiating {
                conn.state = ConnectionState::Connected;
            }
        }
    }

    /// Tear down the connection for a departed peer. No-op if none exists.
    pub(crate) async fn remove(&mut self, peer: &ParticipantId) {
        if self.connections.contains_key(peer) {
            info!(room = %self.room, participant = %peer, "closing connection");
        }
        self.drop_connection(peer).await;
    }

    pub(crate) async fn close_all(&mut self) {
        let connections: Vec<Connection> = self.connections.drain().map(|(_, c)| c).collect();
        futures::future::join_all(connections.into_iter().map(Connection::shut_down)).await;
    }

    pub(crate) fn state_of(&self, peer: &ParticipantId) -> Option<ConnectionState> {
        self.connections.get(peer).map(|c| c.state)
    }

    pub(crate) fn states(&self) -> Vec<(ParticipantId, ConnectionState)> {
        let mut states: Vec<(ParticipantId, ConnectionState)> = self
            .connections
            .iter()
            .map(|(id, c)| (id.clone(), c.state))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    fn has_live(&self, peer: &ParticipantId) -> bool {
        self.state_of(peer).is_some_and(ConnectionState::is_live)
    }

    async fn create_transport(
        &self,
        peer: &ParticipantId,
    ) -> Result<(Box<dyn PeerTransport>, JoinHandle<()>), NegotiationError> {
        let (tx, mut rx) = mpsc::channel(TRANSPORT_EVENT_CAPACITY);
        let transport = self
            .factory
            .create(peer, self.capture.clone(), tx)
            .await?;

        let events = self.events.clone();
        let epoch = self.epoch;
        let id = peer.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let wrapped = SessionEvent {
                    epoch,
                    kind: SessionEventKind::Peer(id.clone(), event),
                };
                if events.send(wrapped).await.is_err() {
                    break;
                }
            }
        });
        Ok((transport, forwarder))
    }

    fn insert(&mut self, peer: ParticipantId, transport: Box<dyn PeerTransport>, forwarder: JoinHandle<()>) {
        self.connections.insert(
            peer,
            Connection {
                state: ConnectionState::Negotiating,
                transport,
                restart_attempted: false,
                forwarder,
                playback: None,
            },
        );
    }

    async fn drop_connection(&mut self, peer: &ParticipantId) {
        if let Some(conn) = self.connections.remove(peer) {
            conn.shut_down().await;
        }
    }

    async fn fail_connection(&mut self, peer: &ParticipantId) {
        if let Some(mut conn) = self.connections.remove(peer) {
            conn.state = ConnectionState::Failed;
            conn.shut_down().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::TransportEvent;
    use crate::media::{AudioFrame, AudioSink, AudioSource, CaptureDevice};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use voicemesh_core::SessionDescription;

    struct SilentSource;

    #[async_trait]
    impl AudioSource for SilentSource {
        async fn next_frame(&mut self) -> Option<AudioFrame> {
            None
        }
    }

    struct SilentDevice;

    #[async_trait]
    impl CaptureDevice for SilentDevice {
        fn open_source(&self) -> Box<dyn AudioSource> {
            Box::new(SilentSource)
        }

        async fn stop(&self) {}
    }

    struct NullSink;

    #[async_trait]
    impl AudioSink for NullSink {
        async fn write(&mut self, _frame: AudioFrame) {}
    }

    struct NullOutput;

    impl AudioOutput for NullOutput {
        fn create_sink(&self, _participant: &ParticipantId) -> Box<dyn AudioSink> {
            Box::new(NullSink)
        }
    }

    struct ScriptedTransport {
        peer: ParticipantId,
        restart_fails: bool,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PeerTransport for ScriptedTransport {
        async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
            Ok(SessionDescription::offer("v=0"))
        }

        async fn apply_remote_offer(
            &self,
            _offer: SessionDescription,
        ) -> Result<SessionDescription, NegotiationError> {
            Ok(SessionDescription::answer("v=0"))
        }

        async fn apply_remote_answer(
            &self,
            _answer: SessionDescription,
        ) -> Result<(), NegotiationError> {
            Ok(())
        }

        async fn add_remote_candidate(
            &self,
            _candidate: IceCandidate,
        ) -> Result<(), NegotiationError> {
            Ok(())
        }

        async fn restart_offer(&self) -> Result<SessionDescription, NegotiationError> {
            if self.restart_fails {
                Err(NegotiationError::new(self.peer.clone(), "restart refused"))
            } else {
                Ok(SessionDescription::offer("v=0 restart"))
            }
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct ScriptedFactory {
        created: AtomicUsize,
        restart_fails: bool,
        last_closed: std::sync::Mutex<Option<Arc<AtomicBool>>>,
    }

    impl ScriptedFactory {
        fn new(restart_fails: bool) -> Arc<Self> {
            Arc::new(Self {
                created: AtomicUsize::new(0),
                restart_fails,
                last_closed: std::sync::Mutex::new(None),
            })
        }

        fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        fn last_closed(&self) -> Arc<AtomicBool> {
            self.last_closed
                .lock()
                .unwrap()
                .clone()
                .expect("no transport created yet")
        }
    }

    #[async_trait]
    impl PeerTransportFactory for ScriptedFactory {
        async fn create(
            &self,
            peer: &ParticipantId,
            _local_audio: CaptureHandle,
            _events: mpsc::Sender<TransportEvent>,
        ) -> Result<Box<dyn PeerTransport>, NegotiationError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            let closed = Arc::new(AtomicBool::new(false));
            *self.last_closed.lock().unwrap() = Some(closed.clone());
            Ok(Box::new(ScriptedTransport {
                peer: peer.clone(),
                restart_fails: self.restart_fails,
                closed,
            }))
        }
    }

    fn manager(factory: Arc<ScriptedFactory>) -> (ConnectionManager, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let capture = CaptureHandle::new(Arc::new(SilentDevice), Arc::new(AtomicBool::new(true)));
        let manager = ConnectionManager::new(
            RoomId::from("study-room"),
            1,
            factory,
            Arc::new(NullOutput),
            tx,
            capture,
        );
        (manager, rx)
    }

    fn peer(id: &str) -> ParticipantId {
        ParticipantId::from(id)
    }

    #[tokio::test]
    async fn open_to_refuses_second_connection_for_live_peer() {
        let factory = ScriptedFactory::new(false);
        let (mut manager, _rx) = manager(factory.clone());
        let bob = peer("bob");

        assert!(manager.open_to(&bob).await.unwrap().is_some());
        assert!(manager.open_to(&bob).await.unwrap().is_none());
        assert_eq!(factory.created(), 1);
        assert_eq!(manager.state_of(&bob), Some(ConnectionState::Negotiating));
    }

    #[tokio::test]
    async fn duplicate_offer_for_live_connection_is_ignored() {
        let factory = ScriptedFactory::new(false);
        let (mut manager, _rx) = manager(factory.clone());
        let bob = peer("bob");

        let answer = manager
            .accept_from(&bob, SessionDescription::offer("v=0"))
            .await
            .unwrap();
        assert!(answer.is_some());

        let replay = manager
            .accept_from(&bob, SessionDescription::offer("v=0"))
            .await
            .unwrap();
        assert!(replay.is_none());
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn late_messages_for_removed_peer_fall_through() {
        let factory = ScriptedFactory::new(false);
        let (mut manager, _rx) = manager(factory.clone());
        let bob = peer("bob");

        manager.open_to(&bob).await.unwrap();
        manager.remove(&bob).await;
        assert!(factory.last_closed().load(Ordering::SeqCst));

        manager
            .apply_answer(&bob, SessionDescription::answer("v=0"))
            .await
            .unwrap();
        manager
            .add_candidate(
                &bob,
                IceCandidate {
                    candidate: "candidate:late".to_owned(),
                    sdp_mid: Some("0".to_owned()),
                    sdp_m_line_index: Some(0),
                },
            )
            .await
            .unwrap();

        // Late traffic must never resurrect the connection.
        assert_eq!(factory.created(), 1);
        assert_eq!(manager.state_of(&bob), None);
    }

    #[tokio::test]
    async fn first_failure_restarts_second_drops() {
        let factory = ScriptedFactory::new(false);
        let (mut manager, _rx) = manager(factory.clone());
        let bob = peer("bob");
        manager.open_to(&bob).await.unwrap();

        match manager.on_transport_state(&bob, TransportState::Failed).await {
            StateOutcome::Resend(offer) => assert_eq!(offer.sdp, "v=0 restart"),
            _ => panic!("expected a restart offer"),
        }
        assert_eq!(manager.state_of(&bob), Some(ConnectionState::Negotiating));

        match manager.on_transport_state(&bob, TransportState::Failed).await {
            StateOutcome::Unreachable => {}
            _ => panic!("expected the peer to be declared unreachable"),
        }
        assert_eq!(manager.state_of(&bob), None);
    }

    #[tokio::test]
    async fn failed_restart_drops_connection_immediately() {
        let factory = ScriptedFactory::new(true);
        let (mut manager, _rx) = manager(factory.clone());
        let bob = peer("bob");
        manager.open_to(&bob).await.unwrap();

        match manager
            .on_transport_state(&bob, TransportState::Disconnected)
            .await
        {
            StateOutcome::Unreachable => {}
            _ => panic!("expected the peer to be declared unreachable"),
        }
        assert!(factory.last_closed().load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn inbound_track_marks_connection_connected() {
        let factory = ScriptedFactory::new(false);
        let (mut manager, _rx) = manager(factory.clone());
        let bob = peer("bob");
        manager.open_to(&bob).await.unwrap();

        manager.attach_track(&bob, Box::new(SilentSource));
        assert_eq!(manager.state_of(&bob), Some(ConnectionState::Connected));
    }

    #[tokio::test]
    async fn close_all_empties_the_mesh() {
        let factory = ScriptedFactory::new(false);
        let (mut manager, _rx) = manager(factory.clone());
        manager.open_to(&peer("bob")).await.unwrap();
        manager.open_to(&peer("carol")).await.unwrap();
        assert_eq!(manager.states().len(), 2);

        manager.close_all().await;
        assert!(manager.states().is_empty());
        assert!(factory.last_closed().load(Ordering::SeqCst));
    }
}
