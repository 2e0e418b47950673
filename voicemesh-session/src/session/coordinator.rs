use crate::connection::PeerTransportFactory;
use crate::media::{AudioCaptureDriver, AudioOutput, LocalMediaController};
use crate::session::{Session, SessionCommand, SessionConfig, SessionEvents, SessionStatus};
use crate::signaling::SignalingChannel;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use voicemesh_core::{JoinError, ParticipantId, RoomId};

const COMMAND_CAPACITY: usize = 16;

/// Handle onto a running voice session. Cheap to clone; the session loop
/// stops once every handle is dropped.
///
/// All operations are forwarded into a single background task, so concurrent
/// callers never race each other: a `join` observed before a `leave` is fully
/// applied before the `leave` starts.
#[derive(Clone)]
pub struct SessionCoordinator {
    local: ParticipantId,
    commands: mpsc::Sender<SessionCommand>,
    connected: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
}

impl SessionCoordinator {
    pub fn new(
        local: ParticipantId,
        channel: Arc<dyn SignalingChannel>,
        transports: Arc<dyn PeerTransportFactory>,
        capture: Arc<dyn AudioCaptureDriver>,
        output: Arc<dyn AudioOutput>,
        callbacks: Arc<dyn SessionEvents>,
        config: SessionConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let muted = Arc::new(AtomicBool::new(false));

        let session = Session::new(
            local.clone(),
            channel,
            transports,
            LocalMediaController::new(capture),
            callbacks,
            output,
            config,
            cmd_rx,
            cmd_tx.downgrade(),
            connected.clone(),
            muted.clone(),
        );
        tokio::spawn(session.run());

        Self {
            local,
            commands: cmd_tx,
            connected,
            muted,
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local
    }

    /// Join a room, acquiring the capture device and wiring up signaling.
    /// Joining the room already joined is a no-op; joining a different room
    /// leaves the current one first.
    pub async fn join(&self, room: impl Into<RoomId>) -> Result<(), JoinError> {
        let (reply, response) = oneshot::channel();
        let sent = self
            .commands
            .send(SessionCommand::Join {
                room: room.into(),
                reply,
            })
            .await;
        match sent {
            Ok(()) => response.await.unwrap_or(Ok(())),
            Err(_) => Ok(()),
        }
    }

    /// Leave the current room, removing presence and releasing the capture
    /// device. A no-op when not joined.
    pub async fn leave(&self) {
        let (reply, response) = oneshot::channel();
        if self
            .commands
            .send(SessionCommand::Leave { reply })
            .await
            .is_ok()
        {
            let _ = response.await;
        }
    }

    /// Flip the local transmit gate. Returns the new muted state.
    pub async fn set_muted(&self, muted: bool) -> bool {
        let (reply, response) = oneshot::channel();
        if self
            .commands
            .send(SessionCommand::SetMuted { muted, reply })
            .await
            .is_ok()
        {
            response.await.unwrap_or(muted)
        } else {
            muted
        }
    }

    pub async fn toggle_mute(&self) -> bool {
        self.set_muted(!self.is_muted()).await
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Point-in-time view of the session state.
    pub async fn status(&self) -> SessionStatus {
        let (reply, response) = oneshot::channel();
        if self
            .commands
            .send(SessionCommand::Inspect { reply })
            .await
            .is_ok()
        {
            response.await.unwrap_or_default()
        } else {
            SessionStatus::default()
        }
    }
}
