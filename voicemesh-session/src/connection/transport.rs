use crate::media::{AudioSource, CaptureHandle};
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;
use voicemesh_core::{IceCandidate, NegotiationError, ParticipantId, SessionDescription};

/// Transport-level connection state as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events a transport pushes up to its connection's owner.
pub enum TransportEvent {
    CandidateGenerated(IceCandidate),
    StateChanged(TransportState),
    TrackReceived(Box<dyn AudioSource>),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CandidateGenerated(c) => f.debug_tuple("CandidateGenerated").field(c).finish(),
            Self::StateChanged(s) => f.debug_tuple("StateChanged").field(s).finish(),
            Self::TrackReceived(_) => f.write_str("TrackReceived"),
        }
    }
}

/// One bidirectional audio transport to a single remote participant.
///
/// Implementations deliver `TransportEvent`s over the channel handed to the
/// factory at creation; events for a transport that has been closed are
/// simply dropped by the receiver going away.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Produce the initial offer and install it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    /// Apply a remote offer and produce the answer.
    async fn apply_remote_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError>;

    /// Apply the remote answer. A duplicate answer after one has been applied
    /// is ignored.
    async fn apply_remote_answer(&self, answer: SessionDescription)
    -> Result<(), NegotiationError>;

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    /// Produce an ICE-restart offer for in-place recovery.
    async fn restart_offer(&self) -> Result<SessionDescription, NegotiationError>;

    /// Release the transport. Safe to call more than once.
    async fn close(&self);
}

#[async_trait]
pub trait PeerTransportFactory: Send + Sync + 'static {
    async fn create(
        &self,
        peer: &ParticipantId,
        local_audio: CaptureHandle,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn PeerTransport>, NegotiationError>;
}
