use crate::connection::{ConnectionState, TransportEvent};
use crate::signaling::{AddressedCandidate, AddressedSdp, PresenceSnapshot};
use tokio::sync::oneshot;
use voicemesh_core::{JoinError, ParticipantId, RoomId};

/// Commands from the coordinator handle (and the watchdog) into the session
/// loop.
pub(crate) enum SessionCommand {
    Join {
        room: RoomId,
        reply: oneshot::Sender<Result<(), JoinError>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    SetMuted {
        muted: bool,
        reply: oneshot::Sender<bool>,
    },
    Inspect {
        reply: oneshot::Sender<SessionStatus>,
    },
    HealthCheck,
}

/// An asynchronous event funneled into the session loop, stamped with the
/// epoch of the wiring that produced it. Events from a superseded epoch are
/// dropped unprocessed, so a torn-down session is never resurrected.
pub(crate) struct SessionEvent {
    pub epoch: u64,
    pub kind: SessionEventKind,
}

pub(crate) enum SessionEventKind {
    Presence(PresenceSnapshot),
    Offer(AddressedSdp),
    Answer(AddressedSdp),
    Candidate(AddressedCandidate),
    Peer(ParticipantId, TransportEvent),
}

/// Point-in-time view of the session, for inspection and tests.
#[derive(Debug, Clone, Default)]
pub struct SessionStatus {
    pub room: Option<RoomId>,
    pub participants: Vec<ParticipantId>,
    pub connections: Vec<(ParticipantId, ConnectionState)>,
}
