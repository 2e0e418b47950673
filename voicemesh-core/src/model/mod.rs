mod participant;
mod room;
mod signal;

pub use participant::{ParticipantId, PresenceInfo};
pub use room::RoomId;
pub use signal::{IceCandidate, SdpKind, SessionDescription};
