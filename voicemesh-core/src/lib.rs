pub mod error;
pub mod model;

pub use error::{JoinError, MediaError, NegotiationError, SignalingError};
pub use model::{IceCandidate, ParticipantId, PresenceInfo, RoomId, SdpKind, SessionDescription};
