use crate::model::ParticipantId;
use thiserror::Error;

/// Local audio capture failures. Each kind is user-actionable on its own, so
/// callers must never collapse them into a generic failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("no audio capture device available")]
    DeviceUnavailable,

    #[error("audio capture permission denied")]
    PermissionDenied,

    #[error("audio capture device is busy")]
    DeviceBusy,
}

/// Signaling channel I/O failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    #[error("signaling transport unreachable: {0}")]
    TransportUnreachable(String),
}

/// A connection's negotiation could not be completed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("negotiation with {participant} failed: {reason}")]
pub struct NegotiationError {
    pub participant: ParticipantId,
    pub reason: String,
}

impl NegotiationError {
    pub fn new(participant: ParticipantId, reason: impl Into<String>) -> Self {
        Self {
            participant,
            reason: reason.into(),
        }
    }
}

/// Why a `join` could not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),
}
