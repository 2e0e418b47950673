//! Mesh voice session engine: room membership, pairwise audio connection
//! lifecycle, local capture gating and the reconnection watchdog, all driven
//! by a single per-session event loop.

pub mod connection;
pub mod media;
pub mod membership;
pub mod session;
pub mod signaling;

pub use connection::{
    ConnectionState, PeerTransport, PeerTransportFactory, RtcConfig, RtcTransportFactory,
    TransportEvent, TransportState,
};
pub use media::{AudioCaptureDriver, AudioFrame, AudioOutput, AudioSink, AudioSource};
pub use session::{
    SessionConfig, SessionCoordinator, SessionEvents, SessionStatus, WatchdogConfig,
};
pub use signaling::{MemorySignaling, SignalingChannel, Subscription};
