#![allow(dead_code)]

pub mod mock_media;
pub mod mock_transport;

pub use mock_media::{NullOutput, TestCaptureDriver};
pub use mock_transport::TestTransportFactory;

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::Level;
use voicemesh_core::ParticipantId;
use voicemesh_session::signaling::MemorySignaling;
use voicemesh_session::{SessionConfig, SessionCoordinator, SessionEvents, WatchdogConfig};

/// Initialize tracing for tests (call once per test).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or the timeout expires.
pub async fn wait_until<F, Fut>(timeout_ms: u64, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Captures session callbacks for verification.
#[derive(Clone, Default)]
pub struct RecordingEvents {
    joined: Arc<Mutex<Vec<ParticipantId>>>,
    left: Arc<Mutex<Vec<ParticipantId>>>,
    unreachable: Arc<Mutex<Vec<ParticipantId>>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn joined(&self) -> Vec<ParticipantId> {
        self.joined.lock().await.clone()
    }

    pub async fn has_left(&self, participant: &ParticipantId) -> bool {
        self.left.lock().await.contains(participant)
    }

    pub async fn has_unreachable(&self, participant: &ParticipantId) -> bool {
        self.unreachable.lock().await.contains(participant)
    }
}

#[async_trait]
impl SessionEvents for RecordingEvents {
    async fn on_participant_joined(&self, participant: ParticipantId) {
        self.joined.lock().await.push(participant);
    }

    async fn on_participant_left(&self, participant: ParticipantId) {
        self.left.lock().await.push(participant);
    }

    async fn on_peer_unreachable(&self, participant: ParticipantId) {
        self.unreachable.lock().await.push(participant);
    }
}

/// Everything a test needs to drive one participant.
pub struct TestParticipant {
    pub coordinator: SessionCoordinator,
    pub transports: Arc<TestTransportFactory>,
    pub events: RecordingEvents,
    pub device_opens: Arc<AtomicUsize>,
}

/// Session config with a watchdog fast enough for tests.
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        watchdog: WatchdogConfig {
            interval: Duration::from_millis(50),
            max_consecutive_failures: 12,
        },
        ..Default::default()
    }
}

pub fn participant(name: &str, hub: &MemorySignaling, config: SessionConfig) -> TestParticipant {
    let transports = TestTransportFactory::new(name);
    let events = RecordingEvents::new();
    let (driver, device_opens) = TestCaptureDriver::new();
    let coordinator = SessionCoordinator::new(
        ParticipantId::from(name),
        Arc::new(hub.clone()),
        transports.clone(),
        driver,
        Arc::new(NullOutput),
        Arc::new(events.clone()),
        config,
    );
    TestParticipant {
        coordinator,
        transports,
        events,
        device_opens,
    }
}
