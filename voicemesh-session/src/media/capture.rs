use crate::media::AudioFrame;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use voicemesh_core::MediaError;

/// A stream of encoded audio frames; `None` means the stream ended.
#[async_trait]
pub trait AudioSource: Send {
    async fn next_frame(&mut self) -> Option<AudioFrame>;
}

/// A live capture device. One device exists per joined session; every
/// connection reads through its own independent source.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    fn open_source(&self) -> Box<dyn AudioSource>;

    async fn stop(&self);
}

/// Opens the local audio input. Failures map one-to-one onto the
/// user-actionable `MediaError` kinds.
#[async_trait]
pub trait AudioCaptureDriver: Send + Sync + 'static {
    async fn open(&self) -> Result<Arc<dyn CaptureDevice>, MediaError>;
}

/// Cheap per-connection handle onto the shared capture device. Sources opened
/// through it respect the session-wide transmit gate: while muted the device
/// keeps capturing but nothing is yielded for transmission.
#[derive(Clone)]
pub struct CaptureHandle {
    device: Arc<dyn CaptureDevice>,
    transmit: Arc<AtomicBool>,
}

impl CaptureHandle {
    pub(crate) fn new(device: Arc<dyn CaptureDevice>, transmit: Arc<AtomicBool>) -> Self {
        Self { device, transmit }
    }

    pub fn open_source(&self) -> Box<dyn AudioSource> {
        Box::new(GatedSource {
            inner: self.device.open_source(),
            transmit: self.transmit.clone(),
        })
    }

    pub fn is_transmitting(&self) -> bool {
        self.transmit.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("transmitting", &self.is_transmitting())
            .finish_non_exhaustive()
    }
}

struct GatedSource {
    inner: Box<dyn AudioSource>,
    transmit: Arc<AtomicBool>,
}

#[async_trait]
impl AudioSource for GatedSource {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        loop {
            let frame = self.inner.next_frame().await?;
            if self.transmit.load(Ordering::SeqCst) {
                return Some(frame);
            }
            // Muted: keep draining the device without transmitting.
        }
    }
}
