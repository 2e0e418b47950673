use crate::media::{AudioCaptureDriver, CaptureDevice, CaptureHandle};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use voicemesh_core::MediaError;

/// Owns the single local capture device for the duration of a joined session.
///
/// Mute flips a shared transmit gate without touching the device, so
/// unmuting never re-acquires (and never re-prompts for permission).
pub struct LocalMediaController {
    driver: Arc<dyn AudioCaptureDriver>,
    device: Option<Arc<dyn CaptureDevice>>,
    transmit: Arc<AtomicBool>,
}

impl LocalMediaController {
    pub fn new(driver: Arc<dyn AudioCaptureDriver>) -> Self {
        Self {
            driver,
            device: None,
            transmit: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Open the capture device if not already held. Idempotent: a second call
    /// returns a handle onto the same acquisition.
    pub async fn acquire(&mut self) -> Result<CaptureHandle, MediaError> {
        if self.device.is_none() {
            debug!("acquiring local capture device");
            self.device = Some(self.driver.open().await?);
        }
        let device = self.device.as_ref().cloned();
        match device {
            Some(device) => Ok(CaptureHandle::new(device, self.transmit.clone())),
            None => Err(MediaError::DeviceUnavailable),
        }
    }

    pub async fn release(&mut self) {
        if let Some(device) = self.device.take() {
            debug!("releasing local capture device");
            device.stop().await;
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.device.is_some()
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.transmit.store(!muted, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        !self.transmit.load(Ordering::SeqCst)
    }
}
