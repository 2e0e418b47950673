use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use voicemesh_core::{MediaError, ParticipantId};
use voicemesh_session::media::{
    AudioCaptureDriver, AudioFrame, AudioOutput, AudioSink, AudioSource, CaptureDevice,
};

/// Capture driver that counts device opens and can be scripted to fail.
pub struct TestCaptureDriver {
    opens: Arc<AtomicUsize>,
    fail_with: Option<MediaError>,
}

impl TestCaptureDriver {
    pub fn new() -> (Arc<Self>, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let driver = Arc::new(Self {
            opens: opens.clone(),
            fail_with: None,
        });
        (driver, opens)
    }

    pub fn failing(error: MediaError) -> Arc<Self> {
        Arc::new(Self {
            opens: Arc::new(AtomicUsize::new(0)),
            fail_with: Some(error),
        })
    }
}

#[async_trait]
impl AudioCaptureDriver for TestCaptureDriver {
    async fn open(&self) -> Result<Arc<dyn CaptureDevice>, MediaError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(error) => Err(error.clone()),
            None => Ok(Arc::new(SilentDevice)),
        }
    }
}

struct SilentDevice;

#[async_trait]
impl CaptureDevice for SilentDevice {
    fn open_source(&self) -> Box<dyn AudioSource> {
        Box::new(SilentSource)
    }

    async fn stop(&self) {}
}

struct SilentSource;

#[async_trait]
impl AudioSource for SilentSource {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        None
    }
}

/// Playback that discards everything.
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn create_sink(&self, _participant: &ParticipantId) -> Box<dyn AudioSink> {
        Box::new(NullSink)
    }
}

struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn write(&mut self, _frame: AudioFrame) {}
}
