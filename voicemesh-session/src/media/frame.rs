use bytes::Bytes;
use std::time::Duration;

/// One encoded audio frame. The payload is already codec-encoded (Opus for
/// the WebRTC backend); encoding is the capture backend's concern.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub data: Bytes,
    pub duration: Duration,
}

impl AudioFrame {
    pub fn new(data: Bytes, duration: Duration) -> Self {
        Self { data, duration }
    }
}
