use crate::media::AudioFrame;
use async_trait::async_trait;
use voicemesh_core::ParticipantId;

/// Destination for one remote participant's audio.
#[async_trait]
pub trait AudioSink: Send {
    async fn write(&mut self, frame: AudioFrame);
}

/// Playback collaborator: asked for a sink whenever a remote track arrives.
/// A new sink for a participant replaces any prior one.
pub trait AudioOutput: Send + Sync + 'static {
    fn create_sink(&self, participant: &ParticipantId) -> Box<dyn AudioSink>;
}
