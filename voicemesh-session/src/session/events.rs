use async_trait::async_trait;
use voicemesh_core::ParticipantId;

/// Callbacks surfaced to the embedding UI layer. Invoked from the session
/// loop, one at a time.
#[async_trait]
pub trait SessionEvents: Send + Sync + 'static {
    async fn on_participant_joined(&self, participant: ParticipantId);

    async fn on_participant_left(&self, participant: ParticipantId);

    /// Negotiation with this peer failed after the recovery attempt; the rest
    /// of the mesh is unaffected.
    async fn on_peer_unreachable(&self, participant: ParticipantId) {
        let _ = participant;
    }
}
