use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use voicemesh_core::{IceCandidate, NegotiationError, ParticipantId, SessionDescription};
use voicemesh_session::connection::{
    PeerTransport, PeerTransportFactory, TransportEvent, TransportState,
};
use voicemesh_session::media::CaptureHandle;

/// In-process transport backend. The handshake succeeds instantly: applying
/// a remote offer or answer reports the connection as established, and one
/// scripted candidate is produced per created transport so candidate routing
/// can be observed end to end.
pub struct TestTransportFactory {
    local: ParticipantId,
    inner: Arc<FactoryState>,
}

#[derive(Default)]
struct FactoryState {
    event_senders: Mutex<HashMap<ParticipantId, mpsc::Sender<TransportEvent>>>,
    received_candidates: Mutex<HashMap<ParticipantId, Vec<IceCandidate>>>,
    created: Mutex<Vec<ParticipantId>>,
    restarts: Mutex<Vec<ParticipantId>>,
}

impl TestTransportFactory {
    pub fn new(local: impl Into<ParticipantId>) -> Arc<Self> {
        Arc::new(Self {
            local: local.into(),
            inner: Arc::new(FactoryState::default()),
        })
    }

    /// Inject a transport-level event for the connection to `peer`, as if the
    /// backend had reported it.
    pub async fn emit(&self, peer: &ParticipantId, event: TransportEvent) {
        let sender = {
            let senders = self.inner.event_senders.lock().await;
            senders.get(peer).cloned()
        };
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    pub async fn report_failure(&self, peer: &ParticipantId) {
        self.emit(peer, TransportEvent::StateChanged(TransportState::Failed))
            .await;
    }

    pub async fn candidates_from(&self, peer: &ParticipantId) -> Vec<IceCandidate> {
        self.inner
            .received_candidates
            .lock()
            .await
            .get(peer)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn transports_created(&self) -> usize {
        self.inner.created.lock().await.len()
    }

    pub async fn restarts_for(&self, peer: &ParticipantId) -> usize {
        self.inner
            .restarts
            .lock()
            .await
            .iter()
            .filter(|p| *p == peer)
            .count()
    }
}

#[async_trait]
impl PeerTransportFactory for TestTransportFactory {
    async fn create(
        &self,
        peer: &ParticipantId,
        _local_audio: CaptureHandle,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn PeerTransport>, NegotiationError> {
        self.inner.created.lock().await.push(peer.clone());
        self.inner
            .event_senders
            .lock()
            .await
            .insert(peer.clone(), events.clone());
        Ok(Box::new(TestTransport {
            local: self.local.clone(),
            peer: peer.clone(),
            events,
            shared: self.inner.clone(),
        }))
    }
}

struct TestTransport {
    local: ParticipantId,
    peer: ParticipantId,
    events: mpsc::Sender<TransportEvent>,
    shared: Arc<FactoryState>,
}

impl TestTransport {
    async fn emit_local_candidate(&self) {
        let candidate = IceCandidate {
            candidate: format!("candidate:{}", self.local),
            sdp_mid: Some("0".to_owned()),
            sdp_m_line_index: Some(0),
        };
        let _ = self
            .events
            .send(TransportEvent::CandidateGenerated(candidate))
            .await;
    }

    async fn report_connected(&self) {
        let _ = self
            .events
            .send(TransportEvent::StateChanged(TransportState::Connected))
            .await;
    }
}

#[async_trait]
impl PeerTransport for TestTransport {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.emit_local_candidate().await;
        Ok(SessionDescription::offer(format!("offer from {}", self.local)))
    }

    async fn apply_remote_offer(
        &self,
        _offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.emit_local_candidate().await;
        self.report_connected().await;
        Ok(SessionDescription::answer(format!(
            "answer from {}",
            self.local
        )))
    }

    async fn apply_remote_answer(
        &self,
        _answer: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.report_connected().await;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.shared
            .received_candidates
            .lock()
            .await
            .entry(self.peer.clone())
            .or_default()
            .push(candidate);
        Ok(())
    }

    async fn restart_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.shared.restarts.lock().await.push(self.peer.clone());
        Ok(SessionDescription::offer(format!(
            "restart offer from {}",
            self.local
        )))
    }

    async fn close(&self) {}
}
