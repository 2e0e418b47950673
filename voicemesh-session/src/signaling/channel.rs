use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;
use voicemesh_core::{
    IceCandidate, ParticipantId, PresenceInfo, RoomId, SessionDescription, SignalingError,
};

/// Every presence record currently in a room, delivered on each change.
pub type PresenceSnapshot = HashMap<ParticipantId, PresenceInfo>;

/// An offer or answer together with the participant it came from.
#[derive(Debug, Clone)]
pub struct AddressedSdp {
    pub from: ParticipantId,
    pub description: SessionDescription,
}

#[derive(Debug, Clone)]
pub struct AddressedCandidate {
    pub from: ParticipantId,
    pub candidate: IceCandidate,
}

/// Guard for an active watch. The disposer runs exactly once, either through
/// an explicit `cancel` or when the guard is dropped. Held inside session
/// state that lives across await points, so it must be `Sync` as well.
pub struct Subscription {
    disposer: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(disposer: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            disposer: Some(Box::new(disposer)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }
}

/// Shared low-latency broadcast medium carrying presence records and
/// connection-negotiation messages for a room.
///
/// Addressing follows the wire layout: presence is keyed by
/// (room, participant) and is last-write-wins; offer and answer slots are
/// keyed by (room, from, to); candidates are keyed by (room, from, to,
/// sequence) and are append-only, so readers must tolerate duplicates and
/// replays. There is no ordering guarantee across message kinds.
///
/// Write failures surface to the caller as `TransportUnreachable`; watch
/// failures are retried by the session watchdog rather than swallowed.
#[async_trait]
pub trait SignalingChannel: Send + Sync + 'static {
    async fn announce_presence(
        &self,
        room: &RoomId,
        participant: &ParticipantId,
        info: PresenceInfo,
    ) -> Result<(), SignalingError>;

    async fn remove_presence(
        &self,
        room: &RoomId,
        participant: &ParticipantId,
    ) -> Result<(), SignalingError>;

    /// Watch the presence records of a room. The current snapshot is delivered
    /// immediately, then again on every change.
    async fn watch_presence(
        &self,
        room: &RoomId,
        updates: mpsc::Sender<PresenceSnapshot>,
    ) -> Result<Subscription, SignalingError>;

    async fn send_offer(
        &self,
        room: &RoomId,
        from: &ParticipantId,
        to: &ParticipantId,
        description: SessionDescription,
    ) -> Result<(), SignalingError>;

    async fn send_answer(
        &self,
        room: &RoomId,
        from: &ParticipantId,
        to: &ParticipantId,
        description: SessionDescription,
    ) -> Result<(), SignalingError>;

    async fn send_candidate(
        &self,
        room: &RoomId,
        from: &ParticipantId,
        to: &ParticipantId,
        candidate: IceCandidate,
    ) -> Result<(), SignalingError>;

    async fn watch_offers(
        &self,
        room: &RoomId,
        to: &ParticipantId,
        messages: mpsc::Sender<AddressedSdp>,
    ) -> Result<Subscription, SignalingError>;

    async fn watch_answers(
        &self,
        room: &RoomId,
        to: &ParticipantId,
        messages: mpsc::Sender<AddressedSdp>,
    ) -> Result<Subscription, SignalingError>;

    async fn watch_candidates(
        &self,
        room: &RoomId,
        to: &ParticipantId,
        messages: mpsc::Sender<AddressedCandidate>,
    ) -> Result<Subscription, SignalingError>;
}
