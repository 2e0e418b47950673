use crate::signaling::{
    AddressedCandidate, AddressedSdp, PresenceSnapshot, SignalingChannel, Subscription,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;
use voicemesh_core::{
    IceCandidate, ParticipantId, PresenceInfo, RoomId, SessionDescription, SignalingError,
};

type SlotKey = (RoomId, ParticipantId, ParticipantId);
type InboxKey = (RoomId, ParticipantId);
type Watchers<T> = HashMap<u64, mpsc::Sender<T>>;

#[derive(Default)]
struct MemoryState {
    presence: DashMap<RoomId, HashMap<ParticipantId, PresenceInfo>>,
    offers: DashMap<SlotKey, SessionDescription>,
    answers: DashMap<SlotKey, SessionDescription>,
    candidates: DashMap<InboxKey, Vec<AddressedCandidate>>,

    presence_watchers: DashMap<RoomId, Watchers<PresenceSnapshot>>,
    offer_watchers: DashMap<InboxKey, Watchers<AddressedSdp>>,
    answer_watchers: DashMap<InboxKey, Watchers<AddressedSdp>>,
    candidate_watchers: DashMap<InboxKey, Watchers<AddressedCandidate>>,

    next_watcher: AtomicU64,
    offline: AtomicBool,
}

/// In-process signaling hub with the delivery semantics of the hosted
/// realtime store it stands in for: presence and offer/answer slots are
/// last-write-wins and replayed to a fresh watcher, candidates are
/// append-only and replayed in order, and delivery is at-least-once.
///
/// Cloning yields another handle onto the same hub, so several sessions in
/// one process can signal each other through it.
#[derive(Clone, Default)]
pub struct MemorySignaling {
    state: Arc<MemoryState>,
}

impl MemorySignaling {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a network outage: while offline every operation fails with
    /// `TransportUnreachable`.
    pub fn set_offline(&self, offline: bool) {
        self.state.offline.store(offline, Ordering::SeqCst);
    }

    /// Current presence records of a room.
    pub fn presence_of(&self, room: &RoomId) -> PresenceSnapshot {
        self.state
            .presence
            .get(room)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// The offer slot for an ordered (from, to) pair, if one was written.
    pub fn offer_between(
        &self,
        room: &RoomId,
        from: &ParticipantId,
        to: &ParticipantId,
    ) -> Option<SessionDescription> {
        self.state
            .offers
            .get(&(room.clone(), from.clone(), to.clone()))
            .map(|slot| slot.clone())
    }

    /// Drop a presence record without the participant cooperating, the way an
    /// external TTL sweeper would after a silent crash.
    pub async fn expire_presence(&self, room: &RoomId, participant: &ParticipantId) {
        self.remove_record(room, participant);
        self.broadcast_presence(room).await;
    }

    fn check_online(&self) -> Result<(), SignalingError> {
        if self.state.offline.load(Ordering::SeqCst) {
            return Err(SignalingError::TransportUnreachable(
                "signaling store offline".to_owned(),
            ));
        }
        Ok(())
    }

    fn remove_record(&self, room: &RoomId, participant: &ParticipantId) {
        if let Some(mut records) = self.state.presence.get_mut(room) {
            records.remove(participant);
        }
    }

    async fn broadcast_presence(&self, room: &RoomId) {
        let snapshot = self.presence_of(room);
        let targets: Vec<mpsc::Sender<PresenceSnapshot>> = self
            .state
            .presence_watchers
            .get(room)
            .map(|watchers| watchers.values().cloned().collect())
            .unwrap_or_default();
        for tx in targets {
            let _ = tx.send(snapshot.clone()).await;
        }
    }

    async fn deliver<T: Clone>(
        state: &MemoryState,
        table: fn(&MemoryState) -> &DashMap<InboxKey, Watchers<T>>,
        key: &InboxKey,
        message: T,
    ) {
        let targets: Vec<mpsc::Sender<T>> = table(state)
            .get(key)
            .map(|watchers| watchers.values().cloned().collect())
            .unwrap_or_default();
        for tx in targets {
            let _ = tx.send(message.clone()).await;
        }
    }
}

#[async_trait]
impl SignalingChannel for MemorySignaling {
    async fn announce_presence(
        &self,
        room: &RoomId,
        participant: &ParticipantId,
        info: PresenceInfo,
    ) -> Result<(), SignalingError> {
        self.check_online()?;
        self.state
            .presence
            .entry(room.clone())
            .or_default()
            .insert(participant.clone(), info);
        self.broadcast_presence(room).await;
        Ok(())
    }

    async fn remove_presence(
        &self,
        room: &RoomId,
        participant: &ParticipantId,
    ) -> Result<(), SignalingError> {
        self.check_online()?;
        self.remove_record(room, participant);
        self.broadcast_presence(room).await;
        Ok(())
    }

    async fn watch_presence(
        &self,
        room: &RoomId,
        updates: mpsc::Sender<PresenceSnapshot>,
    ) -> Result<Subscription, SignalingError> {
        self.check_online()?;
        let id = self.state.next_watcher.fetch_add(1, Ordering::Relaxed);
        self.state
            .presence_watchers
            .entry(room.clone())
            .or_default()
            .insert(id, updates.clone());

        // A fresh watcher sees the current membership right away.
        let _ = updates.send(self.presence_of(room)).await;

        let state = self.state.clone();
        let room = room.clone();
        Ok(Subscription::new(move || {
            if let Some(mut watchers) = state.presence_watchers.get_mut(&room) {
                watchers.remove(&id);
            }
        }))
    }

    async fn send_offer(
        &self,
        room: &RoomId,
        from: &ParticipantId,
        to: &ParticipantId,
        description: SessionDescription,
    ) -> Result<(), SignalingError> {
        self.check_online()?;
        self.state.offers.insert(
            (room.clone(), from.clone(), to.clone()),
            description.clone(),
        );
        let message = AddressedSdp {
            from: from.clone(),
            description,
        };
        Self::deliver(
            &self.state,
            |s| &s.offer_watchers,
            &(room.clone(), to.clone()),
            message,
        )
        .await;
        Ok(())
    }

    async fn send_answer(
        &self,
        room: &RoomId,
        from: &ParticipantId,
        to: &ParticipantId,
        description: SessionDescription,
    ) -> Result<(), SignalingError> {
        self.check_online()?;
        self.state.answers.insert(
            (room.clone(), from.clone(), to.clone()),
            description.clone(),
        );
        let message = AddressedSdp {
            from: from.clone(),
            description,
        };
        Self::deliver(
            &self.state,
            |s| &s.answer_watchers,
            &(room.clone(), to.clone()),
            message,
        )
        .await;
        Ok(())
    }

    async fn send_candidate(
        &self,
        room: &RoomId,
        from: &ParticipantId,
        to: &ParticipantId,
        candidate: IceCandidate,
    ) -> Result<(), SignalingError> {
        self.check_online()?;
        let message = AddressedCandidate {
            from: from.clone(),
            candidate,
        };
        self.state
            .candidates
            .entry((room.clone(), to.clone()))
            .or_default()
            .push(message.clone());
        Self::deliver(
            &self.state,
            |s| &s.candidate_watchers,
            &(room.clone(), to.clone()),
            message,
        )
        .await;
        Ok(())
    }

    async fn watch_offers(
        &self,
        room: &RoomId,
        to: &ParticipantId,
        messages: mpsc::Sender<AddressedSdp>,
    ) -> Result<Subscription, SignalingError> {
        self.check_online()?;
        let key = (room.clone(), to.clone());
        let id = self.state.next_watcher.fetch_add(1, Ordering::Relaxed);
        self.state
            .offer_watchers
            .entry(key.clone())
            .or_default()
            .insert(id, messages.clone());

        // Replay existing slots addressed to this recipient; duplicates are
        // tolerated by the reader.
        let backlog: Vec<AddressedSdp> = self
            .state
            .offers
            .iter()
            .filter(|entry| entry.key().0 == *room && entry.key().2 == *to)
            .map(|entry| AddressedSdp {
                from: entry.key().1.clone(),
                description: entry.value().clone(),
            })
            .collect();
        for message in backlog {
            let _ = messages.send(message).await;
        }

        let state = self.state.clone();
        Ok(Subscription::new(move || {
            if let Some(mut watchers) = state.offer_watchers.get_mut(&key) {
                watchers.remove(&id);
            }
        }))
    }

    async fn watch_answers(
        &self,
        room: &RoomId,
        to: &ParticipantId,
        messages: mpsc::Sender<AddressedSdp>,
    ) -> Result<Subscription, SignalingError> {
        self.check_online()?;
        let key = (room.clone(), to.clone());
        let id = self.state.next_watcher.fetch_add(1, Ordering::Relaxed);
        self.state
            .answer_watchers
            .entry(key.clone())
            .or_default()
            .insert(id, messages.clone());

        let backlog: Vec<AddressedSdp> = self
            .state
            .answers
            .iter()
            .filter(|entry| entry.key().0 == *room && entry.key().2 == *to)
            .map(|entry| AddressedSdp {
                from: entry.key().1.clone(),
                description: entry.value().clone(),
            })
            .collect();
        for message in backlog {
            let _ = messages.send(message).await;
        }

        let state = self.state.clone();
        Ok(Subscription::new(move || {
            if let Some(mut watchers) = state.answer_watchers.get_mut(&key) {
                watchers.remove(&id);
            }
        }))
    }

    async fn watch_candidates(
        &self,
        room: &RoomId,
        to: &ParticipantId,
        messages: mpsc::Sender<AddressedCandidate>,
    ) -> Result<Subscription, SignalingError> {
        self.check_online()?;
        let key = (room.clone(), to.clone());
        let id = self.state.next_watcher.fetch_add(1, Ordering::Relaxed);
        self.state
            .candidate_watchers
            .entry(key.clone())
            .or_default()
            .insert(id, messages.clone());

        let backlog: Vec<AddressedCandidate> = self
            .state
            .candidates
            .get(&key)
            .map(|buffered| buffered.clone())
            .unwrap_or_default();
        debug!(room = %room, to = %to, replayed = backlog.len(), "candidate watcher attached");
        for message in backlog {
            let _ = messages.send(message).await;
        }

        let state = self.state.clone();
        Ok(Subscription::new(move || {
            if let Some(mut watchers) = state.candidate_watchers.get_mut(&key) {
                watchers.remove(&id);
            }
        }))
    }
}
