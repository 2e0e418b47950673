use crate::signaling::PresenceSnapshot;
use std::collections::HashSet;
use voicemesh_core::ParticipantId;

/// Participants that appeared and disappeared between two presence snapshots.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MembershipDiff {
    pub joined: Vec<ParticipantId>,
    pub left: Vec<ParticipantId>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

/// Derives join/leave events from successive presence snapshots of a room.
///
/// The local participant is always excluded from the remote set. Applying the
/// same snapshot twice yields an empty diff, so replayed deliveries produce
/// no spurious events.
pub struct MembershipTracker {
    local: ParticipantId,
    previous: HashSet<ParticipantId>,
}

impl MembershipTracker {
    pub fn new(local: ParticipantId) -> Self {
        Self {
            local,
            previous: HashSet::new(),
        }
    }

    /// Diff a snapshot against the previously seen membership and advance.
    /// Events are sorted by id so emission order is deterministic.
    pub fn apply(&mut self, snapshot: &PresenceSnapshot) -> MembershipDiff {
        let current: HashSet<ParticipantId> = snapshot
            .keys()
            .filter(|id| **id != self.local)
            .cloned()
            .collect();

        let mut joined: Vec<ParticipantId> = current.difference(&self.previous).cloned().collect();
        let mut left: Vec<ParticipantId> = self.previous.difference(&current).cloned().collect();
        joined.sort();
        left.sort();

        self.previous = current;
        MembershipDiff { joined, left }
    }

    /// Remote participants as of the last applied snapshot.
    pub fn remote_participants(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self.previous.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether a remote participant is in the room as of the last snapshot.
    pub fn is_present(&self, participant: &ParticipantId) -> bool {
        self.previous.contains(participant)
    }
}
