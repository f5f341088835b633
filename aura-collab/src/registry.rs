//! Session registry: the canonical set of connected participants.
//!
//! One record per live connection, created at connect and destroyed at
//! disconnect. The registry is plain data — the server's sequencer is its
//! only writer, so no interior locking lives here.

use std::collections::HashMap;

use crate::protocol::{Color, Participant, ParticipantId, Vec3};

/// Pose every participant spawns with, matching the scene's floor height.
pub const SPAWN_POSITION: Vec3 = Vec3 { x: 0.0, y: 1.0, z: 0.0 };

/// Canonical participant set.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    participants: HashMap<ParticipantId, Participant>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self { participants: HashMap::new() }
    }

    /// Create a participant record for a new connection: fresh id, spawn
    /// pose, and a stable color derived from the id. O(1).
    pub fn register(&mut self) -> Participant {
        let id = ParticipantId::random();
        let participant = Participant {
            id,
            position: SPAWN_POSITION,
            orientation: Vec3::ZERO,
            color: Color::from_uuid(id.0),
        };
        self.participants.insert(id, participant.clone());
        participant
    }

    /// Update a participant's pose. Unknown ids (a command racing its own
    /// disconnect) are a silent no-op, never an error.
    pub fn update(&mut self, id: ParticipantId, position: Vec3, orientation: Vec3) -> bool {
        match self.participants.get_mut(&id) {
            Some(p) => {
                p.position = position;
                p.orientation = orientation;
                true
            }
            None => false,
        }
    }

    /// Remove a participant record. Idempotent; returns the record the
    /// first time only.
    pub fn unregister(&mut self, id: ParticipantId) -> Option<Participant> {
        self.participants.remove(&id)
    }

    /// Point-in-time view of every participant.
    pub fn snapshot(&self) -> HashMap<ParticipantId, Participant> {
        self.participants.clone()
    }

    /// Point-in-time view of every participant except `exclude` — the
    /// shape a joining client's snapshot wants.
    pub fn snapshot_excluding(&self, exclude: ParticipantId) -> HashMap<ParticipantId, Participant> {
        self.participants
            .iter()
            .filter(|(id, _)| **id != exclude)
            .map(|(id, p)| (*id, p.clone()))
            .collect()
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.participants.contains_key(&id)
    }

    /// Ids of everyone currently registered.
    pub fn ids(&self) -> Vec<ParticipantId> {
        self.participants.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
