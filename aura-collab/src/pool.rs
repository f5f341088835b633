//! Shared totem pool: the capacity-bounded, creation-ordered object store.
//!
//! The ordering is load-bearing: eviction is strict FIFO, so the sequence
//! position of a totem decides which one pays for the next creation once
//! the pool is full. Capacity enforcement is create-then-evict — a
//! placement always succeeds from the requester's point of view, and the
//! cost is the silent disappearance of the oldest totem. That tradeoff
//! (simple "anything you place appears" UX, surprising deletions of old
//! content) is intentional; do not change it to reject-on-full.

use std::collections::VecDeque;

use crate::protocol::{Totem, TotemId, TotemKind, TotemSpec, Vec3};

/// Default scene capacity.
pub const DEFAULT_CAPACITY: usize = 20;

/// Canonical ordered totem collection.
#[derive(Debug)]
pub struct TotemPool {
    totems: VecDeque<Totem>,
    capacity: usize,
}

impl TotemPool {
    /// Create a pool bounded to `capacity` totems (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            totems: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Place a new totem at the tail of the sequence.
    ///
    /// If the pool is already at capacity, the oldest totem is removed
    /// first and its id returned so the caller can broadcast the eviction
    /// strictly before the creation.
    pub fn create(&mut self, position: Vec3, kind: TotemKind) -> (Totem, Option<TotemId>) {
        let evicted = if self.totems.len() >= self.capacity {
            self.totems.pop_front().map(|t| t.id)
        } else {
            None
        };

        let totem = Totem { id: TotemId::random(), position, kind };
        self.totems.push_back(totem.clone());
        (totem, evicted)
    }

    /// Remove a totem by id. Returns `false` when the id is already gone —
    /// a normal outcome of racing removals/evictions, not an error.
    pub fn remove(&mut self, id: TotemId) -> bool {
        let before = self.totems.len();
        self.totems.retain(|t| t.id != id);
        self.totems.len() != before
    }

    /// Empty the pool unconditionally.
    pub fn clear(&mut self) {
        self.totems.clear();
    }

    /// Atomically replace the whole pool with freshly-identified totems.
    ///
    /// If more than `capacity` specs are supplied, only the last
    /// `capacity` survive — the same FIFO rule applied to the incoming
    /// order, with no partially-visible intermediate state.
    pub fn replace_all(&mut self, specs: &[TotemSpec]) {
        self.totems.clear();
        let skip = specs.len().saturating_sub(self.capacity);
        for spec in &specs[skip..] {
            self.totems.push_back(Totem {
                id: TotemId::random(),
                position: spec.position,
                kind: spec.kind,
            });
        }
    }

    /// Point-in-time copy of the sequence, oldest first.
    pub fn snapshot(&self) -> Vec<Totem> {
        self.totems.iter().cloned().collect()
    }

    /// Id of the oldest surviving totem (the next eviction candidate).
    pub fn oldest(&self) -> Option<TotemId> {
        self.totems.front().map(|t| t.id)
    }

    pub fn contains(&self, id: TotemId) -> bool {
        self.totems.iter().any(|t| t.id == id)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.totems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totems.is_empty()
    }
}

impl Default for TotemPool {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
