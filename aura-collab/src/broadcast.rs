//! Fan-out of sequenced events to every connection, with backpressure.
//!
//! One tokio broadcast channel carries pre-encoded frames to all connection
//! tasks. Because the sequencer pushes frames while it still holds the
//! scene lock, the channel order *is* the canonical event order, and every
//! connection observes the same total order for object events.
//!
//! Each frame carries a recipient scope; connection tasks filter frames
//! against their own participant id. That is how "everyone except the
//! sender" (pose echoes) and "only this recipient" (personalized snapshot
//! re-sends) are expressed without per-connection channels.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 8

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::protocol::{ParticipantId, ProtocolError, ServerEvent};

/// Who a frame is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Every connection, including the originator.
    All,
    /// Every connection except this one (pose updates, join/leave echoes).
    Except(ParticipantId),
    /// Exactly one connection (personalized snapshot re-sends).
    Only(ParticipantId),
}

impl Scope {
    /// Whether a connection owned by `id` should forward this frame.
    pub fn delivers_to(&self, id: ParticipantId) -> bool {
        match self {
            Scope::All => true,
            Scope::Except(excluded) => *excluded != id,
            Scope::Only(target) => *target == id,
        }
    }
}

/// A pre-encoded event frame on the fan-out channel.
///
/// The payload is encoded once by the sequencer and shared by reference,
/// so fanning out to N connections never re-serializes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub scope: Scope,
    pub payload: Arc<str>,
}

/// Statistics for monitoring fan-out health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub frames_sent: u64,
    pub active_receivers: usize,
}

/// The scene-wide broadcast group.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Frame>,
    capacity: usize,
    /// Lock-free counter; never touches a lock on the hot path.
    frames_sent: AtomicU64,
}

impl BroadcastGroup {
    /// Create a broadcast group buffering up to `capacity` frames per
    /// receiver before lagging connections start dropping.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            frames_sent: AtomicU64::new(0),
        }
    }

    /// Encode `event` once and push it to all receivers.
    ///
    /// Returns the number of receivers the frame reached. Zero receivers
    /// (an empty scene) is not an error.
    pub fn send(&self, scope: Scope, event: &ServerEvent) -> Result<usize, ProtocolError> {
        let payload: Arc<str> = Arc::from(event.encode()?.as_str());
        Ok(self.send_frame(Frame { scope, payload }))
    }

    /// Push a pre-encoded frame (zero-copy fast path).
    pub fn send_frame(&self, frame: Frame) -> usize {
        let count = self.sender.send(frame).unwrap_or(0);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Subscribe a new connection to the fan-out stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.sender.subscribe()
    }

    /// Fan-out statistics (lock-free snapshot).
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            active_receivers: self.sender.receiver_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
