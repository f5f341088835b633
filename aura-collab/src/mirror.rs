//! Client-side scene mirror: a local, advisory copy of canonical state.
//!
//! The mirror always trusts the server. It never resolves conflicts and
//! never feeds anything back into canonical state; the only liberty it
//! takes is *visual* — smoothing remote avatar motion between network
//! updates so tens of pose packets per second render without judder.
//!
//! Two very different update paths fall out of that:
//!
//! - **Pose updates** land in per-participant [`PoseCell`]s that the
//!   render loop *samples* each frame (non-blocking, last-value-wins).
//!   No structural change is reported, so a chatty remote participant
//!   never forces the rendering layer to rebuild anything.
//! - **Structural events** (totem create/remove/evict, participant
//!   join/leave, snapshot replacement) are returned as [`SceneChange`]s
//!   so the caller can mount/unmount render primitives and start/stop
//!   audio voices.
//!
//! Reference: Akenine-Möller, Real-Time Rendering, Chapter 4

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::protocol::{
    Color, Participant, ParticipantId, ServerEvent, Totem, TotemId, Vec3,
};

// ───────────────────────────────────────────────────────────────────
// Remote pose tracking with interpolation
// ───────────────────────────────────────────────────────────────────

/// A sampled avatar pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Vec3,
}

/// Interpolating tracker for one remote avatar.
///
/// Keeps the latest network pose as a target and converges the rendered
/// pose toward it with frame-rate-independent smoothing, so 60fps frames
/// render smoothly from ~30/s network updates.
#[derive(Debug)]
struct PoseTrack {
    /// Current rendered pose (interpolated).
    current: Pose,
    /// Target pose from the last network update.
    target: Pose,
    /// Last time a network update arrived.
    last_update: Instant,
}

impl PoseTrack {
    fn new(position: Vec3, orientation: Vec3) -> Self {
        let pose = Pose { position, orientation };
        Self {
            current: pose,
            target: pose,
            last_update: Instant::now(),
        }
    }

    fn update_target(&mut self, position: Vec3, orientation: Vec3) {
        self.target = Pose { position, orientation };
        self.last_update = Instant::now();
    }

    /// Advance the interpolation and return the pose to render.
    ///
    /// Smoothing factor 0.85 gives ~50ms of visual latency with smooth
    /// motion; the exponent makes convergence frame-rate independent.
    fn sample(&mut self) -> Pose {
        let dt = self.last_update.elapsed().as_secs_f32();
        let smooth_factor = 0.85_f32;
        let t = (1.0 - smooth_factor.powf(dt * 60.0)).clamp(0.0, 1.0);

        self.current = Pose {
            position: self.current.position.lerp(&self.target.position, t),
            orientation: self.current.orientation.lerp(&self.target.orientation, t),
        };
        self.current
    }
}

/// Shared, render-frame-readable pose slot for one remote participant.
///
/// The network task writes the latest pose; the frame loop samples it.
/// The lock is held for nanoseconds on either side, so sampling never
/// waits on network arrival — last write wins.
#[derive(Debug)]
pub struct PoseCell {
    track: Mutex<PoseTrack>,
}

impl PoseCell {
    fn new(position: Vec3, orientation: Vec3) -> Self {
        Self {
            track: Mutex::new(PoseTrack::new(position, orientation)),
        }
    }

    /// Store the latest network pose.
    pub fn update(&self, position: Vec3, orientation: Vec3) {
        let mut track = self.track.lock().unwrap_or_else(|e| e.into_inner());
        track.update_target(position, orientation);
    }

    /// Sample the smoothed pose for rendering.
    pub fn sample(&self) -> Pose {
        let mut track = self.track.lock().unwrap_or_else(|e| e.into_inner());
        track.sample()
    }

    /// The raw target pose from the last network update (no smoothing).
    pub fn target(&self) -> Pose {
        let track = self.track.lock().unwrap_or_else(|e| e.into_inner());
        track.target
    }
}

/// Handle to one remote participant: identity, display color, and the
/// pose cell the render loop samples. Cheap to clone; the rendering
/// layer keeps one per mounted avatar.
#[derive(Debug, Clone)]
pub struct RemoteParticipant {
    pub id: ParticipantId,
    pub color: Color,
    pub cell: Arc<PoseCell>,
}

impl RemoteParticipant {
    fn new(participant: &Participant) -> Self {
        Self {
            id: participant.id,
            color: participant.color,
            cell: Arc::new(PoseCell::new(participant.position, participant.orientation)),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// The mirror
// ───────────────────────────────────────────────────────────────────

/// Structural consequence of applying a server event: something for the
/// rendering layer to mount or unmount, or for the scheduler to start or
/// stop. Pose updates deliberately produce none of these.
#[derive(Debug, Clone)]
pub enum SceneChange {
    /// The whole mirror was replaced; unmount everything, then process
    /// the accompanying additions.
    Reset,
    ParticipantJoined(RemoteParticipant),
    ParticipantLeft(ParticipantId),
    TotemAdded(Totem),
    TotemRemoved(TotemId),
}

/// Local mirror of the canonical scene.
#[derive(Debug, Default)]
pub struct SceneMirror {
    remotes: HashMap<ParticipantId, RemoteParticipant>,
    totems: Vec<Totem>,
}

impl SceneMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one server event and return the structural changes, in the
    /// order the caller should act on them.
    pub fn apply(&mut self, event: &ServerEvent) -> Vec<SceneChange> {
        match event {
            ServerEvent::Init { participants, objects } => {
                let mut changes = vec![SceneChange::Reset];

                self.remotes.clear();
                for participant in participants.values() {
                    let remote = RemoteParticipant::new(participant);
                    self.remotes.insert(remote.id, remote.clone());
                    changes.push(SceneChange::ParticipantJoined(remote));
                }

                self.totems = objects.clone();
                for totem in &self.totems {
                    changes.push(SceneChange::TotemAdded(totem.clone()));
                }

                changes
            }

            ServerEvent::ParticipantJoined { participant } => {
                let remote = RemoteParticipant::new(participant);
                self.remotes.insert(remote.id, remote.clone());
                vec![SceneChange::ParticipantJoined(remote)]
            }

            ServerEvent::ParticipantMoved { id, position, orientation } => {
                if let Some(remote) = self.remotes.get(id) {
                    remote.cell.update(*position, *orientation);
                    Vec::new()
                } else {
                    // A pose for a participant we have not seen — the
                    // snapshot raced their join. Trust the server and
                    // materialize a placeholder.
                    let participant = Participant {
                        id: *id,
                        position: *position,
                        orientation: *orientation,
                        color: Color::from_uuid(id.0),
                    };
                    let remote = RemoteParticipant::new(&participant);
                    self.remotes.insert(*id, remote.clone());
                    vec![SceneChange::ParticipantJoined(remote)]
                }
            }

            ServerEvent::ParticipantLeft { id } => {
                if self.remotes.remove(id).is_some() {
                    vec![SceneChange::ParticipantLeft(*id)]
                } else {
                    Vec::new()
                }
            }

            ServerEvent::ObjectCreated { object } => {
                self.totems.push(object.clone());
                vec![SceneChange::TotemAdded(object.clone())]
            }

            // Removal and eviction look identical to the mirror: the
            // totem is gone and its resources must be released.
            ServerEvent::ObjectRemoved { id } | ServerEvent::ObjectEvicted { id } => {
                let before = self.totems.len();
                self.totems.retain(|t| t.id != *id);
                if self.totems.len() != before {
                    vec![SceneChange::TotemRemoved(*id)]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Totems in creation order.
    pub fn totems(&self) -> &[Totem] {
        &self.totems
    }

    /// All remote participants (for mounting avatars).
    pub fn remotes(&self) -> impl Iterator<Item = &RemoteParticipant> {
        self.remotes.values()
    }

    pub fn remote(&self, id: ParticipantId) -> Option<&RemoteParticipant> {
        self.remotes.get(&id)
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    pub fn totem_count(&self) -> usize {
        self.totems.len()
    }
}
