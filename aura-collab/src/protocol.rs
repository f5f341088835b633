//! JSON wire protocol for scene synchronization.
//!
//! Every frame is one WebSocket text message holding a single tagged JSON
//! object:
//! ```text
//! {"type":"CreateObject","position":{"x":0.0,"y":1.5,"z":-2.0},"kind":"kick"}
//! {"type":"ObjectEvicted","id":"550e8400-e29b-41d4-a716-446655440000"}
//! ```
//!
//! Commands flow client → server; events flow server → clients. The server
//! is the only author of identifiers: participant ids are assigned at
//! connect time, totem ids at creation time, and neither is ever reused.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 5

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ───────────────────────────────────────────────────────────────────
// Core types
// ───────────────────────────────────────────────────────────────────

/// 3D position or Euler orientation in scene (world) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Vec3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Linear interpolation toward `target` by factor `t` ∈ [0, 1].
    pub fn lerp(&self, target: &Vec3, t: f32) -> Vec3 {
        Vec3 {
            x: self.x + (target.x - self.x) * t,
            y: self.y + (target.y - self.y) * t,
            z: self.z + (target.z - self.z) * t,
        }
    }
}

impl Default for Vec3 {
    fn default() -> Self {
        Self::ZERO
    }
}

/// Identity of a connected participant. Assigned by the server at connect
/// time, unique for the connection's lifetime, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a placed totem. Assigned by the server at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TotemId(pub Uuid);

impl TotemId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TotemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// RGBA color for avatar rendering. Display-only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    /// Generate a stable, visually distinct color from a UUID.
    ///
    /// Uses HSL color space with high saturation so avatars stay vivid
    /// against the scene. The hue is derived from the UUID hash, so the
    /// same id always produces the same color on every client.
    pub fn from_uuid(id: Uuid) -> Self {
        let hash = id.as_u128();
        let hue = ((hash % 360) as f32) / 360.0;
        let saturation = 0.7;
        let lightness = 0.6;

        let (r, g, b) = hsl_to_rgb(hue, saturation, lightness);
        Self { r, g, b, a: 1.0 }
    }

    /// Convert to [f32; 4] array for GPU upload.
    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self { r: 0.26, g: 0.52, b: 0.96, a: 1.0 } // Default blue
    }
}

/// HSL to RGB conversion helper.
fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l); // Achromatic
    }

    let q = if l < 0.5 {
        l * (1.0 + s)
    } else {
        l + s - l * s
    };
    let p = 2.0 * l - q;

    let r = hue_to_rgb(p, q, h + 1.0 / 3.0);
    let g = hue_to_rgb(p, q, h);
    let b = hue_to_rgb(p, q, h - 1.0 / 3.0);

    (r, g, b)
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 { t += 1.0; }
    if t > 1.0 { t -= 1.0; }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// A connected participant's avatar state.
///
/// Only the owning connection may move a participant; the server rejects
/// nothing here because `Move` commands are implicitly scoped to their
/// sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub position: Vec3,
    pub orientation: Vec3,
    /// Stable per-connection color, derived from the id at connect time.
    pub color: Color,
}

/// Behavior class of a placed totem. Closed set; each kind carries its own
/// trigger interval and instrument parameters (see the `music` module).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotemKind {
    Synth,
    Bass,
    Kick,
    Hihat,
}

impl TotemKind {
    pub const ALL: [TotemKind; 4] =
        [TotemKind::Synth, TotemKind::Bass, TotemKind::Kick, TotemKind::Hihat];

    /// Human-readable label for UI listings.
    pub fn label(&self) -> &'static str {
        match self {
            TotemKind::Synth => "Lead Synth",
            TotemKind::Bass => "Deep Bass",
            TotemKind::Kick => "Kick Drum",
            TotemKind::Hihat => "Hi-Hat",
        }
    }

    /// Display color (hex) used when mounting the totem's render primitive.
    pub fn display_color(&self) -> &'static str {
        match self {
            TotemKind::Synth => "#00f0ff",
            TotemKind::Bass => "#ff0055",
            TotemKind::Kick => "#ffaa00",
            TotemKind::Hihat => "#ffff00",
        }
    }
}

impl std::fmt::Display for TotemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TotemKind::Synth => write!(f, "synth"),
            TotemKind::Bass => write!(f, "bass"),
            TotemKind::Kick => write!(f, "kick"),
            TotemKind::Hihat => write!(f, "hihat"),
        }
    }
}

/// A placed totem. Position and kind are immutable after creation; a totem
/// only ever leaves the scene through removal, eviction, or a bulk clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Totem {
    pub id: TotemId,
    pub position: Vec3,
    pub kind: TotemKind,
}

/// Placement request shape: a totem without an identity yet. Used by
/// `ReplaceAll` and scene import; the server assigns fresh ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotemSpec {
    pub position: Vec3,
    pub kind: TotemKind,
}

/// Point-in-time view of the scene, sent to seed a joining client's mirror.
///
/// `participants` never contains the receiving participant itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub participants: HashMap<ParticipantId, Participant>,
    pub objects: Vec<Totem>,
}

// ───────────────────────────────────────────────────────────────────
// Commands and events
// ───────────────────────────────────────────────────────────────────

/// Commands a client may send while its connection is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    /// Update the sender's own avatar pose.
    Move { position: Vec3, orientation: Vec3 },
    /// Place a totem. Always succeeds; the oldest totem is evicted if the
    /// pool is full.
    CreateObject { position: Vec3, kind: TotemKind },
    /// Remove a totem by id. A stale id is a silent no-op.
    RemoveObject { id: TotemId },
    /// Empty the pool.
    ClearObjects,
    /// Atomically replace the whole pool (scene import).
    ReplaceAll { objects: Vec<TotemSpec> },
}

/// Events the server fans out to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Full snapshot: sent directly to a joining client, and re-sent to
    /// everyone after a bulk clear or replace.
    Init {
        participants: HashMap<ParticipantId, Participant>,
        objects: Vec<Totem>,
    },
    ParticipantJoined { participant: Participant },
    ParticipantMoved { id: ParticipantId, position: Vec3, orientation: Vec3 },
    ParticipantLeft { id: ParticipantId },
    ObjectCreated { object: Totem },
    ObjectRemoved { id: TotemId },
    /// The oldest totem was displaced by a creation. Always emitted
    /// strictly before the `ObjectCreated` that caused it.
    ObjectEvicted { id: TotemId },
}

impl ClientCommand {
    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self)
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

impl ServerEvent {
    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self)
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    /// Build the snapshot event for one recipient.
    pub fn init(snapshot: SceneSnapshot) -> Self {
        ServerEvent::Init {
            participants: snapshot.participants,
            objects: snapshot.objects,
        }
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
