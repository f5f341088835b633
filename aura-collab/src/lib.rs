//! # aura-collab — Real-time synchronization core for AuraSpace
//!
//! One shared spatial scene, many participants: a capacity-bounded set of
//! placed sound totems plus ephemeral avatars, kept consistent by a single
//! authoritative server and rendered locally from per-client mirrors. Each
//! totem pulses on its own rhythmic cycle, phase-locked to one shared
//! tempo transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐    WebSocket / JSON    ┌──────────────────┐
//! │ SyncClient  │ ◄────────────────────► │ SyncServer       │
//! │ (per user)  │   commands / events    │ (single          │
//! └──────┬──────┘                        │  sequencer)      │
//!        │                               └────────┬─────────┘
//!        ▼                                        │
//! ┌─────────────┐                        ┌────────┴─────────┐
//! │ SceneMirror │                        │ SessionRegistry   │
//! │ (advisory   │                        │ + TotemPool       │
//! │  copy)      │                        │ (canonical state) │
//! └──────┬──────┘                        └────────┬─────────┘
//!        │ structural changes                     │
//!        ▼                               ┌────────┴─────────┐
//! ┌──────────────┐                       │ BroadcastGroup   │
//! │TotemScheduler│── AudioSink triggers  │ (scoped fan-out) │
//! │ + Transport  │                       └──────────────────┘
//! └──────────────┘
//! ```
//!
//! Authority flows one way: client intents go up, the server validates and
//! sequences them against the canonical registry and pool, and the
//! resulting events fan out to every connection in one total order. The
//! mirror reconstructs a low-latency local approximation; the scheduler
//! consumes only the mirror's totem set and never round-trips through the
//! server per beat.
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire protocol (commands, events, scene types)
//! - [`registry`] — canonical participant set
//! - [`pool`] — bounded, creation-ordered totem store (FIFO eviction)
//! - [`broadcast`] — scoped fan-out with backpressure
//! - [`server`] — WebSocket synchronization server
//! - [`client`] — WebSocket sync client
//! - [`mirror`] — client-side reconciler with sampled pose cells
//! - [`music`] — scales, deterministic note selection, instrument factory
//! - [`scheduler`] — shared tempo transport and per-totem voices
//! - [`snapshot_io`] — scene export/import byte transform

pub mod protocol;
pub mod registry;
pub mod pool;
pub mod broadcast;
pub mod server;
pub mod client;
pub mod mirror;
pub mod music;
pub mod scheduler;
pub mod snapshot_io;

// Re-exports for convenience
pub use protocol::{
    ClientCommand, Color, Participant, ParticipantId, ProtocolError, SceneSnapshot,
    ServerEvent, Totem, TotemId, TotemKind, TotemSpec, Vec3,
};
pub use registry::SessionRegistry;
pub use pool::{TotemPool, DEFAULT_CAPACITY};
pub use broadcast::{BroadcastGroup, BroadcastStats, Frame, Scope};
pub use server::{SceneState, ServerConfig, ServerStats, SyncServer};
pub use client::{starter_beat, ConnectionState, SyncClient, SyncEvent};
pub use mirror::{Pose, PoseCell, RemoteParticipant, SceneChange, SceneMirror};
pub use music::{
    Adsr, InstrumentSpec, Note, Scale, ScaleSelector, Trigger, Waveform,
};
pub use scheduler::{AudioSink, TotemScheduler, Transport, DEFAULT_BPM};
