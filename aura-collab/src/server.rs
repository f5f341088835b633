//! WebSocket synchronization server: the single source of truth.
//!
//! Architecture:
//! ```text
//! Client A ──┐                    ┌── SessionRegistry (avatars)
//!             ├── SceneState ─────┤
//! Client B ──┘   (one mutex =    └── TotemPool (bounded FIFO)
//!        │        the sequencer)
//!        │              │
//!        │              ▼ events, encoded once, in lock order
//!        │        BroadcastGroup
//!        │              │
//!        └──────────────┴──► every connection task filters by scope
//! ```
//!
//! All command handling funnels through one async mutex around the
//! canonical state. A command is validated, applied, and its resulting
//! events pushed onto the fan-out channel *before* the lock is released,
//! so every connected participant observes the identical total order for
//! object creation, removal, and eviction. Connection handlers never hold
//! a direct mutable handle to the registry or pool.
//!
//! Per connection the lifecycle is `Connecting → Active → Closed`; a
//! transport failure and a graceful close converge on the same `Closed`
//! transition, and nothing received afterwards has any effect.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 8

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::broadcast::{BroadcastGroup, Scope};
use crate::pool::{TotemPool, DEFAULT_CAPACITY};
use crate::protocol::{
    ClientCommand, Participant, ParticipantId, SceneSnapshot, ServerEvent,
};
use crate::registry::SessionRegistry;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum number of totems the scene holds before FIFO eviction
    pub max_totems: usize,
    /// Broadcast channel capacity per connection
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3001".to_string(),
            max_totems: DEFAULT_CAPACITY,
            broadcast_capacity: 256,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_commands: u64,
    pub dropped_frames: u64,
}

/// Connection lifecycle. A connection only ever moves forward, and
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionPhase {
    Connecting,
    Active,
    Closed,
}

/// The canonical scene: participant registry plus totem pool.
///
/// Mutated only under the server's sequencer lock.
pub struct SceneState {
    pub registry: SessionRegistry,
    pub pool: TotemPool,
}

impl SceneState {
    pub fn new(max_totems: usize) -> Self {
        Self {
            registry: SessionRegistry::new(),
            pool: TotemPool::new(max_totems),
        }
    }

    /// Admit a new connection: register its participant and capture the
    /// snapshot that seeds its mirror (everyone else + all totems).
    pub fn join(&mut self) -> (Participant, SceneSnapshot) {
        let participant = self.registry.register();
        let snapshot = SceneSnapshot {
            participants: self.registry.snapshot_excluding(participant.id),
            objects: self.pool.snapshot(),
        };
        (participant, snapshot)
    }

    /// Retire a connection. Idempotent: only the first call yields the
    /// record, so `ParticipantLeft` is broadcast exactly once.
    pub fn leave(&mut self, id: ParticipantId) -> Option<Participant> {
        self.registry.unregister(id)
    }

    /// Apply one command from `sender` and return the events to broadcast,
    /// in order, each with its recipient scope.
    ///
    /// This is the entire sequencer step: the caller holds the scene lock
    /// across apply *and* the sends, which fixes the total order every
    /// client observes.
    pub fn apply(
        &mut self,
        sender: ParticipantId,
        command: ClientCommand,
    ) -> Vec<(Scope, ServerEvent)> {
        match command {
            ClientCommand::Move { position, orientation } => {
                // Silent no-op when the sender already unregistered.
                if !self.registry.update(sender, position, orientation) {
                    return Vec::new();
                }
                vec![(
                    Scope::Except(sender),
                    ServerEvent::ParticipantMoved { id: sender, position, orientation },
                )]
            }

            ClientCommand::CreateObject { position, kind } => {
                let (totem, evicted) = self.pool.create(position, kind);
                let mut events = Vec::with_capacity(2);
                if let Some(id) = evicted {
                    // The eviction must reach every client before the
                    // creation that displaced it.
                    events.push((Scope::All, ServerEvent::ObjectEvicted { id }));
                }
                events.push((Scope::All, ServerEvent::ObjectCreated { object: totem }));
                events
            }

            ClientCommand::RemoveObject { id } => {
                if self.pool.remove(id) {
                    vec![(Scope::All, ServerEvent::ObjectRemoved { id })]
                } else {
                    // Already evicted or removed by a concurrent request.
                    Vec::new()
                }
            }

            ClientCommand::ClearObjects => {
                self.pool.clear();
                self.reseed_everyone()
            }

            ClientCommand::ReplaceAll { objects } => {
                self.pool.replace_all(&objects);
                self.reseed_everyone()
            }
        }
    }

    /// Personalized `Init` for every connected participant — the atomic
    /// alternative to replaying a bulk load as individual creations.
    fn reseed_everyone(&self) -> Vec<(Scope, ServerEvent)> {
        let objects = self.pool.snapshot();
        self.registry
            .ids()
            .into_iter()
            .map(|id| {
                (
                    Scope::Only(id),
                    ServerEvent::Init {
                        participants: self.registry.snapshot_excluding(id),
                        objects: objects.clone(),
                    },
                )
            })
            .collect()
    }
}

/// The synchronization server.
pub struct SyncServer {
    config: ServerConfig,
    scene: Arc<Mutex<SceneState>>,
    group: Arc<BroadcastGroup>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a new server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let group = Arc::new(BroadcastGroup::new(config.broadcast_capacity));
        let scene = Arc::new(Mutex::new(SceneState::new(config.max_totems)));
        Self {
            config,
            scene,
            group,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the accept loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let scene = self.scene.clone();
            let group = self.group.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, scene, group, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single participant's connection from handshake to cleanup.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        scene: Arc<Mutex<SceneState>>,
        group: Arc<BroadcastGroup>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut phase = ConnectionPhase::Connecting;
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr} ({phase:?})");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Enter Active: register, subscribe, snapshot and announce the
        // join under one lock hold so nothing slips between them.
        let (me, init_frame, mut broadcast_rx) = {
            let mut state = scene.lock().await;
            let (participant, snapshot) = state.join();
            let rx = group.subscribe();
            let _ = group.send(
                Scope::Except(participant.id),
                &ServerEvent::ParticipantJoined { participant: participant.clone() },
            );
            let init = ServerEvent::init(snapshot).encode();
            (participant, init, rx)
        };
        phase = ConnectionPhase::Active;

        // Seed the new participant's mirror before any live events. From
        // here on every exit path must run the Closed cleanup, so errors
        // transition the phase instead of returning early.
        match init_frame {
            Ok(frame) => {
                if ws_sender.send(Message::Text(frame.into())).await.is_ok() {
                    log::info!("Participant {} active from {addr}", me.id);
                } else {
                    phase = ConnectionPhase::Closed;
                }
            }
            Err(e) => {
                log::error!("Failed to encode snapshot for {}: {e}", me.id);
                phase = ConnectionPhase::Closed;
            }
        }

        while phase == ConnectionPhase::Active {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match ClientCommand::decode(text.as_str()) {
                                Ok(command) => {
                                    {
                                        let mut s = stats.write().await;
                                        s.total_commands += 1;
                                    }
                                    // Sequencer step: apply + broadcast
                                    // under one lock hold.
                                    let state = &mut *scene.lock().await;
                                    for (scope, event) in state.apply(me.id, command) {
                                        if let Err(e) = group.send(scope, &event) {
                                            log::error!("Failed to encode event: {e}");
                                        }
                                    }
                                }
                                Err(e) => {
                                    // Malformed payload: drop the frame,
                                    // keep the connection.
                                    log::warn!("Bad command from {}: {e}", me.id);
                                    let mut s = stats.write().await;
                                    s.dropped_frames += 1;
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            phase = ConnectionPhase::Closed;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if ws_sender.send(Message::Pong(data)).await.is_err() {
                                phase = ConnectionPhase::Closed;
                            }
                        }

                        Some(Err(e)) => {
                            // Transport failure converges on the same
                            // Closed transition as a graceful close.
                            log::warn!("WebSocket error from {addr}: {e}");
                            phase = ConnectionPhase::Closed;
                        }

                        _ => {}
                    }
                }

                // Outgoing fan-out frame
                frame = broadcast_rx.recv() => {
                    match frame {
                        Ok(frame) => {
                            if frame.scope.delivers_to(me.id) {
                                if ws_sender
                                    .send(Message::Text(frame.payload.as_ref().into()))
                                    .await
                                    .is_err()
                                {
                                    phase = ConnectionPhase::Closed;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Participant {} lagged by {n} frames", me.id);
                        }
                        Err(_) => phase = ConnectionPhase::Closed,
                    }
                }
            }
        }

        // Closed: release the participant's record before announcing the
        // departure, so no later event can reference it.
        {
            let mut state = scene.lock().await;
            if state.leave(me.id).is_some() {
                let _ = group.send(
                    Scope::Except(me.id),
                    &ServerEvent::ParticipantLeft { id: me.id },
                );
            }
        }

        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        log::info!("Participant {} closed", me.id);

        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Shared handle to the canonical scene (tests and diagnostics).
    pub fn scene(&self) -> &Arc<Mutex<SceneState>> {
        &self.scene
    }

    /// The fan-out group.
    pub fn group(&self) -> &Arc<BroadcastGroup> {
        &self.group
    }
}
