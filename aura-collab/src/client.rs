//! WebSocket sync client for connecting to the scene server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - Command senders for pose updates and totem placement
//! - A server event stream the application drains into its `SceneMirror`
//!
//! Pose updates are rate-limited client-side (~30/s) so a fast frame loop
//! does not flood the wire; everything else is sent immediately. There is
//! no automatic reconnection: a dropped transport surfaces as a single
//! `Disconnected` event and a fresh `connect` re-runs the handshake and
//! receives a fresh snapshot.
//!
//! Reference: Kleppmann, Chapter 5 — Replication

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use futures_util::StreamExt;

use crate::protocol::{
    ClientCommand, ProtocolError, ServerEvent, TotemId, TotemKind, TotemSpec, Vec3,
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Connection established
    Connected,
    /// Connection lost (graceful or not — treated identically)
    Disconnected,
    /// A sequenced event from the server
    Server(ServerEvent),
}

/// Interval between pose sends: ~30 updates per second.
const MOVE_INTERVAL: Duration = Duration::from_millis(33);

/// The sync client.
pub struct SyncClient {
    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Arc<RwLock<Option<mpsc::Sender<String>>>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SyncEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<SyncEvent>,

    /// Pose rate limiter
    move_gate: StdMutex<Instant>,

    /// Server URL
    server_url: String,
}

impl SyncClient {
    /// Create a new sync client targeting `server_url` (e.g.
    /// `ws://127.0.0.1:3001`).
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: Arc::new(RwLock::new(None)),
            event_rx: Some(event_rx),
            event_tx,
            // Allow an immediate first pose send.
            move_gate: StdMutex::new(Instant::now() - Duration::from_secs(1)),
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages. The
    /// first event after connecting is the server's `Init` snapshot.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_result = tokio_tungstenite::connect_async(&self.server_url).await;

        match ws_result {
            Ok((ws_stream, _)) => {
                let (ws_writer, mut ws_reader) = ws_stream.split();

                // Outgoing command channel
                let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
                *self.outgoing_tx.write().await = Some(out_tx);

                // Writer task: forward outgoing channel to WebSocket.
                // When the command channel closes (disconnect), say
                // goodbye properly so the server runs its Closed
                // transition promptly.
                let writer = Arc::new(tokio::sync::Mutex::new(ws_writer));
                let writer_handle = writer.clone();
                tokio::spawn(async move {
                    use futures_util::SinkExt;
                    while let Some(text) = out_rx.recv().await {
                        let mut w = writer_handle.lock().await;
                        if w.send(tokio_tungstenite::tungstenite::Message::Text(text.into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    let mut w = writer_handle.lock().await;
                    let _ = w
                        .send(tokio_tungstenite::tungstenite::Message::Close(None))
                        .await;
                });

                *self.state.write().await = ConnectionState::Connected;
                let _ = self.event_tx.send(SyncEvent::Connected).await;

                // Reader task: decode incoming frames into server events
                let event_tx = self.event_tx.clone();
                let state = self.state.clone();
                let outgoing_tx = self.outgoing_tx.clone();
                tokio::spawn(async move {
                    while let Some(msg) = ws_reader.next().await {
                        match msg {
                            Ok(tokio_tungstenite::tungstenite::Message::Text(text)) => {
                                match ServerEvent::decode(text.as_str()) {
                                    Ok(event) => {
                                        let _ = event_tx.send(SyncEvent::Server(event)).await;
                                    }
                                    Err(e) => {
                                        log::warn!("Dropping undecodable frame: {e}");
                                    }
                                }
                            }
                            Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => {
                                break;
                            }
                            _ => {}
                        }
                    }

                    // Connection lost
                    *state.write().await = ConnectionState::Disconnected;
                    *outgoing_tx.write().await = None;
                    let _ = event_tx.send(SyncEvent::Disconnected).await;
                });

                Ok(())
            }
            Err(_e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Send one command frame.
    async fn send_command(&self, command: &ClientCommand) -> Result<(), ProtocolError> {
        let encoded = command.encode()?;
        let tx = self.outgoing_tx.read().await;
        match tx.as_ref() {
            Some(tx) => tx
                .send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Send the local avatar pose, rate-limited to ~30/s.
    ///
    /// Returns `Ok(true)` if the update was sent, `Ok(false)` if it was
    /// throttled or the client is offline (pose updates are best-effort
    /// and silently dropped while disconnected).
    pub async fn send_move(&self, position: Vec3, orientation: Vec3) -> Result<bool, ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Ok(false);
        }

        {
            let mut gate = self.move_gate.lock().unwrap_or_else(|e| e.into_inner());
            if gate.elapsed() < MOVE_INTERVAL {
                return Ok(false); // Throttled
            }
            *gate = Instant::now();
        }

        self.send_command(&ClientCommand::Move { position, orientation })
            .await?;
        Ok(true)
    }

    /// Send the local avatar pose immediately, bypassing rate limiting.
    pub async fn force_move(&self, position: Vec3, orientation: Vec3) -> Result<(), ProtocolError> {
        {
            let mut gate = self.move_gate.lock().unwrap_or_else(|e| e.into_inner());
            *gate = Instant::now();
        }
        self.send_command(&ClientCommand::Move { position, orientation })
            .await
    }

    /// Request placement of a totem. The server assigns the id and answers
    /// with `ObjectCreated` (preceded by `ObjectEvicted` when full).
    pub async fn create_totem(&self, position: Vec3, kind: TotemKind) -> Result<(), ProtocolError> {
        self.send_command(&ClientCommand::CreateObject { position, kind })
            .await
    }

    /// Request removal of a totem by id.
    pub async fn remove_totem(&self, id: TotemId) -> Result<(), ProtocolError> {
        self.send_command(&ClientCommand::RemoveObject { id }).await
    }

    /// Request that the scene be emptied.
    pub async fn clear_totems(&self) -> Result<(), ProtocolError> {
        self.send_command(&ClientCommand::ClearObjects).await
    }

    /// Atomically replace the scene contents (import).
    pub async fn replace_all(&self, objects: Vec<TotemSpec>) -> Result<(), ProtocolError> {
        self.send_command(&ClientCommand::ReplaceAll { objects })
            .await
    }

    /// Place the four-totem starter beat an empty scene traditionally
    /// opens with.
    pub async fn place_starter_beat(&self) -> Result<(), ProtocolError> {
        for spec in starter_beat() {
            self.create_totem(spec.position, spec.kind).await?;
        }
        Ok(())
    }

    /// Disconnect from the server.
    ///
    /// Closes the transport; the server treats this identically to a
    /// transport failure. A later `connect` re-runs the full handshake
    /// and receives a fresh snapshot under a fresh identity.
    pub async fn disconnect(&self) {
        // Dropping the command sender ends the writer task, which sends
        // the close frame on its way out.
        *self.outgoing_tx.write().await = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

/// The seed layout placed when a participant joins an empty scene: a kick
/// in front, hi-hat right, bass left, synth behind.
pub fn starter_beat() -> Vec<TotemSpec> {
    vec![
        TotemSpec { position: Vec3::new(0.0, 1.5, -2.0), kind: TotemKind::Kick },
        TotemSpec { position: Vec3::new(2.0, 1.5, 0.0), kind: TotemKind::Hihat },
        TotemSpec { position: Vec3::new(-2.0, 1.5, 0.0), kind: TotemKind::Bass },
        TotemSpec { position: Vec3::new(0.0, 2.0, 2.0), kind: TotemKind::Synth },
    ]
}
