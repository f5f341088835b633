//! Per-totem rhythmic scheduling against one shared tempo transport.
//!
//! Every mounted totem gets an independent timer task, but none of them
//! owns its own clock: each computes its next trigger from the process-wide
//! [`Transport`]'s absolute beat timeline. That is what keeps all voices
//! phase-locked — and what keeps them phase-locked *through tempo edits*:
//! a voice never re-arms a local countdown, it re-derives "when is beat
//! `k × interval`" from the shared timeline, so a BPM change shifts every
//! voice identically and relative phase offsets never move.
//!
//! ```text
//!            Transport (anchored beat timeline, watch on change)
//!                 │ beats_at / instant_of_beat
//!      ┌──────────┼──────────┐
//!      ▼          ▼          ▼
//!   kick @1    hihat @0.5  bass @4      (intervals in beats)
//!      │          │          │
//!      └──────────┴──────────┴──► AudioSink::trigger(id, note, at)
//! ```
//!
//! Starting a voice is idempotent; stopping one aborts its task and
//! releases its sink voice before returning, so a totem that leaves the
//! mirror can never fire again afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::mirror::SceneChange;
use crate::music::{self, InstrumentSpec, ScaleSelector, Trigger};
use crate::protocol::{Totem, TotemId, TotemKind};

/// Default tempo, in beats per minute.
pub const DEFAULT_BPM: f64 = 120.0;

// ───────────────────────────────────────────────────────────────────
// Transport
// ───────────────────────────────────────────────────────────────────

/// Beat-timeline anchor. Re-anchored on every tempo change so the beat
/// position is continuous: beats never jump, only their future pacing.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    origin: Instant,
    beats_at_origin: f64,
    bpm: f64,
}

/// The process-wide tempo clock: an absolute, monotonic beat timeline
/// shared by every voice.
#[derive(Debug)]
pub struct Transport {
    anchor: StdMutex<Anchor>,
    /// Bumped on every tempo edit; voices watch it to recompute pending
    /// trigger times.
    changed: watch::Sender<u64>,
}

impl Transport {
    /// Start the timeline now, at beat zero, at `bpm`.
    pub fn new(bpm: f64) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            anchor: StdMutex::new(Anchor {
                origin: Instant::now(),
                beats_at_origin: 0.0,
                bpm: if bpm.is_finite() && bpm > 0.0 { bpm } else { DEFAULT_BPM },
            }),
            changed,
        }
    }

    /// Current tempo in beats per minute.
    pub fn bpm(&self) -> f64 {
        self.anchor.lock().unwrap_or_else(|e| e.into_inner()).bpm
    }

    /// Change the tempo. The beat position is continuous across the edit;
    /// only the pacing of future beats changes. Non-positive or
    /// non-finite values are ignored.
    pub fn set_bpm(&self, bpm: f64) {
        if !bpm.is_finite() || bpm <= 0.0 {
            log::warn!("Ignoring invalid tempo {bpm}");
            return;
        }
        {
            let mut anchor = self.anchor.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let beats_now = beats_at_anchor(&anchor, now);
            *anchor = Anchor { origin: now, beats_at_origin: beats_now, bpm };
        }
        self.changed.send_modify(|v| *v += 1);
    }

    /// Beat position of an instant on the shared timeline.
    pub fn beats_at(&self, t: Instant) -> f64 {
        let anchor = self.anchor.lock().unwrap_or_else(|e| e.into_inner());
        beats_at_anchor(&anchor, t)
    }

    /// Absolute instant at which a beat position occurs, under the
    /// current tempo.
    pub fn instant_of_beat(&self, beat: f64) -> Instant {
        let anchor = self.anchor.lock().unwrap_or_else(|e| e.into_inner());
        let delta_secs = (beat - anchor.beats_at_origin) * 60.0 / anchor.bpm;
        if delta_secs >= 0.0 {
            anchor.origin + Duration::from_secs_f64(delta_secs)
        } else {
            anchor.origin - Duration::from_secs_f64(-delta_secs)
        }
    }

    /// Watch for tempo edits.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(DEFAULT_BPM)
    }
}

fn beats_at_anchor(anchor: &Anchor, t: Instant) -> f64 {
    match t.checked_duration_since(anchor.origin) {
        Some(elapsed) => anchor.beats_at_origin + elapsed.as_secs_f64() * anchor.bpm / 60.0,
        None => {
            let behind = anchor.origin.duration_since(t);
            anchor.beats_at_origin - behind.as_secs_f64() * anchor.bpm / 60.0
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Audio engine boundary
// ───────────────────────────────────────────────────────────────────

/// The audio engine boundary.
///
/// `mount` constructs the instrument for a totem, `trigger` schedules one
/// audible pulse at an absolute time, `unmount` releases the voice.
/// Implementations must log release failures rather than propagate them —
/// a voice that fails to tear down cleanly never blocks the totem's
/// removal from the mirror.
pub trait AudioSink: Send + Sync + 'static {
    fn mount(&self, totem: &Totem, spec: &InstrumentSpec);
    fn trigger(&self, id: TotemId, trigger: Trigger, at: Instant);
    fn unmount(&self, id: TotemId);
}

// ───────────────────────────────────────────────────────────────────
// Scheduler
// ───────────────────────────────────────────────────────────────────

/// Owns one timer task per mounted totem.
pub struct TotemScheduler {
    transport: Arc<Transport>,
    scale: Arc<ScaleSelector>,
    sink: Arc<dyn AudioSink>,
    voices: StdMutex<HashMap<TotemId, VoiceHandle>>,
}

struct VoiceHandle {
    kind: TotemKind,
    task: JoinHandle<()>,
}

impl TotemScheduler {
    pub fn new(transport: Arc<Transport>, scale: Arc<ScaleSelector>, sink: Arc<dyn AudioSink>) -> Self {
        Self {
            transport,
            scale,
            sink,
            voices: StdMutex::new(HashMap::new()),
        }
    }

    /// Start a totem's voice. Idempotent: a second start of the same id
    /// is a no-op and returns `false`.
    pub fn start(&self, totem: &Totem) -> bool {
        let mut voices = self.voices.lock().unwrap_or_else(|e| e.into_inner());
        if voices.contains_key(&totem.id) {
            return false;
        }

        self.sink.mount(totem, &InstrumentSpec::for_kind(totem.kind));

        let id = totem.id;
        let kind = totem.kind;
        let seed = music::seed_from_id(id);
        let transport = self.transport.clone();
        let scale = self.scale.clone();
        let sink = self.sink.clone();
        let task = tokio::spawn(run_voice(id, kind, seed, transport, scale, sink));

        voices.insert(id, VoiceHandle { kind, task });
        true
    }

    /// Stop a totem's voice and release its resources. Idempotent; the
    /// voice is guaranteed silent once this returns.
    pub fn stop(&self, id: TotemId) -> bool {
        let handle = {
            let mut voices = self.voices.lock().unwrap_or_else(|e| e.into_inner());
            voices.remove(&id)
        };
        match handle {
            Some(handle) => {
                handle.task.abort();
                self.sink.unmount(id);
                true
            }
            None => false,
        }
    }

    /// Stop every voice (mirror reset).
    pub fn stop_all(&self) {
        let drained: Vec<TotemId> = {
            let voices = self.voices.lock().unwrap_or_else(|e| e.into_inner());
            voices.keys().copied().collect()
        };
        for id in drained {
            self.stop(id);
        }
    }

    /// Drive the scheduler from the mirror's structural changes.
    pub fn handle_change(&self, change: &SceneChange) {
        match change {
            SceneChange::Reset => self.stop_all(),
            SceneChange::TotemAdded(totem) => {
                self.start(totem);
            }
            SceneChange::TotemRemoved(id) => {
                self.stop(*id);
            }
            SceneChange::ParticipantJoined(_) | SceneChange::ParticipantLeft(_) => {}
        }
    }

    /// Fire one immediate audition pulse for a mounted totem (the
    /// click-to-preview path). No-op for unknown ids.
    pub fn trigger_now(&self, id: TotemId) {
        let kind = {
            let voices = self.voices.lock().unwrap_or_else(|e| e.into_inner());
            voices.get(&id).map(|v| v.kind)
        };
        if let Some(kind) = kind {
            let trigger = match kind {
                TotemKind::Kick => Trigger { note: "C1", velocity: 1.0, duration_beats: 0.5 },
                TotemKind::Hihat => Trigger { note: "C6", velocity: 1.0, duration_beats: 0.125 },
                _ => Trigger { note: "C4", velocity: 1.0, duration_beats: 0.5 },
            };
            self.sink.trigger(id, trigger, Instant::now());
        }
    }

    pub fn is_running(&self, id: TotemId) -> bool {
        self.voices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&id)
    }

    pub fn voice_count(&self) -> usize {
        self.voices.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn scale(&self) -> &Arc<ScaleSelector> {
        &self.scale
    }
}

impl Drop for TotemScheduler {
    fn drop(&mut self) {
        let voices = self.voices.lock().unwrap_or_else(|e| e.into_inner());
        for handle in voices.values() {
            handle.task.abort();
        }
    }
}

/// One voice's scheduling loop.
///
/// Each iteration derives the next trigger as the next multiple of the
/// voice's interval on the shared beat timeline — never a local
/// countdown — and re-derives it whenever the tempo watch fires.
async fn run_voice(
    id: TotemId,
    kind: TotemKind,
    seed: u64,
    transport: Arc<Transport>,
    scale: Arc<ScaleSelector>,
    sink: Arc<dyn AudioSink>,
) {
    let interval = music::interval_beats(kind, seed);
    let mut tempo_rx = transport.subscribe();

    loop {
        let beat_now = transport.beats_at(Instant::now());
        // The epsilon absorbs sub-microsecond rounding from the
        // instant↔beat round trip, so a voice waking exactly on its
        // boundary never refires the step it just played.
        let step = ((beat_now / interval) + 1e-6).floor() as u64 + 1;
        let next_beat = step as f64 * interval;
        let at = transport.instant_of_beat(next_beat);

        tokio::select! {
            _ = time::sleep_until(at) => {
                let trigger = music::trigger_for(kind, seed, step, scale.current());
                sink.trigger(id, trigger, at);
            }
            changed = tempo_rx.changed() => {
                if changed.is_err() {
                    break; // Transport dropped
                }
                // Tempo edited: loop around and recompute the pending
                // trigger from the shared timeline.
            }
        }
    }
}
