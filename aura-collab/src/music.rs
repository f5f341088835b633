//! Musical material: scales, per-kind trigger profiles, and the closed
//! instrument factory.
//!
//! Everything here is deterministic. A totem's seed is derived from its
//! server-assigned id, so every client computes the same interval, the
//! same note for the same step, and the same instrument parameters
//! without any extra wire traffic.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::protocol::{TotemId, TotemKind};

// ───────────────────────────────────────────────────────────────────
// Scales
// ───────────────────────────────────────────────────────────────────

/// Note name in scientific pitch notation, as the audio engine accepts it.
pub type Note = &'static str;

/// The selectable musical scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Pentatonic,
    Major,
    Minor,
    Dorian,
    Blues,
    Lydian,
    Chromatic,
}

impl Scale {
    pub const ALL: [Scale; 7] = [
        Scale::Pentatonic,
        Scale::Major,
        Scale::Minor,
        Scale::Dorian,
        Scale::Blues,
        Scale::Lydian,
        Scale::Chromatic,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scale::Pentatonic => "Pentatonic",
            Scale::Major => "Major",
            Scale::Minor => "Minor",
            Scale::Dorian => "Dorian",
            Scale::Blues => "Blues",
            Scale::Lydian => "Lydian",
            Scale::Chromatic => "Chromatic",
        }
    }

    /// Notes for melodic lead voices.
    pub fn lead_notes(&self) -> &'static [Note] {
        match self {
            Scale::Pentatonic => &["C4", "D4", "E4", "G4", "A4", "C5", "D5", "E5"],
            Scale::Major => &["C4", "D4", "E4", "F4", "G4", "A4", "B4", "C5"],
            Scale::Minor => &["C4", "D4", "Eb4", "F4", "G4", "Ab4", "Bb4", "C5"],
            Scale::Dorian => &["C4", "D4", "Eb4", "F4", "G4", "A4", "Bb4", "C5"],
            Scale::Blues => &["C4", "Eb4", "F4", "F#4", "G4", "Bb4", "C5"],
            Scale::Lydian => &["C4", "D4", "E4", "F#4", "G4", "A4", "B4", "C5"],
            Scale::Chromatic => &[
                "C4", "C#4", "D4", "D#4", "E4", "F4", "F#4", "G4", "G#4", "A4", "A#4", "B4",
            ],
        }
    }

    /// Notes for the bass register, an octave (or two) down. Only the
    /// pentatonic and major scales carry dedicated bass tables; the rest
    /// fall back to pentatonic bass, which sits under any of them.
    pub fn bass_notes(&self) -> &'static [Note] {
        match self {
            Scale::Major => &["C2", "D2", "E2", "F2", "G2", "A2", "B2", "C3"],
            _ => &["C2", "D2", "E2", "G2", "A2", "C3"],
        }
    }
}

/// Runtime-selected scale, shared by every voice.
///
/// Stored as an index so voices can read it with a single atomic load —
/// no locking on the trigger path, last write wins.
#[derive(Debug)]
pub struct ScaleSelector {
    index: AtomicU8,
}

impl ScaleSelector {
    pub fn new(scale: Scale) -> Self {
        let index = Scale::ALL.iter().position(|s| *s == scale).unwrap_or(0);
        Self { index: AtomicU8::new(index as u8) }
    }

    pub fn select(&self, scale: Scale) {
        let index = Scale::ALL.iter().position(|s| *s == scale).unwrap_or(0);
        self.index.store(index as u8, Ordering::Relaxed);
    }

    pub fn current(&self) -> Scale {
        let index = self.index.load(Ordering::Relaxed) as usize;
        Scale::ALL[index % Scale::ALL.len()]
    }
}

impl Default for ScaleSelector {
    fn default() -> Self {
        Self::new(Scale::Pentatonic)
    }
}

// ───────────────────────────────────────────────────────────────────
// Instrument factory
// ───────────────────────────────────────────────────────────────────

/// ADSR envelope, in seconds (sustain is a level).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adsr {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

/// Oscillator waveform for synthesized voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    FatSawtooth,
}

/// Construction parameters the audio engine needs to build a voice.
///
/// A closed set dispatched through [`InstrumentSpec::for_kind`]: one
/// variant per totem kind, nothing open-ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InstrumentSpec {
    /// AM lead synth: fat sawtooth carrier, square modulation.
    AmLead {
        harmonicity: f32,
        oscillator: Waveform,
        envelope: Adsr,
        modulation: Waveform,
        modulation_envelope: Adsr,
    },
    /// FM bass: sine carrier with heavy modulation index.
    FmBass {
        harmonicity: f32,
        modulation_index: f32,
        oscillator: Waveform,
        envelope: Adsr,
        modulation: Waveform,
        modulation_envelope: Adsr,
    },
    /// Membrane kick drum.
    MembraneKick {
        pitch_decay: f32,
        octaves: f32,
        oscillator: Waveform,
        envelope: Adsr,
    },
    /// Metallic hi-hat.
    MetalHat {
        harmonicity: f32,
        modulation_index: f32,
        resonance: f32,
        octaves: f32,
        envelope: Adsr,
    },
}

impl InstrumentSpec {
    /// The one factory: kind tag in, construction parameters out.
    pub fn for_kind(kind: TotemKind) -> InstrumentSpec {
        match kind {
            TotemKind::Synth => InstrumentSpec::AmLead {
                harmonicity: 2.5,
                oscillator: Waveform::FatSawtooth,
                envelope: Adsr { attack: 0.1, decay: 0.2, sustain: 1.0, release: 0.5 },
                modulation: Waveform::Square,
                modulation_envelope: Adsr { attack: 0.5, decay: 0.0, sustain: 1.0, release: 0.5 },
            },
            TotemKind::Bass => InstrumentSpec::FmBass {
                harmonicity: 3.0,
                modulation_index: 10.0,
                oscillator: Waveform::Sine,
                envelope: Adsr { attack: 0.01, decay: 0.5, sustain: 1.0, release: 0.5 },
                modulation: Waveform::Square,
                modulation_envelope: Adsr { attack: 0.5, decay: 0.0, sustain: 1.0, release: 0.5 },
            },
            TotemKind::Kick => InstrumentSpec::MembraneKick {
                pitch_decay: 0.05,
                octaves: 10.0,
                oscillator: Waveform::Sine,
                envelope: Adsr { attack: 0.001, decay: 0.4, sustain: 0.01, release: 1.4 },
            },
            TotemKind::Hihat => InstrumentSpec::MetalHat {
                harmonicity: 5.1,
                modulation_index: 32.0,
                resonance: 4000.0,
                octaves: 1.5,
                envelope: Adsr { attack: 0.001, decay: 0.1, sustain: 0.0, release: 0.01 },
            },
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Deterministic trigger material
// ───────────────────────────────────────────────────────────────────

/// Per-totem pseudo-random seed, folded out of the server-assigned id so
/// every client derives the same value.
pub fn seed_from_id(id: TotemId) -> u64 {
    let bits = id.0.as_u128();
    (bits >> 64) as u64 ^ bits as u64
}

/// SplitMix64 finalizer: mixes seed and step into a well-distributed
/// value. The same (seed, step) always yields the same output, which is
/// what keeps replay varied across steps but identical per step.
pub fn mix(seed: u64, step: u64) -> u64 {
    let mut z = seed ^ step.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Trigger interval for a kind, in beats of the shared transport.
///
/// Kick pulses every beat, hi-hat every half beat, bass once per
/// four-beat measure; a lead synth picks one of three feels from its
/// seed, fixed for the totem's lifetime.
pub fn interval_beats(kind: TotemKind, seed: u64) -> f64 {
    match kind {
        TotemKind::Kick => 1.0,
        TotemKind::Hihat => 0.5,
        TotemKind::Bass => 4.0,
        TotemKind::Synth => [1.0, 0.5, 2.0][(seed % 3) as usize],
    }
}

/// One scheduled audio event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    pub note: Note,
    /// 0.0 – 1.0
    pub velocity: f32,
    /// Sustain length in beats.
    pub duration_beats: f64,
}

/// Choose the trigger material for one step of a totem's cycle.
pub fn trigger_for(kind: TotemKind, seed: u64, step: u64, scale: Scale) -> Trigger {
    match kind {
        TotemKind::Kick => Trigger { note: "C1", velocity: 1.0, duration_beats: 0.5 },
        TotemKind::Hihat => {
            // Accent pattern: velocity varies per step but repeats
            // deterministically.
            let accent = (mix(seed, step) % 512) as f32 / 1024.0;
            Trigger { note: "C6", velocity: 0.5 + accent, duration_beats: 0.125 }
        }
        TotemKind::Bass => {
            let notes = scale.bass_notes();
            let note = notes[(mix(seed, step) % notes.len() as u64) as usize];
            Trigger { note, velocity: 1.0, duration_beats: 0.5 }
        }
        TotemKind::Synth => {
            let notes = scale.lead_notes();
            let note = notes[(mix(seed, step) % notes.len() as u64) as usize];
            Trigger { note, velocity: 1.0, duration_beats: 0.5 }
        }
    }
}
