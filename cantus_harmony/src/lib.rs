// Cantus Harmony
//
// A melody-preserving harmonizer. Given a monophonic melody it produces
// one to three lower voices (alto, tenor, bass) under it, either by
// masked infilling with a pluggable note-prediction model or step by step
// inside a reinforcement-learning style environment scored by a
// voice-leading reward model. The melody cells are locked by a mask and
// can never be changed by any generation path.
//
// Architecture:
// - grid.rs: Voices, ranges, notes, the melody, and the voices x steps grid
// - mask.rs: Per-cell fixed / generated / unknown state
// - style.rs: Reward rules, rule weights, and named style presets
// - config.rs: Harmonizer configuration (JSON, validated)
// - reward.rs: Per-step voice-leading reward with a per-rule breakdown
// - model.rs: Infilling model trait, predictions, and the model session
// - prior.rs: Built-in interval-prior model (JSON tables)
// - infill.rs: Progressive unmasking controller with melody re-locking
// - env.rs: Step-wise harmonization environment with model fallback
// - policy.rs: Rule-based, greedy, random, and model-driven policies
// - episode.rs: Episode driver and parallel episode runner (rayon)
// - evaluate.rs: Fidelity and voice-leading metrics for a finished grid
// - midi.rs: MIDI melody input and multi-track harmonization output
// - error.rs: Error type shared by every module
//
// Everything random flows through a seeded `CantusRng`, so a run is
// reproducible from its seed.

pub mod config;
pub mod env;
pub mod episode;
pub mod error;
pub mod evaluate;
pub mod grid;
pub mod infill;
pub mod mask;
pub mod midi;
pub mod model;
pub mod policy;
pub mod prior;
pub mod reward;
pub mod style;
