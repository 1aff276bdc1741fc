// Model handle for masked infilling.
//
// `InfillModel` is the seam between the engine and whatever pretrained
// masked sequence model backs it. The engine only ever asks one question:
// given the grid with some cells known, what is the distribution over MIDI
// pitches at every cell? Predictions are flat `f32` buffers laid out
// `[voice][step][pitch]`, so a backend never has to know the engine's types.
//
// A model may return anything for any cell, fixed cells included; the
// infilling controller (infill.rs) decides what to trust.
//
// `ModelSession` scopes a model's lifetime: acquired once per worker,
// released explicitly or on drop. A released or never-acquired session
// answers every inference with `ModelUnavailable`. Inference takes
// `&mut self`, so one session can never serve two episodes at once.

use crate::error::{HarmonyError, Result};
use crate::grid::{HarmonyGrid, VoiceRange};
use tracing::{debug, info};

/// Size of the pitch vocabulary: every MIDI note number.
pub const PITCH_VOCAB: usize = 128;

/// What the model sees: the grid (unknown cells are `None`) and the range
/// of each row.
#[derive(Debug, Clone, Copy)]
pub struct ModelInput<'a> {
    pub grid: &'a HarmonyGrid,
    pub ranges: &'a [VoiceRange],
}

/// Per-cell probability distributions over `PITCH_VOCAB` pitches.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    num_voices: usize,
    num_steps: usize,
    probs: Vec<f32>,
}

impl Prediction {
    /// Wrap a flat `[voice][step][pitch]` buffer, checking its length.
    pub fn new(num_voices: usize, num_steps: usize, probs: Vec<f32>) -> Result<Self> {
        let expected = num_voices * num_steps * PITCH_VOCAB;
        if probs.len() != expected {
            return Err(HarmonyError::malformed(format!(
                "prediction has {} values, expected {expected} ({num_voices} voices x {num_steps} steps x {PITCH_VOCAB} pitches)",
                probs.len()
            )));
        }
        Ok(Prediction {
            num_voices,
            num_steps,
            probs,
        })
    }

    /// Every cell uniform over the full vocabulary.
    pub fn uniform(num_voices: usize, num_steps: usize) -> Self {
        let p = 1.0 / PITCH_VOCAB as f32;
        Prediction {
            num_voices,
            num_steps,
            probs: vec![p; num_voices * num_steps * PITCH_VOCAB],
        }
    }

    pub fn num_voices(&self) -> usize {
        self.num_voices
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    fn offset(&self, voice: usize, step: usize) -> usize {
        (voice * self.num_steps + step) * PITCH_VOCAB
    }

    pub fn cell(&self, voice: usize, step: usize) -> &[f32] {
        let at = self.offset(voice, step);
        &self.probs[at..at + PITCH_VOCAB]
    }

    pub fn cell_mut(&mut self, voice: usize, step: usize) -> &mut [f32] {
        let at = self.offset(voice, step);
        &mut self.probs[at..at + PITCH_VOCAB]
    }
}

/// A pretrained masked infilling model.
pub trait InfillModel: Send {
    fn name(&self) -> &str;

    /// Predict a pitch distribution for every cell of `input.grid`.
    fn predict(&mut self, input: &ModelInput<'_>) -> Result<Prediction>;
}

/// Scoped ownership of one model handle.
pub struct ModelSession {
    model: Option<Box<dyn InfillModel>>,
    name: String,
    inferences: u64,
}

impl ModelSession {
    pub fn acquire(model: Box<dyn InfillModel>) -> Self {
        let name = model.name().to_string();
        info!(model = %name, "infill model acquired");
        ModelSession {
            model: Some(model),
            name,
            inferences: 0,
        }
    }

    /// A session with no backend. Every inference fails with
    /// `ModelUnavailable`, which lets callers exercise their fallback path.
    pub fn unavailable() -> Self {
        ModelSession {
            model: None,
            name: "none".into(),
            inferences: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        self.model.is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inference_count(&self) -> u64 {
        self.inferences
    }

    /// Run one inference, checking the prediction's shape against the grid.
    pub fn predict(&mut self, input: &ModelInput<'_>) -> Result<Prediction> {
        let model = self.model.as_mut().ok_or_else(|| {
            HarmonyError::ModelUnavailable(format!("session '{}' holds no model", self.name))
        })?;
        let prediction = model.predict(input)?;
        if prediction.num_voices() != input.grid.num_voices()
            || prediction.num_steps() != input.grid.num_steps()
        {
            return Err(HarmonyError::malformed(format!(
                "model '{}' predicted a {}x{} grid for a {}x{} input",
                self.name,
                prediction.num_voices(),
                prediction.num_steps(),
                input.grid.num_voices(),
                input.grid.num_steps()
            )));
        }
        self.inferences += 1;
        Ok(prediction)
    }

    /// Give the model back and leave the session unavailable.
    pub fn release(&mut self) -> Option<Box<dyn InfillModel>> {
        let model = self.model.take();
        if model.is_some() {
            info!(model = %self.name, inferences = self.inferences, "infill model released");
        }
        model
    }
}

impl Drop for ModelSession {
    fn drop(&mut self) {
        if self.model.is_some() {
            debug!(model = %self.name, inferences = self.inferences, "releasing infill model on drop");
            self.model = None;
        }
    }
}

impl std::fmt::Debug for ModelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSession")
            .field("name", &self.name)
            .field("available", &self.is_available())
            .field("inferences", &self.inferences)
            .finish()
    }
}
