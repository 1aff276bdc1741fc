// Interval-prior infilling model.
//
// A small, JSON-loadable `InfillModel` that stands in for a pretrained
// checkpoint. It knows two things per voice role:
// - below_melody: how far below the melody note (in semitones) the voice
//   likes to sit, e.g. a bass an octave or a tenth down.
// - motion: how the voice likes to move between adjacent steps.
// Tables are sparse `interval -> weight` maps; an empty table means "no
// preference". Every pitch also gets a small `floor` so the distribution is
// never degenerate inside the voice range.
//
// Known neighbours on both sides (previous and next step) condition the
// motion term, so the model uses context the controller has already
// resolved. Like a real masked model it predicts every cell, fixed ones
// included, and has no idea which cells it may not change.
//
// Loaded from JSON (`load` / `from_json_str`) or built with
// `default_model()`.

use crate::error::{HarmonyError, Result};
use crate::grid::Voice;
use crate::model::{InfillModel, ModelInput, PITCH_VOCAB, Prediction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Sparse weights keyed by signed semitone interval.
type IntervalTable = BTreeMap<i8, f64>;

/// Factor applied to a pitch that would cross a known neighbouring voice.
const CROSSING_FACTOR: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RolePrior {
    /// Weight by semitones below the melody (positive = below).
    #[serde(default)]
    pub below_melody: IntervalTable,
    /// Weight by melodic interval from the previous step.
    #[serde(default)]
    pub motion: IntervalTable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntervalPriorModel {
    pub name: String,
    pub roles: BTreeMap<Voice, RolePrior>,
    /// Baseline weight for every in-range pitch.
    pub floor: f64,
}

impl IntervalPriorModel {
    /// Built-in chorale-style prior: thirds and sixths under the melody for
    /// the inner voices, octaves and tenths for the bass, stepwise motion
    /// preferred everywhere.
    pub fn default_model() -> Self {
        let motion = interval_table(&[
            (0, 4.0),
            (1, 3.0),
            (-1, 3.0),
            (2, 3.0),
            (-2, 3.0),
            (3, 2.0),
            (-3, 2.0),
            (4, 2.0),
            (-4, 2.0),
            (5, 1.5),
            (-5, 1.5),
            (7, 1.0),
            (-7, 1.0),
            (12, 0.5),
            (-12, 0.5),
        ]);

        let mut roles = BTreeMap::new();
        roles.insert(
            Voice::Soprano,
            RolePrior {
                below_melody: IntervalTable::new(),
                motion: motion.clone(),
            },
        );
        roles.insert(
            Voice::Alto,
            RolePrior {
                below_melody: interval_table(&[
                    (0, 0.5),
                    (3, 3.0),
                    (4, 3.0),
                    (5, 2.5),
                    (7, 2.0),
                    (8, 2.0),
                    (9, 2.5),
                    (12, 1.0),
                ]),
                motion: motion.clone(),
            },
        );
        roles.insert(
            Voice::Tenor,
            RolePrior {
                below_melody: interval_table(&[
                    (5, 1.0),
                    (7, 2.0),
                    (8, 2.5),
                    (9, 2.5),
                    (12, 3.0),
                    (15, 2.0),
                    (16, 2.0),
                    (19, 1.0),
                ]),
                motion: motion.clone(),
            },
        );
        roles.insert(
            Voice::Bass,
            RolePrior {
                below_melody: interval_table(&[
                    (12, 2.0),
                    (15, 2.0),
                    (16, 2.0),
                    (17, 1.5),
                    (19, 3.0),
                    (20, 1.5),
                    (21, 2.0),
                    (24, 3.0),
                    (27, 1.0),
                    (28, 1.0),
                ]),
                motion,
            },
        );

        IntervalPriorModel {
            name: "interval-prior".into(),
            roles,
            floor: 1e-3,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let model: IntervalPriorModel = serde_json::from_str(json)?;
        model.validate()?;
        Ok(model)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.floor.is_finite() || self.floor < 0.0 {
            return Err(HarmonyError::config(format!(
                "prior '{}': floor must be finite and >= 0",
                self.name
            )));
        }
        for (voice, prior) in &self.roles {
            for (interval, &w) in prior.below_melody.iter().chain(&prior.motion) {
                if !w.is_finite() || w < 0.0 {
                    return Err(HarmonyError::config(format!(
                        "prior '{}': {} weight {w} for interval {interval} must be finite and >= 0",
                        self.name,
                        voice.name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Unnormalized weight of `pitch` for one cell.
    fn cell_weight(&self, input: &ModelInput<'_>, voice: usize, step: usize, pitch: u8) -> f64 {
        let grid = input.grid;
        let role = grid.role(voice);
        let prior = self.roles.get(&role);

        let mut w = 1.0;
        if let (Some(prior), Some(melody)) = (prior, grid.pitch(0, step)) {
            if !prior.below_melody.is_empty() {
                let below = i16::from(melody) - i16::from(pitch);
                w *= table_weight(&prior.below_melody, below);
            }
            if !prior.motion.is_empty() {
                if let Some(prev) = step.checked_sub(1).and_then(|s| grid.pitch(voice, s)) {
                    w *= table_weight(&prior.motion, i16::from(pitch) - i16::from(prev));
                }
                let next = (step + 1 < grid.num_steps())
                    .then(|| grid.pitch(voice, step + 1))
                    .flatten();
                if let Some(next) = next {
                    w *= table_weight(&prior.motion, i16::from(next) - i16::from(pitch));
                }
            }
        }

        if let Some(above) = voice.checked_sub(1).and_then(|v| grid.pitch(v, step)) {
            if pitch > above {
                w *= CROSSING_FACTOR;
            }
        }
        if voice + 1 < grid.num_voices() {
            if let Some(below) = grid.pitch(voice + 1, step) {
                if pitch < below {
                    w *= CROSSING_FACTOR;
                }
            }
        }

        w + self.floor
    }
}

impl InfillModel for IntervalPriorModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&mut self, input: &ModelInput<'_>) -> Result<Prediction> {
        let grid = input.grid;
        if input.ranges.len() != grid.num_voices() {
            return Err(HarmonyError::malformed(format!(
                "{} ranges supplied for {} voices",
                input.ranges.len(),
                grid.num_voices()
            )));
        }

        let mut prediction = Prediction::uniform(grid.num_voices(), grid.num_steps());
        for voice in 0..grid.num_voices() {
            let range = input.ranges[voice];
            for step in 0..grid.num_steps() {
                let mut weights = [0.0f64; PITCH_VOCAB];
                for pitch in range.min..=range.max {
                    weights[pitch as usize] = self.cell_weight(input, voice, step, pitch);
                }
                let total: f64 = weights.iter().sum();
                let cell = prediction.cell_mut(voice, step);
                if total > 0.0 {
                    for (out, w) in cell.iter_mut().zip(weights) {
                        *out = (w / total) as f32;
                    }
                }
            }
        }
        Ok(prediction)
    }
}

fn interval_table(entries: &[(i8, f64)]) -> IntervalTable {
    entries.iter().copied().collect()
}

/// Look up an interval, treating anything outside the i8 range or missing
/// from the table as weight 0.
fn table_weight(table: &IntervalTable, interval: i16) -> f64 {
    i8::try_from(interval)
        .ok()
        .and_then(|i| table.get(&i))
        .copied()
        .unwrap_or(0.0)
}
