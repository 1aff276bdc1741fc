// Masking-consistent infilling controller.
//
// Drives a masked infilling model (through a `ModelSession`) to fill every
// unknown cell of a harmony grid while guaranteeing that fixed cells come
// back exactly as they went in. The model is treated as advisory: each
// round it proposes values for the whole grid, fixed cells included, and
// the controller merges that proposal with what is already known before
// anything else can see it.
//
// Schedule (progressive unmasking, `iterations` rounds):
//   1. predict over the grid, conditioned on every known cell;
//   2. rank the still-unknown cells by model confidence (highest in-range
//      probability) and pick ceil(remaining / rounds_left) of them;
//   3. sample those cells at the configured temperature, restricted to the
//      voice range;
//   4. merge: fixed cells are re-locked to their original values and cells
//      resolved in earlier rounds keep their values; newly sampled cells
//      become known context for the next round.
// After the last round the fixed cells are re-locked once more,
// unconditionally. `Infilled` is the only way results leave this module,
// and it is only built from a merged grid.
//
// A missing or released model fails with `ModelUnavailable`; choosing a
// fallback is the caller's job.

use crate::config::VoiceRanges;
use crate::error::{HarmonyError, Result};
use crate::grid::{HarmonyGrid, Melody, Voice, VoiceRange};
use crate::mask::{CellMask, Mask};
use crate::model::{ModelInput, ModelSession, Prediction};
use cantus_prng::CantusRng;
use serde::Serialize;
use tracing::{debug, info};

/// Counters describing one infill run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InfillStats {
    pub rounds: usize,
    pub resolved_cells: usize,
    /// Fixed cells the model's raw proposal changed and the merge restored.
    pub relocked_cells: usize,
    /// Cells whose prediction had no mass inside the voice range and were
    /// drawn uniformly instead.
    pub uniform_fallbacks: usize,
}

/// A completed, already-merged infill result.
#[derive(Debug, Clone)]
pub struct Infilled {
    grid: HarmonyGrid,
    mask: Mask,
    stats: InfillStats,
}

impl Infilled {
    pub fn grid(&self) -> &HarmonyGrid {
        &self.grid
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    pub fn stats(&self) -> &InfillStats {
        &self.stats
    }

    pub fn into_grid(self) -> HarmonyGrid {
        self.grid
    }
}

pub struct InfillController<'s> {
    session: &'s mut ModelSession,
    temperature: f64,
    iterations: usize,
}

impl<'s> InfillController<'s> {
    pub fn new(session: &'s mut ModelSession, temperature: f64, iterations: usize) -> Result<Self> {
        if !temperature.is_finite() || temperature <= 0.0 {
            return Err(HarmonyError::config(format!(
                "temperature must be finite and > 0, got {temperature}"
            )));
        }
        if iterations == 0 {
            return Err(HarmonyError::config("infill needs at least one iteration"));
        }
        Ok(InfillController {
            session,
            temperature,
            iterations,
        })
    }

    /// Harmonize a melody from scratch: lock it into row 0 and fill
    /// `harmony_voices` rows below it.
    pub fn harmonize(
        &mut self,
        melody: &Melody,
        harmony_voices: usize,
        ranges: &VoiceRanges,
        rng: &mut CantusRng,
    ) -> Result<Infilled> {
        let roles = Voice::harmony_roles(harmony_voices)?;
        let grid = HarmonyGrid::from_melody(melody, &roles);
        let mask = Mask::lock_melody(grid.num_voices(), grid.num_steps());
        let row_ranges = ranges.for_voices(grid.voices());
        self.infill(&grid, &mask, &row_ranges, rng)
    }

    /// Fill every unknown cell of `grid`. Neither input is modified.
    pub fn infill(
        &mut self,
        grid: &HarmonyGrid,
        mask: &Mask,
        ranges: &[VoiceRange],
        rng: &mut CantusRng,
    ) -> Result<Infilled> {
        check_shapes(grid, mask, ranges)?;
        let fixed = fixed_cells(grid, mask)?;

        let mut working = grid.clone();
        let mut working_mask = mask.clone();
        for (voice, step) in working_mask.cells_in(CellMask::Unknown) {
            working.set_raw(voice, step, None);
        }
        for (voice, step) in working_mask.cells_in(CellMask::Generated) {
            if working.pitch(voice, step).is_none() {
                working_mask.mark_unknown(voice, step)?;
            }
        }

        let mut stats = InfillStats::default();
        for round in 0..self.iterations {
            let remaining = working_mask.cells_in(CellMask::Unknown);
            if remaining.is_empty() {
                break;
            }
            let prediction = self.session.predict(&ModelInput {
                grid: &working,
                ranges,
            })?;

            let rounds_left = self.iterations - round;
            let take = remaining.len().div_ceil(rounds_left);
            let chosen = most_confident(&prediction, &remaining, ranges, take);

            let mut proposal = decode(&prediction, &working, &working_mask, ranges);
            for &(voice, step) in &chosen {
                let (pitch, uniform) =
                    sample_cell(prediction.cell(voice, step), ranges[voice], self.temperature, rng);
                if uniform {
                    stats.uniform_fallbacks += 1;
                }
                proposal.set_raw(voice, step, Some(pitch));
            }

            stats.relocked_cells += merge(&mut proposal, &working, &working_mask, &chosen, &fixed);
            for &(voice, step) in &chosen {
                working_mask.mark_generated(voice, step)?;
            }
            working = proposal;
            stats.rounds += 1;
            stats.resolved_cells += chosen.len();
            debug!(
                round,
                resolved = chosen.len(),
                remaining = remaining.len() - chosen.len(),
                "infill round"
            );
        }

        stats.relocked_cells += relock(&mut working, &fixed);
        if !working.is_complete() {
            return Err(HarmonyError::malformed(format!(
                "infill left {} cells unknown after {} rounds",
                working.unknown_count(),
                stats.rounds
            )));
        }

        info!(
            model = self.session.name(),
            rounds = stats.rounds,
            resolved = stats.resolved_cells,
            relocked = stats.relocked_cells,
            "infill complete"
        );
        Ok(Infilled {
            grid: working,
            mask: working_mask,
            stats,
        })
    }

    /// Model-informed pitches for the harmony voices at one step.
    ///
    /// Cells at `step` that are already known keep their value; unknown
    /// ones are sampled from a single prediction over the whole grid.
    pub fn propose_step(
        &mut self,
        grid: &HarmonyGrid,
        mask: &Mask,
        ranges: &[VoiceRange],
        step: usize,
        rng: &mut CantusRng,
    ) -> Result<Vec<u8>> {
        check_shapes(grid, mask, ranges)?;
        if step >= grid.num_steps() {
            return Err(HarmonyError::malformed(format!(
                "step {step} outside a {}-step grid",
                grid.num_steps()
            )));
        }
        let prediction = self.session.predict(&ModelInput { grid, ranges })?;
        let pitches = (1..grid.num_voices())
            .map(|voice| match grid.pitch(voice, step) {
                Some(p) if mask.state(voice, step) == CellMask::Generated => p,
                _ => sample_cell(prediction.cell(voice, step), ranges[voice], self.temperature, rng).0,
            })
            .collect();
        Ok(pitches)
    }
}

fn check_shapes(grid: &HarmonyGrid, mask: &Mask, ranges: &[VoiceRange]) -> Result<()> {
    if mask.num_voices() != grid.num_voices() || mask.num_steps() != grid.num_steps() {
        return Err(HarmonyError::malformed(format!(
            "mask is {}x{} but grid is {}x{}",
            mask.num_voices(),
            mask.num_steps(),
            grid.num_voices(),
            grid.num_steps()
        )));
    }
    if ranges.len() != grid.num_voices() {
        return Err(HarmonyError::malformed(format!(
            "{} ranges supplied for {} voices",
            ranges.len(),
            grid.num_voices()
        )));
    }
    Ok(())
}

/// Snapshot of every fixed cell and its value.
fn fixed_cells(grid: &HarmonyGrid, mask: &Mask) -> Result<Vec<(usize, usize, u8)>> {
    mask.cells_in(CellMask::Fixed)
        .into_iter()
        .map(|(voice, step)| {
            grid.pitch(voice, step)
                .map(|p| (voice, step, p))
                .ok_or_else(|| {
                    HarmonyError::malformed(format!("fixed cell voice {voice} step {step} has no pitch"))
                })
        })
        .collect()
}

/// Highest in-range probability of a cell.
fn confidence(cell: &[f32], range: VoiceRange) -> f32 {
    cell[range.min as usize..=range.max as usize]
        .iter()
        .copied()
        .filter(|p| p.is_finite())
        .fold(0.0, f32::max)
}

/// The `take` unknown cells the model is most sure about. Ties keep
/// step-major order.
fn most_confident(
    prediction: &Prediction,
    remaining: &[(usize, usize)],
    ranges: &[VoiceRange],
    take: usize,
) -> Vec<(usize, usize)> {
    let mut ranked: Vec<(f32, usize, usize)> = remaining
        .iter()
        .map(|&(v, s)| (confidence(prediction.cell(v, s), ranges[v]), v, s))
        .collect();
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
    ranked.into_iter().take(take).map(|(_, v, s)| (v, s)).collect()
}

/// The model's raw full-grid answer: its most likely pitch for every cell
/// that is not currently unknown. Unknown cells stay `None`.
fn decode(prediction: &Prediction, working: &HarmonyGrid, mask: &Mask, ranges: &[VoiceRange]) -> HarmonyGrid {
    let mut raw = working.clone();
    for voice in 0..working.num_voices() {
        for step in 0..working.num_steps() {
            if mask.state(voice, step) == CellMask::Unknown {
                continue;
            }
            let cell = prediction.cell(voice, step);
            let range = ranges[voice];
            let mut best = range.min;
            for pitch in range.min..=range.max {
                if cell[pitch as usize] > cell[best as usize] {
                    best = pitch;
                }
            }
            raw.set_raw(voice, step, Some(best));
        }
    }
    raw
}

/// Merge a raw proposal with the known state. Only the cells resolved this
/// round take the proposal's values. Returns how many fixed cells had to
/// be restored.
fn merge(
    proposal: &mut HarmonyGrid,
    known: &HarmonyGrid,
    mask: &Mask,
    chosen: &[(usize, usize)],
    fixed: &[(usize, usize, u8)],
) -> usize {
    for (voice, step) in mask.cells_in(CellMask::Generated) {
        proposal.set_raw(voice, step, known.pitch(voice, step));
    }
    for (voice, step) in mask.cells_in(CellMask::Unknown) {
        if !chosen.contains(&(voice, step)) {
            proposal.set_raw(voice, step, None);
        }
    }
    relock(proposal, fixed)
}

/// Overwrite every fixed cell with its original value.
fn relock(grid: &mut HarmonyGrid, fixed: &[(usize, usize, u8)]) -> usize {
    let mut restored = 0;
    for &(voice, step, pitch) in fixed {
        if grid.pitch(voice, step) != Some(pitch) {
            grid.set_raw(voice, step, Some(pitch));
            restored += 1;
        }
    }
    restored
}

/// Draw one pitch for a cell at `temperature`, within `range`. The flag is
/// set when the model left no mass in range and the draw was uniform.
pub(crate) fn sample_cell(cell: &[f32], range: VoiceRange, temperature: f64, rng: &mut CantusRng) -> (u8, bool) {
    let probs: Vec<f64> = cell[range.min as usize..=range.max as usize]
        .iter()
        .map(|&p| f64::from(p))
        .collect();
    match rng.sample_tempered(&probs, temperature) {
        Some(i) => (range.min + i as u8, false),
        None => {
            let i = rng.range_usize(0, probs.len());
            (range.min + i as u8, true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InfillModel, PITCH_VOCAB};
    use crate::prior::IntervalPriorModel;

    /// Puts all its mass on one pitch everywhere, including the melody row.
    struct Stubborn(u8);

    impl InfillModel for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }

        fn predict(&mut self, input: &ModelInput<'_>) -> Result<Prediction> {
            let (v, s) = (input.grid.num_voices(), input.grid.num_steps());
            let mut probs = vec![0.0; v * s * PITCH_VOCAB];
            for cell in probs.chunks_mut(PITCH_VOCAB) {
                cell[self.0 as usize] = 1.0;
            }
            Prediction::new(v, s, probs)
        }
    }

    fn melody() -> Melody {
        Melody::from_pitches(&[67, 69, 71, 72, 71, 69, 67, 67], 480, 480).unwrap()
    }

    #[test]
    fn test_fixed_cells_survive_adversarial_model() {
        let mut session = ModelSession::acquire(Box::new(Stubborn(50)));
        let mut controller = InfillController::new(&mut session, 1.0, 4).unwrap();
        let mut rng = CantusRng::new(7);
        let m = melody();
        let out = controller
            .harmonize(&m, 3, &VoiceRanges::default(), &mut rng)
            .unwrap();

        let grid = out.grid();
        assert!(grid.is_complete());
        for (step, &p) in m.pitches().iter().enumerate() {
            assert_eq!(grid.pitch(0, step), Some(p));
        }
        // The stubborn model rewrote the melody every round.
        assert!(out.stats().relocked_cells >= m.len());
        assert_eq!(out.stats().resolved_cells, 24);
    }

    #[test]
    fn test_out_of_range_mass_falls_back_to_uniform() {
        // Pitch 100 is outside every harmony range.
        let mut session = ModelSession::acquire(Box::new(Stubborn(100)));
        let mut controller = InfillController::new(&mut session, 0.5, 2).unwrap();
        let mut rng = CantusRng::new(3);
        let ranges = VoiceRanges::default();
        let out = controller.harmonize(&melody(), 2, &ranges, &mut rng).unwrap();
        assert_eq!(out.stats().uniform_fallbacks, 16);
        let grid = out.grid();
        for voice in 1..grid.num_voices() {
            let range = ranges.get(grid.role(voice));
            for step in 0..grid.num_steps() {
                assert!(range.contains(grid.pitch(voice, step).unwrap()));
            }
        }
    }

    #[test]
    fn test_progressive_schedule_resolves_everything() {
        let mut session = ModelSession::acquire(Box::new(IntervalPriorModel::default_model()));
        let mut rng = CantusRng::new(11);
        for iterations in [1, 3, 8, 40] {
            let mut controller = InfillController::new(&mut session, 0.8, iterations).unwrap();
            let out = controller
                .harmonize(&melody(), 3, &VoiceRanges::default(), &mut rng)
                .unwrap();
            assert!(out.grid().is_complete());
            assert!(out.stats().rounds <= iterations);
            assert_eq!(out.mask().count(CellMask::Unknown), 0);
            assert_eq!(out.mask().count(CellMask::Fixed), 8);
        }
    }

    #[test]
    fn test_inputs_are_not_modified() {
        let m = melody();
        let grid = HarmonyGrid::from_melody(&m, &[Voice::Bass]);
        let mask = Mask::lock_melody(2, 8);
        let before = (grid.clone(), mask.clone());
        let ranges = [Voice::Soprano.default_range(), Voice::Bass.default_range()];

        let mut session = ModelSession::acquire(Box::new(IntervalPriorModel::default_model()));
        let mut controller = InfillController::new(&mut session, 1.0, 3).unwrap();
        let mut rng = CantusRng::new(5);
        controller.infill(&grid, &mask, &ranges, &mut rng).unwrap();
        assert_eq!((grid, mask), before);
    }

    #[test]
    fn test_unavailable_model_fails() {
        let mut session = ModelSession::unavailable();
        let mut controller = InfillController::new(&mut session, 1.0, 3).unwrap();
        let mut rng = CantusRng::new(1);
        assert!(matches!(
            controller.harmonize(&melody(), 3, &VoiceRanges::default(), &mut rng),
            Err(HarmonyError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn test_same_seed_same_result() {
        let run = |seed| {
            let mut session = ModelSession::acquire(Box::new(IntervalPriorModel::default_model()));
            let mut controller = InfillController::new(&mut session, 1.2, 4).unwrap();
            let mut rng = CantusRng::new(seed);
            controller
                .harmonize(&melody(), 3, &VoiceRanges::default(), &mut rng)
                .unwrap()
                .into_grid()
        };
        assert_eq!(run(9), run(9));
    }

    #[test]
    fn test_bad_settings_rejected() {
        let mut session = ModelSession::unavailable();
        assert!(InfillController::new(&mut session, 0.0, 3).is_err());
        assert!(InfillController::new(&mut session, f64::NAN, 3).is_err());
        assert!(InfillController::new(&mut session, 1.0, 0).is_err());
    }
}
