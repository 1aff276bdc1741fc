// Evaluation of a finished harmonization.
//
// Compares a complete grid against the melody it was built from and
// summarizes its voice leading. Fidelity compares whole notes (pitch,
// onset, duration, velocity), so any change to the melody shows up here
// even if the reward model would not notice it.

use crate::error::{HarmonyError, Result};
use crate::grid::{HarmonyGrid, Melody, VoiceRange, interval};
use crate::reward::{count_parallel_perfects, motion_value, score_grid, step_value};
use crate::style::StylePreset;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub steps: usize,
    pub voices: usize,
    /// Fraction of melody notes reproduced exactly.
    pub melody_fidelity: f64,
    /// Fraction of harmony pitches inside their voice range.
    pub range_compliance: f64,
    /// Adjacent voice pairs (summed over steps) where the lower voice is
    /// above the upper one.
    pub voice_crossings: usize,
    /// Voice pairs moving into the same perfect interval by similar motion.
    pub parallel_perfects: usize,
    /// Mean contrary-motion value of harmony voices against the melody.
    pub contrary_motion: f64,
    /// Mean melodic step value of the harmony voices.
    pub smooth_voice_leading: f64,
    /// Whole-grid reward under the given style.
    pub total_reward: f64,
}

pub fn evaluate(
    melody: &Melody,
    grid: &HarmonyGrid,
    ranges: &[VoiceRange],
    style: &StylePreset,
) -> Result<Evaluation> {
    if ranges.len() != grid.num_voices() {
        return Err(HarmonyError::malformed(format!(
            "{} ranges supplied for {} voices",
            ranges.len(),
            grid.num_voices()
        )));
    }
    let notes = grid.to_notes()?;
    let steps = grid.num_steps();
    let voices = grid.num_voices();

    let exported_melody = notes.iter().filter(|n| n.voice == 0);
    let matching = exported_melody
        .zip(melody.notes())
        .filter(|(out, original)| out == original)
        .count();
    let melody_fidelity = ratio(matching, steps);

    let harmony: Vec<_> = notes.iter().filter(|n| n.voice > 0).collect();
    let in_range = harmony
        .iter()
        .filter(|n| ranges[n.voice].contains(n.pitch))
        .count();
    let range_compliance = ratio(in_range, harmony.len());

    let mut chords = Vec::with_capacity(steps);
    for step in 0..steps {
        chords.push(grid.chord(step).ok_or_else(|| {
            HarmonyError::malformed(format!("step {step} has unknown cells"))
        })?);
    }

    let voice_crossings = chords
        .iter()
        .map(|c| c.windows(2).filter(|w| w[1] > w[0]).count())
        .sum();

    let mut parallel_perfects = 0;
    let mut contrary = 0.0;
    let mut smooth = 0.0;
    let mut motions = 0;
    for pair in chords.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        parallel_perfects += count_parallel_perfects(prev, cur);
        let melody_dir = interval::direction(prev[0], cur[0]);
        for v in 1..voices {
            contrary += motion_value(melody_dir, interval::direction(prev[v], cur[v]));
            smooth += step_value(interval::semitones(prev[v], cur[v]).unsigned_abs());
            motions += 1;
        }
    }

    Ok(Evaluation {
        steps,
        voices,
        melody_fidelity,
        range_compliance,
        voice_crossings,
        parallel_perfects,
        contrary_motion: if motions == 0 { 0.0 } else { contrary / motions as f64 },
        smooth_voice_leading: if motions == 0 { 0.0 } else { smooth / motions as f64 },
        total_reward: score_grid(grid, ranges, style)?,
    })
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        1.0
    } else {
        part as f64 / whole as f64
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "steps:               {} x {} voices", self.steps, self.voices)?;
        writeln!(f, "melody fidelity:     {:.1}%", self.melody_fidelity * 100.0)?;
        writeln!(f, "range compliance:    {:.1}%", self.range_compliance * 100.0)?;
        writeln!(f, "voice crossings:     {}", self.voice_crossings)?;
        writeln!(f, "parallel perfects:   {}", self.parallel_perfects)?;
        writeln!(f, "contrary motion:     {:.3}", self.contrary_motion)?;
        writeln!(f, "smooth voice leading:{:.3}", self.smooth_voice_leading)?;
        write!(f, "total reward:        {:.3}", self.total_reward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Voice;
    use crate::mask::Mask;

    fn filled(melody: &Melody, bass: &[u8]) -> HarmonyGrid {
        let mut grid = HarmonyGrid::from_melody(melody, &[Voice::Bass]);
        let mask = Mask::lock_melody(2, melody.len());
        for (step, &p) in bass.iter().enumerate() {
            grid.assign(&mask, 1, step, p).unwrap();
        }
        grid
    }

    fn ranges() -> Vec<VoiceRange> {
        vec![Voice::Soprano.default_range(), Voice::Bass.default_range()]
    }

    #[test]
    fn test_perfect_fidelity_and_contrary_bass() {
        let melody = Melody::from_pitches(&[60, 62, 64, 62], 480, 480).unwrap();
        let grid = filled(&melody, &[48, 47, 45, 47]);
        let eval = evaluate(&melody, &grid, &ranges(), &StylePreset::classical()).unwrap();
        assert_eq!(eval.melody_fidelity, 1.0);
        assert_eq!(eval.range_compliance, 1.0);
        assert_eq!(eval.voice_crossings, 0);
        assert_eq!(eval.contrary_motion, 1.0);
        assert!(eval.smooth_voice_leading > 0.5);
    }

    #[test]
    fn test_tampered_melody_lowers_fidelity() {
        let melody = Melody::from_pitches(&[60, 62, 64, 62], 480, 480).unwrap();
        let mut grid = filled(&melody, &[48, 47, 45, 47]);
        grid.set_raw(0, 2, Some(65));
        let eval = evaluate(&melody, &grid, &ranges(), &StylePreset::classical()).unwrap();
        assert_eq!(eval.melody_fidelity, 0.75);
    }

    #[test]
    fn test_parallels_and_crossings_counted() {
        let melody = Melody::from_pitches(&[60, 62, 55], 480, 480).unwrap();
        let grid = filled(&melody, &[53, 55, 58]);
        let eval = evaluate(&melody, &grid, &ranges(), &StylePreset::classical()).unwrap();
        // 60/53 -> 62/55: fifth to fifth, both rising.
        assert_eq!(eval.parallel_perfects, 1);
        // 55 over 58: bass above melody.
        assert_eq!(eval.voice_crossings, 1);
    }

    #[test]
    fn test_incomplete_grid_is_rejected() {
        let melody = Melody::from_pitches(&[60, 62], 480, 480).unwrap();
        let grid = HarmonyGrid::from_melody(&melody, &[Voice::Bass]);
        assert!(evaluate(&melody, &grid, &ranges(), &StylePreset::classical()).is_err());
    }
}
