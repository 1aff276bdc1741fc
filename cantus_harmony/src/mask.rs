// Tri-state overlay recording which grid cells may change.
//
// `Fixed` cells hold externally supplied content (the melody) and are set
// exactly once, by `lock_melody`. Nothing afterwards can turn a fixed cell
// into anything else, or anything else into a fixed cell: the transition
// methods refuse. `Generated` and `Unknown` cells move freely between each
// other as the infilling controller and the environment fill the grid.

use crate::error::{HarmonyError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellMask {
    /// Externally fixed; must survive every operation unchanged.
    Fixed,
    /// Produced by the engine and currently known.
    Generated,
    /// Still to be produced.
    Unknown,
}

/// Mask shaped like a `HarmonyGrid`: `cells[voice][step]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mask {
    cells: Vec<Vec<CellMask>>,
}

impl Mask {
    /// Lock row 0 (the melody) as fixed and mark every harmony cell unknown.
    pub fn lock_melody(num_voices: usize, num_steps: usize) -> Self {
        let cells = (0..num_voices)
            .map(|voice| {
                let state = if voice == 0 {
                    CellMask::Fixed
                } else {
                    CellMask::Unknown
                };
                vec![state; num_steps]
            })
            .collect();
        Mask { cells }
    }

    pub fn num_voices(&self) -> usize {
        self.cells.len()
    }

    pub fn num_steps(&self) -> usize {
        self.cells.first().map_or(0, Vec::len)
    }

    pub fn state(&self, voice: usize, step: usize) -> CellMask {
        self.cells[voice][step]
    }

    pub fn is_fixed(&self, voice: usize, step: usize) -> bool {
        self.cells[voice][step] == CellMask::Fixed
    }

    /// Record that the engine produced a value for a non-fixed cell.
    pub fn mark_generated(&mut self, voice: usize, step: usize) -> Result<()> {
        self.transition(voice, step, CellMask::Generated)
    }

    /// Return a non-fixed cell to the unknown state.
    pub fn mark_unknown(&mut self, voice: usize, step: usize) -> Result<()> {
        self.transition(voice, step, CellMask::Unknown)
    }

    fn transition(&mut self, voice: usize, step: usize, to: CellMask) -> Result<()> {
        let cell = &mut self.cells[voice][step];
        if *cell == CellMask::Fixed {
            return Err(HarmonyError::ConstraintViolation { voice, step });
        }
        *cell = to;
        Ok(())
    }

    /// Every (voice, step) in the given state, in step-major order.
    pub fn cells_in(&self, state: CellMask) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for step in 0..self.num_steps() {
            for (voice, row) in self.cells.iter().enumerate() {
                if row[step] == state {
                    out.push((voice, step));
                }
            }
        }
        out
    }

    pub fn count(&self, state: CellMask) -> usize {
        self.cells
            .iter()
            .map(|row| row.iter().filter(|&&c| c == state).count())
            .sum()
    }

    /// Keep only the first `steps` columns.
    pub fn truncate(&mut self, steps: usize) {
        for row in &mut self.cells {
            row.truncate(steps);
        }
    }
}
