// The harmony grid: the central representation for harmonization.
//
// Rows are voices (row 0 is always the soprano, which carries the melody),
// columns are time steps, one per melody note. Each cell holds a MIDI pitch
// or `None` while the cell is still unknown. Harmony voices share the start,
// duration, and velocity of the melody note at the same step, so timing lives
// once per column in a `TimeSlot` rather than per cell.
//
// The grid says nothing about which cells may change; that is the job of
// `mask.rs`. Writes that must respect the mask go through `assign`, which
// refuses to touch fixed cells.
//
// Notes (`Note`) and melodies (`Melody`) are the engine's boundary types:
// melodies come in from an external reader, and `to_notes` produces the
// flat note list handed to an external writer.

use crate::error::{HarmonyError, Result};
use crate::mask::Mask;
use serde::{Deserialize, Serialize};

/// Voice role in SATB order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Voice {
    Soprano = 0,
    Alto = 1,
    Tenor = 2,
    Bass = 3,
}

impl Voice {
    pub const ALL: [Voice; 4] = [Voice::Soprano, Voice::Alto, Voice::Tenor, Voice::Bass];

    pub fn name(self) -> &'static str {
        match self {
            Voice::Soprano => "Soprano",
            Voice::Alto => "Alto",
            Voice::Tenor => "Tenor",
            Voice::Bass => "Bass",
        }
    }

    /// Standard MIDI pitch ranges for each voice (approximate).
    pub fn default_range(self) -> VoiceRange {
        match self {
            Voice::Soprano => VoiceRange { min: 60, max: 79 }, // C4–G5
            Voice::Alto => VoiceRange { min: 53, max: 72 },    // F3–C5
            Voice::Tenor => VoiceRange { min: 48, max: 67 },   // C3–G4
            Voice::Bass => VoiceRange { min: 40, max: 60 },    // E2–C4
        }
    }

    /// Roles of the harmony voices for a given harmony voice count.
    ///
    /// One harmony voice is a bass line under the melody; two add an alto;
    /// three complete SATB.
    pub fn harmony_roles(count: usize) -> Result<Vec<Voice>> {
        match count {
            1 => Ok(vec![Voice::Bass]),
            2 => Ok(vec![Voice::Alto, Voice::Bass]),
            3 => Ok(vec![Voice::Alto, Voice::Tenor, Voice::Bass]),
            n => Err(HarmonyError::config(format!(
                "harmony voice count must be 1-3, got {n}"
            ))),
        }
    }
}

/// Inclusive MIDI pitch range for one voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceRange {
    pub min: u8,
    pub max: u8,
}

impl VoiceRange {
    pub fn new(min: u8, max: u8) -> Result<Self> {
        if min > max || max > 127 {
            return Err(HarmonyError::config(format!(
                "invalid voice range [{min}, {max}]"
            )));
        }
        Ok(VoiceRange { min, max })
    }

    pub fn contains(self, pitch: u8) -> bool {
        (self.min..=self.max).contains(&pitch)
    }

    pub fn center(self) -> u8 {
        ((self.min as u16 + self.max as u16) / 2) as u8
    }

    /// Semitones by which `pitch` lies outside the range (0 if inside).
    pub fn distance(self, pitch: u8) -> u8 {
        if pitch < self.min {
            self.min - pitch
        } else if pitch > self.max {
            pitch - self.max
        } else {
            0
        }
    }

    /// Bring a (possibly out-of-MIDI) pitch into the range.
    ///
    /// Shifts by whole octaves first so the pitch class survives, then
    /// hard-clamps whatever a narrow range still leaves outside.
    pub fn clamp(self, pitch: i16) -> u8 {
        let (lo, hi) = (i32::from(self.min), i32::from(self.max));
        let mut p = i32::from(pitch);
        if p < lo {
            p += (lo - p + 11) / 12 * 12;
        }
        if p > hi {
            p -= (p - hi + 11) / 12 * 12;
        }
        p.clamp(lo, hi) as u8
    }
}

/// A single sounding note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Row index in the grid (0 = melody/soprano).
    pub voice: usize,
    /// MIDI pitch (0-127).
    pub pitch: u8,
    /// Onset in ticks.
    pub start: u32,
    /// Length in ticks, always > 0.
    pub duration: u32,
    /// MIDI velocity (0-127).
    pub velocity: u8,
}

impl Note {
    pub fn end(&self) -> u32 {
        self.start + self.duration
    }
}

/// A validated, time-ordered, monophonic melody.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Melody {
    notes: Vec<Note>,
    ticks_per_quarter: u16,
}

impl Melody {
    /// Validate and wrap melody notes.
    ///
    /// Rejects empty input, pitches or velocities above 127, zero durations,
    /// notes outside voice 0, and notes that start before the previous one
    /// ends.
    pub fn new(notes: Vec<Note>, ticks_per_quarter: u16) -> Result<Self> {
        if notes.is_empty() {
            return Err(HarmonyError::malformed("melody has no notes"));
        }
        if ticks_per_quarter == 0 {
            return Err(HarmonyError::malformed("ticks per quarter must be positive"));
        }
        let mut prev_end: Option<u32> = None;
        for (i, note) in notes.iter().enumerate() {
            if note.voice != 0 {
                return Err(HarmonyError::malformed(format!(
                    "melody note {i} belongs to voice {}, expected 0",
                    note.voice
                )));
            }
            if note.pitch > 127 || note.velocity > 127 {
                return Err(HarmonyError::malformed(format!(
                    "melody note {i} out of MIDI range (pitch {}, velocity {})",
                    note.pitch, note.velocity
                )));
            }
            if note.duration == 0 {
                return Err(HarmonyError::malformed(format!(
                    "melody note {i} has zero duration"
                )));
            }
            if note.start.checked_add(note.duration).is_none() {
                return Err(HarmonyError::malformed(format!(
                    "melody note {i} ends past the representable tick range"
                )));
            }
            if let Some(end) = prev_end {
                if note.start < end {
                    return Err(HarmonyError::malformed(format!(
                        "melody note {i} starts at {} before the previous note ends at {end}",
                        note.start
                    )));
                }
            }
            prev_end = Some(note.end());
        }
        Ok(Melody {
            notes,
            ticks_per_quarter,
        })
    }

    /// Build a melody of back-to-back notes, each `step_ticks` long.
    pub fn from_pitches(pitches: &[u8], step_ticks: u32, ticks_per_quarter: u16) -> Result<Self> {
        let notes = pitches
            .iter()
            .enumerate()
            .map(|(i, &pitch)| Note {
                voice: 0,
                pitch,
                start: i as u32 * step_ticks,
                duration: step_ticks,
                velocity: 80,
            })
            .collect();
        Melody::new(notes, ticks_per_quarter)
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn ticks_per_quarter(&self) -> u16 {
        self.ticks_per_quarter
    }

    pub fn pitches(&self) -> Vec<u8> {
        self.notes.iter().map(|n| n.pitch).collect()
    }

    /// Estimated major-key tonic (pitch class) of the melody.
    pub fn tonic(&self) -> u8 {
        interval::estimate_tonic(&self.pitches())
    }
}

/// Timing shared by every voice at one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: u32,
    pub duration: u32,
    pub velocity: u8,
}

/// The harmonization state: `cells[voice][step]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarmonyGrid {
    voices: Vec<Voice>,
    slots: Vec<TimeSlot>,
    cells: Vec<Vec<Option<u8>>>,
}

impl HarmonyGrid {
    /// Lay a melody into row 0 and leave every harmony cell unknown.
    ///
    /// `harmony` lists the roles of rows 1.. in high-to-low order.
    pub fn from_melody(melody: &Melody, harmony: &[Voice]) -> Self {
        let num_steps = melody.len();
        let mut voices = Vec::with_capacity(harmony.len() + 1);
        voices.push(Voice::Soprano);
        voices.extend_from_slice(harmony);

        let slots = melody
            .notes()
            .iter()
            .map(|n| TimeSlot {
                start: n.start,
                duration: n.duration,
                velocity: n.velocity,
            })
            .collect();

        let mut cells = vec![vec![None; num_steps]; voices.len()];
        for (step, note) in melody.notes().iter().enumerate() {
            cells[0][step] = Some(note.pitch);
        }

        HarmonyGrid {
            voices,
            slots,
            cells,
        }
    }

    pub fn num_steps(&self) -> usize {
        self.slots.len()
    }

    pub fn num_voices(&self) -> usize {
        self.voices.len()
    }

    /// Voice roles by row.
    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn role(&self, voice: usize) -> Voice {
        self.voices[voice]
    }

    pub fn slot(&self, step: usize) -> TimeSlot {
        self.slots[step]
    }

    /// Pitch at (voice, step), or `None` if the cell is unknown.
    pub fn pitch(&self, voice: usize, step: usize) -> Option<u8> {
        self.cells[voice][step]
    }

    /// The full chord at `step`, if every voice is known there.
    pub fn chord(&self, step: usize) -> Option<Vec<u8>> {
        self.cells.iter().map(|row| row[step]).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.cells.iter().all(|row| row.iter().all(Option::is_some))
    }

    pub fn unknown_count(&self) -> usize {
        self.cells
            .iter()
            .map(|row| row.iter().filter(|c| c.is_none()).count())
            .sum()
    }

    /// Write a pitch, refusing cells the mask marks as fixed.
    pub fn assign(&mut self, mask: &Mask, voice: usize, step: usize, pitch: u8) -> Result<()> {
        if mask.is_fixed(voice, step) {
            return Err(HarmonyError::ConstraintViolation { voice, step });
        }
        if pitch > 127 {
            return Err(HarmonyError::malformed(format!(
                "pitch {pitch} outside MIDI range at voice {voice} step {step}"
            )));
        }
        self.cells[voice][step] = Some(pitch);
        Ok(())
    }

    /// Unchecked write, for the re-lock pass that restores fixed cells.
    pub(crate) fn set_raw(&mut self, voice: usize, step: usize, pitch: Option<u8>) {
        self.cells[voice][step] = pitch;
    }

    /// Keep only the first `steps` columns.
    pub fn truncate(&mut self, steps: usize) {
        self.slots.truncate(steps);
        for row in &mut self.cells {
            row.truncate(steps);
        }
    }

    /// Flatten the grid into notes ordered by start time, then voice.
    ///
    /// Fails if any cell is still unknown.
    pub fn to_notes(&self) -> Result<Vec<Note>> {
        let mut notes = Vec::with_capacity(self.num_steps() * self.num_voices());
        for (step, slot) in self.slots.iter().enumerate() {
            for (voice, row) in self.cells.iter().enumerate() {
                let pitch = row[step].ok_or_else(|| {
                    HarmonyError::malformed(format!(
                        "cannot export: voice {voice} step {step} is unknown"
                    ))
                })?;
                notes.push(Note {
                    voice,
                    pitch,
                    start: slot.start,
                    duration: slot.duration,
                    velocity: slot.velocity,
                });
            }
        }
        Ok(notes)
    }

    /// Print a compact text summary of the grid for debugging.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (voice, row) in self.cells.iter().enumerate() {
            out.push_str(&format!("{:>8}: ", self.voices[voice].name()));
            let names: Vec<String> = row
                .iter()
                .map(|cell| cell.map_or_else(|| "?".to_string(), pitch_name))
                .collect();
            out.push_str(&names.join(" "));
            out.push('\n');
        }
        out
    }
}

/// Convert a MIDI pitch to a compact note name (e.g., "C4", "F#3").
pub fn pitch_name(pitch: u8) -> String {
    const NAMES: [&str; 12] = [
        "C", "C#", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B",
    ];
    let octave = pitch as i16 / 12 - 1;
    format!("{}{}", NAMES[(pitch % 12) as usize], octave)
}

/// Musical interval helpers.
pub mod interval {
    /// Signed interval in semitones; positive means `pitch_b` is higher.
    pub fn semitones(pitch_a: u8, pitch_b: u8) -> i16 {
        pitch_b as i16 - pitch_a as i16
    }

    /// Absolute interval reduced mod 12 (0-11). A major sixth stays 9;
    /// this is not folded to an inversion class.
    pub fn pitch_class_interval(pitch_a: u8, pitch_b: u8) -> usize {
        (semitones(pitch_a, pitch_b).unsigned_abs() % 12) as usize
    }

    /// Perfect fifth or unison/octave.
    pub fn is_perfect(pitch_a: u8, pitch_b: u8) -> bool {
        matches!(pitch_class_interval(pitch_a, pitch_b), 0 | 7)
    }

    /// Direction of motion between two successive pitches: -1, 0, or 1.
    pub fn direction(from: u8, to: u8) -> i8 {
        semitones(from, to).signum() as i8
    }

    /// Pitch classes of the major scale above its tonic.
    pub const MAJOR_SCALE: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];

    /// Whether `pitch` belongs to the major scale on `tonic` (a pitch class).
    pub fn is_diatonic(tonic: u8, pitch: u8) -> bool {
        let degree = (u16::from(pitch) + 12 - u16::from(tonic % 12)) % 12;
        MAJOR_SCALE.contains(&(degree as u8))
    }

    /// Best-fitting major key for a line, as a tonic pitch class.
    ///
    /// Each candidate scores two points per diatonic pitch plus one each if
    /// the line starts or ends on its tonic; ties go to the lowest pitch
    /// class. An empty line is in C.
    pub fn estimate_tonic(pitches: &[u8]) -> u8 {
        let (Some(&first), Some(&last)) = (pitches.first(), pitches.last()) else {
            return 0;
        };
        let mut best = (0u8, 0usize);
        for tonic in 0..12u8 {
            let diatonic = pitches.iter().filter(|&&p| is_diatonic(tonic, p)).count();
            let score = 2 * diatonic
                + usize::from(first % 12 == tonic)
                + usize::from(last % 12 == tonic);
            if score > best.1 {
                best = (tonic, score);
            }
        }
        best.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn melody(pitches: &[u8]) -> Melody {
        Melody::from_pitches(pitches, 480, 480).unwrap()
    }

    #[test]
    fn test_grid_from_melody() {
        let m = melody(&[60, 62, 64]);
        let grid = HarmonyGrid::from_melody(&m, &Voice::harmony_roles(3).unwrap());
        assert_eq!(grid.num_steps(), 3);
        assert_eq!(grid.num_voices(), 4);
        assert_eq!(grid.pitch(0, 1), Some(62));
        assert_eq!(grid.pitch(2, 1), None);
        assert_eq!(grid.unknown_count(), 9);
        assert!(!grid.is_complete());
        assert_eq!(grid.slot(2).start, 960);
    }

    #[test]
    fn test_melody_validation() {
        assert!(Melody::new(vec![], 480).is_err());
        assert!(Melody::from_pitches(&[60, 200], 480, 480).is_err());
        assert!(Melody::from_pitches(&[60], 0, 480).is_err());

        let overlapping = vec![
            Note { voice: 0, pitch: 60, start: 0, duration: 480, velocity: 80 },
            Note { voice: 0, pitch: 62, start: 240, duration: 480, velocity: 80 },
        ];
        assert!(matches!(
            Melody::new(overlapping, 480),
            Err(HarmonyError::MalformedHarmonyStep(_))
        ));

        let gapped = vec![
            Note { voice: 0, pitch: 60, start: 0, duration: 240, velocity: 80 },
            Note { voice: 0, pitch: 62, start: 480, duration: 480, velocity: 90 },
        ];
        assert!(Melody::new(gapped, 480).is_ok());
    }

    #[test]
    fn test_assign_refuses_fixed_cells() {
        let m = melody(&[60, 62]);
        let mut grid = HarmonyGrid::from_melody(&m, &[Voice::Bass]);
        let mask = Mask::lock_melody(2, 2);
        assert!(matches!(
            grid.assign(&mask, 0, 0, 50),
            Err(HarmonyError::ConstraintViolation { voice: 0, step: 0 })
        ));
        assert_eq!(grid.pitch(0, 0), Some(60));
        grid.assign(&mask, 1, 0, 48).unwrap();
        assert_eq!(grid.chord(0), Some(vec![60, 48]));
        assert_eq!(grid.chord(1), None);
    }

    #[test]
    fn test_to_notes_keeps_timing() {
        let notes = vec![
            Note { voice: 0, pitch: 67, start: 0, duration: 360, velocity: 100 },
            Note { voice: 0, pitch: 65, start: 480, duration: 240, velocity: 70 },
        ];
        let m = Melody::new(notes.clone(), 480).unwrap();
        let mut grid = HarmonyGrid::from_melody(&m, &[Voice::Bass]);
        let mask = Mask::lock_melody(2, 2);
        assert!(grid.to_notes().is_err());
        grid.assign(&mask, 1, 0, 48).unwrap();
        grid.assign(&mask, 1, 1, 50).unwrap();

        let out = grid.to_notes().unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], notes[0]);
        assert_eq!(out[2], notes[1]);
        assert_eq!(out[3].start, 480);
        assert_eq!(out[3].duration, 240);
        assert_eq!(out[3].velocity, 70);
    }

    #[test]
    fn test_range_clamp_preserves_pitch_class() {
        let bass = Voice::Bass.default_range();
        assert_eq!(bass.clamp(72), 60);
        assert_eq!(bass.clamp(28), 40);
        assert_eq!(bass.clamp(-5), 43);
        assert_eq!(bass.clamp(50), 50);
        assert!(bass.contains(bass.clamp(i16::MIN)));
        assert!(bass.contains(bass.clamp(i16::MAX)));

        let narrow = VoiceRange::new(60, 64).unwrap();
        let p = narrow.clamp(70);
        assert!(narrow.contains(p));
        assert_eq!(narrow.distance(58), 2);
        assert!(VoiceRange::new(70, 60).is_err());
    }

    #[test]
    fn test_interval_helpers() {
        assert_eq!(interval::pitch_class_interval(60, 64), 4);
        assert_eq!(interval::pitch_class_interval(64, 48), 4);
        assert_eq!(interval::pitch_class_interval(60, 69), 9);
        assert!(interval::is_perfect(48, 67));
        assert!(interval::is_perfect(48, 72));
        assert!(!interval::is_perfect(60, 64));
        assert_eq!(interval::direction(60, 58), -1);
        assert_eq!(interval::direction(60, 60), 0);
    }

    #[test]
    fn test_key_estimate() {
        assert!(interval::is_diatonic(7, 66));
        assert!(!interval::is_diatonic(0, 66));
        assert!(interval::is_diatonic(0, 127));

        // C D E F G fits C and F major; starting on C settles it.
        assert_eq!(melody(&[72, 74, 76, 77, 79, 77, 76, 74]).tonic(), 0);
        assert_eq!(melody(&[67, 69, 71, 72, 74, 76, 78, 79]).tonic(), 7);
        assert_eq!(interval::estimate_tonic(&[]), 0);
    }

    #[test]
    fn test_pitch_names() {
        assert_eq!(pitch_name(60), "C4");
        assert_eq!(pitch_name(66), "F#4");
        assert_eq!(pitch_name(0), "C-1");
    }
}
