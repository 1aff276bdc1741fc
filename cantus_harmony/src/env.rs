// Sequential decision environment for harmonization.
//
// One episode harmonizes the melody left to right, one decision per melody
// note. Each `step` takes an `Action` choosing pitches for every harmony
// voice at the current note, clamps them into the voice ranges, writes
// them into the grid (the mask refuses writes to melody cells), scores the
// new chord against the previous one with the reward model, and advances.
// The episode ends exactly when the step counter reaches the horizon.
//
// `Action::Model` asks the infilling controller for the step instead. If
// the model is unavailable the environment logs a warning and harmonizes
// the step with contrary-motion rules; every other error surfaces to the
// driver.
//
// The environment owns the grid, the mask, the model session, and the RNG
// for the lifetime of the episode. Policies only get `&HarmonizationEnv`.

use crate::config::HarmonizerConfig;
use crate::error::{HarmonyError, Result};
use crate::grid::{HarmonyGrid, Melody, Note, Voice, VoiceRange};
use crate::infill::InfillController;
use crate::mask::Mask;
use crate::model::{InfillModel, ModelSession};
use crate::policy::contrary_motion_chord;
use crate::reward::{self, RewardBreakdown, RewardContext};
use crate::style::StylePreset;
use cantus_prng::CantusRng;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Lowest and highest pitch used to normalize observations (piano range).
const OBS_PITCH_LOW: f32 = 21.0;
const OBS_PITCH_HIGH: f32 = 108.0;

/// One decision for the current step.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Semitones relative to the melody note, one per harmony voice
    /// (negative = below), within `ActionSpace::MIN_OFFSET..=MAX_OFFSET`.
    Offsets(Vec<i16>),
    /// Absolute MIDI pitches (0-127), one per harmony voice. Clamped into
    /// the voice range.
    Pitches(Vec<i16>),
    /// Pitch class (0-11) per harmony voice, voiced nearest the voice's
    /// previous pitch, or its range center on the first step.
    PitchClasses(Vec<u8>),
    /// A whole chord, melody first. The melody entry is ignored; a mismatch
    /// is logged as a constraint violation.
    Chord(Vec<u8>),
    /// Let the infilling model choose.
    Model,
}

/// Bounds of the offset action space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActionSpace {
    pub harmony_voices: usize,
    pub min_offset: i16,
    pub max_offset: i16,
}

impl ActionSpace {
    pub const MIN_OFFSET: i16 = -36;
    pub const MAX_OFFSET: i16 = 12;

    pub fn new(harmony_voices: usize) -> Self {
        ActionSpace {
            harmony_voices,
            min_offset: Self::MIN_OFFSET,
            max_offset: Self::MAX_OFFSET,
        }
    }

    /// Discrete choices per voice.
    pub fn choices_per_voice(&self) -> usize {
        (self.max_offset - self.min_offset + 1) as usize
    }

    /// A uniformly random offset action.
    pub fn sample(&self, rng: &mut CantusRng) -> Action {
        Action::Offsets(
            (0..self.harmony_voices)
                .map(|_| rng.range_i16_inclusive(self.min_offset, self.max_offset))
                .collect(),
        )
    }

    pub fn contains(&self, action: &Action) -> bool {
        match action {
            Action::Offsets(offsets) => {
                offsets.len() == self.harmony_voices
                    && offsets
                        .iter()
                        .all(|o| (self.min_offset..=self.max_offset).contains(o))
            }
            Action::Pitches(pitches) => {
                pitches.len() == self.harmony_voices && pitches.iter().all(|p| (0..=127).contains(p))
            }
            Action::PitchClasses(classes) => {
                classes.len() == self.harmony_voices && classes.iter().all(|&c| c < 12)
            }
            Action::Chord(chord) => {
                chord.len() == self.harmony_voices + 1 && chord.iter().all(|&p| p <= 127)
            }
            Action::Model => true,
        }
    }
}

/// Fixed-size numeric view of the episode for a policy.
///
/// Layout: `window x voices` normalized pitches (oldest step first, 0 for
/// unknown or before the start), then current melody pitch, next melody
/// pitch, and the fraction of the episode completed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub features: Vec<f32>,
    pub step: usize,
}

impl Observation {
    pub fn len_for(window: usize, voices: usize) -> usize {
        window * voices + 3
    }
}

/// Where the pitches of a step came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActionSource {
    Policy,
    Model,
    /// The model was unavailable; contrary-motion rules were used.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepInfo {
    /// Steps completed, including this one.
    pub step: usize,
    pub melody_pitch: u8,
    /// The chord written at this step, melody first.
    pub chord: Vec<u8>,
    pub breakdown: RewardBreakdown,
    /// Harmony pitches moved into range by clamping.
    pub clamped: usize,
    /// Attempts to change a melody cell that were refused.
    pub constraint_violations: usize,
    pub source: ActionSource,
    pub total_reward: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub observation: Observation,
    pub reward: f64,
    pub done: bool,
    pub info: StepInfo,
}

/// Harmony pitches chosen for one step, before writing.
struct Resolved {
    pitches: Vec<u8>,
    clamped: usize,
    violations: usize,
    source: ActionSource,
}

pub struct HarmonizationEnv {
    melody: Melody,
    config: HarmonizerConfig,
    style: StylePreset,
    ranges: Vec<VoiceRange>,
    /// Key of the melody, for scale-degree scoring.
    tonic: u8,
    max_steps: usize,
    session: ModelSession,
    rng: CantusRng,
    grid: HarmonyGrid,
    mask: Mask,
    step: usize,
    done: bool,
    rewards: Vec<f64>,
    fallbacks: usize,
}

impl HarmonizationEnv {
    /// Build an environment for one melody. Validates the configuration and
    /// the horizon against the melody length.
    pub fn new(melody: Melody, config: HarmonizerConfig, session: ModelSession) -> Result<Self> {
        config.validate()?;
        let max_steps = config.max_steps.unwrap_or(melody.len());
        if max_steps > melody.len() {
            return Err(HarmonyError::config(format!(
                "max_steps {max_steps} exceeds melody length {}",
                melody.len()
            )));
        }
        let style = config.style_preset()?;
        let roles = config.harmony_roles()?;
        let grid = HarmonyGrid::from_melody(&melody, &roles);
        let ranges = config.voice_ranges.for_voices(grid.voices());
        let rng = CantusRng::new(config.seed);
        let tonic = melody.tonic();

        let mut env = HarmonizationEnv {
            mask: Mask::lock_melody(grid.num_voices(), grid.num_steps()),
            melody,
            config,
            style,
            ranges,
            tonic,
            max_steps,
            session,
            rng,
            grid,
            step: 0,
            done: false,
            rewards: Vec::new(),
            fallbacks: 0,
        };
        env.reset();
        Ok(env)
    }

    /// Start a new episode: melody locked, every harmony cell unknown, step
    /// counter at zero. The RNG stream continues across episodes.
    pub fn reset(&mut self) -> Observation {
        let roles = self.grid.voices()[1..].to_vec();
        let mut grid = HarmonyGrid::from_melody(&self.melody, &roles);
        grid.truncate(self.max_steps);
        let mut mask = Mask::lock_melody(grid.num_voices(), self.melody.len());
        mask.truncate(self.max_steps);
        self.grid = grid;
        self.mask = mask;
        self.step = 0;
        self.done = false;
        self.rewards.clear();
        self.fallbacks = 0;
        debug!(steps = self.max_steps, voices = self.grid.num_voices(), "episode reset");
        self.observation()
    }

    /// Apply one action and advance.
    pub fn step(&mut self, action: Action) -> Result<StepResult> {
        if self.done {
            return Err(HarmonyError::EpisodeFinished);
        }
        let step = self.step;
        let resolved = self.resolve(&action)?;

        for (i, &pitch) in resolved.pitches.iter().enumerate() {
            let voice = i + 1;
            self.grid.assign(&self.mask, voice, step, pitch)?;
            self.mask.mark_generated(voice, step)?;
        }

        let chord = self.chord_at(step)?;
        let previous = step.checked_sub(1).map(|s| self.chord_at(s)).transpose()?;
        let breakdown = reward::score_step(&RewardContext {
            previous: previous.as_deref(),
            current: &chord,
            voices: self.grid.voices(),
            ranges: &self.ranges,
            style: &self.style,
            tonic: self.tonic,
        })?;
        let reward = breakdown.total();
        self.rewards.push(reward);

        self.step += 1;
        self.done = self.step >= self.max_steps;
        debug!(step, reward, source = ?resolved.source, chord = ?chord, "env step");
        if self.done {
            info!(
                steps = self.step,
                total_reward = self.total_reward(),
                fallbacks = self.fallbacks,
                "episode finished"
            );
        }

        Ok(StepResult {
            observation: self.observation(),
            reward,
            done: self.done,
            info: StepInfo {
                step: self.step,
                melody_pitch: chord[0],
                chord,
                breakdown,
                clamped: resolved.clamped,
                constraint_violations: resolved.violations,
                source: resolved.source,
                total_reward: self.total_reward(),
            },
        })
    }

    /// Reward the action would earn at the current step, without changing
    /// anything. Model actions cannot be previewed.
    pub fn preview_reward(&self, action: &Action) -> Result<f64> {
        if self.done {
            return Err(HarmonyError::EpisodeFinished);
        }
        if matches!(action, Action::Model) {
            return Err(HarmonyError::malformed("model actions cannot be previewed"));
        }
        let resolved = self.resolve_direct(action)?;
        let mut chord = Vec::with_capacity(resolved.pitches.len() + 1);
        chord.push(self.melody_pitch(self.step)?);
        chord.extend_from_slice(&resolved.pitches);
        let previous = self.step.checked_sub(1).map(|s| self.chord_at(s)).transpose()?;
        let breakdown = reward::score_step(&RewardContext {
            previous: previous.as_deref(),
            current: &chord,
            voices: self.grid.voices(),
            ranges: &self.ranges,
            style: &self.style,
            tonic: self.tonic,
        })?;
        Ok(breakdown.total())
    }

    /// The complete harmonization, melody plus every harmony voice, with the
    /// melody's absolute timing. Only available once the episode is done.
    pub fn final_sequence(&self) -> Result<Vec<Note>> {
        if !self.done {
            return Err(HarmonyError::EpisodeInProgress {
                step: self.step,
                max_steps: self.max_steps,
            });
        }
        self.grid.to_notes()
    }

    pub fn observation(&self) -> Observation {
        let window = self.config.observation_window;
        let voices = self.grid.num_voices();
        let mut features = Vec::with_capacity(Observation::len_for(window, voices));
        for k in 0..window {
            let column = (self.step + k).checked_sub(window);
            for voice in 0..voices {
                let pitch = column.and_then(|s| self.grid.pitch(voice, s));
                features.push(pitch.map_or(0.0, normalize_pitch));
            }
        }
        let melody_at = |s: usize| {
            (s < self.max_steps)
                .then(|| self.grid.pitch(0, s))
                .flatten()
                .map_or(0.0, normalize_pitch)
        };
        features.push(melody_at(self.step));
        features.push(melody_at(self.step + 1));
        features.push(self.step as f32 / self.max_steps as f32);
        Observation {
            features,
            step: self.step,
        }
    }

    pub fn action_space(&self) -> ActionSpace {
        ActionSpace::new(self.grid.num_voices() - 1)
    }

    pub fn grid(&self) -> &HarmonyGrid {
        &self.grid
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    pub fn melody(&self) -> &Melody {
        &self.melody
    }

    pub fn style(&self) -> &StylePreset {
        &self.style
    }

    /// Range of each grid row.
    pub fn ranges(&self) -> &[VoiceRange] {
        &self.ranges
    }

    pub fn harmony_roles(&self) -> &[Voice] {
        &self.grid.voices()[1..]
    }

    /// Steps completed so far.
    pub fn current_step(&self) -> usize {
        self.step
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn rewards(&self) -> &[f64] {
        &self.rewards
    }

    pub fn total_reward(&self) -> f64 {
        self.rewards.iter().sum()
    }

    /// Model steps this episode that fell back to rules.
    pub fn fallback_count(&self) -> usize {
        self.fallbacks
    }

    pub fn model_available(&self) -> bool {
        self.session.is_available()
    }

    /// Release the model handle. Later model actions fall back to rules.
    pub fn release_model(&mut self) -> Option<Box<dyn InfillModel>> {
        self.session.release()
    }

    /// Melody pitch at `step`.
    pub fn melody_pitch(&self, step: usize) -> Result<u8> {
        self.grid
            .pitch(0, step)
            .ok_or_else(|| HarmonyError::malformed(format!("no melody pitch at step {step}")))
    }

    fn chord_at(&self, step: usize) -> Result<Vec<u8>> {
        self.grid
            .chord(step)
            .ok_or_else(|| HarmonyError::malformed(format!("step {step} is not fully voiced")))
    }

    fn resolve(&mut self, action: &Action) -> Result<Resolved> {
        if !matches!(action, Action::Model) {
            return self.resolve_direct(action);
        }

        let proposal = InfillController::new(
            &mut self.session,
            self.config.temperature,
            self.config.infill.iterations,
        )?
        .propose_step(&self.grid, &self.mask, &self.ranges, self.step, &mut self.rng);

        match proposal {
            Ok(pitches) => {
                let raw: Vec<i16> = pitches.iter().map(|&p| i16::from(p)).collect();
                let (pitches, clamped) = self.clamp_all(&raw);
                Ok(Resolved {
                    pitches,
                    clamped,
                    violations: 0,
                    source: ActionSource::Model,
                })
            }
            Err(HarmonyError::ModelUnavailable(reason)) => {
                warn!(step = self.step, %reason, "model unavailable, using contrary-motion rules");
                self.fallbacks += 1;
                let pitches = self.fallback_pitches()?;
                Ok(Resolved {
                    pitches,
                    clamped: 0,
                    violations: 0,
                    source: ActionSource::Fallback,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn fallback_pitches(&self) -> Result<Vec<u8>> {
        let melody_now = self.melody_pitch(self.step)?;
        let previous = self.step.checked_sub(1).map(|s| self.chord_at(s)).transpose()?;
        Ok(contrary_motion_chord(
            previous.as_deref(),
            melody_now,
            self.harmony_roles(),
            &self.ranges[1..],
        ))
    }

    /// Turn a policy action into clamped harmony pitches.
    fn resolve_direct(&self, action: &Action) -> Result<Resolved> {
        let harmony = self.grid.num_voices() - 1;
        let melody = self.melody_pitch(self.step)?;
        let expect_len = |len: usize, what: &str| -> Result<()> {
            if len != harmony {
                return Err(HarmonyError::malformed(format!(
                    "{what} action has {len} entries for {harmony} harmony voices"
                )));
            }
            Ok(())
        };

        let mut violations = 0;
        let raw: Vec<i16> = match action {
            Action::Offsets(offsets) => {
                expect_len(offsets.len(), "offset")?;
                let bounds = ActionSpace::MIN_OFFSET..=ActionSpace::MAX_OFFSET;
                if let Some((i, o)) = offsets.iter().enumerate().find(|(_, o)| !bounds.contains(*o)) {
                    return Err(HarmonyError::malformed(format!(
                        "offset {o} for harmony voice {} is not in {}..={}",
                        i + 1,
                        ActionSpace::MIN_OFFSET,
                        ActionSpace::MAX_OFFSET
                    )));
                }
                offsets.iter().map(|&o| i16::from(melody) + o).collect()
            }
            Action::Pitches(pitches) => {
                expect_len(pitches.len(), "pitch")?;
                if let Some((i, p)) = pitches.iter().enumerate().find(|(_, p)| !(0..=127).contains(*p)) {
                    return Err(HarmonyError::malformed(format!(
                        "pitch {p} for harmony voice {} outside MIDI range",
                        i + 1
                    )));
                }
                pitches.clone()
            }
            Action::PitchClasses(classes) => {
                expect_len(classes.len(), "pitch-class")?;
                let mut out = Vec::with_capacity(harmony);
                for (i, &pc) in classes.iter().enumerate() {
                    if pc >= 12 {
                        return Err(HarmonyError::malformed(format!(
                            "pitch class {pc} for harmony voice {} is not in 0-11",
                            i + 1
                        )));
                    }
                    let anchor = self
                        .step
                        .checked_sub(1)
                        .and_then(|prev| self.grid.pitch(i + 1, prev))
                        .unwrap_or_else(|| self.ranges[i + 1].center());
                    out.push(nearest_with_class(i16::from(anchor), pc));
                }
                out
            }
            Action::Chord(chord) => {
                if chord.len() != harmony + 1 {
                    return Err(HarmonyError::malformed(format!(
                        "chord action has {} pitches for {} voices",
                        chord.len(),
                        harmony + 1
                    )));
                }
                if let Some(&p) = chord.iter().find(|&&p| p > 127) {
                    return Err(HarmonyError::malformed(format!("chord pitch {p} outside MIDI range")));
                }
                if chord[0] != melody {
                    let err = HarmonyError::ConstraintViolation {
                        voice: 0,
                        step: self.step,
                    };
                    warn!(proposed = chord[0], kept = melody, "{err}; melody kept");
                    violations += 1;
                }
                chord[1..].iter().map(|&p| i16::from(p)).collect()
            }
            Action::Model => {
                return Err(HarmonyError::malformed("model action needs the model session"));
            }
        };

        let (pitches, clamped) = self.clamp_all(&raw);
        Ok(Resolved {
            pitches,
            clamped,
            violations,
            source: ActionSource::Policy,
        })
    }

    fn clamp_all(&self, raw: &[i16]) -> (Vec<u8>, usize) {
        let mut clamped = 0;
        let pitches = raw
            .iter()
            .zip(&self.ranges[1..])
            .map(|(&p, range)| {
                let c = range.clamp(p);
                if i16::from(c) != p {
                    clamped += 1;
                }
                c
            })
            .collect();
        (pitches, clamped)
    }
}

fn normalize_pitch(pitch: u8) -> f32 {
    ((f32::from(pitch) - OBS_PITCH_LOW) / (OBS_PITCH_HIGH - OBS_PITCH_LOW)).clamp(0.0, 1.0)
}

/// The pitch with class `pc` closest to `anchor`; ties resolve downward.
fn nearest_with_class(anchor: i16, pc: u8) -> i16 {
    let up = (i16::from(pc) - anchor).rem_euclid(12);
    if up < 6 {
        anchor + up
    } else {
        anchor + up - 12
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prior::IntervalPriorModel;

    fn melody8() -> Melody {
        Melody::from_pitches(&[67, 69, 71, 72, 71, 69, 67, 67], 480, 480).unwrap()
    }

    fn env_with(config: HarmonizerConfig, session: ModelSession) -> HarmonizationEnv {
        HarmonizationEnv::new(melody8(), config, session).unwrap()
    }

    fn offsets() -> Action {
        Action::Offsets(vec![-5, -8, -12])
    }

    #[test]
    fn test_done_exactly_at_horizon() {
        let config = HarmonizerConfig {
            max_steps: Some(8),
            ..Default::default()
        };
        let mut env = env_with(config, ModelSession::unavailable());
        for i in 0..8 {
            assert!(!env.is_done());
            let result = env.step(offsets()).unwrap();
            assert_eq!(result.done, i == 7);
        }
        assert!(env.is_done());
        assert!(matches!(env.step(offsets()), Err(HarmonyError::EpisodeFinished)));
    }

    #[test]
    fn test_horizon_checks() {
        let too_long = HarmonizerConfig {
            max_steps: Some(9),
            ..Default::default()
        };
        assert!(matches!(
            HarmonizationEnv::new(melody8(), too_long, ModelSession::unavailable()),
            Err(HarmonyError::InvalidConfig(_))
        ));

        let short = HarmonizerConfig {
            max_steps: Some(3),
            ..Default::default()
        };
        let mut env = env_with(short, ModelSession::unavailable());
        for _ in 0..3 {
            env.step(offsets()).unwrap();
        }
        assert!(env.is_done());
        assert_eq!(env.final_sequence().unwrap().len(), 12);
    }

    #[test]
    fn test_final_sequence_requires_done() {
        let mut env = env_with(HarmonizerConfig::default(), ModelSession::unavailable());
        env.step(offsets()).unwrap();
        assert!(matches!(
            env.final_sequence(),
            Err(HarmonyError::EpisodeInProgress { step: 1, max_steps: 8 })
        ));
    }

    #[test]
    fn test_actions_are_clamped_into_range() {
        let mut env = env_with(HarmonizerConfig::default(), ModelSession::unavailable());
        let result = env.step(Action::Pitches(vec![127, 0, 90])).unwrap();
        assert_eq!(result.info.clamped, 3);
        for (i, &p) in result.info.chord[1..].iter().enumerate() {
            assert!(env.ranges()[i + 1].contains(p));
        }
    }

    #[test]
    fn test_chord_action_cannot_change_melody() {
        let mut env = env_with(HarmonizerConfig::default(), ModelSession::unavailable());
        let result = env.step(Action::Chord(vec![40, 64, 55, 48])).unwrap();
        assert_eq!(result.info.constraint_violations, 1);
        assert_eq!(result.info.chord, vec![67, 64, 55, 48]);
        assert_eq!(env.grid().pitch(0, 0), Some(67));
    }

    #[test]
    fn test_model_action_falls_back_without_model() {
        let mut env = env_with(HarmonizerConfig::default(), ModelSession::unavailable());
        let result = env.step(Action::Model).unwrap();
        assert_eq!(result.info.source, ActionSource::Fallback);
        assert_eq!(env.fallback_count(), 1);
    }

    #[test]
    fn test_model_action_uses_model() {
        let session = ModelSession::acquire(Box::new(IntervalPriorModel::default_model()));
        let mut env = env_with(HarmonizerConfig::default(), session);
        let result = env.step(Action::Model).unwrap();
        assert_eq!(result.info.source, ActionSource::Model);

        env.release_model();
        let result = env.step(Action::Model).unwrap();
        assert_eq!(result.info.source, ActionSource::Fallback);
    }

    #[test]
    fn test_malformed_actions_surface() {
        let mut env = env_with(HarmonizerConfig::default(), ModelSession::unavailable());
        assert!(matches!(
            env.step(Action::Offsets(vec![-5])),
            Err(HarmonyError::MalformedHarmonyStep(_))
        ));
        assert!(matches!(
            env.step(Action::PitchClasses(vec![0, 4, 12])),
            Err(HarmonyError::MalformedHarmonyStep(_))
        ));
        // Nothing was written.
        assert_eq!(env.current_step(), 0);
        assert_eq!(env.grid().pitch(1, 0), None);
    }

    #[test]
    fn test_actions_outside_action_space_are_rejected() {
        let mut env = env_with(HarmonizerConfig::default(), ModelSession::unavailable());
        let extremes = [
            Action::Offsets(vec![i16::MAX, -8, -12]),
            Action::Offsets(vec![-5, i16::MIN, -12]),
            Action::Offsets(vec![-5, -8, ActionSpace::MIN_OFFSET - 1]),
            Action::Pitches(vec![i16::MIN, 60, 50]),
            Action::Pitches(vec![64, 60, 128]),
        ];
        for action in extremes {
            assert!(!env.action_space().contains(&action));
            assert!(matches!(
                env.preview_reward(&action),
                Err(HarmonyError::MalformedHarmonyStep(_))
            ));
            assert!(matches!(
                env.step(action),
                Err(HarmonyError::MalformedHarmonyStep(_))
            ));
        }
        assert_eq!(env.current_step(), 0);
        assert_eq!(env.grid().pitch(1, 0), None);

        // The edges of the space are still accepted.
        let edge = Action::Offsets(vec![ActionSpace::MAX_OFFSET, 0, ActionSpace::MIN_OFFSET]);
        assert!(env.action_space().contains(&edge));
        assert!(env.step(edge).is_ok());
    }

    #[test]
    fn test_observation_shape_and_content() {
        let config = HarmonizerConfig {
            observation_window: 2,
            ..Default::default()
        };
        let mut env = env_with(config, ModelSession::unavailable());
        let obs = env.observation();
        assert_eq!(obs.features.len(), Observation::len_for(2, 4));
        assert!(obs.features[..8].iter().all(|&f| f == 0.0));
        assert!(obs.features[8] > 0.0);
        assert_eq!(obs.features[10], 0.0);

        let result = env.step(offsets()).unwrap();
        let obs = result.observation;
        assert_eq!(obs.features.len(), 11);
        // Newest history column is the step just written.
        assert!(obs.features[4..8].iter().all(|&f| f > 0.0));
        assert!((obs.features[10] - 1.0 / 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_reset_clears_episode() {
        let mut env = env_with(HarmonizerConfig::default(), ModelSession::unavailable());
        env.step(offsets()).unwrap();
        env.step(offsets()).unwrap();
        let obs = env.reset();
        assert_eq!(obs.step, 0);
        assert_eq!(env.current_step(), 0);
        assert!(env.rewards().is_empty());
        assert_eq!(env.grid().unknown_count(), 24);
    }

    #[test]
    fn test_preview_matches_step() {
        let mut env = env_with(HarmonizerConfig::default(), ModelSession::unavailable());
        env.step(offsets()).unwrap();
        let action = Action::Offsets(vec![-3, -10, -15]);
        let preview = env.preview_reward(&action).unwrap();
        let result = env.step(action).unwrap();
        assert_eq!(preview, result.reward);
    }

    #[test]
    fn test_pitch_classes_voiced_near_previous() {
        assert_eq!(nearest_with_class(60, 0), 60);
        assert_eq!(nearest_with_class(60, 2), 62);
        assert_eq!(nearest_with_class(60, 10), 58);
        assert_eq!(nearest_with_class(60, 6), 54);
    }

    #[test]
    fn test_action_space() {
        let space = ActionSpace::new(3);
        let mut rng = CantusRng::new(4);
        for _ in 0..50 {
            assert!(space.contains(&space.sample(&mut rng)));
        }
        assert_eq!(space.choices_per_voice(), 49);
        assert!(!space.contains(&Action::Offsets(vec![0, 0])));
    }
}
