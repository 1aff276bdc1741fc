// Policies: anything that turns an observation into an action.
//
// The environment does not care who decides; these are the deciders the
// crate ships with:
// - TriadPolicy: fixed root-position triad offsets under the melody.
// - ContraryMotionPolicy: rule-based voice leading that moves each harmony
//   voice against the melody. Also the environment's fallback when the
//   model is unavailable (`contrary_motion_chord`).
// - GreedyPolicy: exhaustive one-step search over consonant voicings,
//   scored with the environment's own reward preview.
// - RandomPolicy: uniform over the offset action space.
// - ModelPolicy: always defers to the infilling model.
//
// Learned policies plug in through the same `Policy` trait.

use crate::env::{Action, HarmonizationEnv, Observation};
use crate::error::{HarmonyError, Result};
use crate::grid::{Voice, VoiceRange, interval};
use crate::reward::{motion_value, step_value};
use cantus_prng::CantusRng;
use std::fmt;
use std::str::FromStr;

pub trait Policy {
    fn name(&self) -> &str;

    fn act(&mut self, env: &HarmonizationEnv, obs: &Observation) -> Result<Action>;
}

/// Semitones below the melody of the root-position triad voicing for a
/// role: melody on the root, alto on the fifth, tenor on the third, bass
/// doubling the root an octave down.
fn triad_offset(role: Voice) -> i16 {
    match role {
        Voice::Soprano => 0,
        Voice::Alto => -5,
        Voice::Tenor => -8,
        Voice::Bass => -12,
    }
}

#[derive(Debug, Default, Clone)]
pub struct TriadPolicy;

impl Policy for TriadPolicy {
    fn name(&self) -> &str {
        "triad"
    }

    fn act(&mut self, env: &HarmonizationEnv, _obs: &Observation) -> Result<Action> {
        Ok(Action::Offsets(
            env.harmony_roles().iter().map(|&r| triad_offset(r)).collect(),
        ))
    }
}

/// Candidate intervals below the melody for each role, in preference order.
fn contrary_candidates(role: Voice) -> &'static [i16] {
    match role {
        Voice::Soprano => &[0],
        Voice::Alto => &[-3, -4, -5, -7, -8, -9],
        Voice::Tenor => &[-7, -8, -9, -12, -15, -16],
        Voice::Bass => &[-12, -15, -16, -19, -21, -24],
    }
}

/// Rule-based harmony for one step.
///
/// Voices are chosen top to bottom. Each picks, among its role's candidate
/// intervals under the melody, the one that best moves against the melody
/// with the smallest leap, without crossing the voice above. On the first
/// step (no `previous` chord) the candidate nearest the range center wins.
pub fn contrary_motion_chord(
    previous: Option<&[u8]>,
    melody: u8,
    roles: &[Voice],
    ranges: &[VoiceRange],
) -> Vec<u8> {
    let melody_dir = previous.map_or(0, |prev| interval::direction(prev[0], melody));
    let mut chord: Vec<u8> = Vec::with_capacity(roles.len());

    for (i, (&role, &range)) in roles.iter().zip(ranges).enumerate() {
        let above = chord.last().copied().unwrap_or(melody);
        let before = previous.and_then(|prev| prev.get(i + 1).copied());

        let mut best: Option<(f64, u8)> = None;
        for &offset in contrary_candidates(role) {
            let pitch = range.clamp(i16::from(melody) + offset);
            let mut score = match before {
                Some(b) => {
                    2.0 * motion_value(melody_dir, interval::direction(b, pitch))
                        + step_value(interval::semitones(b, pitch).unsigned_abs())
                }
                None => -f64::from(range.center().abs_diff(pitch)) / 12.0,
            };
            if pitch > above {
                score -= 4.0;
            }
            if best.is_none_or(|(s, _)| score > s) {
                best = Some((score, pitch));
            }
        }
        chord.push(best.map_or_else(|| range.center(), |(_, p)| p));
    }
    chord
}

#[derive(Debug, Default, Clone)]
pub struct ContraryMotionPolicy;

impl Policy for ContraryMotionPolicy {
    fn name(&self) -> &str {
        "contrary"
    }

    fn act(&mut self, env: &HarmonizationEnv, _obs: &Observation) -> Result<Action> {
        let step = env.current_step();
        let melody = env.melody_pitch(step)?;
        let previous = step.checked_sub(1).and_then(|s| env.grid().chord(s));
        let pitches = contrary_motion_chord(
            previous.as_deref(),
            melody,
            env.harmony_roles(),
            &env.ranges()[1..],
        );
        Ok(Action::Pitches(pitches.into_iter().map(i16::from).collect()))
    }
}

/// One-step lookahead over consonant voicings.
///
/// Each harmony voice considers the in-range pitches whose interval with
/// the melody the active style rates as consonant, within `max_leap` of the
/// voice's previous pitch. Every combination is scored with
/// `HarmonizationEnv::preview_reward`; the first best wins.
#[derive(Debug, Clone)]
pub struct GreedyPolicy {
    pub max_leap: u8,
}

impl Default for GreedyPolicy {
    fn default() -> Self {
        GreedyPolicy { max_leap: 7 }
    }
}

impl GreedyPolicy {
    fn candidates(&self, env: &HarmonizationEnv, voice: usize, melody: u8) -> Vec<i16> {
        let range = env.ranges()[voice];
        let step = env.current_step();
        let before = step.checked_sub(1).and_then(|s| env.grid().pitch(voice, s));
        let table = &env.style().consonance;

        let near = |p: u8| before.is_none_or(|b| b.abs_diff(p) <= self.max_leap);
        let consonant: Vec<i16> = (range.min..=range.max)
            .filter(|&p| table[interval::pitch_class_interval(melody, p)] > 0.0 && near(p))
            .map(i16::from)
            .collect();
        if !consonant.is_empty() {
            return consonant;
        }
        (range.min..=range.max).filter(|&p| near(p)).map(i16::from).collect()
    }
}

impl Policy for GreedyPolicy {
    fn name(&self) -> &str {
        "greedy"
    }

    fn act(&mut self, env: &HarmonizationEnv, _obs: &Observation) -> Result<Action> {
        let melody = env.melody_pitch(env.current_step())?;
        let per_voice: Vec<Vec<i16>> = (1..env.grid().num_voices())
            .map(|v| self.candidates(env, v, melody))
            .collect();
        if per_voice.iter().any(Vec::is_empty) {
            return Err(HarmonyError::malformed("a harmony voice has no candidate pitches"));
        }

        let mut best: Option<(f64, Vec<i16>)> = None;
        let mut indices = vec![0usize; per_voice.len()];
        loop {
            let pitches: Vec<i16> = indices
                .iter()
                .zip(&per_voice)
                .map(|(&i, options)| options[i])
                .collect();
            let reward = env.preview_reward(&Action::Pitches(pitches.clone()))?;
            if best.as_ref().is_none_or(|(r, _)| reward > *r) {
                best = Some((reward, pitches));
            }

            // Odometer increment over the candidate lists.
            let mut v = 0;
            loop {
                if v == indices.len() {
                    let (_, pitches) = best.ok_or_else(|| HarmonyError::malformed("no voicing scored"))?;
                    return Ok(Action::Pitches(pitches));
                }
                indices[v] += 1;
                if indices[v] < per_voice[v].len() {
                    break;
                }
                indices[v] = 0;
                v += 1;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RandomPolicy {
    rng: CantusRng,
}

impl RandomPolicy {
    pub fn new(seed: u64) -> Self {
        RandomPolicy {
            rng: CantusRng::new(seed),
        }
    }
}

impl Policy for RandomPolicy {
    fn name(&self) -> &str {
        "random"
    }

    fn act(&mut self, env: &HarmonizationEnv, _obs: &Observation) -> Result<Action> {
        Ok(env.action_space().sample(&mut self.rng))
    }
}

#[derive(Debug, Default, Clone)]
pub struct ModelPolicy;

impl Policy for ModelPolicy {
    fn name(&self) -> &str {
        "model"
    }

    fn act(&mut self, _env: &HarmonizationEnv, _obs: &Observation) -> Result<Action> {
        Ok(Action::Model)
    }
}

/// The built-in policies, selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Triad,
    Contrary,
    Greedy,
    Random,
    Model,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 5] = [
        PolicyKind::Triad,
        PolicyKind::Contrary,
        PolicyKind::Greedy,
        PolicyKind::Random,
        PolicyKind::Model,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PolicyKind::Triad => "triad",
            PolicyKind::Contrary => "contrary",
            PolicyKind::Greedy => "greedy",
            PolicyKind::Random => "random",
            PolicyKind::Model => "model",
        }
    }

    pub fn build(self, seed: u64) -> Box<dyn Policy + Send> {
        match self {
            PolicyKind::Triad => Box::new(TriadPolicy),
            PolicyKind::Contrary => Box::new(ContraryMotionPolicy),
            PolicyKind::Greedy => Box::new(GreedyPolicy::default()),
            PolicyKind::Random => Box::new(RandomPolicy::new(seed)),
            PolicyKind::Model => Box::new(ModelPolicy),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PolicyKind {
    type Err = HarmonyError;

    fn from_str(s: &str) -> Result<Self> {
        PolicyKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| {
                HarmonyError::config(format!(
                    "unknown policy '{s}', expected one of triad, contrary, greedy, random, model"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarmonizerConfig;
    use crate::grid::Melody;
    use crate::model::ModelSession;

    fn env() -> HarmonizationEnv {
        let melody = Melody::from_pitches(&[67, 69, 71, 72, 71, 69, 67, 67], 480, 480).unwrap();
        HarmonizationEnv::new(melody, HarmonizerConfig::default(), ModelSession::unavailable())
            .unwrap()
    }

    fn run(policy: &mut dyn Policy) -> HarmonizationEnv {
        let mut env = env();
        while !env.is_done() {
            let obs = env.observation();
            let action = policy.act(&env, &obs).unwrap();
            env.step(action).unwrap();
        }
        env
    }

    #[test]
    fn test_triad_offsets_by_role() {
        let env = env();
        let action = TriadPolicy.act(&env, &env.observation()).unwrap();
        assert_eq!(action, Action::Offsets(vec![-5, -8, -12]));
    }

    #[test]
    fn test_contrary_chord_moves_against_melody() {
        let roles = [Voice::Alto, Voice::Tenor, Voice::Bass];
        let ranges: Vec<VoiceRange> = roles.iter().map(|r| r.default_range()).collect();
        let first = contrary_motion_chord(None, 67, &roles, &ranges);
        let mut prev = vec![67];
        prev.extend_from_slice(&first);

        // Melody rises; at least the bass should not rise with it.
        let next = contrary_motion_chord(Some(&prev), 69, &roles, &ranges);
        assert!(next[2] <= first[2]);
        for (p, r) in next.iter().zip(&ranges) {
            assert!(r.contains(*p));
        }
        // Voices stay ordered under the melody.
        assert!(next[0] <= 69);
        assert!(next.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_every_policy_completes_an_episode() {
        for kind in PolicyKind::ALL {
            let mut policy = kind.build(3);
            let env = run(policy.as_mut());
            assert!(env.is_done(), "{kind} did not finish");
            assert_eq!(env.final_sequence().unwrap().len(), 32);
        }
    }

    #[test]
    fn test_greedy_beats_random_on_average() {
        let greedy = run(&mut GreedyPolicy::default()).total_reward();
        let random: f64 = (0..5)
            .map(|seed| run(&mut RandomPolicy::new(seed)).total_reward())
            .sum::<f64>()
            / 5.0;
        assert!(greedy > random, "greedy {greedy} vs random {random}");
    }

    #[test]
    fn test_policy_kind_parse() {
        assert_eq!("greedy".parse::<PolicyKind>().unwrap(), PolicyKind::Greedy);
        assert!("beam".parse::<PolicyKind>().is_err());
    }
}
