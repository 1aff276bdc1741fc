// Music-theory reward model.
//
// Scores one harmonic decision (the chord at the current step, given the
// chord at the previous step) against a set of voice-leading rules, then
// weights each rule by the active style preset. Every rule returns a bounded
// raw value, mostly in [-1, 1]; the preset only scales them. The whole
// module is pure: no RNG, no interior state, the same context always gives
// the same breakdown.
//
// Rules:
// - consonance: melody vs each harmony voice, looked up in the preset's
//   interval table (mod 12).
// - voice_range: out-of-range harmony pitches, scaled by distance.
// - voice_crossing: adjacent pairs high-to-low; crossed pairs penalized,
//   correctly ordered pairs rewarded.
// - voice_spacing: adjacent gaps wider than the preset allows.
// - contrary_motion: melody motion vs each harmony voice's motion.
// - parallel_perfects: fifths/octaves held through similar motion.
// - smooth_motion: step size of each harmony voice.
// - triad_completeness: sounding pitch classes form a major/minor triad.
// - avoid_repetition: harmony voices re-striking their previous pitch.
// - scale_degrees: harmony pitches inside the major scale of the tonic.
//
// Malformed input (empty chord, pitch above 127, mismatched lengths) fails
// with `MalformedHarmonyStep` instead of scoring zero.
//
// Consumed by env.rs per step, by policy.rs (greedy search), and by
// evaluate.rs / score_grid for whole-piece scoring.

use crate::error::{HarmonyError, Result};
use crate::grid::{HarmonyGrid, Voice, VoiceRange, interval};
use crate::style::{Rule, StylePreset};
use serde::Serialize;

/// Everything the reward model needs for one step. Borrowed, never stored.
#[derive(Debug, Clone, Copy)]
pub struct RewardContext<'a> {
    /// Chord at the previous step (melody first), or `None` at step 0.
    pub previous: Option<&'a [u8]>,
    /// Chord being scored, melody first, harmony voices high to low.
    pub current: &'a [u8],
    /// Role of each row in `current`.
    pub voices: &'a [Voice],
    /// Range of each row in `current`.
    pub ranges: &'a [VoiceRange],
    pub style: &'a StylePreset,
    /// Tonic pitch class (0-11) of the key the harmony is written in.
    pub tonic: u8,
}

/// Raw per-rule values and their weighted sum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewardBreakdown {
    raw: [f64; Rule::ALL.len()],
    total: f64,
}

impl RewardBreakdown {
    /// Unweighted value of one rule.
    pub fn raw(&self, rule: Rule) -> f64 {
        self.raw[rule_slot(rule)]
    }

    /// Weighted contribution of one rule to the total.
    pub fn weighted(&self, rule: Rule, style: &StylePreset) -> f64 {
        self.raw(rule) * style.weights.get(rule)
    }

    pub fn total(&self) -> f64 {
        self.total
    }
}

fn rule_slot(rule: Rule) -> usize {
    rule as usize
}

/// Score a single step.
pub fn score_step(ctx: &RewardContext<'_>) -> Result<RewardBreakdown> {
    validate(ctx)?;

    let mut raw = [0.0; Rule::ALL.len()];
    for rule in Rule::ALL {
        raw[rule_slot(rule)] = match rule {
            Rule::Consonance => consonance(ctx),
            Rule::VoiceRange => voice_range(ctx),
            Rule::VoiceCrossing => voice_crossing(ctx.current),
            Rule::VoiceSpacing => voice_spacing(ctx),
            Rule::ContraryMotion => contrary_motion(ctx),
            Rule::ParallelPerfects => parallel_perfects(ctx),
            Rule::SmoothMotion => smooth_motion(ctx),
            Rule::TriadCompleteness => triad_completeness(ctx.current),
            Rule::AvoidRepetition => avoid_repetition(ctx),
            Rule::ScaleDegrees => scale_degrees(ctx),
        };
    }

    let total = Rule::ALL
        .iter()
        .map(|&rule| raw[rule_slot(rule)] * ctx.style.weights.get(rule))
        .sum();
    Ok(RewardBreakdown { raw, total })
}

/// Sum of step scores over a complete grid, in the key estimated from the
/// melody row.
pub fn score_grid(grid: &HarmonyGrid, ranges: &[VoiceRange], style: &StylePreset) -> Result<f64> {
    let melody: Vec<u8> = (0..grid.num_steps()).filter_map(|s| grid.pitch(0, s)).collect();
    let tonic = interval::estimate_tonic(&melody);
    let mut total = 0.0;
    let mut previous: Option<Vec<u8>> = None;
    for step in 0..grid.num_steps() {
        let current = grid.chord(step).ok_or_else(|| {
            HarmonyError::malformed(format!("cannot score grid: step {step} has unknown cells"))
        })?;
        let ctx = RewardContext {
            previous: previous.as_deref(),
            current: &current,
            voices: grid.voices(),
            ranges,
            style,
            tonic,
        };
        total += score_step(&ctx)?.total();
        previous = Some(current);
    }
    Ok(total)
}

fn validate(ctx: &RewardContext<'_>) -> Result<()> {
    let n = ctx.current.len();
    if n == 0 {
        return Err(HarmonyError::malformed("empty chord"));
    }
    if n < 2 {
        return Err(HarmonyError::malformed("chord has a melody but no harmony voices"));
    }
    if ctx.tonic >= 12 {
        return Err(HarmonyError::malformed(format!(
            "tonic {} is not a pitch class",
            ctx.tonic
        )));
    }
    if ctx.voices.len() != n || ctx.ranges.len() != n {
        return Err(HarmonyError::malformed(format!(
            "chord has {n} pitches but {} voice roles and {} ranges",
            ctx.voices.len(),
            ctx.ranges.len()
        )));
    }
    if let Some(&p) = ctx.current.iter().find(|&&p| p > 127) {
        return Err(HarmonyError::malformed(format!("pitch {p} outside MIDI range")));
    }
    if let Some(prev) = ctx.previous {
        if prev.len() != n {
            return Err(HarmonyError::malformed(format!(
                "previous chord has {} pitches, current has {n}",
                prev.len()
            )));
        }
        if let Some(&p) = prev.iter().find(|&&p| p > 127) {
            return Err(HarmonyError::malformed(format!(
                "previous pitch {p} outside MIDI range"
            )));
        }
    }
    Ok(())
}

fn harmony_mean(values: impl Iterator<Item = f64>, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    values.sum::<f64>() / count as f64
}

fn consonance(ctx: &RewardContext<'_>) -> f64 {
    let melody = ctx.current[0];
    let harmony = &ctx.current[1..];
    harmony_mean(
        harmony
            .iter()
            .map(|&h| ctx.style.consonance[interval::pitch_class_interval(melody, h)]),
        harmony.len(),
    )
}

fn voice_range(ctx: &RewardContext<'_>) -> f64 {
    let harmony = &ctx.current[1..];
    harmony_mean(
        harmony.iter().zip(&ctx.ranges[1..]).map(|(&p, range)| {
            let dist = range.distance(p);
            if dist == 0 {
                0.0
            } else {
                -(0.5 + 0.5 * f64::from(dist.min(12)) / 12.0)
            }
        }),
        harmony.len(),
    )
}

fn voice_crossing(chord: &[u8]) -> f64 {
    let pairs = chord.len() - 1;
    harmony_mean(
        chord
            .windows(2)
            .map(|w| if w[1] > w[0] { -1.0 } else { 0.25 }),
        pairs,
    )
}

fn voice_spacing(ctx: &RewardContext<'_>) -> f64 {
    let chord = ctx.current;
    let pairs = chord.len() - 1;
    harmony_mean(
        chord.windows(2).enumerate().map(|(i, w)| {
            let limit = if ctx.voices[i + 1] == Voice::Bass {
                ctx.style.max_bass_spacing
            } else {
                ctx.style.max_upper_spacing
            };
            let gap = i16::from(w[0]) - i16::from(w[1]);
            let excess = gap - i16::from(limit);
            if excess > 0 {
                -(f64::from(excess.min(12)) / 12.0)
            } else {
                0.0
            }
        }),
        pairs,
    )
}

/// 1.0 for opposite directions, 0.5 when exactly one voice moves, 0 for
/// similar motion or when neither moves.
pub(crate) fn motion_value(melody_dir: i8, harmony_dir: i8) -> f64 {
    match (melody_dir, harmony_dir) {
        (0, 0) => 0.0,
        (0, _) | (_, 0) => 0.5,
        (m, h) if m != h => 1.0,
        _ => 0.0,
    }
}

fn contrary_motion(ctx: &RewardContext<'_>) -> f64 {
    let Some(prev) = ctx.previous else {
        return 0.0;
    };
    let melody_dir = interval::direction(prev[0], ctx.current[0]);
    let harmony = &ctx.current[1..];
    harmony_mean(
        harmony
            .iter()
            .zip(&prev[1..])
            .map(|(&now, &before)| motion_value(melody_dir, interval::direction(before, now))),
        harmony.len(),
    )
}

/// Number of voice pairs holding a fifth or octave through similar motion.
pub(crate) fn count_parallel_perfects(prev: &[u8], current: &[u8]) -> usize {
    let mut count = 0;
    for i in 0..current.len() {
        for j in (i + 1)..current.len() {
            let dir_i = interval::direction(prev[i], current[i]);
            let dir_j = interval::direction(prev[j], current[j]);
            if dir_i == 0 || dir_i != dir_j {
                continue;
            }
            let before = interval::pitch_class_interval(prev[i], prev[j]);
            let now = interval::pitch_class_interval(current[i], current[j]);
            if before == now && interval::is_perfect(current[i], current[j]) {
                count += 1;
            }
        }
    }
    count
}

fn parallel_perfects(ctx: &RewardContext<'_>) -> f64 {
    let Some(prev) = ctx.previous else {
        return 0.0;
    };
    let count = count_parallel_perfects(prev, ctx.current);
    -(count.min(2) as f64) / 2.0
}

/// Value of a single melodic step for one voice, by absolute size.
pub(crate) fn step_value(leap: u16) -> f64 {
    match leap {
        0 => 0.5,
        1..=2 => 1.0,
        3..=4 => 0.5,
        5..=7 => 0.0,
        8..=12 => -0.5,
        _ => -1.0,
    }
}

fn smooth_motion(ctx: &RewardContext<'_>) -> f64 {
    let Some(prev) = ctx.previous else {
        return 0.0;
    };
    let harmony = &ctx.current[1..];
    harmony_mean(
        harmony
            .iter()
            .zip(&prev[1..])
            .map(|(&now, &before)| step_value(interval::semitones(before, now).unsigned_abs())),
        harmony.len(),
    )
}

/// 1.0 when the sounding pitch classes are exactly a major or minor triad,
/// 0.5 when they fit inside one, 0 otherwise.
fn triad_completeness(chord: &[u8]) -> f64 {
    let mut classes = [false; 12];
    for &p in chord {
        classes[(p % 12) as usize] = true;
    }
    let present: Vec<usize> = (0..12).filter(|&pc| classes[pc]).collect();

    let mut best: f64 = 0.0;
    for root in 0..12 {
        for third in [3, 4] {
            let triad = [root, (root + third) % 12, (root + 7) % 12];
            if present.iter().all(|pc| triad.contains(pc)) {
                let score = if present.len() == 3 { 1.0 } else { 0.5 };
                best = best.max(score);
            }
        }
    }
    best
}

/// -0.5 for each harmony voice that repeats its previous pitch, 0.1 for
/// each that moves; 0 on the first step.
fn avoid_repetition(ctx: &RewardContext<'_>) -> f64 {
    let Some(prev) = ctx.previous else {
        return 0.0;
    };
    let harmony = &ctx.current[1..];
    harmony_mean(
        harmony
            .iter()
            .zip(&prev[1..])
            .map(|(now, before)| if now == before { -0.5 } else { 0.1 }),
        harmony.len(),
    )
}

/// Share of harmony pitches that are diatonic in the tonic's major scale.
fn scale_degrees(ctx: &RewardContext<'_>) -> f64 {
    let harmony = &ctx.current[1..];
    harmony_mean(
        harmony
            .iter()
            .map(|&p| if interval::is_diatonic(ctx.tonic, p) { 1.0 } else { 0.0 }),
        harmony.len(),
    )
}
