// Style presets: named weight vectors over the reward rules.
//
// A preset never changes how a rule is computed, only how much it counts.
// Every recognized rule is a field of `RuleWeights`, so a preset loaded from
// JSON with a misspelled rule name fails at load time instead of being
// silently ignored at scoring time. The consonance table (one value per
// interval mod 12) is also part of the preset, since idioms disagree about
// which intervals are stable.
//
// Built-in presets: classical, jazz, pop, baroque. Custom tweaks go through
// `with_overrides`, which validates rule names the same way.
//
// Consumed by reward.rs; selected once per episode by env.rs.

use crate::error::{HarmonyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Every rule the reward model knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Consonance,
    VoiceRange,
    VoiceCrossing,
    VoiceSpacing,
    ContraryMotion,
    ParallelPerfects,
    SmoothMotion,
    TriadCompleteness,
    AvoidRepetition,
    ScaleDegrees,
}

impl Rule {
    pub const ALL: [Rule; 10] = [
        Rule::Consonance,
        Rule::VoiceRange,
        Rule::VoiceCrossing,
        Rule::VoiceSpacing,
        Rule::ContraryMotion,
        Rule::ParallelPerfects,
        Rule::SmoothMotion,
        Rule::TriadCompleteness,
        Rule::AvoidRepetition,
        Rule::ScaleDegrees,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Rule::Consonance => "consonance",
            Rule::VoiceRange => "voice_range",
            Rule::VoiceCrossing => "voice_crossing",
            Rule::VoiceSpacing => "voice_spacing",
            Rule::ContraryMotion => "contrary_motion",
            Rule::ParallelPerfects => "parallel_perfects",
            Rule::SmoothMotion => "smooth_motion",
            Rule::TriadCompleteness => "triad_completeness",
            Rule::AvoidRepetition => "avoid_repetition",
            Rule::ScaleDegrees => "scale_degrees",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Rule {
    type Err = HarmonyError;

    fn from_str(s: &str) -> Result<Self> {
        Rule::ALL
            .into_iter()
            .find(|r| r.name() == s)
            .ok_or_else(|| HarmonyError::config(format!("unknown reward rule '{s}'")))
    }
}

/// Weight of every rule. Weights are non-negative; the sign of a
/// contribution comes from the rule itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleWeights {
    pub consonance: f64,
    pub voice_range: f64,
    pub voice_crossing: f64,
    pub voice_spacing: f64,
    pub contrary_motion: f64,
    pub parallel_perfects: f64,
    pub smooth_motion: f64,
    pub triad_completeness: f64,
    pub avoid_repetition: f64,
    pub scale_degrees: f64,
}

impl RuleWeights {
    pub fn get(&self, rule: Rule) -> f64 {
        match rule {
            Rule::Consonance => self.consonance,
            Rule::VoiceRange => self.voice_range,
            Rule::VoiceCrossing => self.voice_crossing,
            Rule::VoiceSpacing => self.voice_spacing,
            Rule::ContraryMotion => self.contrary_motion,
            Rule::ParallelPerfects => self.parallel_perfects,
            Rule::SmoothMotion => self.smooth_motion,
            Rule::TriadCompleteness => self.triad_completeness,
            Rule::AvoidRepetition => self.avoid_repetition,
            Rule::ScaleDegrees => self.scale_degrees,
        }
    }

    pub fn set(&mut self, rule: Rule, weight: f64) {
        let slot = match rule {
            Rule::Consonance => &mut self.consonance,
            Rule::VoiceRange => &mut self.voice_range,
            Rule::VoiceCrossing => &mut self.voice_crossing,
            Rule::VoiceSpacing => &mut self.voice_spacing,
            Rule::ContraryMotion => &mut self.contrary_motion,
            Rule::ParallelPerfects => &mut self.parallel_perfects,
            Rule::SmoothMotion => &mut self.smooth_motion,
            Rule::TriadCompleteness => &mut self.triad_completeness,
            Rule::AvoidRepetition => &mut self.avoid_repetition,
            Rule::ScaleDegrees => &mut self.scale_degrees,
        };
        *slot = weight;
    }
}

/// A named, immutable-once-selected reward configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StylePreset {
    pub name: String,
    pub weights: RuleWeights,
    /// Consonance value in [-1, 1] for each interval mod 12 between melody
    /// and a harmony voice (index 0 = unison/octave, 4 = major third, ...).
    pub consonance: [f64; 12],
    /// Widest allowed gap in semitones between adjacent upper voices.
    pub max_upper_spacing: u8,
    /// Widest allowed gap between the bass and the voice above it.
    pub max_bass_spacing: u8,
}

impl StylePreset {
    pub const NAMES: [&'static str; 4] = ["classical", "jazz", "pop", "baroque"];

    /// Look up a built-in preset by name (case-insensitive).
    pub fn named(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "classical" => Ok(Self::classical()),
            "jazz" => Ok(Self::jazz()),
            "pop" => Ok(Self::pop()),
            "baroque" => Ok(Self::baroque()),
            other => Err(HarmonyError::config(format!(
                "unknown style '{other}', expected one of {:?}",
                Self::NAMES
            ))),
        }
    }

    /// Common-practice chorale writing: strong contrary-motion and
    /// consonance preference, firm voice-leading discipline.
    pub fn classical() -> Self {
        StylePreset {
            name: "classical".into(),
            weights: RuleWeights {
                consonance: 1.1,
                voice_range: 1.0,
                voice_crossing: 1.0,
                voice_spacing: 0.8,
                contrary_motion: 1.2,
                parallel_perfects: 1.0,
                smooth_motion: 1.0,
                triad_completeness: 0.7,
                avoid_repetition: 0.3,
                scale_degrees: 0.4,
            },
            //           P1    m2    M2   m3   M3   P4    TT   P5   m6   M6    m7    M7
            consonance: [1.0, -1.0, -0.5, 0.8, 1.0, 0.6, -1.0, 1.0, 0.8, 0.8, -0.5, -1.0],
            max_upper_spacing: 12,
            max_bass_spacing: 24,
        }
    }

    /// Extended harmony: sevenths and added tones count as stable, parallel
    /// motion is tolerated.
    pub fn jazz() -> Self {
        StylePreset {
            name: "jazz".into(),
            weights: RuleWeights {
                consonance: 0.7,
                voice_range: 1.0,
                voice_crossing: 0.6,
                voice_spacing: 0.5,
                contrary_motion: 0.8,
                parallel_perfects: 0.3,
                smooth_motion: 0.8,
                triad_completeness: 0.4,
                avoid_repetition: 0.3,
                scale_degrees: 0.1,
            },
            consonance: [0.6, -0.6, 0.4, 0.9, 0.9, 0.6, 0.2, 0.8, 0.7, 0.9, 0.7, 0.5],
            max_upper_spacing: 14,
            max_bass_spacing: 24,
        }
    }

    /// Triad-centric, parallel-friendly pop voicing.
    pub fn pop() -> Self {
        StylePreset {
            name: "pop".into(),
            weights: RuleWeights {
                consonance: 1.0,
                voice_range: 1.0,
                voice_crossing: 0.8,
                voice_spacing: 0.6,
                contrary_motion: 0.5,
                parallel_perfects: 0.4,
                smooth_motion: 0.9,
                triad_completeness: 1.0,
                avoid_repetition: 0.2,
                scale_degrees: 0.5,
            },
            consonance: [1.0, -0.8, -0.2, 0.9, 1.0, 0.7, -0.6, 1.0, 0.8, 0.8, 0.0, -0.6],
            max_upper_spacing: 12,
            max_bass_spacing: 24,
        }
    }

    /// Contrapuntal writing: heaviest weight on independent, contrary lines
    /// and on avoiding parallel perfects.
    pub fn baroque() -> Self {
        StylePreset {
            name: "baroque".into(),
            weights: RuleWeights {
                consonance: 1.0,
                voice_range: 1.0,
                voice_crossing: 1.2,
                voice_spacing: 0.9,
                contrary_motion: 1.3,
                parallel_perfects: 1.5,
                smooth_motion: 1.2,
                triad_completeness: 0.8,
                avoid_repetition: 0.4,
                scale_degrees: 0.5,
            },
            consonance: [0.8, -1.0, -0.6, 0.9, 0.9, 0.4, -1.0, 0.9, 0.9, 0.9, -0.6, -1.0],
            max_upper_spacing: 12,
            max_bass_spacing: 19,
        }
    }

    /// Load a custom preset from JSON and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let preset: StylePreset = serde_json::from_str(json)?;
        preset.validate()?;
        Ok(preset)
    }

    /// Return a copy with the named rule weights replaced.
    pub fn with_overrides(&self, overrides: &BTreeMap<String, f64>) -> Result<Self> {
        let mut preset = self.clone();
        for (name, &weight) in overrides {
            let rule: Rule = name.parse()?;
            preset.weights.set(rule, weight);
        }
        preset.validate()?;
        Ok(preset)
    }

    pub fn validate(&self) -> Result<()> {
        for rule in Rule::ALL {
            let w = self.weights.get(rule);
            if !w.is_finite() || w < 0.0 {
                return Err(HarmonyError::config(format!(
                    "style '{}': weight for {rule} must be finite and >= 0, got {w}",
                    self.name
                )));
            }
        }
        for (ic, &v) in self.consonance.iter().enumerate() {
            if !(-1.0..=1.0).contains(&v) {
                return Err(HarmonyError::config(format!(
                    "style '{}': consonance value for interval {ic} must be in [-1, 1], got {v}",
                    self.name
                )));
            }
        }
        if self.max_upper_spacing == 0 || self.max_bass_spacing == 0 {
            return Err(HarmonyError::config(format!(
                "style '{}': spacing limits must be positive",
                self.name
            )));
        }
        Ok(())
    }
}

impl Default for StylePreset {
    fn default() -> Self {
        Self::classical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_presets_validate() {
        for name in StylePreset::NAMES {
            let preset = StylePreset::named(name).unwrap();
            preset.validate().unwrap();
            assert_eq!(preset.name, name);
        }
        assert!(StylePreset::named("CLASSICAL").is_ok());
        assert!(matches!(
            StylePreset::named("polka"),
            Err(HarmonyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rule_names_roundtrip() {
        for rule in Rule::ALL {
            assert_eq!(rule.name().parse::<Rule>().unwrap(), rule);
        }
        assert!("prefer_arpeggios".parse::<Rule>().is_err());
    }

    #[test]
    fn test_overrides_replace_only_named_rules() {
        let base = StylePreset::classical();
        let mut overrides = BTreeMap::new();
        overrides.insert("contrary_motion".to_string(), 3.0);
        let tuned = base.with_overrides(&overrides).unwrap();
        assert_eq!(tuned.weights.contrary_motion, 3.0);
        assert_eq!(tuned.weights.consonance, base.weights.consonance);

        overrides.insert("voice_leading".to_string(), 1.0);
        assert!(base.with_overrides(&overrides).is_err());

        let mut negative = BTreeMap::new();
        negative.insert("consonance".to_string(), -1.0);
        assert!(base.with_overrides(&negative).is_err());
    }

    #[test]
    fn test_presets_differ_only_in_weights() {
        let classical = StylePreset::classical();
        let pop = StylePreset::pop();
        assert!(classical.weights.contrary_motion > pop.weights.contrary_motion);
        assert!(pop.weights.triad_completeness > classical.weights.triad_completeness);
        assert!(StylePreset::jazz().weights.scale_degrees < classical.weights.scale_degrees);
    }

    #[test]
    fn test_json_rejects_unknown_rule() {
        let mut value = serde_json::to_value(StylePreset::jazz()).unwrap();
        let restored = StylePreset::from_json_str(&value.to_string()).unwrap();
        assert_eq!(restored, StylePreset::jazz());

        value["weights"]["prefer_tonic"] = serde_json::json!(0.5);
        assert!(StylePreset::from_json_str(&value.to_string()).is_err());
    }
}
