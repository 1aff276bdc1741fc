// Harmonizer configuration.
//
// Everything an episode needs beyond the melody itself: harmony voice count,
// horizon, sampling temperature, style selection, voice ranges, infill
// schedule, observation shape, and seed. Loaded from JSON with per-field
// defaults, so a config file only needs the fields it changes. `validate()`
// runs once at construction; after that every consumer trusts the values.
//
// The resolved style (preset plus overrides) is produced here by
// `style_preset()` so that env.rs never looks rule names up by string.

use crate::error::{HarmonyError, Result};
use crate::grid::{Voice, VoiceRange};
use crate::style::StylePreset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Pitch range per SATB role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VoiceRanges {
    pub soprano: VoiceRange,
    pub alto: VoiceRange,
    pub tenor: VoiceRange,
    pub bass: VoiceRange,
}

impl VoiceRanges {
    pub fn get(&self, voice: Voice) -> VoiceRange {
        match voice {
            Voice::Soprano => self.soprano,
            Voice::Alto => self.alto,
            Voice::Tenor => self.tenor,
            Voice::Bass => self.bass,
        }
    }

    /// Ranges for a list of roles, in the same order.
    pub fn for_voices(&self, voices: &[Voice]) -> Vec<VoiceRange> {
        voices.iter().map(|&v| self.get(v)).collect()
    }
}

impl Default for VoiceRanges {
    fn default() -> Self {
        VoiceRanges {
            soprano: Voice::Soprano.default_range(),
            alto: Voice::Alto.default_range(),
            tenor: Voice::Tenor.default_range(),
            bass: Voice::Bass.default_range(),
        }
    }
}

/// Progressive-unmasking schedule for the infilling controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InfillConfig {
    /// Number of inference rounds. Each round resolves an equal share of
    /// the cells still unknown, most confident first.
    pub iterations: usize,
}

impl Default for InfillConfig {
    fn default() -> Self {
        InfillConfig { iterations: 8 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarmonizerConfig {
    /// Harmony voices under the melody (1-3).
    pub harmony_voices: usize,
    /// Episode horizon. `None` means one step per melody note.
    pub max_steps: Option<usize>,
    /// Sampling temperature for model-informed steps and full infills.
    pub temperature: f64,
    /// Built-in style preset name.
    pub style: String,
    /// Per-rule weight replacements applied on top of `style`.
    pub style_overrides: BTreeMap<String, f64>,
    pub voice_ranges: VoiceRanges,
    pub infill: InfillConfig,
    /// Steps of history included in each observation.
    pub observation_window: usize,
    pub seed: u64,
}

impl Default for HarmonizerConfig {
    fn default() -> Self {
        HarmonizerConfig {
            harmony_voices: 3,
            max_steps: None,
            temperature: 1.0,
            style: "classical".into(),
            style_overrides: BTreeMap::new(),
            voice_ranges: VoiceRanges::default(),
            infill: InfillConfig::default(),
            observation_window: 4,
            seed: 42,
        }
    }
}

impl HarmonizerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: HarmonizerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        Voice::harmony_roles(self.harmony_voices)?;
        if self.max_steps == Some(0) {
            return Err(HarmonyError::config("max_steps must be at least 1"));
        }
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(HarmonyError::config(format!(
                "temperature must be finite and > 0, got {}",
                self.temperature
            )));
        }
        if self.infill.iterations == 0 {
            return Err(HarmonyError::config("infill.iterations must be at least 1"));
        }
        if self.observation_window == 0 {
            return Err(HarmonyError::config("observation_window must be at least 1"));
        }
        for voice in Voice::ALL {
            let r = self.voice_ranges.get(voice);
            // Re-run the constructor check: serde bypasses it.
            VoiceRange::new(r.min, r.max).map_err(|_| {
                HarmonyError::config(format!(
                    "{} range [{}, {}] must satisfy min <= max <= 127",
                    voice.name(),
                    r.min,
                    r.max
                ))
            })?;
        }
        self.style_preset()?;
        Ok(())
    }

    /// The selected preset with overrides applied.
    pub fn style_preset(&self) -> Result<StylePreset> {
        StylePreset::named(&self.style)?.with_overrides(&self.style_overrides)
    }

    /// Harmony roles for the configured voice count.
    pub fn harmony_roles(&self) -> Result<Vec<Voice>> {
        Voice::harmony_roles(self.harmony_voices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HarmonizerConfig::default();
        config.validate().unwrap();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let restored = HarmonizerConfig::from_json_str(&json).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "harmony_voices": 2,
            "temperature": 0.5,
            "style": "jazz",
            "style_overrides": { "parallel_perfects": 0.0 },
            "voice_ranges": { "bass": { "min": 36, "max": 55 } },
            "infill": { "iterations": 3 }
        }"#;
        let config = HarmonizerConfig::from_json_str(json).unwrap();
        assert_eq!(config.harmony_voices, 2);
        assert_eq!(config.voice_ranges.bass, VoiceRange { min: 36, max: 55 });
        assert_eq!(config.voice_ranges.alto, Voice::Alto.default_range());
        assert_eq!(config.observation_window, 4);
        let style = config.style_preset().unwrap();
        assert_eq!(style.name, "jazz");
        assert_eq!(style.weights.parallel_perfects, 0.0);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            r#"{ "harmony_voices": 0 }"#,
            r#"{ "harmony_voices": 4 }"#,
            r#"{ "temperature": 0.0 }"#,
            r#"{ "temperature": -1.5 }"#,
            r#"{ "max_steps": 0 }"#,
            r#"{ "style": "gregorian" }"#,
            r#"{ "style_overrides": { "voice_leading": 1.0 } }"#,
            r#"{ "voice_ranges": { "tenor": { "min": 70, "max": 50 } } }"#,
            r#"{ "voice_ranges": { "alto": { "min": 50, "max": 130 } } }"#,
            r#"{ "infill": { "iterations": 0 } }"#,
            r#"{ "observation_window": 0 }"#,
        ];
        for json in cases {
            assert!(
                matches!(
                    HarmonizerConfig::from_json_str(json),
                    Err(HarmonyError::InvalidConfig(_))
                ),
                "accepted {json}"
            );
        }
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(matches!(
            HarmonizerConfig::from_json_str(r#"{ "temprature": 0.7 }"#),
            Err(HarmonyError::Json(_))
        ));
    }
}
