//! Sampling parameters for a single generation call.

use crate::ConfigError;
use serde::{Deserialize, Serialize};

/// Parameters governing one `generate` call.
///
/// Construct through [`DecodingConfig::new`] or deserialize and call
/// [`DecodingConfig::validate`]; a validated value is then passed by value to
/// every generation call and never mutated. When `do_sample` is false the
/// backend decodes greedily (or with beam search) and ignores `temperature`,
/// `top_k` and `top_p`, but those fields still have to be well-formed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodingConfig {
    /// Softmax temperature, strictly positive.
    pub temperature: f32,
    /// Keep only the `top_k` most likely tokens. Zero disables the filter.
    pub top_k: u32,
    /// Nucleus sampling mass in `(0, 1]`.
    pub top_p: f32,
    /// Sample from the distribution instead of taking the argmax.
    pub do_sample: bool,
    /// Beam width, at least 1.
    pub num_beams: u32,
    /// Penalty applied to already generated tokens, at least 1.0.
    pub repetition_penalty: f32,
    /// Upper bound on newly generated tokens, strictly positive.
    pub max_new_tokens: u32,
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            top_k: 40,
            top_p: 0.9,
            do_sample: true,
            num_beams: 1,
            repetition_penalty: 1.2,
            max_new_tokens: 400,
        }
    }
}

impl DecodingConfig {
    /// Builds and validates a decoding configuration.
    pub fn new(
        temperature: f32,
        top_k: u32,
        top_p: f32,
        do_sample: bool,
        num_beams: u32,
        repetition_penalty: f32,
        max_new_tokens: u32,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            temperature,
            top_k,
            top_p,
            do_sample,
            num_beams,
            repetition_penalty,
            max_new_tokens,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every field against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(ConfigError::invalid("temperature", "must be > 0"));
        }
        if !self.top_p.is_finite() || self.top_p <= 0.0 || self.top_p > 1.0 {
            return Err(ConfigError::invalid("top_p", "must be in (0, 1]"));
        }
        if self.num_beams < 1 {
            return Err(ConfigError::invalid("num_beams", "must be >= 1"));
        }
        if !self.repetition_penalty.is_finite() || self.repetition_penalty < 1.0 {
            return Err(ConfigError::invalid("repetition_penalty", "must be >= 1"));
        }
        if self.max_new_tokens == 0 {
            return Err(ConfigError::invalid("max_new_tokens", "must be > 0"));
        }
        Ok(())
    }

    /// Returns true when the backend should run greedy or beam decoding.
    pub fn is_greedy(&self) -> bool {
        !self.do_sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(err: ConfigError) -> String {
        match err {
            ConfigError::InvalidField { field, .. } => field,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_default_is_valid() {
        assert!(DecodingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_new_accepts_boundary_values() {
        let config = DecodingConfig::new(1e-3, 0, 1.0, false, 1, 1.0, 1).unwrap();
        assert!(config.is_greedy());
        assert_eq!(config.top_k, 0);
    }

    #[test]
    fn test_each_invalid_field_is_rejected() {
        let cases: Vec<(&str, DecodingConfig)> = vec![
            ("temperature", DecodingConfig { temperature: 0.0, ..Default::default() }),
            ("temperature", DecodingConfig { temperature: -0.5, ..Default::default() }),
            ("temperature", DecodingConfig { temperature: f32::NAN, ..Default::default() }),
            ("top_p", DecodingConfig { top_p: 0.0, ..Default::default() }),
            ("top_p", DecodingConfig { top_p: 1.01, ..Default::default() }),
            ("num_beams", DecodingConfig { num_beams: 0, ..Default::default() }),
            ("repetition_penalty", DecodingConfig { repetition_penalty: 0.9, ..Default::default() }),
            ("max_new_tokens", DecodingConfig { max_new_tokens: 0, ..Default::default() }),
        ];

        for (expected, config) in cases {
            let err = config.validate().unwrap_err();
            assert_eq!(field_of(err), expected);
        }
    }

    #[test]
    fn test_sampling_fields_checked_when_not_sampling() {
        let config = DecodingConfig { do_sample: false, top_p: 2.0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DecodingConfig = toml::from_str("max_new_tokens = 32\ndo_sample = false").unwrap();
        assert_eq!(config.max_new_tokens, 32);
        assert!(!config.do_sample);
        assert!((config.top_p - 0.9).abs() < f32::EPSILON);
    }
}
