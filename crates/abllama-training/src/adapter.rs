//! Low-rank adapter configuration and placement.
//!
//! An [`AdapterConfig`] names the weight matrices that receive a trainable
//! low-rank delta and the modules that are trained in full. Applying it to the
//! weight list of a loaded model yields an [`AdapterPlan`], which the training
//! backend materializes.

use abllama_abstraction::{ConfigError, WeightInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Which bias vectors are trainable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasMode {
    /// All biases stay frozen.
    #[default]
    None,
    /// Every bias in the model is trainable.
    All,
    /// Only biases of low-rank adapted matrices are trainable.
    LoraOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Rank of the low-rank delta.
    pub rank: usize,
    /// Scaling numerator; the delta is scaled by `alpha / rank`.
    pub alpha: f64,
    /// Dropout applied to the adapter input, in `[0, 1)`.
    pub dropout: f64,
    pub bias: BiasMode,
    /// Module name patterns that receive a low-rank delta.
    #[serde(alias = "target_modules")]
    pub target_matrices: BTreeSet<String>,
    /// Module name patterns trained without the low-rank constraint.
    #[serde(alias = "modules_to_save")]
    pub full_finetune_modules: BTreeSet<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            rank: 64,
            alpha: 128.0,
            dropout: 0.05,
            bias: BiasMode::None,
            target_matrices: ["q_proj", "k_proj", "v_proj", "o_proj", "gate_proj", "up_proj", "down_proj"]
                .into_iter()
                .map(String::from)
                .collect(),
            full_finetune_modules: ["embed_tokens", "lm_head"].into_iter().map(String::from).collect(),
        }
    }
}

impl AdapterConfig {
    /// Multiplier applied to the low-rank delta.
    pub fn scale(&self) -> f64 {
        self.alpha / self.rank as f64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rank == 0 {
            return Err(ConfigError::invalid("adapter.rank", "must be > 0"));
        }
        if !self.alpha.is_finite() || self.alpha <= 0.0 {
            return Err(ConfigError::invalid("adapter.alpha", "must be > 0"));
        }
        if !self.dropout.is_finite() || !(0.0..1.0).contains(&self.dropout) {
            return Err(ConfigError::invalid("adapter.dropout", "must be in [0, 1)"));
        }
        if self.target_matrices.is_empty() {
            return Err(ConfigError::invalid("adapter.target_matrices", "must name at least one module"));
        }
        Ok(())
    }
}

/// `pattern` matches a module when it equals the full name or its dotted suffix.
fn matches_pattern(name: &str, pattern: &str) -> bool {
    name == pattern
        || name
            .strip_suffix(pattern)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn matches_any(name: &str, patterns: &BTreeSet<String>) -> bool {
    patterns.iter().any(|p| matches_pattern(name, p))
}

/// How one weight matrix participates in training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightRole {
    Frozen,
    LowRank,
    FullyTrainable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedWeight {
    pub weight: WeightInfo,
    pub role: WeightRole,
    /// Trainable parameters attributed to this module, including any trainable bias.
    pub trainable_parameters: usize,
    /// Parameters added on top of the base weights (the low-rank factors).
    pub added_parameters: usize,
}

/// Placement of the adapter on a concrete model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterPlan {
    pub config: AdapterConfig,
    pub weights: Vec<PlannedWeight>,
}

impl AdapterPlan {
    /// Assigns a [`WeightRole`] to every weight of the model.
    ///
    /// Modules named in `full_finetune_modules` take precedence over
    /// `target_matrices`. Fails when no weight matches any target.
    pub fn build(config: &AdapterConfig, weights: &[WeightInfo]) -> Result<Self, ConfigError> {
        config.validate()?;

        let planned: Vec<PlannedWeight> = weights
            .iter()
            .map(|w| {
                let role = if matches_any(&w.name, &config.full_finetune_modules) {
                    WeightRole::FullyTrainable
                } else if matches_any(&w.name, &config.target_matrices) {
                    WeightRole::LowRank
                } else {
                    WeightRole::Frozen
                };

                let (trainable, added) = match role {
                    WeightRole::FullyTrainable => (w.matrix_parameters() + w.bias_parameters(), 0),
                    WeightRole::LowRank => {
                        let low_rank = config.rank * (w.rows + w.cols);
                        let bias = match config.bias {
                            BiasMode::All | BiasMode::LoraOnly => w.bias_parameters(),
                            BiasMode::None => 0,
                        };
                        (low_rank + bias, low_rank)
                    }
                    WeightRole::Frozen => match config.bias {
                        BiasMode::All => (w.bias_parameters(), 0),
                        BiasMode::None | BiasMode::LoraOnly => (0, 0),
                    },
                };

                PlannedWeight { weight: w.clone(), role, trainable_parameters: trainable, added_parameters: added }
            })
            .collect();

        if !planned.iter().any(|p| p.role == WeightRole::LowRank) {
            return Err(ConfigError::invalid(
                "adapter.target_matrices",
                format!(
                    "no weight matrix matches any of [{}]",
                    config.target_matrices.iter().cloned().collect::<Vec<_>>().join(", ")
                ),
            ));
        }

        Ok(Self { config: config.clone(), weights: planned })
    }

    pub fn low_rank(&self) -> impl Iterator<Item = &PlannedWeight> {
        self.weights.iter().filter(|p| p.role == WeightRole::LowRank)
    }

    pub fn fully_trainable(&self) -> impl Iterator<Item = &PlannedWeight> {
        self.weights.iter().filter(|p| p.role == WeightRole::FullyTrainable)
    }

    pub fn trainable_parameters_of(&self, name: &str) -> Option<usize> {
        self.weights.iter().find(|p| p.weight.name == name).map(|p| p.trainable_parameters)
    }

    pub fn report(&self) -> AdapterReport {
        let base: usize = self
            .weights
            .iter()
            .map(|p| p.weight.matrix_parameters() + p.weight.bias_parameters())
            .sum();
        let added: usize = self.weights.iter().map(|p| p.added_parameters).sum();

        AdapterReport {
            trainable: self.weights.iter().map(|p| p.trainable_parameters).sum(),
            total: base + added,
            low_rank_matrices: self.low_rank().count(),
            full_modules: self.fully_trainable().count(),
        }
    }
}

/// Trainable parameter summary of an attached adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterReport {
    pub trainable: usize,
    pub total: usize,
    pub low_rank_matrices: usize,
    pub full_modules: usize,
}

impl AdapterReport {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.trainable as f64 / self.total as f64
    }
}

impl fmt::Display for AdapterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trainable params: {} || all params: {} || trainable%: {:.4}",
            self.trainable,
            self.total,
            self.fraction() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weight(name: &str, rows: usize, cols: usize) -> WeightInfo {
        WeightInfo { name: name.to_string(), rows, cols, bias: None }
    }

    fn q_only() -> AdapterConfig {
        AdapterConfig {
            rank: 4,
            target_matrices: BTreeSet::from(["q_proj".to_string()]),
            full_finetune_modules: BTreeSet::new(),
            ..Default::default()
        }
    }

    /// Three attention blocks with q/k/v/o plus embedding and head: 3 + 10 matrices.
    fn small_model() -> Vec<WeightInfo> {
        let mut weights = vec![weight("model.embed_tokens", 32, 16)];
        for layer in 0..3 {
            for proj in ["q_proj", "k_proj", "v_proj"] {
                weights.push(weight(&format!("model.layers.{layer}.self_attn.{proj}"), 16, 16));
            }
        }
        weights.push(weight("model.norm", 16, 1));
        weights.push(weight("lm_head", 32, 16));
        weights
    }

    #[test]
    fn test_pattern_matching_uses_dotted_suffix() {
        assert!(matches_pattern("model.layers.0.self_attn.q_proj", "q_proj"));
        assert!(matches_pattern("lm_head", "lm_head"));
        assert!(matches_pattern("model.layers.0.self_attn.q_proj", "self_attn.q_proj"));
        assert!(!matches_pattern("model.layers.0.self_attn.xq_proj", "q_proj"));
        assert!(!matches_pattern("model.layers.0.q_proj.weight_scale", "q_proj"));
    }

    #[test]
    fn test_only_matching_matrices_get_a_delta() {
        let weights = small_model();
        assert_eq!(weights.len(), 13);

        let plan = AdapterPlan::build(&q_only(), &weights).unwrap();
        assert_eq!(plan.low_rank().count(), 3);

        for p in &plan.weights {
            if p.weight.leaf_name() == "q_proj" {
                assert_eq!(p.role, WeightRole::LowRank);
                assert_eq!(p.trainable_parameters, 4 * (16 + 16));
            } else {
                assert_eq!(p.role, WeightRole::Frozen);
                assert_eq!(p.trainable_parameters, 0);
            }
        }
    }

    #[test]
    fn test_full_finetune_modules_take_precedence() {
        let mut config = q_only();
        config.full_finetune_modules = BTreeSet::from(["lm_head".to_string(), "embed_tokens".to_string()]);

        let plan = AdapterPlan::build(&config, &small_model()).unwrap();
        assert_eq!(plan.fully_trainable().count(), 2);
        assert_eq!(plan.trainable_parameters_of("lm_head"), Some(32 * 16));

        let report = plan.report();
        assert_eq!(report.trainable, 3 * 4 * 32 + 2 * 32 * 16);
        assert_eq!(report.low_rank_matrices, 3);
        assert_eq!(report.full_modules, 2);
    }

    #[test]
    fn test_bias_modes() {
        let weights = vec![
            WeightInfo { name: "a.q_proj".to_string(), rows: 4, cols: 4, bias: Some(4) },
            WeightInfo { name: "a.k_proj".to_string(), rows: 4, cols: 4, bias: Some(4) },
        ];

        let mut config = q_only();
        config.rank = 1;
        let none = AdapterPlan::build(&config, &weights).unwrap();
        assert_eq!(none.report().trainable, 8);

        config.bias = BiasMode::LoraOnly;
        let lora_only = AdapterPlan::build(&config, &weights).unwrap();
        assert_eq!(lora_only.report().trainable, 12);

        config.bias = BiasMode::All;
        let all = AdapterPlan::build(&config, &weights).unwrap();
        assert_eq!(all.report().trainable, 16);
    }

    #[test]
    fn test_no_match_is_config_error() {
        let config = AdapterConfig {
            target_matrices: BTreeSet::from(["c_attn".to_string()]),
            ..q_only()
        };
        assert!(AdapterPlan::build(&config, &small_model()).is_err());
    }

    #[test]
    fn test_validate_ranges() {
        assert!(AdapterConfig::default().validate().is_ok());
        assert!((AdapterConfig::default().scale() - 2.0).abs() < f64::EPSILON);
        assert!(AdapterConfig { rank: 0, ..Default::default() }.validate().is_err());
        assert!(AdapterConfig { alpha: 0.0, ..Default::default() }.validate().is_err());
        assert!(AdapterConfig { dropout: 1.0, ..Default::default() }.validate().is_err());
        assert!(AdapterConfig { target_matrices: BTreeSet::new(), ..Default::default() }.validate().is_err());
    }

    #[test]
    fn test_report_display() {
        let report = AdapterReport { trainable: 25, total: 100, low_rank_matrices: 1, full_modules: 0 };
        assert_eq!(report.to_string(), "trainable params: 25 || all params: 100 || trainable%: 25.0000");
    }

    #[test]
    fn test_config_accepts_peft_field_names() {
        let config: AdapterConfig = toml::from_str(
            "rank = 8\nalpha = 16.0\nbias = \"lora_only\"\ntarget_modules = [\"q_proj\"]\nmodules_to_save = []",
        )
        .unwrap();
        assert_eq!(config.rank, 8);
        assert_eq!(config.bias, BiasMode::LoraOnly);
        assert_eq!(config.target_matrices.len(), 1);
        assert!(config.full_finetune_modules.is_empty());
    }
}
