//! # Selection Configuration
//!
//! Everything the full-subsets procedure needs to know about a run is declared in a
//! single TOML document: which columns hold the response and the taxon identifier, how
//! the candidate predictors are partitioned into roles, which terms are mandatory in
//! every model, and the knobs of the enumerator, fitter and ranker.
//!
//! Validation is strict and happens before any data is touched. A predictor listed
//! under two roles, an always-included predictor with no role, or a threshold outside
//! its domain is a user error that is reported immediately.

use crate::terms::CandidateModel;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// The role a predictor plays in every candidate model it appears in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredictorRole {
    /// Entered as a penalized smooth term.
    Continuous,
    /// Entered as a categorical term with treatment contrasts.
    Factor,
    /// Entered as a single unpenalized linear column, never smoothed.
    Linear,
}

/// Derived numeric columns computed from source columns right after loading.
///
/// `sqrt = ["Relief"]` creates `sqrt.Relief`; `log1p = ["Depth"]` creates `log.Depth`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformConfig {
    #[serde(default)]
    pub sqrt: Vec<String>,
    #[serde(default)]
    pub log1p: Vec<String>,
}

/// A single derived column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedColumn {
    pub name: String,
    pub source: String,
    pub transform: Transform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Sqrt,
    Log1p,
}

/// Numerical settings of the model fitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FitSettings {
    /// Maximum number of P-IRLS iterations for one set of smoothing parameters.
    pub max_iterations: usize,
    /// Relative change in penalized deviance that ends the P-IRLS loop.
    pub convergence_tolerance: f64,
    /// Maximum number of BFGS iterations of the smoothing-parameter search.
    pub smoothing_max_iterations: usize,
    /// Gradient tolerance of the smoothing-parameter search.
    pub smoothing_tolerance: f64,
    /// Width of the final bracket of the Tweedie power search.
    pub power_tolerance: f64,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            convergence_tolerance: 1e-7,
            smoothing_max_iterations: 100,
            smoothing_tolerance: 1e-4,
            power_tolerance: 0.01,
        }
    }
}

/// The complete description of a selection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectionConfig {
    /// Name of the non-negative abundance column.
    pub response: String,
    /// Name of the column identifying the taxon each row belongs to.
    pub taxon_column: String,

    #[serde(default)]
    pub continuous: Vec<String>,
    #[serde(default)]
    pub factors: Vec<String>,
    #[serde(default)]
    pub linear: Vec<String>,

    /// Predictors (from any role) that enter every model and are never enumerated.
    #[serde(default)]
    pub always_include: Vec<String>,
    /// One entry per random-intercept term; each entry lists the nesting keys,
    /// outermost first, e.g. `[["Location"], ["Location", "Site"]]`.
    #[serde(default)]
    pub random_effects: Vec<Vec<String>>,

    /// Maximum basis dimension of every smooth term.
    #[serde(default = "default_basis_size")]
    pub basis_size: usize,
    /// Maximum number of enumerated predictors in one model.
    #[serde(default = "default_max_predictors")]
    pub max_predictors: usize,
    /// Absolute correlation above which two numeric predictors may not share a model.
    #[serde(default = "default_correlation_cutoff")]
    pub correlation_cutoff: f64,
    /// Upper bound on the number of admissible candidates per taxon.
    #[serde(default = "default_max_models")]
    pub max_models: usize,
    /// Models within this many AICc units of the best form the parsimonious set.
    #[serde(default = "default_delta_threshold")]
    pub delta_threshold: f64,
    /// Whether the model with only the mandatory terms is a candidate.
    #[serde(default = "default_true")]
    pub include_null_model: bool,

    #[serde(default = "default_true")]
    pub parallel: bool,
    /// Worker cap for parallel fitting; all cores when absent.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Fixed Tweedie power in (1, 2). Estimated per model when absent.
    #[serde(default)]
    pub tweedie_power: Option<f64>,

    /// Taxa with fewer complete rows than this are skipped.
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
    /// Restricts the run to these taxa when present.
    #[serde(default)]
    pub taxa: Option<Vec<String>>,
    /// Field separator of the input table.
    #[serde(default = "default_separator")]
    pub separator: char,
    #[serde(default)]
    pub transforms: TransformConfig,
    #[serde(default)]
    pub fit: FitSettings,
    /// Number of points of each continuous partial-effect grid.
    #[serde(default = "default_grid_size")]
    pub prediction_grid_size: usize,
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

fn default_basis_size() -> usize {
    5
}
fn default_max_predictors() -> usize {
    3
}
fn default_correlation_cutoff() -> f64 {
    0.28
}
fn default_max_models() -> usize {
    500
}
fn default_delta_threshold() -> f64 {
    3.0
}
fn default_true() -> bool {
    true
}
fn default_min_observations() -> usize {
    10
}
fn default_separator() -> char {
    ','
}
fn default_grid_size() -> usize {
    20
}

/// Fatal configuration problems. None of these are recoverable by the fitter.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Predictor '{0}' is listed under more than one role.")]
    ConflictingRoles(String),

    #[error("Predictor '{0}' is listed more than once.")]
    DuplicatePredictor(String),

    #[error(
        "Predictor '{0}' is listed in 'always_include' but has no role. Add it to 'continuous', 'factors' or 'linear'."
    )]
    UnknownAlwaysInclude(String),

    #[error(
        "Predictor name '{0}' cannot be used: names must be non-empty, must not contain '+' and must not be 'null'."
    )]
    UnusablePredictorName(String),

    #[error("Random-effect term {0} has no grouping keys.")]
    EmptyRandomEffect(usize),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error(
        "The predictor set admits {count} candidate models, which exceeds the cap of {cap}. Raise 'max_models', lower 'max_predictors', or remove predictors."
    )]
    TooManyModels { count: usize, cap: usize },
}

impl SelectionConfig {
    /// Parses and validates a configuration document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SelectionConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: HashSet<&str> = HashSet::new();
        for names in [&self.continuous, &self.factors, &self.linear] {
            let mut in_role: HashSet<&str> = HashSet::new();
            for name in names {
                if !in_role.insert(name.as_str()) {
                    return Err(ConfigError::DuplicatePredictor(name.clone()));
                }
                if !seen.insert(name.as_str()) {
                    return Err(ConfigError::ConflictingRoles(name.clone()));
                }
                if !CandidateModel::is_usable_predictor_name(name) {
                    return Err(ConfigError::UnusablePredictorName(name.clone()));
                }
            }
        }

        for name in &self.always_include {
            if self.role_of(name).is_none() {
                return Err(ConfigError::UnknownAlwaysInclude(name.clone()));
            }
        }

        for (idx, keys) in self.random_effects.iter().enumerate() {
            if keys.is_empty() {
                return Err(ConfigError::EmptyRandomEffect(idx));
            }
        }

        if !self.separator.is_ascii() {
            return Err(ConfigError::InvalidValue {
                field: "separator",
                reason: format!("must be a single ASCII character, got '{}'", self.separator),
            });
        }
        if self.basis_size < 3 {
            return Err(ConfigError::InvalidValue {
                field: "basis_size",
                reason: format!("must be at least 3, got {}", self.basis_size),
            });
        }
        if !(self.correlation_cutoff > 0.0 && self.correlation_cutoff <= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "correlation_cutoff",
                reason: format!("must lie in (0, 1], got {}", self.correlation_cutoff),
            });
        }
        if self.max_models == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_models",
                reason: "must be positive".to_string(),
            });
        }
        if !(self.delta_threshold >= 0.0 && self.delta_threshold.is_finite()) {
            return Err(ConfigError::InvalidValue {
                field: "delta_threshold",
                reason: format!(
                    "must be a finite non-negative number, got {}",
                    self.delta_threshold
                ),
            });
        }
        if let Some(power) = self.tweedie_power {
            if !(power > 1.0 && power < 2.0) {
                return Err(ConfigError::InvalidValue {
                    field: "tweedie_power",
                    reason: format!("must lie strictly between 1 and 2, got {power}"),
                });
            }
        }
        if self.workers == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "workers",
                reason: "must be positive".to_string(),
            });
        }
        if self.prediction_grid_size < 2 {
            return Err(ConfigError::InvalidValue {
                field: "prediction_grid_size",
                reason: format!("must be at least 2, got {}", self.prediction_grid_size),
            });
        }
        if self.min_observations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "min_observations",
                reason: "must be positive".to_string(),
            });
        }
        if !(self.fit.power_tolerance > 0.0 && self.fit.convergence_tolerance > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "fit",
                reason: "tolerances must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn role_of(&self, name: &str) -> Option<PredictorRole> {
        if self.continuous.iter().any(|n| n == name) {
            Some(PredictorRole::Continuous)
        } else if self.factors.iter().any(|n| n == name) {
            Some(PredictorRole::Factor)
        } else if self.linear.iter().any(|n| n == name) {
            Some(PredictorRole::Linear)
        } else {
            None
        }
    }

    /// The enumerated predictors in canonical order: continuous, then factors, then
    /// linear-only. Always-included predictors are not part of the universe.
    pub fn predictor_universe(&self) -> Vec<(String, PredictorRole)> {
        let fixed: HashSet<&str> = self.always_include.iter().map(|s| s.as_str()).collect();
        let roles = [
            (&self.continuous, PredictorRole::Continuous),
            (&self.factors, PredictorRole::Factor),
            (&self.linear, PredictorRole::Linear),
        ];
        roles
            .into_iter()
            .flat_map(|(names, role)| names.iter().map(move |n| (n.clone(), role)))
            .filter(|(n, _)| !fixed.contains(n.as_str()))
            .collect()
    }

    /// All numeric predictors (continuous and linear-only), including always-included ones.
    pub fn numeric_predictors(&self) -> Vec<String> {
        self.continuous
            .iter()
            .chain(self.linear.iter())
            .cloned()
            .collect()
    }

    /// All categorical columns: factor predictors and every random-effect key.
    pub fn categorical_columns(&self) -> Vec<String> {
        let mut out: Vec<String> = self.factors.clone();
        for key in self.random_effects.iter().flatten() {
            if !out.contains(key) {
                out.push(key.clone());
            }
        }
        out
    }

    /// Derived columns declared in `transforms`.
    pub fn derived_columns(&self) -> Vec<DerivedColumn> {
        let sqrt = self.transforms.sqrt.iter().map(|s| DerivedColumn {
            name: format!("sqrt.{s}"),
            source: s.clone(),
            transform: Transform::Sqrt,
        });
        let log1p = self.transforms.log1p.iter().map(|s| DerivedColumn {
            name: format!("log.{s}"),
            source: s.clone(),
            transform: Transform::Log1p,
        });
        sqrt.chain(log1p).collect()
    }

    /// Numeric columns that must be read from the input file: every numeric predictor
    /// that is not derived, plus every transform source.
    pub fn numeric_source_columns(&self) -> Vec<String> {
        let derived = self.derived_columns();
        let mut out: Vec<String> = Vec::new();
        for name in self.numeric_predictors() {
            if let Some(d) = derived.iter().find(|d| d.name == name) {
                if !out.contains(&d.source) {
                    out.push(d.source.clone());
                }
            } else if !out.contains(&name) {
                out.push(name);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
response = "Abundance"
taxon_column = "Taxa"
continuous = ["Depth", "Relief"]
factors = ["Status"]
random_effects = [["Location"], ["Location", "Site"]]
"#;

    #[test]
    fn defaults_are_applied() {
        let config = SelectionConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.basis_size, 5);
        assert_eq!(config.max_predictors, 3);
        assert!((config.correlation_cutoff - 0.28).abs() < 1e-12);
        assert!((config.delta_threshold - 3.0).abs() < 1e-12);
        assert!(config.include_null_model);
        assert!(config.parallel);
        assert_eq!(config.separator, ',');
        assert_eq!(config.fit.max_iterations, 100);
        assert_eq!(
            config.categorical_columns(),
            vec!["Status".to_string(), "Location".to_string(), "Site".to_string()]
        );
    }

    #[test]
    fn predictor_in_two_roles_is_rejected() {
        let text = format!("{MINIMAL}\nlinear = [\"Depth\"]\n");
        match SelectionConfig::from_toml_str(&text).unwrap_err() {
            ConfigError::ConflictingRoles(name) => assert_eq!(name, "Depth"),
            other => panic!("Expected ConflictingRoles, got {other:?}"),
        }
    }

    #[test]
    fn always_include_requires_a_role() {
        let text = format!("{MINIMAL}\nalways_include = [\"Rugosity\"]\n");
        assert!(matches!(
            SelectionConfig::from_toml_str(&text).unwrap_err(),
            ConfigError::UnknownAlwaysInclude(_)
        ));
    }

    #[test]
    fn always_included_predictors_leave_the_universe() {
        let text = format!("{MINIMAL}\nalways_include = [\"Depth\"]\n");
        let config = SelectionConfig::from_toml_str(&text).unwrap();
        let universe: Vec<String> = config
            .predictor_universe()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(universe, vec!["Relief".to_string(), "Status".to_string()]);
    }

    #[test]
    fn predictor_names_that_break_candidate_names_are_rejected() {
        for bad in ["Depth+Relief", "null"] {
            let text = format!("{MINIMAL}\nlinear = [\"{bad}\"]\n");
            match SelectionConfig::from_toml_str(&text).unwrap_err() {
                ConfigError::UnusablePredictorName(name) => assert_eq!(name, bad),
                other => panic!("Expected UnusablePredictorName, got {other:?}"),
            }
        }
    }

    #[test]
    fn non_ascii_separator_is_rejected() {
        let text = format!("{MINIMAL}\nseparator = \"§\"\n");
        assert!(matches!(
            SelectionConfig::from_toml_str(&text).unwrap_err(),
            ConfigError::InvalidValue { field: "separator", .. }
        ));
        let text = format!("{MINIMAL}\nseparator = \";\"\n");
        assert_eq!(SelectionConfig::from_toml_str(&text).unwrap().separator, ';');
    }

    #[test]
    fn out_of_range_power_is_rejected() {
        let text = format!("{MINIMAL}\ntweedie_power = 2.5\n");
        assert!(matches!(
            SelectionConfig::from_toml_str(&text).unwrap_err(),
            ConfigError::InvalidValue { field: "tweedie_power", .. }
        ));
    }

    #[test]
    fn derived_columns_resolve_to_sources() {
        let text = r#"
response = "Abundance"
taxon_column = "Taxa"
continuous = ["sqrt.Relief", "log.Depth", "Slope"]
[transforms]
sqrt = ["Relief"]
log1p = ["Depth"]
"#;
        let config = SelectionConfig::from_toml_str(text).unwrap();
        assert_eq!(
            config.numeric_source_columns(),
            vec!["Relief".to_string(), "Depth".to_string(), "Slope".to_string()]
        );
    }
}
