//! # Typed Model Terms
//!
//! A candidate model is a list of `Term`s rather than a formula string. The design
//! builder consumes the terms directly, and `label`/`formula` exist only for humans.

use crate::config::PredictorRole;
use crate::data::grouping_label;
use serde::Serialize;

/// One additive component of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Term {
    /// Penalized smooth of a continuous predictor with at most `basis_size` basis functions.
    Smooth { predictor: String, basis_size: usize },
    /// Unpenalized linear effect of a numeric predictor.
    Linear { predictor: String },
    /// Categorical effect with treatment contrasts.
    Factor { predictor: String },
    /// Random intercept over the (possibly nested) grouping keys.
    RandomEffect { grouping: Vec<String> },
}

impl Term {
    /// The term a predictor of the given role enters a model as.
    pub fn for_predictor(name: &str, role: PredictorRole, basis_size: usize) -> Self {
        match role {
            PredictorRole::Continuous => Term::Smooth {
                predictor: name.to_string(),
                basis_size,
            },
            PredictorRole::Factor => Term::Factor {
                predictor: name.to_string(),
            },
            PredictorRole::Linear => Term::Linear {
                predictor: name.to_string(),
            },
        }
    }

    /// The predictor the term is built from; `None` for random effects.
    pub fn predictor(&self) -> Option<&str> {
        match self {
            Term::Smooth { predictor, .. }
            | Term::Linear { predictor }
            | Term::Factor { predictor } => Some(predictor),
            Term::RandomEffect { .. } => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Term::Smooth {
                predictor,
                basis_size,
            } => format!("s({predictor}, k={basis_size})"),
            Term::Linear { predictor } => predictor.clone(),
            Term::Factor { predictor } => format!("factor({predictor})"),
            Term::RandomEffect { grouping } => format!("s({}, bs=re)", grouping_label(grouping)),
        }
    }
}

/// A specific predictor subset plus the mandatory terms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateModel {
    /// Position in enumeration order; used to break ranking ties.
    pub index: usize,
    /// Deterministic unique name derived from the enumerated predictors.
    pub name: String,
    /// The enumerated predictors, in canonical order. Mandatory predictors are not listed.
    pub predictors: Vec<String>,
    /// Every term of the model, enumerated terms first.
    pub terms: Vec<Term>,
}

/// Name of the candidate containing only the mandatory terms.
pub const NULL_MODEL_NAME: &str = "null";

/// Joins predictor names into a candidate name.
pub const NAME_SEPARATOR: char = '+';

impl CandidateModel {
    pub fn name_for(predictors: &[String]) -> String {
        if predictors.is_empty() {
            NULL_MODEL_NAME.to_string()
        } else {
            predictors.join(&NAME_SEPARATOR.to_string())
        }
    }

    /// Whether a predictor name keeps candidate names unique. Names must be non-empty,
    /// must not contain the separator and must not equal the null model's name.
    pub fn is_usable_predictor_name(name: &str) -> bool {
        !name.is_empty() && name != NULL_MODEL_NAME && !name.contains(NAME_SEPARATOR)
    }

    pub fn contains(&self, predictor: &str) -> bool {
        self.predictors.iter().any(|p| p == predictor)
    }

    pub fn is_null(&self) -> bool {
        self.predictors.is_empty()
    }

    /// A human-readable model formula.
    pub fn formula(&self, response: &str) -> String {
        let rhs: Vec<String> = self.terms.iter().map(Term::label).collect();
        if rhs.is_empty() {
            format!("{response} ~ 1")
        } else {
            format!("{response} ~ {}", rhs.join(" + "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formula_lists_every_term() {
        let model = CandidateModel {
            index: 3,
            name: CandidateModel::name_for(&["Depth".into(), "Status".into()]),
            predictors: vec!["Depth".into(), "Status".into()],
            terms: vec![
                Term::for_predictor("Depth", PredictorRole::Continuous, 5),
                Term::for_predictor("Status", PredictorRole::Factor, 5),
                Term::RandomEffect {
                    grouping: vec!["Location".into(), "Site".into()],
                },
            ],
        };
        assert_eq!(model.name, "Depth+Status");
        assert_eq!(
            model.formula("Abundance"),
            "Abundance ~ s(Depth, k=5) + factor(Status) + s(Location:Site, bs=re)"
        );
        assert!(model.contains("Status"));
        assert!(!model.is_null());
        assert_eq!(CandidateModel::name_for(&[]), NULL_MODEL_NAME);
    }

    #[test]
    fn names_that_would_collide_are_unusable() {
        assert!(CandidateModel::is_usable_predictor_name("sqrt.Relief"));
        assert!(!CandidateModel::is_usable_predictor_name("a+b"));
        assert!(!CandidateModel::is_usable_predictor_name(NULL_MODEL_NAME));
        assert!(!CandidateModel::is_usable_predictor_name(""));
    }
}
