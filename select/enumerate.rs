//! # Predictor-Set Enumeration
//!
//! Generates every admissible candidate model for one taxon. A subset of the predictor
//! universe is admissible when its size does not exceed the configured ceiling and no
//! two numeric predictors in it (or in it together with a mandatory predictor) are
//! correlated beyond the cutoff in that taxon's data. Correlation is a hard exclusion.
//!
//! Enumeration is a pure function of its inputs. Subsets are produced by increasing
//! size and, within a size, in lexicographic order of positions in the canonical
//! universe (continuous, factors, linear-only), so two runs on the same inputs yield the
//! same candidates with the same names in the same order.

use crate::config::{ConfigError, PredictorRole, SelectionConfig};
use crate::correlation::CorrelationMatrix;
use crate::terms::{CandidateModel, Term};
use itertools::Itertools;

/// The candidate predictor universe, partitioned by role, plus the mandatory terms.
#[derive(Debug, Clone)]
pub struct PredictorSpec {
    pub continuous: Vec<String>,
    pub factors: Vec<String>,
    pub linear: Vec<String>,
    /// Terms present in every candidate (random effects and always-included predictors).
    pub fixed_terms: Vec<Term>,
    pub basis_size: usize,
}

impl PredictorSpec {
    pub fn from_config(config: &SelectionConfig) -> Self {
        let fixed_names = &config.always_include;
        let without_fixed = |names: &[String]| -> Vec<String> {
            names
                .iter()
                .filter(|n| !fixed_names.contains(n))
                .cloned()
                .collect()
        };

        let mut fixed_terms: Vec<Term> = fixed_names
            .iter()
            .filter_map(|name| {
                config
                    .role_of(name)
                    .map(|role| Term::for_predictor(name, role, config.basis_size))
            })
            .collect();
        fixed_terms.extend(config.random_effects.iter().map(|keys| Term::RandomEffect {
            grouping: keys.clone(),
        }));

        Self {
            continuous: without_fixed(&config.continuous),
            factors: without_fixed(&config.factors),
            linear: without_fixed(&config.linear),
            fixed_terms,
            basis_size: config.basis_size,
        }
    }

    /// Enumerated predictors in canonical order.
    pub fn universe(&self) -> Vec<(String, PredictorRole)> {
        let tag = |names: &[String], role: PredictorRole| -> Vec<(String, PredictorRole)> {
            names.iter().map(|n| (n.clone(), role)).collect()
        };
        let mut out = tag(&self.continuous, PredictorRole::Continuous);
        out.extend(tag(&self.factors, PredictorRole::Factor));
        out.extend(tag(&self.linear, PredictorRole::Linear));
        out
    }

    /// Predictor names of the mandatory terms.
    fn fixed_predictors(&self) -> Vec<&str> {
        self.fixed_terms.iter().filter_map(Term::predictor).collect()
    }
}

/// Limits applied while enumerating.
#[derive(Debug, Clone, Copy)]
pub struct EnumerationPolicy {
    pub max_predictors: usize,
    pub correlation_cutoff: f64,
    pub max_models: usize,
    pub include_null: bool,
}

impl EnumerationPolicy {
    pub fn from_config(config: &SelectionConfig) -> Self {
        Self {
            max_predictors: config.max_predictors,
            correlation_cutoff: config.correlation_cutoff,
            max_models: config.max_models,
            include_null: config.include_null_model,
        }
    }
}

/// Produces all admissible candidate models, or `ConfigError::TooManyModels` when
/// their number exceeds the cap. No candidates are returned in the error case.
/// Predictor names that would make two candidate names equal are rejected.
pub fn enumerate_candidates(
    spec: &PredictorSpec,
    policy: &EnumerationPolicy,
    correlations: &CorrelationMatrix,
) -> Result<Vec<CandidateModel>, ConfigError> {
    let universe = spec.universe();
    if let Some((name, _)) = universe
        .iter()
        .find(|(name, _)| !CandidateModel::is_usable_predictor_name(name))
    {
        return Err(ConfigError::UnusablePredictorName(name.clone()));
    }
    let fixed = spec.fixed_predictors();
    let max_size = policy.max_predictors.min(universe.len());

    let admissible = |subset: &[&(String, PredictorRole)]| -> bool {
        for (a, b) in subset.iter().tuple_combinations() {
            if correlations.exceeds(&a.0, &b.0, policy.correlation_cutoff) {
                return false;
            }
        }
        subset.iter().all(|(name, _)| {
            fixed
                .iter()
                .all(|f| !correlations.exceeds(name, f, policy.correlation_cutoff))
        })
    };

    let admissible = &admissible;
    let roles = &universe;
    let admissible_subsets = || {
        let null = policy.include_null.then(Vec::new);
        null.into_iter().chain((1..=max_size).flat_map(move |size| {
            roles
                .iter()
                .combinations(size)
                .filter(move |subset| admissible(subset))
        }))
    };

    // Counted before any candidate is materialized.
    let count = admissible_subsets().count();
    if count > policy.max_models {
        return Err(ConfigError::TooManyModels {
            count,
            cap: policy.max_models,
        });
    }

    let candidates = admissible_subsets()
        .enumerate()
        .map(|(index, subset)| {
            let predictors: Vec<String> = subset.iter().map(|(n, _)| n.clone()).collect();
            let mut terms: Vec<Term> = subset
                .iter()
                .map(|(n, role)| Term::for_predictor(n, *role, spec.basis_size))
                .collect();
            terms.extend(spec.fixed_terms.iter().cloned());
            CandidateModel {
                index,
                name: CandidateModel::name_for(&predictors),
                predictors,
                terms,
            }
        })
        .collect::<Vec<_>>();

    log::debug!(
        "Enumerated {} candidate models from {} predictors (max size {}).",
        candidates.len(),
        universe.len(),
        max_size
    );
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;
    use std::collections::HashSet;

    fn spec(continuous: &[&str], factors: &[&str]) -> PredictorSpec {
        PredictorSpec {
            continuous: continuous.iter().map(|s| s.to_string()).collect(),
            factors: factors.iter().map(|s| s.to_string()).collect(),
            linear: Vec::new(),
            fixed_terms: vec![Term::RandomEffect {
                grouping: vec!["Site".into()],
            }],
            basis_size: 5,
        }
    }

    fn policy(max_predictors: usize, max_models: usize, include_null: bool) -> EnumerationPolicy {
        EnumerationPolicy {
            max_predictors,
            correlation_cutoff: 0.95,
            max_models,
            include_null,
        }
    }

    /// Columns whose pairwise correlations are small.
    fn weakly_correlated(names: &[&str]) -> CorrelationMatrix {
        let base = [
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            vec![2.0, 1.0, 4.0, 3.0, 6.0, 5.0],
            vec![6.0, 1.0, 5.0, 2.0, 4.0, 3.0],
        ];
        let columns: Vec<Array1<f64>> = base.iter().map(|v| Array1::from_vec(v.clone())).collect();
        let views: Vec<_> = columns.iter().take(names.len()).map(|c| c.view()).collect();
        CorrelationMatrix::from_columns(names.iter().map(|s| s.to_string()).collect(), &views)
    }

    #[test]
    fn counts_all_subsets_up_to_the_ceiling() {
        let s = spec(&["a", "b", "c"], &["f"]);
        let corr = weakly_correlated(&["a", "b", "c"]);
        let without_null = enumerate_candidates(&s, &policy(2, 100, false), &corr).unwrap();
        assert_eq!(without_null.len(), 4 + 6);
        assert!(without_null.iter().all(|c| c.predictors.len() <= 2 && !c.is_null()));

        let with_null = enumerate_candidates(&s, &policy(2, 100, true), &corr).unwrap();
        assert_eq!(with_null.len(), 11);
        assert_eq!(with_null[0].name, "null");
        assert_eq!(with_null[1].name, "a");
        assert_eq!(with_null[10].name, "c+f");

        let names: HashSet<&str> = with_null.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names.len(), with_null.len());
        for (i, c) in with_null.iter().enumerate() {
            assert_eq!(c.index, i);
            assert!(c.terms.contains(&Term::RandomEffect {
                grouping: vec!["Site".into()]
            }));
        }
    }

    #[test]
    fn enumeration_is_deterministic() {
        let s = spec(&["a", "b", "c"], &["f"]);
        let corr = weakly_correlated(&["a", "b", "c"]);
        let first = enumerate_candidates(&s, &policy(3, 100, true), &corr).unwrap();
        let second = enumerate_candidates(&s, &policy(3, 100, true), &corr).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn collinear_predictors_never_share_a_model() {
        let a = Array1::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = a.mapv(|v| 2.0 * v + 1.0);
        let c = Array1::from_vec(vec![2.0, 1.0, 4.0, 3.0, 6.0, 5.0]);
        let corr = CorrelationMatrix::from_columns(
            vec!["a".into(), "b".into(), "c".into()],
            &[a.view(), b.view(), c.view()],
        );
        let s = spec(&["a", "b", "c"], &["f"]);
        let candidates = enumerate_candidates(&s, &policy(3, 100, false), &corr).unwrap();
        assert!(candidates.iter().all(|m| !(m.contains("a") && m.contains("b"))));
        // {a,b} and its supersets are gone: 4 singles + 5 pairs + 2 triples.
        assert_eq!(candidates.len(), 4 + 5 + 2);
    }

    #[test]
    fn exceeding_the_cap_is_a_configuration_error() {
        let s = spec(&["a", "b", "c"], &["f"]);
        let corr = weakly_correlated(&["a", "b", "c"]);
        match enumerate_candidates(&s, &policy(2, 10, true), &corr).unwrap_err() {
            ConfigError::TooManyModels { count, cap } => {
                assert_eq!(count, 11);
                assert_eq!(cap, 10);
            }
            other => panic!("Expected TooManyModels, got {other:?}"),
        }
    }

    #[test]
    fn subsets_correlated_with_a_mandatory_predictor_are_excluded() {
        let a = Array1::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = a.mapv(|v| -v);
        let corr =
            CorrelationMatrix::from_columns(vec!["a".into(), "b".into()], &[a.view(), b.view()]);
        let mut s = spec(&["a"], &["f"]);
        s.fixed_terms.push(Term::Smooth {
            predictor: "b".into(),
            basis_size: 5,
        });
        let candidates = enumerate_candidates(&s, &policy(2, 100, true), &corr).unwrap();
        let names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["null", "f"]);
    }

    #[test]
    fn predictor_names_that_collide_with_candidate_names_are_rejected() {
        let corr = weakly_correlated(&["a", "b", "a+b"]);
        let joined = spec(&["a", "b", "a+b"], &[]);
        match enumerate_candidates(&joined, &policy(2, 100, true), &corr).unwrap_err() {
            ConfigError::UnusablePredictorName(name) => assert_eq!(name, "a+b"),
            other => panic!("Expected UnusablePredictorName, got {other:?}"),
        }

        let null_factor = spec(&["a", "b"], &["null"]);
        match enumerate_candidates(&null_factor, &policy(2, 100, true), &corr).unwrap_err() {
            ConfigError::UnusablePredictorName(name) => assert_eq!(name, "null"),
            other => panic!("Expected UnusablePredictorName, got {other:?}"),
        }
    }

    #[test]
    fn cap_is_checked_over_a_wide_universe() {
        let names: Vec<String> = (0..16).map(|i| format!("x{i}")).collect();
        let s = PredictorSpec {
            continuous: names,
            factors: Vec::new(),
            linear: Vec::new(),
            fixed_terms: Vec::new(),
            basis_size: 5,
        };
        // No correlations are known, so every subset is admissible.
        let corr = CorrelationMatrix::from_columns(Vec::new(), &[]);
        match enumerate_candidates(&s, &policy(16, 1000, false), &corr).unwrap_err() {
            ConfigError::TooManyModels { count, cap } => {
                assert_eq!(count, (1 << 16) - 1);
                assert_eq!(cap, 1000);
            }
            other => panic!("Expected TooManyModels, got {other:?}"),
        }
    }
}
