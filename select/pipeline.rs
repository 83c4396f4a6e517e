//! # Selection Pipeline
//!
//! Runs full-subsets selection for every taxon in two phases.
//!
//! 1.  **Plan:** each taxon is subset, its predictor correlations computed and its
//!     candidates enumerated. A candidate count over the cap for any taxon stops the run
//!     here, before a single model is fitted. Taxa whose data cannot be used are skipped
//!     with a warning.
//!
//! 2.  **Fit:** taxa are processed one after another. Within a taxon the candidate set is
//!     fitted in parallel, ranked, and summarized into importance and partial effects.
//!
//! Results are gathered into a map keyed by taxon; no state crosses from one taxon to
//! the next.

use crate::config::{ConfigError, SelectionConfig};
use crate::correlation::CorrelationMatrix;
use crate::data::{DataError, SurveyData, TaxonData};
use crate::enumerate::{EnumerationPolicy, PredictorSpec, enumerate_candidates};
use crate::estimate::{EstimationError, FailedModel, FitOptions, ModelSetFits, fit_model_set};
use crate::predict::{PartialEffectRow, partial_effects};
use crate::rank::{RankingRow, RankingTable, VariableImportance};
use crate::report::{self, ReportError};
use crate::terms::CandidateModel;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors that stop a selection run.
#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Candidate enumeration for taxon '{taxon}' failed: {source}")]
    CandidateCap {
        taxon: String,
        #[source]
        source: ConfigError,
    },

    #[error("Model fitting failed: {0}")]
    Estimation(#[from] EstimationError),

    #[error("Failed to write outputs: {0}")]
    Report(#[from] ReportError),
}

/// Everything prepared for one taxon before fitting.
#[derive(Debug, Clone)]
pub struct TaxonPlan {
    pub data: TaxonData,
    pub correlations: CorrelationMatrix,
    pub candidates: Vec<CandidateModel>,
}

/// The plan of a whole run.
#[derive(Debug, Clone, Default)]
pub struct SelectionPlan {
    pub taxa: BTreeMap<String, TaxonPlan>,
    /// Taxa left out for data reasons, with the reason.
    pub skipped: BTreeMap<String, String>,
}

/// The complete result for one taxon.
#[derive(Debug, Clone)]
pub struct TaxonSelection {
    pub taxon: String,
    pub observations: usize,
    pub correlations: CorrelationMatrix,
    pub candidates: Vec<CandidateModel>,
    pub fits: ModelSetFits,
    pub ranking: RankingTable,
    pub importance: VariableImportance,
    pub failures: Vec<FailedModel>,
    pub partial_effects: Vec<PartialEffectRow>,
}

impl TaxonSelection {
    pub fn parsimonious(&self, threshold: f64) -> Vec<&RankingRow> {
        self.ranking.parsimonious(threshold)
    }
}

#[derive(Debug, Clone)]
pub enum TaxonOutcome {
    Completed(Box<TaxonSelection>),
    Skipped { reason: String },
}

/// The outcome of a run across all taxa.
#[derive(Debug, Clone)]
pub struct SelectionReport {
    /// Enumerated predictors, in canonical order.
    pub universe: Vec<String>,
    pub delta_threshold: f64,
    pub taxa: BTreeMap<String, TaxonOutcome>,
}

impl SelectionReport {
    pub fn completed(&self) -> impl Iterator<Item = &TaxonSelection> {
        self.taxa.values().filter_map(|o| match o {
            TaxonOutcome::Completed(selection) => Some(selection.as_ref()),
            TaxonOutcome::Skipped { .. } => None,
        })
    }

    /// AICc-weight importance, taxa as rows. Skipped taxa have no row.
    pub fn importance_matrix(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        self.completed()
            .map(|s| (s.taxon.clone(), s.importance.aicc.clone()))
            .collect()
    }

    pub fn bic_importance_matrix(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        self.completed()
            .map(|s| (s.taxon.clone(), s.importance.bic.clone()))
            .collect()
    }

    /// The parsimonious set of each completed taxon.
    pub fn best_models(&self) -> BTreeMap<String, Vec<RankingRow>> {
        self.completed()
            .map(|s| {
                let rows = s
                    .parsimonious(self.delta_threshold)
                    .into_iter()
                    .cloned()
                    .collect();
                (s.taxon.clone(), rows)
            })
            .collect()
    }
}

/// Phase one: subsets, correlations and candidate sets for every taxon.
pub fn plan_selection(
    data: &SurveyData,
    config: &SelectionConfig,
) -> Result<SelectionPlan, SelectionError> {
    let taxa = match &config.taxa {
        Some(taxa) => taxa.clone(),
        None => data.taxa(),
    };
    let spec = PredictorSpec::from_config(config);
    let policy = EnumerationPolicy::from_config(config);
    let numeric = config.numeric_predictors();

    let mut plan = SelectionPlan::default();
    for taxon in taxa {
        let subset = match data.subset_for_taxon(&taxon, config) {
            Ok(subset) => subset,
            Err(e) => {
                log::warn!("Skipping taxon '{taxon}': {e}");
                plan.skipped.insert(taxon, e.to_string());
                continue;
            }
        };
        let correlations = CorrelationMatrix::for_taxon(&subset, &numeric);
        let candidates = enumerate_candidates(&spec, &policy, &correlations).map_err(|source| {
            SelectionError::CandidateCap {
                taxon: taxon.clone(),
                source,
            }
        })?;
        log::info!(
            "Taxon '{taxon}': {} observations, {} candidate models.",
            subset.num_rows(),
            candidates.len()
        );
        plan.taxa.insert(
            taxon,
            TaxonPlan {
                data: subset,
                correlations,
                candidates,
            },
        );
    }
    Ok(plan)
}

/// Phase two: fits, ranks and summarizes every planned taxon.
pub fn execute_plan(
    plan: SelectionPlan,
    config: &SelectionConfig,
) -> Result<SelectionReport, SelectionError> {
    let universe: Vec<String> = config
        .predictor_universe()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    let options = FitOptions {
        parallel: config.parallel,
        workers: config.workers,
        show_progress: config.show_progress,
        settings: config.fit.clone(),
        tweedie_power: config.tweedie_power,
    };

    let mut taxa: BTreeMap<String, TaxonOutcome> = plan
        .skipped
        .into_iter()
        .map(|(taxon, reason)| (taxon, TaxonOutcome::Skipped { reason }))
        .collect();

    for (taxon, taxon_plan) in plan.taxa {
        let selection = select_for_taxon(taxon_plan, &universe, &options, config)?;
        taxa.insert(taxon, TaxonOutcome::Completed(Box::new(selection)));
    }

    Ok(SelectionReport {
        universe,
        delta_threshold: config.delta_threshold,
        taxa,
    })
}

fn select_for_taxon(
    plan: TaxonPlan,
    universe: &[String],
    options: &FitOptions,
    config: &SelectionConfig,
) -> Result<TaxonSelection, SelectionError> {
    let TaxonPlan {
        data,
        correlations,
        candidates,
    } = plan;
    let fits = fit_model_set(&candidates, &data, options)?;
    let successes = fits.successes();
    let failures = fits.failures();

    if successes.is_empty() {
        log::warn!(
            "Every candidate model failed for taxon '{}'; its ranking is empty and importance is zero.",
            data.taxon
        );
    }

    let ranking = RankingTable::from_models(&successes);
    let importance = ranking.variable_importance(universe);

    let retained: Vec<_> = ranking
        .parsimonious(config.delta_threshold)
        .iter()
        .filter_map(|row| fits.get(&row.modname))
        .filter_map(|fit| fit.outcome.as_ref().ok())
        .collect();
    let effects = match partial_effects(&retained, &data, config.prediction_grid_size) {
        Ok(rows) => rows,
        Err(e) => {
            log::warn!("Partial effects for taxon '{}' could not be computed: {e}", data.taxon);
            Vec::new()
        }
    };

    if let Some(best) = ranking.best() {
        log::info!(
            "Taxon '{}': best model '{}' (AICc {:.2}, weight {:.3}).",
            data.taxon,
            best.modname,
            best.aicc,
            best.wi_aicc
        );
    }

    Ok(TaxonSelection {
        taxon: data.taxon.clone(),
        observations: data.num_rows(),
        correlations,
        candidates,
        fits,
        ranking,
        importance,
        failures,
        partial_effects: effects,
    })
}

/// Both phases.
pub fn run_selection(
    data: &SurveyData,
    config: &SelectionConfig,
) -> Result<SelectionReport, SelectionError> {
    let plan = plan_selection(data, config)?;
    execute_plan(plan, config)
}

/// Writes every per-taxon and cross-taxon table into `out_dir`.
pub fn write_outputs(report: &SelectionReport, out_dir: &Path) -> Result<(), ReportError> {
    report::ensure_dir(out_dir)?;
    let stems = report::file_stems(report.completed().map(|s| s.taxon.as_str()));
    for selection in report.completed() {
        let taxon = &stems[&selection.taxon];
        report::write_ranking(
            &report::taxon_file(out_dir, taxon, "all_mod_fits"),
            &selection.ranking,
        )?;
        report::write_failures(
            &report::taxon_file(out_dir, taxon, "failed_models"),
            &selection.failures,
        )?;
        report::write_correlations(
            &report::taxon_file(out_dir, taxon, "predictor_correlations"),
            &selection.correlations,
        )?;
        report::write_partial_effects(
            &report::taxon_file(out_dir, taxon, "top_model_predictions"),
            &selection.partial_effects,
        )?;
    }
    report::write_importance(
        &out_dir.join("all_var_imp.csv"),
        &report.universe,
        &report.importance_matrix(),
    )?;
    report::write_importance(
        &out_dir.join("all_var_imp_bic.csv"),
        &report.universe,
        &report.bic_importance_matrix(),
    )?;
    report::write_best_models(&out_dir.join("all_best_models.csv"), &report.best_models())?;
    log::info!("Wrote selection outputs to '{}'.", out_dir.display());
    Ok(())
}
