//! # Ranking and Variable Importance
//!
//! Orders the successful fits of one taxon by AICc and derives delta-AICc, Akaike
//! weights and cumulative weights. The same is done for BIC, which is reported next to
//! AICc but never drives the ordering.
//!
//! Variable importance for a predictor is the sum of the weights of the models that
//! contain it.

use crate::estimate::FittedModel;
use serde::Serialize;
use std::collections::BTreeMap;

/// The part of a fitted model that ranking needs.
#[derive(Debug, Clone)]
pub struct ModelScore {
    pub name: String,
    pub index: usize,
    pub predictors: Vec<String>,
    pub aicc: f64,
    pub bic: f64,
    pub log_likelihood: f64,
    pub r_squared: f64,
    pub edf: f64,
    pub tweedie_power: f64,
}

impl From<&FittedModel> for ModelScore {
    fn from(model: &FittedModel) -> Self {
        Self {
            name: model.name.clone(),
            index: model.index,
            predictors: model.predictors.clone(),
            aicc: model.aicc,
            bic: model.bic,
            log_likelihood: model.log_likelihood,
            r_squared: model.r_squared,
            edf: model.edf,
            tweedie_power: model.tweedie_power,
        }
    }
}

/// One row of the ranking table.
#[derive(Debug, Clone, Serialize)]
pub struct RankingRow {
    pub modname: String,
    pub predictors: String,
    #[serde(rename = "AICc")]
    pub aicc: f64,
    #[serde(rename = "delta.AICc")]
    pub delta_aicc: f64,
    #[serde(rename = "wi.AICc")]
    pub wi_aicc: f64,
    #[serde(rename = "cumulative.wi.AICc")]
    pub cumulative_wi_aicc: f64,
    #[serde(rename = "BIC")]
    pub bic: f64,
    #[serde(rename = "delta.BIC")]
    pub delta_bic: f64,
    #[serde(rename = "wi.BIC")]
    pub wi_bic: f64,
    pub r2: f64,
    pub edf: f64,
    pub log_lik: f64,
    pub tweedie_power: f64,
    #[serde(skip)]
    pub predictor_list: Vec<String>,
    #[serde(skip)]
    pub enumeration_index: usize,
}

/// Per-predictor importance under both criteria.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableImportance {
    pub aicc: BTreeMap<String, f64>,
    pub bic: BTreeMap<String, f64>,
}

/// A taxon's ranking, sorted by ascending AICc.
#[derive(Debug, Clone, Default)]
pub struct RankingTable {
    rows: Vec<RankingRow>,
}

/// Normalized `exp(-delta / 2)` weights.
pub fn akaike_weights(deltas: &[f64]) -> Vec<f64> {
    let raw: Vec<f64> = deltas.iter().map(|d| (-0.5 * d).exp()).collect();
    let total: f64 = raw.iter().sum();
    raw.iter().map(|r| r / total).collect()
}

impl RankingTable {
    /// Ranks the given scores. Ties in AICc keep enumeration order.
    pub fn from_scores(mut scores: Vec<ModelScore>) -> Self {
        scores.sort_by(|a, b| a.aicc.total_cmp(&b.aicc).then(a.index.cmp(&b.index)));
        if scores.is_empty() {
            return Self::default();
        }

        let min_aicc = scores[0].aicc;
        let min_bic = scores.iter().map(|s| s.bic).fold(f64::INFINITY, f64::min);
        let delta_aicc: Vec<f64> = scores.iter().map(|s| s.aicc - min_aicc).collect();
        let delta_bic: Vec<f64> = scores.iter().map(|s| s.bic - min_bic).collect();
        let wi_aicc = akaike_weights(&delta_aicc);
        let wi_bic = akaike_weights(&delta_bic);

        let mut cumulative = 0.0;
        let rows = scores
            .into_iter()
            .enumerate()
            .map(|(i, s)| {
                cumulative += wi_aicc[i];
                RankingRow {
                    modname: s.name,
                    predictors: s.predictors.join(" "),
                    aicc: s.aicc,
                    delta_aicc: delta_aicc[i],
                    wi_aicc: wi_aicc[i],
                    cumulative_wi_aicc: cumulative,
                    bic: s.bic,
                    delta_bic: delta_bic[i],
                    wi_bic: wi_bic[i],
                    r2: s.r_squared,
                    edf: s.edf,
                    log_lik: s.log_likelihood,
                    tweedie_power: s.tweedie_power,
                    predictor_list: s.predictors,
                    enumeration_index: s.index,
                }
            })
            .collect();
        Self { rows }
    }

    pub fn from_models(models: &[&FittedModel]) -> Self {
        Self::from_scores(models.iter().map(|m| ModelScore::from(*m)).collect())
    }

    pub fn rows(&self) -> &[RankingRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn best(&self) -> Option<&RankingRow> {
        self.rows.first()
    }

    /// Models within `threshold` AICc units of the best.
    pub fn parsimonious(&self, threshold: f64) -> Vec<&RankingRow> {
        self.rows
            .iter()
            .take_while(|r| r.delta_aicc <= threshold)
            .collect()
    }

    /// Importance of every predictor in `universe`; predictors no ranked model
    /// contains get zero.
    pub fn variable_importance(&self, universe: &[String]) -> VariableImportance {
        let mut importance = VariableImportance {
            aicc: universe.iter().map(|p| (p.clone(), 0.0)).collect(),
            bic: universe.iter().map(|p| (p.clone(), 0.0)).collect(),
        };
        for row in &self.rows {
            for predictor in &row.predictor_list {
                if let Some(v) = importance.aicc.get_mut(predictor) {
                    *v += row.wi_aicc;
                }
                if let Some(v) = importance.bic.get_mut(predictor) {
                    *v += row.wi_bic;
                }
            }
        }
        importance
    }
}
