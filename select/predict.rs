//! Partial-effect predictions for the retained models of a taxon.
//!
//! Each predictor of a model is varied over a grid while the others are held at their
//! mean (numeric) or most frequent level (factor). Random effects are left out, so the
//! curves are population-level. Curves from several models are averaged point by point.

use crate::data::TaxonData;
use crate::design::{NewData, TermBasis};
use crate::estimate::{FitError, FittedModel};
use ndarray::{Array1, Axis};
use serde::Serialize;
use std::collections::BTreeMap;

/// One prediction of one model at one grid point, on the response scale.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectPoint {
    pub predictor: String,
    pub grid_index: usize,
    pub value: String,
    pub numeric_value: Option<f64>,
    pub fit: f64,
    pub se: f64,
}

/// Predictions averaged over the models that contain the predictor.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PartialEffectRow {
    pub predictor: String,
    pub value: String,
    #[serde(skip)]
    pub numeric_value: Option<f64>,
    pub fit: f64,
    pub se: f64,
    pub models: usize,
}

enum Grid {
    Numeric(Array1<f64>),
    Levels(Vec<String>),
}

/// Partial effects of every predictor in every given model, aggregated across models.
pub fn partial_effects(
    models: &[&FittedModel],
    data: &TaxonData,
    grid_size: usize,
) -> Result<Vec<PartialEffectRow>, FitError> {
    let mut points = Vec::new();
    for model in models {
        points.extend(model_effects(model, data, grid_size)?);
    }
    Ok(aggregate(points))
}

fn model_effects(
    model: &FittedModel,
    data: &TaxonData,
    grid_size: usize,
) -> Result<Vec<EffectPoint>, FitError> {
    let mut points = Vec::new();
    for focal in model.recipe.blocks.iter().filter(|b| b.predictor.is_some()) {
        let name = focal.predictor.clone().unwrap_or_default();
        let grid = match &focal.basis {
            TermBasis::Factor { levels } => Grid::Levels(levels.clone()),
            _ => {
                let values = data
                    .numeric(&name)
                    .ok_or_else(|| FitError::MissingColumn(name.clone()))?;
                let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                Grid::Numeric(Array1::linspace(lo, hi, grid_size))
            }
        };
        let rows = match &grid {
            Grid::Numeric(g) => g.len(),
            Grid::Levels(l) => l.len(),
        };

        let mut newdata = NewData {
            rows,
            ..NewData::default()
        };
        for block in &model.recipe.blocks {
            let Some(other) = &block.predictor else {
                continue;
            };
            match (&block.basis, other == &name, &grid) {
                (TermBasis::Factor { .. }, true, Grid::Levels(levels)) => {
                    newdata.levels.insert(other.clone(), levels.clone());
                }
                (TermBasis::Factor { levels }, _, _) => {
                    let held = data
                        .factor(other)
                        .and_then(|f| f.most_frequent_level())
                        .or(levels.first().map(String::as_str))
                        .unwrap_or_default()
                        .to_string();
                    newdata.levels.insert(other.clone(), vec![held; rows]);
                }
                (_, true, Grid::Numeric(g)) => {
                    newdata.numeric.insert(other.clone(), g.clone());
                }
                _ => {
                    let mean = data
                        .numeric(other)
                        .and_then(|v| v.mean())
                        .ok_or_else(|| FitError::MissingColumn(other.clone()))?;
                    newdata.numeric.insert(other.clone(), Array1::from_elem(rows, mean));
                }
            }
        }

        let x = model.recipe.predict_matrix(&newdata)?;
        let eta = x.dot(&model.coefficients);
        // Delta method: se(mu) = mu * sqrt(x' Vb x).
        let var_eta = (&x.dot(&model.covariance) * &x).sum_axis(Axis(1));
        for (i, (&e, &v)) in eta.iter().zip(var_eta.iter()).enumerate() {
            let fit = e.exp();
            let (value, numeric_value) = match &grid {
                Grid::Numeric(g) => (format!("{}", g[i]), Some(g[i])),
                Grid::Levels(l) => (l[i].clone(), None),
            };
            points.push(EffectPoint {
                predictor: name.clone(),
                grid_index: i,
                value,
                numeric_value,
                fit,
                se: fit * v.max(0.0).sqrt(),
            });
        }
    }
    Ok(points)
}

/// Groups points by (predictor, grid position) and averages fit and standard error.
pub fn aggregate(points: Vec<EffectPoint>) -> Vec<PartialEffectRow> {
    let mut groups: BTreeMap<(String, usize), (PartialEffectRow, f64, f64)> = BTreeMap::new();
    for p in points {
        let entry = groups
            .entry((p.predictor.clone(), p.grid_index))
            .or_insert_with(|| {
                (
                    PartialEffectRow {
                        predictor: p.predictor.clone(),
                        value: p.value.clone(),
                        numeric_value: p.numeric_value,
                        fit: 0.0,
                        se: 0.0,
                        models: 0,
                    },
                    0.0,
                    0.0,
                )
            });
        entry.0.models += 1;
        entry.1 += p.fit;
        entry.2 += p.se;
    }
    groups
        .into_values()
        .map(|(mut row, fit_sum, se_sum)| {
            row.fit = fit_sum / row.models as f64;
            row.se = se_sum / row.models as f64;
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn point(predictor: &str, grid_index: usize, fit: f64, se: f64) -> EffectPoint {
        EffectPoint {
            predictor: predictor.to_string(),
            grid_index,
            value: format!("{grid_index}"),
            numeric_value: Some(grid_index as f64),
            fit,
            se,
        }
    }

    #[test]
    fn aggregation_averages_by_predictor_and_grid_point() {
        let rows = aggregate(vec![
            point("depth", 0, 1.0, 0.2),
            point("depth", 1, 2.0, 0.4),
            point("depth", 0, 3.0, 0.6),
            point("slope", 0, 5.0, 1.0),
        ]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].predictor, "depth");
        assert_eq!(rows[0].models, 2);
        assert_relative_eq!(rows[0].fit, 2.0);
        assert_relative_eq!(rows[0].se, 0.4);
        assert_eq!(rows[1].models, 1);
        assert_relative_eq!(rows[1].fit, 2.0);
        assert_eq!(rows[2].predictor, "slope");
        assert_relative_eq!(rows[2].fit, 5.0);
    }

    #[test]
    fn aggregating_nothing_is_empty() {
        assert!(aggregate(Vec::new()).is_empty());
    }
}
