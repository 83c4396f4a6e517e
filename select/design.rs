//! # Design Construction
//!
//! Turns a `CandidateModel` and one taxon's data into the matrices the fitter works
//! with: a dense design matrix `X` whose first column is the intercept, one block of
//! columns per term, and one penalty matrix per penalized block.
//!
//! | Term          | Columns                         | Penalty                      |
//! |---------------|---------------------------------|------------------------------|
//! | Smooth        | constrained B-spline, `k - 1`   | second-order difference      |
//! | Linear        | the predictor itself            | none                         |
//! | Factor        | treatment dummies, `levels - 1` | none                         |
//! | RandomEffect  | one indicator per level         | identity (ridge)             |
//!
//! Each penalty is rescaled so its Frobenius norm matches that of its block's `X'X`.
//! Smoothing parameters then start on a comparable scale for every term.
//!
//! The `DesignRecipe` keeps what is needed to rebuild rows of `X` at new predictor
//! values, with random effects set to zero.

use crate::basis::{BasisError, SmoothBasis};
use crate::data::{FactorColumn, TaxonData, grouping_label};
use crate::estimate::FitError;
use crate::terms::{CandidateModel, Term};
use ndarray::{Array1, Array2, ArrayView1, s};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Range;

/// How the columns of one block are produced.
#[derive(Debug, Clone, Serialize)]
pub enum TermBasis {
    Intercept,
    Smooth { basis: SmoothBasis },
    Linear,
    Factor { levels: Vec<String> },
    RandomEffect { grouping: Vec<String>, levels: Vec<String> },
}

/// One term's slice of the coefficient vector.
#[derive(Debug, Clone, Serialize)]
pub struct TermBlock {
    pub label: String,
    /// The predictor the block is built from; `None` for intercept and random effects.
    pub predictor: Option<String>,
    pub columns: Range<usize>,
    /// Index into `ModelDesign::penalties` when the block is penalized.
    pub penalty: Option<usize>,
    pub basis: TermBasis,
}

/// A block-local penalty matrix.
#[derive(Debug, Clone)]
pub struct PenaltyBlock {
    pub columns: Range<usize>,
    pub matrix: Array2<f64>,
}

/// Column layout of a fitted model, sufficient for prediction.
#[derive(Debug, Clone, Serialize)]
pub struct DesignRecipe {
    pub blocks: Vec<TermBlock>,
    pub num_coeffs: usize,
}

#[derive(Debug, Clone)]
pub struct ModelDesign {
    pub x: Array2<f64>,
    pub recipe: DesignRecipe,
    pub penalties: Vec<PenaltyBlock>,
}

impl From<BasisError> for FitError {
    fn from(err: BasisError) -> Self {
        FitError::Basis(err.to_string())
    }
}

impl ModelDesign {
    pub fn build(candidate: &CandidateModel, data: &TaxonData) -> Result<Self, FitError> {
        let n = data.num_rows();
        let mut column_blocks: Vec<Array2<f64>> = vec![Array2::ones((n, 1))];
        let mut blocks = vec![TermBlock {
            label: "(Intercept)".to_string(),
            predictor: None,
            columns: 0..1,
            penalty: None,
            basis: TermBasis::Intercept,
        }];
        let mut penalties: Vec<PenaltyBlock> = Vec::new();
        let mut next_col = 1;

        for term in &candidate.terms {
            let (columns, penalty, basis) = match term {
                Term::Smooth {
                    predictor,
                    basis_size,
                } => {
                    let values = numeric_column(data, predictor)?;
                    if is_constant(values) {
                        return Err(FitError::DegeneratePredictor(predictor.clone()));
                    }
                    let (basis, columns, penalty) = SmoothBasis::build(values, *basis_size)?;
                    (columns, Some(penalty), TermBasis::Smooth { basis })
                }
                Term::Linear { predictor } => {
                    let values = numeric_column(data, predictor)?;
                    if is_constant(values) {
                        return Err(FitError::DegeneratePredictor(predictor.clone()));
                    }
                    let columns = values.to_owned().insert_axis(ndarray::Axis(1));
                    (columns, None, TermBasis::Linear)
                }
                Term::Factor { predictor } => {
                    let factor = data
                        .factor(predictor)
                        .ok_or_else(|| FitError::MissingColumn(predictor.clone()))?;
                    if factor.levels.len() < 2 {
                        return Err(FitError::DegeneratePredictor(predictor.clone()));
                    }
                    let columns = treatment_dummies(factor);
                    (
                        columns,
                        None,
                        TermBasis::Factor {
                            levels: factor.levels.clone(),
                        },
                    )
                }
                Term::RandomEffect { grouping } => {
                    let factor = data
                        .grouping(grouping)
                        .ok_or_else(|| FitError::MissingColumn(grouping_label(grouping)))?;
                    let columns = indicators(factor);
                    let penalty = Array2::eye(columns.ncols());
                    (
                        columns,
                        Some(penalty),
                        TermBasis::RandomEffect {
                            grouping: grouping.clone(),
                            levels: factor.levels.clone(),
                        },
                    )
                }
            };

            let width = columns.ncols();
            let range = next_col..next_col + width;
            let penalty_idx = penalty.map(|matrix| {
                penalties.push(PenaltyBlock {
                    columns: range.clone(),
                    matrix: scale_penalty(&columns, matrix),
                });
                penalties.len() - 1
            });
            blocks.push(TermBlock {
                label: term.label(),
                predictor: term.predictor().map(str::to_string),
                columns: range,
                penalty: penalty_idx,
                basis,
            });
            column_blocks.push(columns);
            next_col += width;
        }

        let num_coeffs = next_col;
        if num_coeffs >= n {
            return Err(FitError::RankDeficient {
                coeffs: num_coeffs,
                observations: n,
            });
        }

        let mut x = Array2::zeros((n, num_coeffs));
        for (block, columns) in blocks.iter().zip(&column_blocks) {
            x.slice_mut(s![.., block.columns.clone()]).assign(columns);
        }

        Ok(Self {
            x,
            recipe: DesignRecipe { blocks, num_coeffs },
            penalties,
        })
    }

    pub fn num_coeffs(&self) -> usize {
        self.recipe.num_coeffs
    }

    pub fn num_penalties(&self) -> usize {
        self.penalties.len()
    }

    /// The total penalty `S_lambda = sum_j lambda_j S_j`, embedded in a `p x p` matrix.
    pub fn penalty_matrix(&self, lambdas: &[f64]) -> Array2<f64> {
        let p = self.num_coeffs();
        let mut total = Array2::zeros((p, p));
        for (block, &lambda) in self.penalties.iter().zip(lambdas) {
            let r = block.columns.clone();
            let mut target = total.slice_mut(s![r.clone(), r]);
            target.scaled_add(lambda, &block.matrix);
        }
        total
    }
}

/// Predictor values at which to rebuild design rows.
#[derive(Debug, Clone, Default)]
pub struct NewData {
    pub rows: usize,
    pub numeric: BTreeMap<String, Array1<f64>>,
    pub levels: BTreeMap<String, Vec<String>>,
}

impl DesignRecipe {
    /// Rebuilds design rows for new data. Random-effect columns are zero, so
    /// predictions are population-level.
    pub fn predict_matrix(&self, newdata: &NewData) -> Result<Array2<f64>, FitError> {
        let mut x = Array2::zeros((newdata.rows, self.num_coeffs));
        for block in &self.blocks {
            let mut target = x.slice_mut(s![.., block.columns.clone()]);
            match &block.basis {
                TermBasis::Intercept => target.fill(1.0),
                TermBasis::Smooth { basis } => {
                    let values = new_numeric(newdata, block)?;
                    target.assign(&basis.evaluate(values.view()));
                }
                TermBasis::Linear => {
                    let values = new_numeric(newdata, block)?;
                    target.column_mut(0).assign(values);
                }
                TermBasis::Factor { levels } => {
                    let name = block.predictor.clone().unwrap_or_default();
                    let given = newdata
                        .levels
                        .get(&name)
                        .ok_or_else(|| FitError::MissingColumn(name.clone()))?;
                    for (row, level) in given.iter().enumerate() {
                        // The reference level and unseen levels have all-zero dummies.
                        if let Some(pos) = levels.iter().position(|l| l == level) {
                            if pos > 0 {
                                target[[row, pos - 1]] = 1.0;
                            }
                        }
                    }
                }
                TermBasis::RandomEffect { .. } => {}
            }
        }
        Ok(x)
    }
}

fn new_numeric<'a>(newdata: &'a NewData, block: &TermBlock) -> Result<&'a Array1<f64>, FitError> {
    let name = block.predictor.as_deref().unwrap_or_default();
    newdata
        .numeric
        .get(name)
        .ok_or_else(|| FitError::MissingColumn(name.to_string()))
}

fn numeric_column<'a>(data: &'a TaxonData, name: &str) -> Result<ArrayView1<'a, f64>, FitError> {
    data.numeric(name)
        .ok_or_else(|| FitError::MissingColumn(name.to_string()))
}

fn is_constant(values: ArrayView1<f64>) -> bool {
    let first = values.first().copied().unwrap_or(0.0);
    values.iter().all(|&v| (v - first).abs() <= 1e-12 * first.abs().max(1.0))
}

fn treatment_dummies(factor: &FactorColumn) -> Array2<f64> {
    let mut out = Array2::zeros((factor.codes.len(), factor.levels.len() - 1));
    for (row, &code) in factor.codes.iter().enumerate() {
        if code > 0 {
            out[[row, code - 1]] = 1.0;
        }
    }
    out
}

fn indicators(factor: &FactorColumn) -> Array2<f64> {
    let mut out = Array2::zeros((factor.codes.len(), factor.levels.len()));
    for (row, &code) in factor.codes.iter().enumerate() {
        out[[row, code]] = 1.0;
    }
    out
}

/// Rescales a penalty to the magnitude of its block's cross-product.
fn scale_penalty(columns: &Array2<f64>, penalty: Array2<f64>) -> Array2<f64> {
    let xtx = columns.t().dot(columns);
    let xtx_norm = xtx.iter().map(|v| v * v).sum::<f64>().sqrt();
    let s_norm = penalty.iter().map(|v| v * v).sum::<f64>().sqrt();
    if s_norm > 0.0 && xtx_norm > 0.0 {
        penalty * (xtx_norm / s_norm)
    } else {
        penalty
    }
}
