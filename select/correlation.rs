//! Pearson correlations between the numeric predictors of one taxon's data.

use crate::data::TaxonData;
use ndarray::{Array2, ArrayView1};

/// Symmetric correlation matrix with unit diagonal, indexed by predictor name.
#[derive(Debug, Clone)]
pub struct CorrelationMatrix {
    names: Vec<String>,
    values: Array2<f64>,
}

impl CorrelationMatrix {
    /// Computes correlations between the named numeric columns of a taxon subset.
    /// Names without a numeric column are skipped.
    pub fn for_taxon(data: &TaxonData, names: &[String]) -> Self {
        let mut kept = Vec::with_capacity(names.len());
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            if let Some(column) = data.numeric(name) {
                kept.push(name.clone());
                columns.push(column);
            }
        }
        Self::from_columns(kept, &columns)
    }

    pub fn from_columns(names: Vec<String>, columns: &[ArrayView1<f64>]) -> Self {
        let k = names.len();
        let mut values = Array2::<f64>::eye(k);
        for i in 0..k {
            for j in (i + 1)..k {
                let r = match pearson(columns[i], columns[j]) {
                    Some(r) => r,
                    None => {
                        log::warn!(
                            "Correlation between '{}' and '{}' is undefined (zero variance); treating it as 0.",
                            names[i],
                            names[j]
                        );
                        0.0
                    }
                };
                values[[i, j]] = r;
                values[[j, i]] = r;
            }
        }
        Self { names, values }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// The correlation between two predictors, if both are in the matrix.
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        Some(self.values[[self.position(a)?, self.position(b)?]])
    }

    /// Whether two distinct predictors are correlated beyond `cutoff` in absolute value.
    /// Predictors outside the matrix (factors) never exceed it.
    pub fn exceeds(&self, a: &str, b: &str, cutoff: f64) -> bool {
        a != b && self.get(a, b).is_some_and(|r| r.abs() > cutoff)
    }
}

fn pearson(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Option<f64> {
    let n = a.len();
    if n < 2 || b.len() != n {
        return None;
    }
    let mean_a = a.sum() / n as f64;
    let mean_b = b.sum() / n as f64;
    let mut sab = 0.0;
    let mut saa = 0.0;
    let mut sbb = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    }
    let denom = (saa * sbb).sqrt();
    if denom <= f64::EPSILON * (n as f64) || !denom.is_finite() {
        return None;
    }
    Some((sab / denom).clamp(-1.0, 1.0))
}
