use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use serde::Serialize;
use thiserror::Error;

/// A comprehensive error type for all operations within the basis module.
#[derive(Error, Debug)]
pub enum BasisError {
    #[error("Spline degree must be at least 1, but was {0}.")]
    InvalidDegree(usize),

    #[error("Data range is invalid: start ({0}) must be less than end ({1}).")]
    InvalidRange(f64, f64),

    #[error(
        "Basis dimension {basis_size} is too small for a spline of degree {degree}; at least {required} basis functions are needed."
    )]
    BasisTooSmall {
        basis_size: usize,
        degree: usize,
        required: usize,
    },

    #[error(
        "Penalty order ({order}) must be positive and less than the number of basis functions ({num_basis})."
    )]
    InvalidPenaltyOrder { order: usize, num_basis: usize },

    #[error("Cannot constrain a basis whose columns sum to zero.")]
    DegenerateConstraint,
}

/// Creates a B-spline basis expansion matrix and its corresponding knot vector.
///
/// Knots are placed uniformly across `data_range`, which must always be the range
/// of the data the model was fitted on, even when evaluating at new points.
///
/// # Returns
///
/// 1.  The **basis matrix**, with shape `[data.len(), num_internal_knots + degree + 1]`.
/// 2.  The **full knot vector**, including the repeated boundary knots.
pub fn create_bspline_basis(
    data: ArrayView1<f64>,
    data_range: (f64, f64),
    num_internal_knots: usize,
    degree: usize,
) -> Result<(Array2<f64>, Array1<f64>), BasisError> {
    if degree < 1 {
        return Err(BasisError::InvalidDegree(degree));
    }
    if !(data_range.0 < data_range.1) {
        return Err(BasisError::InvalidRange(data_range.0, data_range.1));
    }

    let knot_vector = internal::generate_full_knot_vector(data_range, num_internal_knots, degree);
    let basis_matrix = evaluate_with_knots(data, knot_vector.view(), degree);
    Ok((basis_matrix, knot_vector))
}

/// Evaluates every B-spline of the given knot vector at each data point.
fn evaluate_with_knots(
    data: ArrayView1<f64>,
    knots: ArrayView1<f64>,
    degree: usize,
) -> Array2<f64> {
    // For a knot vector of length k, there are k - degree - 1 basis functions.
    let num_basis_functions = knots.len() - degree - 1;
    let mut basis_matrix = Array2::zeros((data.len(), num_basis_functions));
    for (i, &x) in data.iter().enumerate() {
        let basis_row = internal::evaluate_splines_at_point(x, degree, knots);
        basis_matrix.row_mut(i).assign(&basis_row);
    }
    basis_matrix
}

/// Creates a penalty matrix `S = D' * D` from the `order`-th difference matrix `D`,
/// penalizing squared differences of adjacent spline coefficients (P-splines).
pub fn create_difference_penalty_matrix(
    num_basis_functions: usize,
    order: usize,
) -> Result<Array2<f64>, BasisError> {
    if order == 0 || order >= num_basis_functions {
        return Err(BasisError::InvalidPenaltyOrder {
            order,
            num_basis: num_basis_functions,
        });
    }

    let mut d = Array2::<f64>::eye(num_basis_functions);
    for _ in 0..order {
        d = &d.slice(s![1.., ..]) - &d.slice(s![..-1, ..]);
    }
    Ok(d.t().dot(&d))
}

/// Applies a sum-to-zero constraint to a basis matrix for identifiability against the
/// intercept.
///
/// With `c = B' 1`, the Householder reflection `H = I - 2 v v' / (v' v)` built from
/// `v = c + sign(c_0) |c| e_0` maps `c` onto the first axis, so the remaining columns of
/// `H` span the null space of `c'`. Those columns form `Z`, and `B Z` has column sums of
/// zero.
///
/// # Returns
/// 1. The constrained basis matrix (one fewer column).
/// 2. The transformation matrix `Z`.
pub fn apply_sum_to_zero_constraint(
    basis_matrix: ArrayView2<f64>,
) -> Result<(Array2<f64>, Array2<f64>), BasisError> {
    let n_basis = basis_matrix.ncols();
    let c = basis_matrix.sum_axis(Axis(0));
    let norm = c.dot(&c).sqrt();
    if !(norm > 0.0) || n_basis < 2 {
        return Err(BasisError::DegenerateConstraint);
    }

    let mut v = c.clone();
    v[0] += if c[0] >= 0.0 { norm } else { -norm };
    let vtv = v.dot(&v);

    let mut householder = Array2::<f64>::eye(n_basis);
    for i in 0..n_basis {
        for j in 0..n_basis {
            householder[[i, j]] -= 2.0 * v[i] * v[j] / vtv;
        }
    }

    let z_transform = householder.slice(s![.., 1..]).to_owned();
    let constrained_basis = basis_matrix.dot(&z_transform);
    Ok((constrained_basis, z_transform))
}

/// Everything needed to rebuild a smooth term's columns at new predictor values.
#[derive(Debug, Clone, Serialize)]
pub struct SmoothBasis {
    pub degree: usize,
    pub range: (f64, f64),
    pub knots: Array1<f64>,
    /// Sum-to-zero transformation applied to the raw B-spline columns.
    pub z_transform: Array2<f64>,
}

impl SmoothBasis {
    /// Builds a constrained P-spline basis of dimension `basis_size` for one predictor,
    /// returning the basis recipe, the constrained design columns and the constrained
    /// second-order difference penalty.
    pub fn build(
        data: ArrayView1<f64>,
        basis_size: usize,
    ) -> Result<(Self, Array2<f64>, Array2<f64>), BasisError> {
        let degree = 3.min(basis_size.saturating_sub(1)).max(1);
        // A second-order difference penalty needs at least three coefficients.
        let required = 3;
        if basis_size < required {
            return Err(BasisError::BasisTooSmall {
                basis_size,
                degree,
                required,
            });
        }
        let num_internal_knots = basis_size - degree - 1;
        let range = internal::data_range(data);

        let (raw, knots) = create_bspline_basis(data, range, num_internal_knots, degree)?;
        let penalty = create_difference_penalty_matrix(raw.ncols(), 2)?;
        let (constrained, z_transform) = apply_sum_to_zero_constraint(raw.view())?;
        let constrained_penalty = z_transform.t().dot(&penalty).dot(&z_transform);

        Ok((
            Self {
                degree,
                range,
                knots,
                z_transform,
            },
            constrained,
            constrained_penalty,
        ))
    }

    pub fn num_columns(&self) -> usize {
        self.z_transform.ncols()
    }

    /// Evaluates the constrained basis at new points. Points outside the fitted range
    /// are clamped to it.
    pub fn evaluate(&self, data: ArrayView1<f64>) -> Array2<f64> {
        let clamped = data.mapv(|x| x.clamp(self.range.0, self.range.1));
        evaluate_with_knots(clamped.view(), self.knots.view(), self.degree).dot(&self.z_transform)
    }
}

/// Internal module for implementation details not exposed in the public API.
mod internal {
    use super::*;

    pub(super) fn data_range(data: ArrayView1<f64>) -> (f64, f64) {
        data.iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
                (lo.min(x), hi.max(x))
            })
    }

    /// Generates the full knot vector, including repeated boundary knots.
    pub(super) fn generate_full_knot_vector(
        data_range: (f64, f64),
        num_internal_knots: usize,
        degree: usize,
    ) -> Array1<f64> {
        let (min_val, max_val) = data_range;
        let h = (max_val - min_val) / (num_internal_knots as f64 + 1.0);
        let internal_knots = (1..=num_internal_knots).map(|i| min_val + i as f64 * h);

        // B-splines require `degree + 1` repeated knots at each boundary.
        std::iter::repeat_n(min_val, degree + 1)
            .chain(internal_knots)
            .chain(std::iter::repeat_n(max_val, degree + 1))
            .collect()
    }

    /// Evaluates all B-spline basis functions at a single point `x` with the
    /// Cox-de Boor recurrence, filling only the `degree + 1` functions that are
    /// non-zero on the knot span containing `x`.
    pub(super) fn evaluate_splines_at_point(
        x: f64,
        degree: usize,
        knots: ArrayView1<f64>,
    ) -> Array1<f64> {
        let num_basis = knots.len() - degree - 1;

        // The span `mu` satisfies `knots[mu] <= x < knots[mu+1]`; the right boundary
        // belongs to the last non-degenerate span.
        let mu = match knots.iter().rposition(|&k| k <= x) {
            Some(pos) => pos.min(num_basis - 1).max(degree),
            None => degree,
        };

        let mut n = vec![0.0; degree + 1];
        let mut left = vec![0.0; degree + 1];
        let mut right = vec![0.0; degree + 1];
        n[0] = 1.0;
        for j in 1..=degree {
            left[j] = x - knots[mu + 1 - j];
            right[j] = knots[mu + j] - x;
            let mut saved = 0.0;
            for r in 0..j {
                let denom = right[r + 1] + left[j - r];
                let temp = if denom.abs() > 1e-12 { n[r] / denom } else { 0.0 };
                n[r] = saved + right[r + 1] * temp;
                saved = left[j - r] * temp;
            }
            n[j] = saved;
        }

        let mut basis_values = Array1::zeros(num_basis);
        for (i, value) in n.into_iter().enumerate() {
            basis_values[mu - degree + i] = value;
        }
        basis_values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
        assert_eq!(a.shape(), b.shape());
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_knot_generation_uniform() {
        let knots = internal::generate_full_knot_vector((0.0, 10.0), 3, 2);
        // 3 internal + 2 * (2+1) boundary = 9 knots
        assert_eq!(knots.len(), 9);
        assert_eq!(knots, array![0.0, 0.0, 0.0, 2.5, 5.0, 7.5, 10.0, 10.0, 10.0]);
    }

    #[test]
    fn test_penalty_matrix_creation() {
        let s = create_difference_penalty_matrix(5, 2).unwrap();
        let expected_s = array![
            [1., -2., 1., 0., 0.],
            [-2., 5., -4., 1., 0.],
            [1., -4., 6., -4., 1.],
            [0., 1., -4., 5., -2.],
            [0., 0., 1., -2., 1.]
        ];
        assert!(max_abs_diff(&s, &expected_s) < 1e-9);
    }

    #[test]
    fn test_bspline_basis_sums_to_one() {
        let data = Array1::linspace(0.0, 10.0, 101);
        let (basis, _) = create_bspline_basis(data.view(), (0.0, 10.0), 4, 3).unwrap();
        assert_eq!(basis.ncols(), 8);
        for &sum in basis.sum_axis(Axis(1)).iter() {
            assert!((sum - 1.0).abs() < 1e-9, "Basis did not sum to 1, got {sum}");
        }
    }

    #[test]
    fn test_single_point_evaluation_degree_one() {
        // Degree 1 splines with knots t = [0,0,1,2,2] give 3 hat functions.
        // At x = 0.5 the first two are each halfway along their slopes.
        let knots = array![0.0, 0.0, 1.0, 2.0, 2.0];
        let values = internal::evaluate_splines_at_point(0.5, 1, knots.view());
        assert_eq!(values.len(), 3);
        assert!((values[0] - 0.5).abs() < 1e-9);
        assert!((values[1] - 0.5).abs() < 1e-9);
        assert!(values[2].abs() < 1e-9);
    }

    #[test]
    fn constrained_basis_columns_sum_to_zero() {
        let data = array![0.3, 1.1, 2.7, 3.3, 4.9, 5.2, 6.8, 7.1, 8.6, 9.9];
        let (smooth, columns, penalty) = SmoothBasis::build(data.view(), 5).unwrap();
        assert_eq!(columns.ncols(), 4);
        assert_eq!(smooth.num_columns(), 4);
        assert_eq!(penalty.shape(), &[4, 4]);
        for &sum in columns.sum_axis(Axis(0)).iter() {
            assert!(sum.abs() < 1e-9, "Constrained column sum was {sum}");
        }
        // Re-evaluating at the training points reproduces the design columns.
        let again = smooth.evaluate(data.view());
        assert!(max_abs_diff(&again, &columns) < 1e-9);
    }

    #[test]
    fn small_basis_drops_to_lower_degree() {
        let data = array![0.0, 1.0, 2.0, 3.0, 4.0];
        let (smooth, columns, _) = SmoothBasis::build(data.view(), 3).unwrap();
        assert_eq!(smooth.degree, 2);
        assert_eq!(columns.ncols(), 2);
    }

    #[test]
    fn test_error_conditions() {
        match create_bspline_basis(array![].view(), (0.0, 10.0), 5, 0).unwrap_err() {
            BasisError::InvalidDegree(deg) => assert_eq!(deg, 0),
            _ => panic!("Expected InvalidDegree error"),
        }
        match create_bspline_basis(array![].view(), (10.0, 0.0), 5, 1).unwrap_err() {
            BasisError::InvalidRange(start, end) => {
                assert_eq!(start, 10.0);
                assert_eq!(end, 0.0);
            }
            _ => panic!("Expected InvalidRange error"),
        }
        match create_difference_penalty_matrix(5, 5).unwrap_err() {
            BasisError::InvalidPenaltyOrder { order, num_basis } => {
                assert_eq!(order, 5);
                assert_eq!(num_basis, 5);
            }
            _ => panic!("Expected InvalidPenaltyOrder error"),
        }
        assert!(matches!(
            SmoothBasis::build(array![1.0, 1.0, 1.0].view(), 5).unwrap_err(),
            BasisError::InvalidRange(_, _)
        ));
    }
}
