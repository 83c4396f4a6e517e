use crate::config::FitSettings;
use crate::design::ModelDesign;
use crate::estimate::FitError;
use crate::family::Tweedie;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use ndarray_linalg::{Inverse, Solve};

/// Linear predictors are kept inside this band so `exp` stays finite.
const ETA_BOUND: f64 = 50.0;
const MAX_STEP_HALVINGS: usize = 30;

/// The status of the P-IRLS convergence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PirlsStatus {
    /// Converged successfully within tolerance.
    Converged,
    /// The step-halving line search could not reduce the penalized deviance further,
    /// and the last accepted iterate is a stationary point to working precision.
    StalledAtValidMinimum,
}

/// Holds the result of a converged P-IRLS inner loop for fixed smoothing parameters.
///
/// * `beta`: coefficients in the design's column order.
/// * `hessian_inverse`: `(X'WX + S_lambda)^-1` at convergence; the Bayesian coefficient
///   covariance is this matrix times the scale.
/// * `edf`: effective degrees of freedom, `tr((X'WX + S_lambda)^-1 X'WX)`.
/// * `deviance`: unpenalized Tweedie deviance.
/// * `penalty`: `beta' S_lambda beta`.
#[derive(Clone, Debug)]
pub struct PirlsResult {
    pub beta: Array1<f64>,
    pub mu: Array1<f64>,
    pub hessian_inverse: Array2<f64>,
    pub edf: f64,
    pub deviance: f64,
    pub penalty: f64,
    pub iterations: usize,
    pub status: PirlsStatus,
}

/// Penalized iteratively reweighted least squares for a Tweedie GLM with log link and
/// fixed smoothing parameters `lambdas` (one per penalty block of `design`).
pub fn fit_for_fixed_smoothing(
    design: &ModelDesign,
    y: ArrayView1<f64>,
    lambdas: &[f64],
    family: Tweedie,
    settings: &FitSettings,
) -> Result<PirlsResult, FitError> {
    let x = &design.x;
    let s_lambda = design.penalty_matrix(lambdas);
    let y_slice = y.to_vec();

    // Start from the data, nudging zeros away from the boundary of the log link.
    let y_mean = y.mean().unwrap_or(0.0).max(1e-8);
    let mut mu: Array1<f64> = y.mapv(|v| v.max(0.0) + 0.1 * y_mean);
    let mut eta: Array1<f64> = mu.mapv(f64::ln);
    let mut beta: Option<Array1<f64>> = None;
    let mut last_objective = f64::INFINITY;
    let mut last_change = f64::INFINITY;

    for iter in 1..=settings.max_iterations {
        let w = mu.mapv(|m| family.working_weight(m));
        let z = &eta + &((&y - &mu) / &mu);

        let xtw = (x * &w.view().insert_axis(Axis(1))).reversed_axes();
        let xtwx = xtw.dot(x);
        let xtwz = xtw.dot(&z);
        let h = &xtwx + &s_lambda;
        let proposal = h
            .solve(&xtwz)
            .map_err(|e| FitError::SingularSystem(e.to_string()))?;
        if proposal.iter().any(|v| !v.is_finite()) {
            return Err(FitError::SingularSystem(
                "penalized normal equations produced non-finite coefficients".to_string(),
            ));
        }

        // Step halving towards the previous iterate until the penalized deviance drops.
        let mut candidate = proposal;
        let mut accepted = None;
        for halving in 0..=MAX_STEP_HALVINGS {
            let eta_new = x.dot(&candidate).mapv(|e| e.clamp(-ETA_BOUND, ETA_BOUND));
            let mu_new = eta_new.mapv(f64::exp);
            let deviance = family.deviance(&y_slice, mu_new.as_slice().unwrap_or(&[]));
            let penalty = candidate.dot(&s_lambda.dot(&candidate));
            let objective = deviance + penalty;
            if !objective.is_finite() {
                return Err(FitError::Unstable(format!(
                    "non-finite penalized deviance at iteration {iter}"
                )));
            }
            let previous = match &beta {
                Some(previous) if objective > last_objective * (1.0 + 1e-10) + 1e-12 => previous,
                _ => {
                    accepted = Some((candidate, eta_new, mu_new, objective, deviance, penalty));
                    break;
                }
            };
            if halving == MAX_STEP_HALVINGS {
                break;
            }
            candidate = (&candidate + previous) * 0.5;
        }

        let Some((beta_new, eta_new, mu_new, objective, deviance, penalty)) = accepted else {
            // No descent direction left: the previous iterate is as good as it gets.
            let beta_prev = beta.take().ok_or_else(|| {
                FitError::Unstable("step halving failed on the first iteration".to_string())
            })?;
            return finish(
                x,
                &s_lambda,
                beta_prev,
                mu,
                family,
                last_objective,
                iter,
                PirlsStatus::StalledAtValidMinimum,
                &y_slice,
            );
        };

        last_change = (last_objective - objective).abs() / (0.1 + objective.abs());
        last_objective = objective;
        beta = Some(beta_new);
        eta = eta_new;
        mu = mu_new;

        log::trace!(
            "P-IRLS iteration {iter}: deviance {deviance:.6e}, penalty {penalty:.6e}, change {last_change:.3e}"
        );

        if iter > 1 && last_change < settings.convergence_tolerance {
            let beta_final = beta.take().ok_or_else(|| {
                FitError::Unstable("missing coefficients at convergence".to_string())
            })?;
            return finish(
                x,
                &s_lambda,
                beta_final,
                mu,
                family,
                objective,
                iter,
                PirlsStatus::Converged,
                &y_slice,
            );
        }
    }

    Err(FitError::DidNotConverge {
        max_iterations: settings.max_iterations,
        last_change,
    })
}

/// Recomputes weights at the accepted iterate and derives the quantities the outer
/// loop and the model summary need.
#[allow(clippy::too_many_arguments)]
fn finish(
    x: &Array2<f64>,
    s_lambda: &Array2<f64>,
    beta: Array1<f64>,
    mu: Array1<f64>,
    family: Tweedie,
    objective: f64,
    iterations: usize,
    status: PirlsStatus,
    y: &[f64],
) -> Result<PirlsResult, FitError> {
    let w = mu.mapv(|m| family.working_weight(m));
    let xtw = (x * &w.view().insert_axis(Axis(1))).reversed_axes();
    let xtwx = xtw.dot(x);
    let h = &xtwx + s_lambda;
    let hessian_inverse = h
        .inv()
        .map_err(|e| FitError::SingularSystem(e.to_string()))?;
    if hessian_inverse.iter().any(|v| !v.is_finite()) {
        return Err(FitError::SingularSystem(
            "penalized Hessian is numerically singular".to_string(),
        ));
    }
    let edf = hessian_inverse.dot(&xtwx).diag().sum();
    let deviance = family.deviance(y, mu.as_slice().unwrap_or(&[]));
    let penalty = beta.dot(&s_lambda.dot(&beta));
    log::trace!(
        "P-IRLS finished after {iterations} iterations ({status:?}), objective {objective:.6e}, edf {edf:.3}"
    );

    Ok(PirlsResult {
        beta,
        mu,
        hessian_inverse,
        edf,
        deviance,
        penalty,
        iterations,
        status,
    })
}
