//! # Model Estimation
//!
//! Fits one candidate model for one taxon, and a whole candidate set in parallel.
//! Fitting is a nested optimization:
//!
//! 1.  **Power (golden section):** the Tweedie power `p` is chosen to maximize the
//!     profile log-likelihood on `(1.01, 1.99)`, unless a power was configured.
//!
//! 2.  **Smoothing parameters (BFGS):** for a given power, the log-smoothing
//!     parameters `rho` minimize the GCV score `n D / (n - edf)^2`. Gradients are
//!     central finite differences; the best point seen is kept if the line search
//!     gives up early.
//!
//! 3.  **Coefficients (P-IRLS):** for fixed `rho`, see [`crate::pirls`].
//!
//! The scale `phi` is then profiled by golden section on `log phi` and the model is
//! summarized with its log-likelihood, AICc, BIC and deviance explained.
//!
//! A failed fit is a value, not a panic: every problem becomes a `FitError` attached to
//! the candidate, and the rest of the set carries on.

use wolfe_bfgs::{Bfgs, BfgsSolution};

use crate::config::FitSettings;
use crate::data::TaxonData;
use crate::design::{DesignRecipe, ModelDesign};
use crate::family::{MAX_POWER, MIN_POWER, Tweedie};
use crate::pirls::{PirlsResult, fit_for_fixed_smoothing};
use crate::terms::CandidateModel;

use ahash::AHashMap;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::IsTerminal;
use thiserror::Error;

/// Log-smoothing parameters are searched inside this box.
const RHO_BOUND: f64 = 15.0;
const RHO_START: f64 = 0.0;
const FD_STEP: f64 = 1e-3;
/// Cost reported to BFGS when a trial point cannot be fitted.
const FAILED_COST: f64 = 1e30;
const GOLDEN: f64 = 0.618_033_988_749_894_8;

/// Why a single candidate could not be fitted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("Model has {coeffs} coefficients but only {observations} observations.")]
    RankDeficient { coeffs: usize, observations: usize },

    #[error("Predictor '{0}' has no variation in this taxon's data.")]
    DegeneratePredictor(String),

    #[error("Column '{0}' is not available for this taxon.")]
    MissingColumn(String),

    #[error("A linear system solve failed; the penalized Hessian may be singular: {0}")]
    SingularSystem(String),

    #[error(
        "P-IRLS did not converge within {max_iterations} iterations. Last relative change was {last_change:.6e}."
    )]
    DidNotConverge {
        max_iterations: usize,
        last_change: f64,
    },

    #[error("Numerical instability during fitting: {0}")]
    Unstable(String),

    #[error(
        "Not enough observations ({observations}) for {params:.2} effective parameters; AICc is undefined."
    )]
    InsufficientDegreesOfFreedom { observations: usize, params: f64 },

    #[error("Smooth basis construction failed: {0}")]
    Basis(String),

    #[error("Smoothing parameter selection failed: {0}")]
    SmoothingSelectionFailed(String),
}

/// A successfully fitted candidate with everything ranking and prediction need.
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub name: String,
    pub index: usize,
    pub predictors: Vec<String>,
    pub term_labels: Vec<String>,
    pub tweedie_power: f64,
    pub power_estimated: bool,
    pub scale: f64,
    pub edf: f64,
    pub deviance: f64,
    pub null_deviance: f64,
    pub log_likelihood: f64,
    /// Effective parameter count used by the information criteria.
    pub num_params: f64,
    pub n: usize,
    pub aicc: f64,
    pub bic: f64,
    /// Proportion of the null deviance explained.
    pub r_squared: f64,
    pub smoothing_parameters: Vec<f64>,
    pub coefficients: Array1<f64>,
    /// Bayesian posterior covariance of the coefficients, `phi (X'WX + S)^-1`.
    pub covariance: Array2<f64>,
    pub recipe: DesignRecipe,
}

impl FittedModel {
    pub fn family(&self) -> Tweedie {
        Tweedie::new(self.tweedie_power)
    }
}

/// AICc from a log-likelihood, effective parameter count and sample size.
/// `None` when `n - k - 1 <= 0`.
pub fn aicc(log_likelihood: f64, k: f64, n: usize) -> Option<f64> {
    let denom = n as f64 - k - 1.0;
    if denom <= 0.0 {
        return None;
    }
    Some(-2.0 * log_likelihood + 2.0 * k + 2.0 * k * (k + 1.0) / denom)
}

pub fn bic(log_likelihood: f64, k: f64, n: usize) -> f64 {
    -2.0 * log_likelihood + k * (n as f64).ln()
}

/// Fits one candidate. `fixed_power` disables the power search.
pub fn fit_candidate(
    candidate: &CandidateModel,
    data: &TaxonData,
    settings: &FitSettings,
    fixed_power: Option<f64>,
) -> Result<FittedModel, FitError> {
    let design = ModelDesign::build(candidate, data)?;
    let y = data.response();
    let n = data.num_rows();

    let fit = match fixed_power {
        Some(power) => fit_at_power(&design, y, Tweedie::new(power), settings)?,
        None => {
            // Power evaluations that fail are treated as infinitely unlikely.
            let mut cache: Vec<(f64, Result<ProfiledFit, FitError>)> = Vec::new();
            let mut evaluate = |p: f64| -> f64 {
                let outcome = fit_at_power(&design, y, Tweedie::new(p), settings);
                let score = outcome
                    .as_ref()
                    .map(|f| f.log_likelihood)
                    .unwrap_or(f64::NEG_INFINITY);
                cache.push((p, outcome));
                score
            };
            let best_power =
                golden_section_max(&mut evaluate, MIN_POWER, MAX_POWER, settings.power_tolerance);
            log::trace!("Model '{}': profiled Tweedie power {best_power:.3}", candidate.name);
            match cache.into_iter().find(|(p, _)| *p == best_power) {
                Some((_, outcome)) => outcome?,
                None => fit_at_power(&design, y, Tweedie::new(best_power), settings)?,
            }
        }
    };

    let power_estimated = fixed_power.is_none();
    let num_params = fit.pirls.edf + 1.0 + if power_estimated { 1.0 } else { 0.0 };
    let aicc = aicc(fit.log_likelihood, num_params, n).ok_or(
        FitError::InsufficientDegreesOfFreedom {
            observations: n,
            params: num_params,
        },
    )?;

    let y_vec = y.to_vec();
    let y_mean = y.mean().unwrap_or(0.0);
    let null_deviance = fit.family.deviance(&y_vec, &vec![y_mean; n]);
    let r_squared = if null_deviance > 0.0 {
        1.0 - fit.pirls.deviance / null_deviance
    } else {
        0.0
    };

    let PirlsResult {
        beta,
        hessian_inverse,
        edf,
        deviance,
        ..
    } = fit.pirls;

    Ok(FittedModel {
        name: candidate.name.clone(),
        index: candidate.index,
        predictors: candidate.predictors.clone(),
        term_labels: design
            .recipe
            .blocks
            .iter()
            .map(|b| b.label.clone())
            .collect(),
        tweedie_power: fit.family.power,
        power_estimated,
        scale: fit.scale,
        edf,
        deviance,
        null_deviance,
        log_likelihood: fit.log_likelihood,
        num_params,
        n,
        aicc,
        bic: bic(fit.log_likelihood, num_params, n),
        r_squared,
        smoothing_parameters: fit.lambdas,
        coefficients: beta,
        covariance: hessian_inverse * fit.scale,
        recipe: design.recipe,
    })
}

/// The outcome of fitting at one power: coefficients, smoothing and the profiled scale.
struct ProfiledFit {
    family: Tweedie,
    pirls: PirlsResult,
    lambdas: Vec<f64>,
    scale: f64,
    log_likelihood: f64,
}

fn fit_at_power(
    design: &ModelDesign,
    y: ArrayView1<f64>,
    family: Tweedie,
    settings: &FitSettings,
) -> Result<ProfiledFit, FitError> {
    let (pirls, lambdas) = if design.num_penalties() == 0 {
        (fit_for_fixed_smoothing(design, y, &[], family, settings)?, Vec::new())
    } else {
        select_smoothing(design, y, family, settings)?
    };

    let y_vec = y.to_vec();
    let mu = pirls.mu.to_vec();
    let (scale, log_likelihood) = profile_scale(family, &y_vec, &mu, pirls.edf);
    if !log_likelihood.is_finite() {
        return Err(FitError::Unstable(format!(
            "log-likelihood is not finite at power {:.3}",
            family.power
        )));
    }

    Ok(ProfiledFit {
        family,
        pirls,
        lambdas,
        scale,
        log_likelihood,
    })
}

/// Maximizes the log-likelihood over `log phi`, starting from a bracket around the
/// Pearson estimate.
fn profile_scale(family: Tweedie, y: &[f64], mu: &[f64], edf: f64) -> (f64, f64) {
    let residual_df = y.len() as f64 - edf;
    let pearson = family.pearson_scale(y, mu, residual_df).max(1e-10);
    let centre = pearson.ln();
    let mut objective = |log_phi: f64| family.log_likelihood(y, mu, log_phi.exp());
    let best = golden_section_max(&mut objective, centre - 5.0, centre + 5.0, 1e-4);
    let phi = best.exp();
    (phi, family.log_likelihood(y, mu, phi))
}

/// Golden-section search for the maximum of a unimodal function on `[lo, hi]`.
/// Non-finite evaluations count as minus infinity.
pub fn golden_section_max<F>(f: &mut F, lo: f64, hi: f64, tolerance: f64) -> f64
where
    F: FnMut(f64) -> f64,
{
    let mut eval = |x: f64| {
        let v = f(x);
        if v.is_finite() { v } else { f64::NEG_INFINITY }
    };
    let (mut a, mut b) = (lo, hi);
    let mut c = b - GOLDEN * (b - a);
    let mut d = a + GOLDEN * (b - a);
    let mut fc = eval(c);
    let mut fd = eval(d);
    while (b - a).abs() > tolerance {
        if fc >= fd {
            b = d;
            d = c;
            fd = fc;
            c = b - GOLDEN * (b - a);
            fc = eval(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + GOLDEN * (b - a);
            fd = eval(d);
        }
    }
    if fc >= fd { c } else { d }
}

/// Holds the state for the GCV optimization at one power.
struct GcvState<'a> {
    design: &'a ModelDesign,
    y: ArrayView1<'a, f64>,
    family: Tweedie,
    settings: &'a FitSettings,
    cache: RefCell<HashMap<Vec<u64>, Result<(f64, PirlsResult), FitError>>>,
    best: RefCell<Option<(f64, Array1<f64>)>>,
}

impl<'a> GcvState<'a> {
    fn new(
        design: &'a ModelDesign,
        y: ArrayView1<'a, f64>,
        family: Tweedie,
        settings: &'a FitSettings,
    ) -> Self {
        Self {
            design,
            y,
            family,
            settings,
            cache: RefCell::new(HashMap::new()),
            best: RefCell::new(None),
        }
    }

    /// Runs P-IRLS at `rho` (cached) and returns the GCV score with the fit.
    fn evaluate(&self, rho: &Array1<f64>) -> Result<(f64, PirlsResult), FitError> {
        let key: Vec<u64> = rho.iter().map(|v| v.to_bits()).collect();
        if let Some(cached) = self.cache.borrow().get(&key) {
            return cached.clone();
        }

        let lambdas: Vec<f64> = rho.iter().map(|r| r.exp()).collect();
        let result = fit_for_fixed_smoothing(
            self.design,
            self.y,
            &lambdas,
            self.family,
            self.settings,
        )
        .and_then(|pirls| {
            let n = self.y.len() as f64;
            let denom = n - pirls.edf;
            if denom <= 0.0 {
                return Err(FitError::InsufficientDegreesOfFreedom {
                    observations: self.y.len(),
                    params: pirls.edf,
                });
            }
            Ok((n * pirls.deviance / (denom * denom), pirls))
        });

        if let Ok((score, _)) = &result {
            let mut best = self.best.borrow_mut();
            if best.as_ref().is_none_or(|(b, _)| score < b) {
                *best = Some((*score, rho.clone()));
            }
        }
        self.cache.borrow_mut().insert(key, result.clone());
        result
    }

    fn cost(&self, rho: &Array1<f64>) -> f64 {
        match self.evaluate(rho) {
            Ok((score, _)) if score.is_finite() => score,
            _ => FAILED_COST,
        }
    }

    fn cost_and_grad(&self, rho: &Array1<f64>) -> (f64, Array1<f64>) {
        let rho = rho.mapv(|v| v.clamp(-RHO_BOUND, RHO_BOUND));
        let cost = self.cost(&rho);
        let mut grad = Array1::zeros(rho.len());
        for j in 0..rho.len() {
            let mut up = rho.clone();
            let mut down = rho.clone();
            up[j] += FD_STEP;
            down[j] -= FD_STEP;
            grad[j] = (self.cost(&up) - self.cost(&down)) / (2.0 * FD_STEP);
        }
        if grad.iter().any(|g| !g.is_finite()) {
            grad.fill(0.0);
        }
        (cost, grad)
    }
}

/// Chooses smoothing parameters by GCV and returns the fit at the chosen point.
fn select_smoothing(
    design: &ModelDesign,
    y: ArrayView1<f64>,
    family: Tweedie,
    settings: &FitSettings,
) -> Result<(PirlsResult, Vec<f64>), FitError> {
    let state = GcvState::new(design, y.view(), family, settings);
    let initial_rho = Array1::from_elem(design.num_penalties(), RHO_START);
    state.evaluate(&initial_rho)?;

    let outcome = Bfgs::new(initial_rho, |rho: &Array1<f64>| state.cost_and_grad(rho))
        .with_tolerance(settings.smoothing_tolerance)
        .with_max_iterations(settings.smoothing_max_iterations)
        .run();
    match &outcome {
        Ok(BfgsSolution {
            final_value,
            iterations,
            ..
        }) => log::trace!("GCV converged in {iterations} iterations, score {final_value:.6e}"),
        Err(e) => log::debug!("BFGS stopped early ({e:?}); using the best point seen"),
    }

    let best_rho = state
        .best
        .borrow()
        .as_ref()
        .map(|(_, rho)| rho.clone())
        .ok_or_else(|| {
            FitError::SmoothingSelectionFailed(
                "no smoothing parameters could be fitted".to_string(),
            )
        })?;
    let (_, pirls) = state.evaluate(&best_rho)?;
    Ok((pirls, best_rho.iter().map(|r| r.exp()).collect()))
}

/// One candidate and what became of it.
#[derive(Debug, Clone)]
pub struct ModelFit {
    pub candidate: CandidateModel,
    pub outcome: Result<FittedModel, FitError>,
}

/// A candidate that could not be fitted, for reporting.
#[derive(Debug, Clone)]
pub struct FailedModel {
    pub name: String,
    pub predictors: Vec<String>,
    pub reason: String,
}

/// The fits of a whole candidate set, in enumeration order.
#[derive(Debug, Clone)]
pub struct ModelSetFits {
    fits: Vec<ModelFit>,
    by_name: AHashMap<String, usize>,
}

impl ModelSetFits {
    pub fn new(fits: Vec<ModelFit>) -> Self {
        let by_name = fits
            .iter()
            .enumerate()
            .map(|(i, f)| (f.candidate.name.clone(), i))
            .collect();
        Self { fits, by_name }
    }

    pub fn len(&self) -> usize {
        self.fits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fits.is_empty()
    }

    pub fn all(&self) -> &[ModelFit] {
        &self.fits
    }

    pub fn get(&self, name: &str) -> Option<&ModelFit> {
        self.by_name.get(name).map(|&i| &self.fits[i])
    }

    pub fn successes(&self) -> Vec<&FittedModel> {
        self.fits.iter().filter_map(|f| f.outcome.as_ref().ok()).collect()
    }

    pub fn failures(&self) -> Vec<FailedModel> {
        self.fits
            .iter()
            .filter_map(|f| match &f.outcome {
                Ok(_) => None,
                Err(e) => Some(FailedModel {
                    name: f.candidate.name.clone(),
                    predictors: f.candidate.predictors.clone(),
                    reason: e.to_string(),
                }),
            })
            .collect()
    }
}

/// How a candidate set is fitted.
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub parallel: bool,
    /// Worker cap; `None` uses the number of logical CPUs.
    pub workers: Option<usize>,
    pub show_progress: bool,
    pub settings: FitSettings,
    pub tweedie_power: Option<f64>,
}

#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("Failed to build the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

fn create_progress_bar(len: u64, message: &str, visible: bool) -> ProgressBar {
    let draw_target = if visible && std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };
    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    let style = ProgressStyle::with_template(
        "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ");
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

/// Fits every candidate against one taxon's data. Results come back in enumeration
/// order whatever the execution order was. Individual failures are recorded, never
/// propagated.
pub fn fit_model_set(
    candidates: &[CandidateModel],
    data: &TaxonData,
    options: &FitOptions,
) -> Result<ModelSetFits, EstimationError> {
    let pb = create_progress_bar(candidates.len() as u64, &data.taxon, options.show_progress);

    let fit_one = |candidate: &CandidateModel| -> ModelFit {
        let outcome = fit_candidate(candidate, data, &options.settings, options.tweedie_power);
        if let Err(e) = &outcome {
            log::debug!("Model '{}' failed for '{}': {e}", candidate.name, data.taxon);
        }
        pb.inc(1);
        ModelFit {
            candidate: candidate.clone(),
            outcome,
        }
    };

    let fits: Vec<ModelFit> = if options.parallel {
        let workers = options.workers.unwrap_or_else(num_cpus::get).max(1);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
        pool.install(|| candidates.par_iter().map(fit_one).collect())
    } else {
        candidates.iter().map(fit_one).collect()
    };
    pb.finish_and_clear();

    let set = ModelSetFits::new(fits);
    log::info!(
        "Fitted {} of {} models for '{}'.",
        set.successes().len(),
        set.len(),
        data.taxon
    );
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PredictorRole, SelectionConfig};
    use crate::data::SurveyData;
    use crate::terms::Term;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Gamma, Poisson};

    /// Tweedie draws as a Poisson number of gamma jumps.
    fn tweedie_draw(rng: &mut StdRng, mu: f64, phi: f64, p: f64) -> f64 {
        let lambda = mu.powf(2.0 - p) / (phi * (2.0 - p));
        let shape = (2.0 - p) / (p - 1.0);
        let scale = phi * (p - 1.0) * mu.powf(p - 1.0);
        let count = Poisson::new(lambda).unwrap().sample(rng) as usize;
        let gamma = Gamma::new(shape, scale).unwrap();
        (0..count).map(|_| gamma.sample(rng)).sum()
    }

    fn synthetic_taxon(n: usize, seed: u64) -> TaxonData {
        let mut rng = StdRng::seed_from_u64(seed);
        let depth: Vec<f64> = (0..n).map(|i| i as f64 / n as f64 * 10.0).collect();
        let noise: Vec<f64> = (0..n).map(|i| ((i * 37) % 17) as f64).collect();
        let y: Vec<f64> = depth
            .iter()
            .map(|&d| tweedie_draw(&mut rng, (0.5 + (d / 3.0).sin()).exp(), 1.0, 1.5))
            .collect();
        let config = SelectionConfig::from_toml_str(
            "response = \"y\"\ntaxon_column = \"t\"\ncontinuous = [\"Depth\", \"Noise\"]\n",
        )
        .unwrap();
        SurveyData::new(y, vec!["fish".to_string(); n])
            .unwrap()
            .with_numeric("Depth", depth)
            .unwrap()
            .with_numeric("Noise", noise)
            .unwrap()
            .subset_for_taxon("fish", &config)
            .unwrap()
    }

    fn model(index: usize, predictors: &[&str]) -> CandidateModel {
        let predictors: Vec<String> = predictors.iter().map(|s| s.to_string()).collect();
        CandidateModel {
            index,
            name: CandidateModel::name_for(&predictors),
            terms: predictors
                .iter()
                .map(|p| Term::for_predictor(p, PredictorRole::Continuous, 5))
                .collect(),
            predictors,
        }
    }

    #[test]
    fn golden_section_finds_the_peak() {
        let mut f = |x: f64| -(x - 1.37).powi(2);
        let best = golden_section_max(&mut f, 1.01, 1.99, 1e-6);
        assert!((best - 1.37).abs() < 1e-5);
    }

    #[test]
    fn aicc_is_undefined_without_residual_degrees_of_freedom() {
        assert!(aicc(-10.0, 4.0, 5).is_none());
        let value = aicc(-10.0, 2.0, 10).unwrap();
        assert!((value - (20.0 + 4.0 + 12.0 / 7.0)).abs() < 1e-12);
    }

    #[test]
    fn informative_smooth_beats_the_null_model() {
        let data = synthetic_taxon(80, 7);
        let settings = FitSettings::default();
        let null = fit_candidate(&model(0, &[]), &data, &settings, Some(1.5)).unwrap();
        let depth = fit_candidate(&model(1, &["Depth"]), &data, &settings, Some(1.5)).unwrap();
        assert!(depth.aicc < null.aicc, "{} vs {}", depth.aicc, null.aicc);
        assert!(depth.r_squared > 0.0 && depth.r_squared <= 1.0);
        assert!(null.r_squared.abs() < 1e-6);
        assert!(depth.edf > 1.0 && depth.edf <= 5.0 + 1e-6);
        assert_eq!(depth.smoothing_parameters.len(), 1);
        assert_eq!(depth.covariance.shape(), &[5, 5]);
        assert!((depth.num_params - (depth.edf + 1.0)).abs() < 1e-12);
    }

    #[test]
    fn estimated_power_stays_in_range_and_counts_as_a_parameter() {
        let data = synthetic_taxon(60, 11);
        let fit =
            fit_candidate(&model(0, &["Depth"]), &data, &FitSettings::default(), None).unwrap();
        assert!(fit.power_estimated);
        assert!(fit.tweedie_power >= MIN_POWER && fit.tweedie_power <= MAX_POWER);
        assert!((fit.num_params - (fit.edf + 2.0)).abs() < 1e-12);
    }

    #[test]
    fn parallel_and_sequential_fits_agree() {
        let data = synthetic_taxon(50, 3);
        let candidates = vec![
            model(0, &[]),
            model(1, &["Depth"]),
            model(2, &["Noise"]),
            model(3, &["Depth", "Noise"]),
        ];
        let mut options = FitOptions {
            parallel: false,
            workers: None,
            show_progress: false,
            settings: FitSettings::default(),
            tweedie_power: Some(1.5),
        };
        let sequential = fit_model_set(&candidates, &data, &options).unwrap();
        options.parallel = true;
        options.workers = Some(2);
        let parallel = fit_model_set(&candidates, &data, &options).unwrap();

        assert_eq!(sequential.len(), 4);
        for (a, b) in sequential.all().iter().zip(parallel.all()) {
            assert_eq!(a.candidate.name, b.candidate.name);
            match (&a.outcome, &b.outcome) {
                (Ok(x), Ok(y)) => assert!((x.aicc - y.aicc).abs() < 1e-9),
                (Err(x), Err(y)) => assert_eq!(x, y),
                _ => panic!("Outcomes differ for '{}'", a.candidate.name),
            }
        }
        assert!(sequential.get("Depth+Noise").is_some());
    }

    #[test]
    fn failures_are_recorded_per_model() {
        let data = synthetic_taxon(12, 5);
        let mut big = model(1, &["Depth", "Noise"]);
        for term in &mut big.terms {
            if let Term::Smooth { basis_size, .. } = term {
                *basis_size = 8;
            }
        }
        let options = FitOptions {
            parallel: false,
            workers: None,
            show_progress: false,
            settings: FitSettings::default(),
            tweedie_power: Some(1.5),
        };
        let fits = fit_model_set(&[model(0, &[]), big], &data, &options).unwrap();
        assert_eq!(fits.successes().len(), 1);
        let failures = fits.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].name, "Depth+Noise");
        assert!(failures[0].reason.contains("coefficients"));
    }
}
