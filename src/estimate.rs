//! # Iteratively Re-weighted Surrogate Variable Estimation
//!
//! This module orchestrates the core estimation procedure. Latent structure
//! in a features × samples matrix is recovered by alternating between two
//! competing significance tests and a spectral update:
//!
//! 1.  **Residualize:** project the data onto the orthogonal complement of
//!     the full model's column space and seed candidate directions from the
//!     eigenvectors of the residual cross-product.
//!
//! 2.  **Re-weight:** for the current candidate directions, test every
//!     feature for association with the variables of interest while
//!     controlling for the candidates (b-test) and for association with the
//!     candidates alone (gamma-test). Both p-value vectors pass through a
//!     local FDR estimate, and each feature's weight becomes
//!     `pprob_gamma · (1 − pprob_b)`: high when the feature looks like
//!     latent structure and not like signal.
//!
//! 3.  **Spectral update:** scale each feature row by its weight, center the
//!     rows, and re-extract the leading eigendirections of the reweighted
//!     cross-product as the next iteration's candidates.
//!
//! The loop runs a fixed number of iterations (default 5) with no
//! convergence check; the fixed count is part of the algorithm's contract
//! and keeps results reproducible against prior runs. After the final pass
//! the surrogate variables are the leading right-singular vectors of the
//! last reweighted matrix.

use crate::ftest::{self, FTestError};
use crate::lfdr;
use crate::linalg::{self, ProjectorError};
use ndarray::{Array1, Array2, ArrayView2, Axis, Zip, s};
use ndarray_linalg::error::LinalgError;
use thiserror::Error;

/// Iteration count of the reference algorithm.
pub const DEFAULT_ITERATIONS: usize = 5;

/// Relative Frobenius-norm tolerance for the nested-model containment check.
const NESTEDNESS_TOLERANCE: f64 = 1e-8;

/// Fatal errors. These indicate misspecified inputs and are never recovered;
/// numerical degeneracies inside the iteration loop are absorbed as
/// [`SvaWarning`]s instead.
#[derive(Error, Debug)]
pub enum SvaError {
    #[error(
        "Full model is rank deficient: rank {rank} of {ncols} columns. Supply a design whose columns are linearly independent."
    )]
    DegenerateModel { rank: usize, ncols: usize },

    #[error("Dimension mismatch: {reason}")]
    DimensionMismatch { reason: String },

    #[error("Linear algebra backend failure: {0}")]
    Linalg(#[from] LinalgError),

    #[error("Significance testing failed: {0}")]
    FTest(#[from] FTestError),
}

impl From<ProjectorError> for SvaError {
    fn from(err: ProjectorError) -> Self {
        match err {
            ProjectorError::RankDeficient { rank, ncols } => {
                SvaError::DegenerateModel { rank, ncols }
            }
            ProjectorError::Backend(err) => SvaError::Linalg(err),
        }
    }
}

/// Recoverable conditions noted during a run and reported in [`SvaResult`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SvaWarning {
    #[error(
        "Local FDR estimates for {features} features were out of range during iteration {iteration} and were clamped."
    )]
    DegenerateFdr { iteration: usize, features: usize },

    #[error(
        "Residual spectrum supports only {available} of the {requested} requested surrogate directions."
    )]
    InsufficientRank { requested: usize, available: usize },
}

/// Tuning knobs of the estimation loop.
#[derive(Debug, Clone)]
pub struct SvaConfig {
    /// Number of surrogate variables to estimate.
    pub n_sv: usize,
    /// Number of re-weighting iterations.
    pub iterations: usize,
}

impl SvaConfig {
    pub fn new(n_sv: usize) -> Self {
        Self {
            n_sv,
            iterations: DEFAULT_ITERATIONS,
        }
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }
}

/// Output of a completed run.
#[derive(Debug, Clone)]
pub struct SvaResult {
    /// Estimated surrogate variables, one column per direction
    /// (samples × directions). Fewer columns than requested only when
    /// [`SvaWarning::InsufficientRank`] was raised.
    pub surrogate_variables: Array2<f64>,
    /// Final posterior probability per feature of association with the
    /// surrogate directions.
    pub pprob_gamma: Array1<f64>,
    /// Final posterior probability per feature of association with the
    /// variables of interest.
    pub pprob_b: Array1<f64>,
    /// Number of surrogate variables requested.
    pub n_sv: usize,
    /// Non-fatal conditions encountered during the run.
    pub warnings: Vec<SvaWarning>,
}

/// Estimate surrogate variables with the default iteration count.
///
/// `dat` is features × samples; `full_model` and `null_model` are
/// samples × covariates design matrices with the null model's column space
/// nested in the full model's. When `null_model` is absent an intercept-only
/// design is used.
pub fn estimate_surrogate_variables(
    dat: ArrayView2<f64>,
    full_model: ArrayView2<f64>,
    null_model: Option<ArrayView2<f64>>,
    n_sv: usize,
) -> Result<SvaResult, SvaError> {
    estimate_surrogate_variables_with(dat, full_model, null_model, &SvaConfig::new(n_sv), |_| {})
}

/// Estimate surrogate variables with explicit configuration and a
/// per-iteration observer.
///
/// The observer is invoked once per completed iteration with the 1-based
/// iteration index; it replaces the printed progress counter of the
/// reference implementation and may do nothing.
pub fn estimate_surrogate_variables_with<F>(
    dat: ArrayView2<f64>,
    full_model: ArrayView2<f64>,
    null_model: Option<ArrayView2<f64>>,
    config: &SvaConfig,
    mut observer: F,
) -> Result<SvaResult, SvaError>
where
    F: FnMut(usize),
{
    let null_model_storage: Array2<f64> = match null_model {
        Some(view) => view.to_owned(),
        None => Array2::ones((dat.ncols(), 1)),
    };
    let null_model: ArrayView2<f64> = null_model_storage.view();

    validate(dat, full_model, null_model, config)?;
    let proj_full = linalg::residual_projector(full_model)?;
    check_nested(&proj_full, null_model)?;

    // Seed: eigenvectors of the residual cross-product, leading first. The
    // residual matrix itself is not retained past this point.
    let resid = dat.dot(&proj_full);
    let cross = resid.t().dot(&resid);
    let (eigenvalues, seed_directions) = linalg::eigh_descending(&cross)?;

    let available = linalg::spectral_rank(&eigenvalues);
    let n_directions = config.n_sv.min(available);
    let mut warnings = Vec::new();
    if n_directions < config.n_sv {
        let warning = SvaWarning::InsufficientRank {
            requested: config.n_sv,
            available: n_directions,
        };
        log::warn!("{warning}");
        warnings.push(warning);
    }
    if n_directions == 0 {
        return Err(SvaError::DimensionMismatch {
            reason: "residual matrix has no usable directions; the data are fully explained by the full model".to_string(),
        });
    }

    log::info!(
        "Estimating {n_directions} surrogate variables over {} iterations ({} features, {} samples).",
        config.iterations,
        dat.nrows(),
        dat.ncols()
    );

    let mut step = reweight_step(dat, full_model, null_model, &seed_directions, n_directions)?;
    record_iteration(1, config.iterations, &step, &mut warnings, &mut observer);
    for iteration in 2..=config.iterations {
        step = reweight_step(dat, full_model, null_model, &step.directions, n_directions)?;
        record_iteration(iteration, config.iterations, &step, &mut warnings, &mut observer);
    }

    // The definitive surrogate variables come from the SVD of the final
    // reweighted matrix, not from the eigendecomposition used mid-loop.
    let surrogate_variables = linalg::leading_right_singular_vectors(&step.weighted, n_directions)?;

    Ok(SvaResult {
        surrogate_variables,
        pprob_gamma: step.pprob_gamma,
        pprob_b: step.pprob_b,
        n_sv: config.n_sv,
        warnings,
    })
}

/// Output of one re-weighting pass, the state threaded through the
/// iteration fold.
struct StepOutput {
    /// Eigenvectors of the reweighted cross-product, leading first; the next
    /// iteration's candidate directions.
    directions: Array2<f64>,
    /// Row-weighted, row-centered data matrix that produced `directions`.
    weighted: Array2<f64>,
    pprob_gamma: Array1<f64>,
    pprob_b: Array1<f64>,
    /// Features whose local FDR estimate was clamped in either test.
    fdr_clamped: usize,
}

/// One pass of the re-weighting engine and spectral updater.
///
/// Both significance tests use the same candidate directions (the first
/// `n_directions` columns of `directions`) and are independent of each
/// other, so they run concurrently.
fn reweight_step(
    dat: ArrayView2<f64>,
    full_model: ArrayView2<f64>,
    null_model: ArrayView2<f64>,
    directions: &Array2<f64>,
    n_directions: usize,
) -> Result<StepOutput, SvaError> {
    let candidates = directions.slice(s![.., ..n_directions]);

    let mod_b = augment(full_model, candidates);
    let mod0_b = augment(null_model, candidates);
    let mod_gamma = augment(null_model, candidates);

    let (b_outcome, gamma_outcome) = rayon::join(
        || posterior_alternative(dat, mod_b.view(), mod0_b.view()),
        || posterior_alternative(dat, mod_gamma.view(), null_model),
    );
    let (pprob_b, clamped_b) = b_outcome?;
    let (pprob_gamma, clamped_gamma) = gamma_outcome?;

    // High weight: looks like latent structure and does not look like the
    // variables of interest.
    let combined = Zip::from(&pprob_gamma)
        .and(&pprob_b)
        .map_collect(|&gamma, &b| gamma * (1.0 - b));

    // Weights apply per feature row, broadcast across sample columns.
    let mut weighted = dat.to_owned();
    weighted *= &combined.view().insert_axis(Axis(1));
    let samples = weighted.ncols() as f64;
    let row_means = weighted.sum_axis(Axis(1)) / samples;
    weighted -= &row_means.insert_axis(Axis(1));

    let cross = weighted.t().dot(&weighted);
    let (_, next_directions) = linalg::eigh_descending(&cross)?;

    Ok(StepOutput {
        directions: next_directions,
        weighted,
        pprob_gamma,
        pprob_b,
        fdr_clamped: clamped_b + clamped_gamma,
    })
}

/// p-values for a nested contrast, converted to posterior probabilities of a
/// genuine association (`1 − lfdr`), plus the count of clamped estimates.
fn posterior_alternative(
    dat: ArrayView2<f64>,
    model: ArrayView2<f64>,
    null_model: ArrayView2<f64>,
) -> Result<(Array1<f64>, usize), SvaError> {
    let pvalues = ftest::f_pvalues(dat, model, null_model)?;
    let estimate = lfdr::edge_lfdr(&pvalues);
    Ok((estimate.values.mapv(|v| 1.0 - v), estimate.clamped))
}

/// `[base | extra]` column concatenation.
fn augment(base: ArrayView2<f64>, extra: ArrayView2<f64>) -> Array2<f64> {
    let mut out = Array2::zeros((base.nrows(), base.ncols() + extra.ncols()));
    out.slice_mut(s![.., ..base.ncols()]).assign(&base);
    out.slice_mut(s![.., base.ncols()..]).assign(&extra);
    out
}

fn record_iteration<F: FnMut(usize)>(
    iteration: usize,
    total: usize,
    step: &StepOutput,
    warnings: &mut Vec<SvaWarning>,
    observer: &mut F,
) {
    log::info!("Surrogate variable iteration {iteration} of {total} complete.");
    if step.fdr_clamped > 0 {
        let warning = SvaWarning::DegenerateFdr {
            iteration,
            features: step.fdr_clamped,
        };
        log::warn!("{warning}");
        warnings.push(warning);
    }
    observer(iteration);
}

fn validate(
    dat: ArrayView2<f64>,
    full_model: ArrayView2<f64>,
    null_model: ArrayView2<f64>,
    config: &SvaConfig,
) -> Result<(), SvaError> {
    let samples = dat.ncols();
    if full_model.nrows() != samples || null_model.nrows() != samples {
        return Err(SvaError::DimensionMismatch {
            reason: format!(
                "data has {samples} samples but the full model has {} rows and the null model {} rows",
                full_model.nrows(),
                null_model.nrows()
            ),
        });
    }
    if config.iterations == 0 {
        return Err(SvaError::DimensionMismatch {
            reason: "iteration count must be positive".to_string(),
        });
    }
    if config.n_sv == 0 {
        return Err(SvaError::DimensionMismatch {
            reason: "at least one surrogate variable must be requested; with zero the latent-structure test would compare the null model against itself"
                .to_string(),
        });
    }
    let k1 = full_model.ncols();
    let k0 = null_model.ncols();
    if k0 >= k1 {
        return Err(SvaError::DimensionMismatch {
            reason: format!(
                "null model ({k0} columns) must be strictly nested in the full model ({k1} columns)"
            ),
        });
    }
    if k1 + config.n_sv >= samples {
        return Err(SvaError::DimensionMismatch {
            reason: format!(
                "{} surrogate variables plus {k1} full-model columns exhaust the {samples} samples' degrees of freedom",
                config.n_sv
            ),
        });
    }
    Ok(())
}

/// Numerical containment check: every null-model column must lie in the full
/// model's column space, i.e. project to nothing in its residual space.
fn check_nested(
    proj_full: &Array2<f64>,
    null_model: ArrayView2<f64>,
) -> Result<(), SvaError> {
    let norm_null = frobenius(&null_model);
    if norm_null == 0.0 {
        return Err(SvaError::DimensionMismatch {
            reason: "null model is identically zero".to_string(),
        });
    }
    let outside = proj_full.dot(&null_model);
    let leakage = frobenius(&outside.view()) / norm_null;
    if leakage > NESTEDNESS_TOLERANCE {
        return Err(SvaError::DimensionMismatch {
            reason: format!(
                "null model columns are not contained in the full model's column space (relative leakage {leakage:.3e})"
            ),
        });
    }
    Ok(())
}

fn frobenius(matrix: &ArrayView2<f64>) -> f64 {
    matrix.iter().map(|&v| v * v).sum::<f64>().sqrt()
}
