//! Per-feature nested-model F tests.
//!
//! This is the significance-test collaborator of the surrogate variable
//! estimation loop: given a data matrix and a nested pair of design matrices,
//! it produces one p-value per feature for the hypothesis that the columns the
//! full model adds over the null model explain real variation in that feature.
//!
//! The statistic is the classical comparison of residual sums of squares
//! under both designs,
//! `F = ((rss0 − rss1)/(df1 − df0)) / (rss1/(n − df1))`,
//! referred to an F distribution with `(df1 − df0, n − df1)` degrees of
//! freedom.

use crate::linalg::{self, ProjectorError};
use ndarray::{Array1, ArrayView2, Axis, Zip};
use statrs::StatsError;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};
use thiserror::Error;

/// Errors raised while computing per-feature F-test p-values.
#[derive(Error, Debug)]
pub enum FTestError {
    #[error(
        "Model matrices must have one row per sample: data has {samples} samples, full model has {model_rows} rows, null model has {null_rows} rows."
    )]
    SampleCountMismatch {
        samples: usize,
        model_rows: usize,
        null_rows: usize,
    },

    #[error(
        "Full model must add columns over the null model, but has {df1} columns versus {df0}."
    )]
    DegenerateContrast { df1: usize, df0: usize },

    #[error(
        "Insufficient residual degrees of freedom: {samples} samples with {df1} full-model columns."
    )]
    InsufficientDegreesOfFreedom { samples: usize, df1: usize },

    #[error("Model projection failed: {0}")]
    Projector(#[from] ProjectorError),

    #[error("F distribution rejected its degrees of freedom: {0}")]
    Distribution(#[from] StatsError),
}

/// Per-feature p-values for the nested comparison of `model` against
/// `null_model` on `dat` (features × samples).
///
/// `null_model`'s column space must be contained in `model`'s; this routine
/// checks dimensions and rank but leaves the containment check to the caller,
/// which constructs both designs.
pub fn f_pvalues(
    dat: ArrayView2<f64>,
    model: ArrayView2<f64>,
    null_model: ArrayView2<f64>,
) -> Result<Array1<f64>, FTestError> {
    let samples = dat.ncols();
    if model.nrows() != samples || null_model.nrows() != samples {
        return Err(FTestError::SampleCountMismatch {
            samples,
            model_rows: model.nrows(),
            null_rows: null_model.nrows(),
        });
    }
    let df1 = model.ncols();
    let df0 = null_model.ncols();
    if df1 <= df0 {
        return Err(FTestError::DegenerateContrast { df1, df0 });
    }
    if samples <= df1 {
        return Err(FTestError::InsufficientDegreesOfFreedom { samples, df1 });
    }

    let proj_full = linalg::residual_projector(model)?;
    let proj_null = linalg::residual_projector(null_model)?;

    let resid_full = dat.dot(&proj_full);
    let resid_null = dat.dot(&proj_null);
    let rss_full = resid_full.map_axis(Axis(1), |row| row.dot(&row));
    let rss_null = resid_null.map_axis(Axis(1), |row| row.dot(&row));

    let num_df = (df1 - df0) as f64;
    let den_df = (samples - df1) as f64;
    let dist = FisherSnedecor::new(num_df, den_df)?;

    let mut pvalues = Array1::zeros(dat.nrows());
    Zip::from(&mut pvalues)
        .and(&rss_null)
        .and(&rss_full)
        .par_for_each(|p, &rss0, &rss1| {
            let numerator = (rss0 - rss1) / num_df;
            let denominator = rss1 / den_df;
            *p = if denominator > 0.0 {
                let fstat = (numerator / denominator).max(0.0);
                (1.0 - dist.cdf(fstat)).clamp(0.0, 1.0)
            } else if numerator > 0.0 {
                // Perfect fit under the full model, none under the null.
                0.0
            } else {
                1.0
            };
        });
    Ok(pvalues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    fn two_group_design(n: usize) -> (Array2<f64>, Array2<f64>) {
        let mut full = Array2::zeros((n, 2));
        full.column_mut(0).fill(1.0);
        for i in n / 2..n {
            full[[i, 1]] = 1.0;
        }
        let null = Array2::ones((n, 1));
        (full, null)
    }

    #[test]
    fn matches_hand_computed_two_group_case() {
        // y = [1..6], groups of three: rss_null = 17.5, rss_full = 4,
        // F = 13.5 on (1, 4) df, p ≈ 0.0213.
        let dat = array![[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]];
        let (full, null) = two_group_design(6);
        let p = f_pvalues(dat.view(), full.view(), null.view()).unwrap();
        assert!((p[0] - 0.0213).abs() < 1e-3, "p = {}", p[0]);
    }

    #[test]
    fn constant_feature_is_null() {
        let dat = array![[2.0, 2.0, 2.0, 2.0, 2.0, 2.0]];
        let (full, null) = two_group_design(6);
        let p = f_pvalues(dat.view(), full.view(), null.view()).unwrap();
        assert_eq!(p[0], 1.0);
    }

    #[test]
    fn group_separated_feature_with_zero_noise_is_significant() {
        let dat = array![[0.0, 0.0, 0.0, 1.0, 1.0, 1.0]];
        let (full, null) = two_group_design(6);
        let p = f_pvalues(dat.view(), full.view(), null.view()).unwrap();
        assert_eq!(p[0], 0.0);
    }

    #[test]
    fn rejects_identical_designs() {
        let dat = array![[1.0, 2.0, 3.0, 4.0]];
        let null = Array2::ones((4, 1));
        match f_pvalues(dat.view(), null.view(), null.view()) {
            Err(FTestError::DegenerateContrast { df1: 1, df0: 1 }) => {}
            other => panic!("expected degenerate contrast, got {other:?}"),
        }
    }

    #[test]
    fn rejects_rank_deficient_model() {
        let dat = array![[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]];
        let mut full = Array2::zeros((6, 2));
        full.column_mut(0).fill(1.0);
        full.column_mut(1).fill(1.0);
        let null = Array2::ones((6, 1));
        assert!(matches!(
            f_pvalues(dat.view(), full.view(), null.view()),
            Err(FTestError::Projector(ProjectorError::RankDeficient { .. }))
        ));
    }
}
