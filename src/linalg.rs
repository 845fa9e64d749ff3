//! Dense linear-algebra helpers shared by the estimation routines.
//!
//! Everything here operates on `ndarray` matrices and delegates the actual
//! factorizations to `ndarray-linalg`. Eigendecompositions are re-sorted so
//! that callers always see the leading directions first, which is the order
//! every consumer in this crate wants.

use ndarray::{Array1, Array2, ArrayView2, s};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Eigh, SVD, UPLO};
use thiserror::Error;

/// Relative eigenvalue threshold below which a direction is treated as
/// numerically absent from a spectrum.
pub const RANK_REL_TOLERANCE: f64 = 1e-12;

/// Errors from building the residual-space projector of a design matrix.
#[derive(Error, Debug)]
pub enum ProjectorError {
    #[error(
        "Design cross-product is rank deficient: rank {rank} of {ncols} columns. The design columns must be linearly independent."
    )]
    RankDeficient { rank: usize, ncols: usize },

    #[error("Eigendecomposition of the design cross-product failed: {0}")]
    Backend(#[from] LinalgError),
}

/// Eigendecomposition of a symmetric matrix with eigenpairs ordered by
/// descending eigenvalue.
pub fn eigh_descending(matrix: &Array2<f64>) -> Result<(Array1<f64>, Array2<f64>), LinalgError> {
    let (values, vectors) = matrix.eigh(UPLO::Lower)?;
    // LAPACK hands the spectrum back in ascending order.
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| {
        values[j]
            .partial_cmp(&values[i])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let sorted_values = Array1::from_iter(order.iter().map(|&i| values[i]));
    let mut sorted_vectors = Array2::zeros(vectors.dim());
    for (col, &idx) in order.iter().enumerate() {
        sorted_vectors.column_mut(col).assign(&vectors.column(idx));
    }
    Ok((sorted_values, sorted_vectors))
}

/// Number of directions numerically present in a descending eigenvalue
/// spectrum, relative to the leading eigenvalue.
pub fn spectral_rank(values: &Array1<f64>) -> usize {
    let max = values.iter().fold(0.0_f64, |acc, &v| acc.max(v.abs()));
    if max == 0.0 {
        return 0;
    }
    values.iter().filter(|&&v| v > max * RANK_REL_TOLERANCE).count()
}

/// Projector onto the orthogonal complement of the column space of `x`:
/// `I - x (xᵀx)⁻¹ xᵀ`.
///
/// The cross-product inverse is formed from its eigendecomposition, which
/// also yields the rank check: a spectrum with fewer usable directions than
/// columns means the design is degenerate and no projector exists.
pub fn residual_projector(x: ArrayView2<f64>) -> Result<Array2<f64>, ProjectorError> {
    let n = x.nrows();
    let ncols = x.ncols();
    let xtx = x.t().dot(&x);
    let (values, vectors) = eigh_descending(&xtx)?;
    let rank = spectral_rank(&values);
    if rank < ncols {
        return Err(ProjectorError::RankDeficient { rank, ncols });
    }
    // (xᵀx)⁻¹ = V diag(1/λ) Vᵀ from the already-computed eigenpairs.
    let mut scaled = vectors.clone();
    for (mut col, &val) in scaled.columns_mut().into_iter().zip(values.iter()) {
        col.mapv_inplace(|v| v / val);
    }
    let xtx_inv = scaled.dot(&vectors.t());
    let hat = x.dot(&xtx_inv).dot(&x.t());
    Ok(Array2::eye(n) - hat)
}

/// First `k` right-singular vectors of `a`, as an `a.ncols() × k` matrix with
/// columns ordered by descending singular value.
pub fn leading_right_singular_vectors(
    a: &Array2<f64>,
    k: usize,
) -> Result<Array2<f64>, LinalgError> {
    let (_, _, vt) = a.svd(false, true)?;
    let vt = vt.expect("SVD was asked for right-singular vectors");
    Ok(vt.slice(s![..k, ..]).t().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-1.0..1.0))
    }

    #[test]
    fn eigh_descending_orders_and_reconstructs() {
        let base = random_matrix(8, 5, 7);
        let sym = base.t().dot(&base);
        let (values, vectors) = eigh_descending(&sym).unwrap();
        for pair in values.windows(2) {
            assert!(pair[0] >= pair[1], "spectrum not descending: {values:?}");
        }
        let reconstructed = vectors.dot(&Array2::from_diag(&values)).dot(&vectors.t());
        for (a, b) in sym.iter().zip(reconstructed.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn residual_projector_annihilates_design() {
        let x = random_matrix(10, 3, 11);
        let proj = residual_projector(x.view()).unwrap();
        let image = proj.dot(&x);
        assert!(image.iter().all(|v| v.abs() < 1e-9));
        // Projectors are idempotent.
        let twice = proj.dot(&proj);
        for (a, b) in proj.iter().zip(twice.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn residual_projector_rejects_duplicated_column() {
        let mut x = Array2::zeros((6, 2));
        x.column_mut(0).fill(1.0);
        x.column_mut(1).fill(1.0);
        match residual_projector(x.view()) {
            Err(ProjectorError::RankDeficient { rank, ncols }) => {
                assert_eq!(rank, 1);
                assert_eq!(ncols, 2);
            }
            other => panic!("expected rank deficiency, got {other:?}"),
        }
    }

    #[test]
    fn leading_right_singular_vectors_are_orthonormal() {
        let a = random_matrix(40, 6, 3);
        let v = leading_right_singular_vectors(&a, 3).unwrap();
        assert_eq!(v.dim(), (6, 3));
        let gram = v.t().dot(&v);
        let eye: Array2<f64> = Array2::eye(3);
        for (a, b) in gram.iter().zip(eye.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn spectral_rank_counts_planted_directions() {
        let values = array![5.0, 2.0, 1e-15, 0.0];
        assert_eq!(spectral_rank(&values), 2);
        assert_eq!(spectral_rank(&Array1::zeros(3)), 0);
    }
}
