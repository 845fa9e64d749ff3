//! Local false discovery rate estimation from a vector of p-values.
//!
//! Converts per-feature p-values into posterior probabilities of belonging to
//! the null distribution. The estimator works on the probit scale: p-values
//! map to normal quantiles, a kernel density estimate approximates their
//! mixture density there, and the local FDR is the ratio of the scaled null
//! density to that estimate,
//! `lfdr(x) = π₀ · φ(x) / f̂(x)`,
//! with π₀ estimated from the fraction of p-values in the [λ, 1] tail.
//!
//! Estimates are truncated at 1 and forced monotone non-decreasing in the
//! p-value, matching the reference estimator. Degenerate p-value
//! distributions can still push the density ratio to non-finite values; those
//! entries are clamped to 1 (fully null) and counted so the caller can
//! surface a diagnostic instead of propagating NaN.

use ndarray::Array1;
use statrs::function::erf::erf_inv;
use std::f64::consts::{PI, SQRT_2};

/// Tail threshold for the π₀ estimate.
const PI0_LAMBDA: f64 = 0.8;
/// P-values are pushed away from {0, 1} by this margin before the probit
/// transform; the quantile function is unbounded at the endpoints.
const P_EPSILON: f64 = 1e-8;
/// Bandwidth multiplier on top of the normal-reference rule.
const BANDWIDTH_ADJUST: f64 = 1.5;
/// Number of kernel-density grid points.
const GRID_SIZE: usize = 512;
/// Grid extension beyond the data range, in bandwidths.
const GRID_CUT: f64 = 3.0;

/// A local FDR estimate per feature, plus the number of entries that had to
/// be clamped because the density ratio was not a probability.
#[derive(Debug, Clone)]
pub struct LfdrEstimate {
    /// Posterior null probabilities, element-wise in [0, 1].
    pub values: Array1<f64>,
    /// Entries whose raw estimate was non-finite or negative.
    pub clamped: usize,
}

/// Estimate the local false discovery rate for each p-value.
pub fn edge_lfdr(pvalues: &Array1<f64>) -> LfdrEstimate {
    let m = pvalues.len();
    if m == 0 {
        return LfdrEstimate {
            values: Array1::zeros(0),
            clamped: 0,
        };
    }

    let tail = pvalues.iter().filter(|&&p| p >= PI0_LAMBDA).count();
    let pi0 = (tail as f64 / m as f64 / (1.0 - PI0_LAMBDA)).min(1.0);

    let quantiles = pvalues.mapv(|p| probit(p.clamp(P_EPSILON, 1.0 - P_EPSILON)));
    let bandwidth = nrd0_bandwidth(&quantiles) * BANDWIDTH_ADJUST;
    let density = kernel_density_at_points(&quantiles, bandwidth);

    let mut clamped = 0;
    let mut values = Array1::zeros(m);
    for i in 0..m {
        let x = quantiles[i];
        let raw = pi0 * standard_normal_pdf(x) / density[i];
        values[i] = if raw.is_finite() && raw >= 0.0 {
            raw.min(1.0)
        } else {
            clamped += 1;
            1.0
        };
    }

    enforce_monotone(pvalues, &mut values);
    LfdrEstimate { values, clamped }
}

/// Standard normal quantile function.
fn probit(p: f64) -> f64 {
    SQRT_2 * erf_inv(2.0 * p - 1.0)
}

fn standard_normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

/// Normal-reference bandwidth (Silverman's rule as R's `bw.nrd0`), with the
/// same fallback chain for degenerate spreads.
fn nrd0_bandwidth(x: &Array1<f64>) -> f64 {
    let n = x.len();
    let sd = if n > 1 {
        let mean = x.sum() / n as f64;
        let ss: f64 = x.iter().map(|&v| (v - mean) * (v - mean)).sum();
        (ss / (n - 1) as f64).sqrt()
    } else {
        0.0
    };
    let iqr = quantile(x, 0.75) - quantile(x, 0.25);
    let mut spread = sd.min(iqr / 1.349);
    if spread == 0.0 {
        spread = sd;
    }
    if spread == 0.0 {
        spread = x[0].abs();
    }
    if spread == 0.0 {
        spread = 1.0;
    }
    0.9 * spread * (n as f64).powf(-0.2)
}

/// Linear-interpolation quantile over a copy of `x` (R's default type 7).
fn quantile(x: &Array1<f64>, prob: f64) -> f64 {
    let mut sorted: Vec<f64> = x.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let h = (sorted.len() - 1) as f64 * prob;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Gaussian kernel density of `points`, evaluated back at each point.
///
/// The mass is linearly binned onto a fixed grid spanning the data range plus
/// `GRID_CUT` bandwidths, convolved with the kernel on the grid, and read off
/// by linear interpolation.
fn kernel_density_at_points(points: &Array1<f64>, bandwidth: f64) -> Array1<f64> {
    let n = points.len();
    let min = points.iter().copied().fold(f64::INFINITY, f64::min);
    let max = points.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let lo = min - GRID_CUT * bandwidth;
    let hi = max + GRID_CUT * bandwidth;
    let step = (hi - lo) / (GRID_SIZE - 1) as f64;

    let mut mass = vec![0.0_f64; GRID_SIZE];
    let weight = 1.0 / n as f64;
    for &x in points.iter() {
        let pos = (x - lo) / step;
        let idx = (pos.floor() as usize).min(GRID_SIZE - 2);
        let frac = pos - idx as f64;
        mass[idx] += weight * (1.0 - frac);
        mass[idx + 1] += weight * frac;
    }

    let mut grid_density = vec![0.0_f64; GRID_SIZE];
    for i in 0..GRID_SIZE {
        let mut acc = 0.0;
        for (j, &w) in mass.iter().enumerate() {
            if w == 0.0 {
                continue;
            }
            let z = (i as f64 - j as f64) * step / bandwidth;
            acc += w * (-0.5 * z * z).exp();
        }
        grid_density[i] = acc / (bandwidth * (2.0 * PI).sqrt());
    }

    Array1::from_shape_fn(n, |i| {
        let pos = (points[i] - lo) / step;
        let idx = (pos.floor() as usize).min(GRID_SIZE - 2);
        let frac = pos - idx as f64;
        grid_density[idx] * (1.0 - frac) + grid_density[idx + 1] * frac
    })
}

/// Make the estimates non-decreasing in the p-value by a running maximum over
/// the p-order.
fn enforce_monotone(pvalues: &Array1<f64>, values: &mut Array1<f64>) {
    let mut order: Vec<usize> = (0..pvalues.len()).collect();
    order.sort_by(|&i, &j| {
        pvalues[i]
            .partial_cmp(&pvalues[j])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut running = 0.0_f64;
    for &idx in &order {
        running = running.max(values[idx]);
        values[idx] = running;
    }
}
