#![deny(dead_code)]
#![deny(unused_imports)]

//! Surrogate variable estimation for high-dimensional measurement matrices.
//!
//! Expression-style data sets carry systematic variation from sources nobody
//! measured: processing batches, reagent lots, environmental drift. This
//! crate estimates that latent structure as *surrogate variables* — data
//! derived covariates to include in downstream model fits — using the
//! iteratively re-weighted algorithm: seed candidate directions from the
//! residuals of the primary model, score every feature's association with the
//! candidates versus the variables of interest, re-weight the data by those
//! scores, and re-extract the leading directions, for a fixed number of
//! passes.
//!
//! [`estimate::estimate_surrogate_variables`] is the entry point;
//! [`num_sv::num_sv_be`] estimates how many surrogate variables a data set
//! supports before you ask for them.

pub mod estimate;
pub mod ftest;
pub mod lfdr;
pub mod linalg;
pub mod num_sv;

pub use estimate::{
    DEFAULT_ITERATIONS, SvaConfig, SvaError, SvaResult, SvaWarning, estimate_surrogate_variables,
    estimate_surrogate_variables_with,
};
pub use num_sv::{DEFAULT_PERMUTATIONS, num_sv_be};
