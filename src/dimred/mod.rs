//! # Dimensionality Reduction
//!
//! Three interchangeable algorithms map the numeric feature matrix to `k` output
//! dimensions while keeping row `i` of the output paired with row `i` of the input:
//!
//! - **PCA** ([`pca`]): deterministic linear projection onto the top principal axes
//! - **t-SNE** ([`tsne`]): Barnes-Hut t-distributed stochastic neighbor embedding
//! - **Truncated SVD** ([`truncated_svd`]): randomized low-rank factorization, no centering
//!
//! Every algorithm implements [`Reducer`]. The [`crate::engine::ReductionEngine`] owns the
//! shared pre/post-processing (identifier separation, standardization, reattachment), so
//! a `Reducer` only ever sees a finite numeric matrix.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::cache::ParamValue;
use crate::error::{Error, Result};

pub mod pca;
pub mod truncated_svd;
pub mod tsne;

pub use pca::{Pca, PcaBuilder};
pub use truncated_svd::{TruncatedSvd, TruncatedSvdBuilder};
pub use tsne::{Tsne, TsneBuilder};

pub trait Reducer: Send + Sync {
    /// Stable algorithm name, first component of the cache key.
    fn name(&self) -> &'static str;

    fn n_components(&self) -> usize;

    /// Standardize columns before running.
    fn normalize(&self) -> bool;

    /// Full, ordered parameter tuple. Two configurations producing different output must
    /// never share a tuple.
    fn params(&self) -> Vec<ParamValue>;

    /// Rejects parameters that cannot work for an `n_samples x n_features` input.
    /// Runs before any computation.
    fn validate(&self, n_samples: usize, n_features: usize) -> Result<()> {
        validate_components(self.n_components(), n_samples, n_features)
    }

    /// Algorithm-specific filtering applied to the raw matrix before standardization.
    fn prefilter(&self, _x: &mut Array2<f64>) {}

    /// `n_samples x n_components` output, one row per input row.
    fn fit_transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>>;

    fn describe_params(&self) -> String {
        self.params()
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub(crate) fn validate_components(k: usize, n_samples: usize, n_features: usize) -> Result<()> {
    if k == 0 {
        return Err(Error::validation("n_components must be at least 1"));
    }
    if k > n_features {
        return Err(Error::validation(format!(
            "n_components={} exceeds the {} available numeric columns",
            k, n_features
        )));
    }
    if k > n_samples {
        return Err(Error::validation(format!(
            "n_components={} exceeds the {} available rows",
            k, n_samples
        )));
    }
    Ok(())
}

/// Algorithms offered to the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Pca,
    Tsne,
    TruncatedSvd,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::Pca, Algorithm::Tsne, Algorithm::TruncatedSvd];

    /// Short label as shown in the viewer.
    pub fn label(&self) -> &'static str {
        match self {
            Algorithm::Pca => "PCA",
            Algorithm::Tsne => "T_sne",
            Algorithm::TruncatedSvd => "SVD",
        }
    }

    /// Reducer with default parameters and `k` output dimensions.
    pub fn reducer(&self, k: usize) -> Box<dyn Reducer> {
        match self {
            Algorithm::Pca => Box::new(PcaBuilder::new().n_components(k).build()),
            Algorithm::Tsne => Box::new(TsneBuilder::new().n_components(k).build()),
            Algorithm::TruncatedSvd => Box::new(TruncatedSvdBuilder::new().n_components(k).build()),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pca" => Ok(Algorithm::Pca),
            "t_sne" | "tsne" | "t-sne" => Ok(Algorithm::Tsne),
            "svd" | "truncated_svd" | "truncated-svd" => Ok(Algorithm::TruncatedSvd),
            _ => Err(Error::validation(format!("unknown reduction algorithm '{}'", s))),
        }
    }
}
