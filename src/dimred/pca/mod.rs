use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::cache::ParamValue;
use crate::dimred::Reducer;
use crate::error::{Error, Result};
use crate::svd::{ExactSvd, SvdSolver};

pub struct PcaBuilder<S: SvdSolver = ExactSvd> {
    n_components: usize,
    normalize: bool,
    svd_solver: Arc<S>,
}

impl PcaBuilder<ExactSvd> {
    pub fn new() -> Self {
        PcaBuilder {
            n_components: 3,
            normalize: false,
            svd_solver: Arc::new(ExactSvd),
        }
    }
}

impl Default for PcaBuilder<ExactSvd> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SvdSolver> PcaBuilder<S> {
    pub fn n_components(mut self, n_components: usize) -> Self {
        self.n_components = n_components;
        self
    }

    pub fn normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn svd_solver<T: SvdSolver>(self, svd_solver: T) -> PcaBuilder<T> {
        PcaBuilder {
            n_components: self.n_components,
            normalize: self.normalize,
            svd_solver: Arc::new(svd_solver),
        }
    }

    pub fn build(self) -> Pca<S> {
        Pca {
            n_components: self.n_components,
            normalize: self.normalize,
            svd_solver: self.svd_solver,
        }
    }
}

/// Principal component analysis. Centers the data and projects it onto the
/// `n_components` directions of largest variance.
pub struct Pca<S: SvdSolver = ExactSvd> {
    n_components: usize,
    normalize: bool,
    svd_solver: Arc<S>,
}

impl<S: SvdSolver> Clone for Pca<S> {
    fn clone(&self) -> Self {
        Self {
            n_components: self.n_components,
            normalize: self.normalize,
            svd_solver: Arc::clone(&self.svd_solver),
        }
    }
}

/// Fitted principal axes.
#[derive(Debug, Clone)]
pub struct PcaModel {
    components: Array2<f64>,
    mean: Array1<f64>,
    explained_variance: Array1<f64>,
    explained_variance_ratio: Array1<f64>,
    total_variance: f64,
}

impl<S: SvdSolver> Pca<S> {
    pub fn fit(&self, x: ArrayView2<f64>) -> Result<PcaModel> {
        let (n_samples, n_features) = x.dim();
        self.validate(n_samples, n_features)?;

        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::validation("cannot fit PCA on an empty matrix"))?;
        let x_centered = center(x, &mean);

        let svd = self.svd_solver.compute(x_centered.view(), self.n_components)?;

        let ddof = if n_samples > 1 { 1.0 } else { 0.0 };
        let denom = (n_samples as f64 - ddof).max(1.0);
        let explained_variance = svd.s.mapv(|s| s * s / denom);
        let total_variance = x_centered.var_axis(Axis(0), ddof).sum();
        let explained_variance_ratio = if total_variance > 0.0 {
            &explained_variance / total_variance
        } else {
            Array1::zeros(explained_variance.len())
        };

        Ok(PcaModel {
            components: svd.vt,
            mean,
            explained_variance,
            explained_variance_ratio,
            total_variance,
        })
    }
}

fn center(x: ArrayView2<f64>, mean: &Array1<f64>) -> Array2<f64> {
    let mut x_centered = x.to_owned();
    x_centered
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut row| {
            row -= mean;
        });
    x_centered
}

impl PcaModel {
    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.components.ncols() {
            return Err(Error::validation(format!(
                "PCA was fitted on {} features, got {}",
                self.components.ncols(),
                x.ncols()
            )));
        }
        let x_centered = center(x, &self.mean);
        Ok(x_centered.dot(&self.components.t()))
    }

    /// `n_components x n_features`, one principal axis per row.
    pub fn components(&self) -> &Array2<f64> {
        &self.components
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn explained_variance(&self) -> &Array1<f64> {
        &self.explained_variance
    }

    pub fn explained_variance_ratio(&self) -> &Array1<f64> {
        &self.explained_variance_ratio
    }

    pub fn cumulative_explained_variance_ratio(&self) -> Array1<f64> {
        self.explained_variance_ratio
            .iter()
            .scan(0.0, |sum, &r| {
                *sum += r;
                Some(*sum)
            })
            .collect()
    }

    pub fn total_variance(&self) -> f64 {
        self.total_variance
    }
}

impl<S: SvdSolver> Reducer for Pca<S> {
    fn name(&self) -> &'static str {
        "pca"
    }

    fn n_components(&self) -> usize {
        self.n_components
    }

    fn normalize(&self) -> bool {
        self.normalize
    }

    fn params(&self) -> Vec<ParamValue> {
        let mut params = vec![
            ParamValue::from(self.n_components),
            ParamValue::from(self.normalize),
        ];
        params.extend(self.svd_solver.params());
        params
    }

    fn fit_transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?.transform(x)
    }
}
