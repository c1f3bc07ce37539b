use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::cache::ParamValue;
use crate::dimred::Reducer;
use crate::error::Result;
use crate::preprocessing::apply_density_threshold;
use crate::svd::{RandomizedSvd, SvdSolver};

/// Builder for [`TruncatedSvd`].
///
/// `density_threshold` zeroes every non-zero value strictly below it before the
/// factorization (and before standardization). `0.0` disables the filter.
#[derive(Debug, Clone)]
pub struct TruncatedSvdBuilder {
    n_components: usize,
    random_state: Option<u64>,
    density_threshold: f64,
    normalize: bool,
    n_oversamples: usize,
    n_iter: usize,
}

impl Default for TruncatedSvdBuilder {
    fn default() -> Self {
        let solver = RandomizedSvd::default();
        Self {
            n_components: 3,
            random_state: None,
            density_threshold: 0.0,
            normalize: false,
            n_oversamples: solver.n_oversamples,
            n_iter: solver.n_power_iterations,
        }
    }
}

impl TruncatedSvdBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_components(mut self, n_components: usize) -> Self {
        self.n_components = n_components;
        self
    }

    pub fn random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn density_threshold(mut self, threshold: f64) -> Self {
        self.density_threshold = threshold;
        self
    }

    pub fn normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn n_oversamples(mut self, n_oversamples: usize) -> Self {
        self.n_oversamples = n_oversamples;
        self
    }

    /// Power iterations of the randomized range finder.
    pub fn n_iter(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    pub fn build(self) -> TruncatedSvd {
        TruncatedSvd {
            n_components: self.n_components,
            density_threshold: self.density_threshold,
            normalize: self.normalize,
            solver: RandomizedSvd {
                n_oversamples: self.n_oversamples,
                n_power_iterations: self.n_iter,
                seed: self.random_state,
            },
        }
    }
}

/// Low-rank approximation of the uncentered matrix. The embedding is `U * diag(S)`,
/// equivalently `X * V`.
#[derive(Debug, Clone)]
pub struct TruncatedSvd {
    n_components: usize,
    density_threshold: f64,
    normalize: bool,
    solver: RandomizedSvd,
}

/// Fitted factors of a [`TruncatedSvd`] run.
#[derive(Debug, Clone)]
pub struct TruncatedSvdModel {
    embedding: Array2<f64>,
    components: Array2<f64>,
    singular_values: Array1<f64>,
    explained_variance_ratio: Array1<f64>,
}

impl TruncatedSvd {
    pub fn fit(&self, x: ArrayView2<f64>) -> Result<TruncatedSvdModel> {
        let (n_samples, n_features) = x.dim();
        self.validate(n_samples, n_features)?;

        let svd = self.solver.compute(x, self.n_components)?;
        let embedding = &svd.u * &svd.s;

        let explained_variance = embedding.var_axis(Axis(0), 0.0);
        let total_variance = x.var_axis(Axis(0), 0.0).sum();
        let explained_variance_ratio = if total_variance > 0.0 {
            explained_variance / total_variance
        } else {
            Array1::zeros(self.n_components)
        };

        Ok(TruncatedSvdModel {
            embedding,
            components: svd.vt,
            singular_values: svd.s,
            explained_variance_ratio,
        })
    }

    pub fn density_threshold(&self) -> f64 {
        self.density_threshold
    }
}

impl TruncatedSvdModel {
    /// `n_samples x n_components`
    pub fn embedding(&self) -> &Array2<f64> {
        &self.embedding
    }

    pub fn into_embedding(self) -> Array2<f64> {
        self.embedding
    }

    pub fn components(&self) -> &Array2<f64> {
        &self.components
    }

    pub fn singular_values(&self) -> &Array1<f64> {
        &self.singular_values
    }

    pub fn explained_variance_ratio(&self) -> &Array1<f64> {
        &self.explained_variance_ratio
    }
}

impl Reducer for TruncatedSvd {
    fn name(&self) -> &'static str {
        "truncated_svd"
    }

    fn n_components(&self) -> usize {
        self.n_components
    }

    fn normalize(&self) -> bool {
        self.normalize
    }

    fn params(&self) -> Vec<ParamValue> {
        vec![
            ParamValue::from(self.n_components),
            ParamValue::from(self.normalize),
            ParamValue::from(self.solver.seed),
            ParamValue::from(self.density_threshold),
            ParamValue::from(self.solver.n_oversamples),
            ParamValue::from(self.solver.n_power_iterations),
        ]
    }

    fn prefilter(&self, x: &mut Array2<f64>) {
        if self.density_threshold > 0.0 {
            apply_density_threshold(x, self.density_threshold);
        }
    }

    fn fit_transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        Ok(self.fit(x)?.into_embedding())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn low_rank() -> Array2<f64> {
        let left = array![
            [1.0, 0.0],
            [0.0, 1.0],
            [1.0, 1.0],
            [2.0, -1.0],
            [0.5, 3.0],
            [1.5, 0.5]
        ];
        let right = array![[1.0, 2.0, 0.0, -1.0, 0.5], [0.0, 1.0, 3.0, 1.0, 2.0]];
        left.dot(&right)
    }

    #[test]
    fn test_embedding_is_projection_onto_components() {
        let x = low_rank();
        let svd = TruncatedSvdBuilder::new().n_components(2).random_state(0).build();
        let model = svd.fit(x.view()).unwrap();
        let projected = x.dot(&model.components().t());
        for i in 0..x.nrows() {
            for k in 0..2 {
                assert_abs_diff_eq!(model.embedding()[[i, k]], projected[[i, k]], epsilon = 1e-8);
            }
        }
        assert!(model.singular_values()[0] >= model.singular_values()[1]);
    }

    #[test]
    fn test_seed_is_reproducible() {
        let x = low_rank();
        let svd = TruncatedSvdBuilder::new().n_components(2).random_state(5).build();
        assert_eq!(
            svd.fit_transform(x.view()).unwrap(),
            svd.fit_transform(x.view()).unwrap()
        );
    }

    #[test]
    fn test_prefilter_respects_threshold() {
        let mut x = array![[0.05, 0.5, 0.0], [0.2, 0.01, 3.0]];
        TruncatedSvdBuilder::new().build().prefilter(&mut x);
        assert_eq!(x, array![[0.05, 0.5, 0.0], [0.2, 0.01, 3.0]]);

        TruncatedSvdBuilder::new()
            .density_threshold(0.1)
            .build()
            .prefilter(&mut x);
        assert_eq!(x, array![[0.0, 0.5, 0.0], [0.2, 0.0, 3.0]]);
    }

    #[test]
    fn test_params_distinguish_threshold() {
        let a = TruncatedSvdBuilder::new().random_state(1).build();
        let b = TruncatedSvdBuilder::new()
            .random_state(1)
            .density_threshold(0.5)
            .build();
        assert_ne!(a.params(), b.params());
    }

    #[test]
    fn test_too_many_components() {
        let x = low_rank();
        let svd = TruncatedSvdBuilder::new().n_components(6).build();
        assert!(matches!(svd.fit_transform(x.view()), Err(Error::Validation(_))));
    }
}
