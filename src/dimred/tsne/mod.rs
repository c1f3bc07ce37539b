//! # t-Distributed Stochastic Neighbor Embedding
//!
//! Barnes-Hut SNE. Input affinities are computed on the `3 * perplexity` nearest
//! neighbours of every point, found with a vantage-point tree, so memory stays linear
//! in the number of rows. Repulsive forces are approximated with a space-partitioning
//! tree over the embedding; `theta` trades accuracy for speed and `theta = 0` evaluates
//! them exactly in `O(n^2)` per iteration.
//!
//! The optimiser uses early exaggeration, a momentum switch from 0.5 to 0.8 and
//! per-coordinate adaptive gains.

use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::cache::ParamValue;
use crate::dimred::{validate_components, Reducer};
use crate::error::{Error, Result};
use crate::utils::{gaussian, seeded_rng};

mod sptree;
mod vptree;

use sptree::SpTree;
use vptree::VpTree;

const PERPLEXITY_TOLERANCE: f64 = 1e-5;
const PERPLEXITY_STEPS: usize = 100;
const MIN_GAIN: f64 = 0.01;
const MIN_PROBABILITY: f64 = 1e-12;
const INITIAL_MOMENTUM: f64 = 0.5;
const FINAL_MOMENTUM: f64 = 0.8;
const MOMENTUM_SWITCH_ITER: usize = 250;
/// Each cell of the Barnes-Hut tree has `2^n_components` children.
const MAX_TREE_COMPONENTS: usize = 8;

/// Builder for [`Tsne`].
///
/// Defaults:
/// - `n_components`: 3
/// - `perplexity`: 30.0
/// - `learning_rate`: 200.0
/// - `n_iter`: 1000
/// - `early_exaggeration`: 12.0 for the first 250 iterations
/// - `theta`: 0.5 (Barnes-Hut); 0.0 computes exact gradients
/// - `random_state`: `None` (fresh seed per run)
/// - `normalize`: false
#[derive(Debug, Clone)]
pub struct TsneBuilder {
    n_components: usize,
    perplexity: f64,
    learning_rate: f64,
    n_iter: usize,
    early_exaggeration: f64,
    exaggeration_iter: usize,
    theta: f64,
    random_state: Option<u64>,
    normalize: bool,
}

impl Default for TsneBuilder {
    fn default() -> Self {
        Self {
            n_components: 3,
            perplexity: 30.0,
            learning_rate: 200.0,
            n_iter: 1000,
            early_exaggeration: 12.0,
            exaggeration_iter: 250,
            theta: 0.5,
            random_state: None,
            normalize: false,
        }
    }
}

impl TsneBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_components(mut self, n_components: usize) -> Self {
        self.n_components = n_components;
        self
    }

    /// Effective number of neighbours each point attends to. Must be below the row count.
    pub fn perplexity(mut self, perplexity: f64) -> Self {
        self.perplexity = perplexity;
        self
    }

    pub fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn n_iter(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    pub fn early_exaggeration(mut self, factor: f64, iterations: usize) -> Self {
        self.early_exaggeration = factor;
        self.exaggeration_iter = iterations;
        self
    }

    /// Barnes-Hut opening angle. Cells narrower than `theta` times their distance are
    /// treated as a single point; 0 disables the approximation.
    pub fn theta(mut self, theta: f64) -> Self {
        self.theta = theta;
        self
    }

    /// Fixes the initial embedding. Runs with the same seed and input are reproducible.
    pub fn random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn build(self) -> Tsne {
        Tsne {
            n_components: self.n_components,
            perplexity: self.perplexity,
            learning_rate: self.learning_rate,
            n_iter: self.n_iter,
            early_exaggeration: self.early_exaggeration,
            exaggeration_iter: self.exaggeration_iter,
            theta: self.theta,
            random_state: self.random_state,
            normalize: self.normalize,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tsne {
    n_components: usize,
    perplexity: f64,
    learning_rate: f64,
    n_iter: usize,
    early_exaggeration: f64,
    exaggeration_iter: usize,
    theta: f64,
    random_state: Option<u64>,
    normalize: bool,
}

/// Result of a t-SNE run.
#[derive(Debug, Clone)]
pub struct TsneEmbedding {
    pub embedding: Array2<f64>,
    /// KL(P || Q) of the final embedding.
    pub kl_divergence: f64,
}

/// Symmetric input affinities, one sorted `(column, p_ij)` list per row.
type SparseAffinities = Vec<Vec<(usize, f64)>>;

impl Tsne {
    pub fn embed(&self, x: ArrayView2<f64>) -> Result<TsneEmbedding> {
        let (n_samples, n_features) = x.dim();
        self.validate(n_samples, n_features)?;

        let p = self.input_affinities(x)?;
        let (embedding, kl_divergence) = self.optimize(&p, n_samples)?;
        Ok(TsneEmbedding {
            embedding,
            kl_divergence,
        })
    }

    fn numeric_error(&self, reason: String) -> Error {
        Error::Numeric {
            algorithm: self.name().to_string(),
            params: self.describe_params(),
            reason,
        }
    }

    fn n_neighbors(&self, n_samples: usize) -> usize {
        ((3.0 * self.perplexity).floor() as usize + 1).min(n_samples - 1)
    }

    fn input_affinities(&self, x: ArrayView2<f64>) -> Result<SparseAffinities> {
        let n = x.nrows();
        let k = self.n_neighbors(n);
        let target_entropy = self.perplexity.ln();

        let neighbours = VpTree::new(x).all_nearest(k);
        let conditional: Vec<Vec<(usize, f64)>> = neighbours
            .par_iter()
            .map(|distances| conditional_row(distances, target_entropy))
            .collect();

        if let Some(i) = conditional
            .iter()
            .position(|row| row.iter().any(|(_, p)| !p.is_finite()))
        {
            return Err(self.numeric_error(format!(
                "input affinities are not finite for row {}",
                i
            )));
        }

        let mut symmetric: SparseAffinities = vec![Vec::new(); n];
        for (i, row) in conditional.iter().enumerate() {
            for &(j, p) in row {
                symmetric[i].push((j, p));
                symmetric[j].push((i, p));
            }
        }
        let scale = 2.0 * n as f64;
        for row in symmetric.iter_mut() {
            row.sort_by_key(|&(j, _)| j);
            let mut merged: Vec<(usize, f64)> = Vec::with_capacity(row.len());
            for &(j, p) in row.iter() {
                match merged.last_mut() {
                    Some(last) if last.0 == j => last.1 += p,
                    _ => merged.push((j, p)),
                }
            }
            for entry in merged.iter_mut() {
                entry.1 = (entry.1 / scale).max(MIN_PROBABILITY);
            }
            *row = merged;
        }
        Ok(symmetric)
    }

    fn optimize(&self, p: &SparseAffinities, n: usize) -> Result<(Array2<f64>, f64)> {
        let dims = self.n_components;
        let mut rng = seeded_rng(self.random_state);
        let mut y = Array2::from_shape_simple_fn((n, dims), || 1e-4 * gaussian(&mut rng));
        let mut update = Array2::<f64>::zeros((n, dims));
        let mut gains = Array2::<f64>::ones((n, dims));

        for iter in 0..self.n_iter {
            let exaggeration = if iter < self.exaggeration_iter {
                self.early_exaggeration
            } else {
                1.0
            };
            let momentum = if iter < MOMENTUM_SWITCH_ITER {
                INITIAL_MOMENTUM
            } else {
                FINAL_MOMENTUM
            };

            let grad = gradient(&y, p, exaggeration, self.theta);

            ndarray::Zip::from(&mut update)
                .and(&mut gains)
                .and(&grad)
                .for_each(|u, g, &dy| {
                    *g = if (dy > 0.0) != (*u > 0.0) {
                        *g + 0.2
                    } else {
                        (*g * 0.8).max(MIN_GAIN)
                    };
                    *u = momentum * *u - self.learning_rate * *g * dy;
                });
            y += &update;

            if let Some(mean) = y.mean_axis(Axis(0)) {
                y -= &mean;
            }

            if y.iter().any(|v| !v.is_finite()) {
                return Err(self.numeric_error(format!(
                    "embedding diverged at iteration {}",
                    iter
                )));
            }
        }

        let kl = kl_divergence(&y, p, self.theta);
        if !kl.is_finite() {
            return Err(self.numeric_error("KL divergence is not finite".to_string()));
        }
        Ok((y, kl))
    }
}

/// Gaussian conditional probabilities `p_{j|i}` over the given neighbours, with the
/// precision found by bisection so that the entropy matches `ln(perplexity)`.
fn conditional_row(distances: &[(usize, f64)], target_entropy: f64) -> Vec<(usize, f64)> {
    if distances.is_empty() {
        return Vec::new();
    }
    let d_min = distances
        .iter()
        .map(|&(_, d)| d)
        .fold(f64::INFINITY, f64::min);

    let mut beta = 1.0;
    let mut beta_min = f64::NEG_INFINITY;
    let mut beta_max = f64::INFINITY;
    let mut probs = vec![0.0; distances.len()];

    for _ in 0..PERPLEXITY_STEPS {
        let mut sum = 0.0;
        let mut weighted = 0.0;
        for (p, &(_, d)) in probs.iter_mut().zip(distances) {
            let shifted = d - d_min;
            *p = (-shifted * beta).exp();
            sum += *p;
            weighted += shifted * *p;
        }
        let entropy = sum.ln() + beta * weighted / sum;
        for p in probs.iter_mut() {
            *p /= sum;
        }

        let diff = entropy - target_entropy;
        if diff.abs() < PERPLEXITY_TOLERANCE {
            break;
        }
        if diff > 0.0 {
            beta_min = beta;
            beta = if beta_max.is_infinite() {
                beta * 2.0
            } else {
                (beta + beta_max) / 2.0
            };
        } else {
            beta_max = beta;
            beta = if beta_min.is_infinite() {
                beta / 2.0
            } else {
                (beta + beta_min) / 2.0
            };
        }
    }

    distances
        .iter()
        .zip(probs)
        .map(|(&(j, _), p)| (j, p))
        .collect()
}

/// Student-t kernel `1 / (1 + |y_i - y_j|^2)`.
#[inline]
fn kernel(y: &Array2<f64>, i: usize, j: usize) -> f64 {
    let dist: f64 = y
        .row(i)
        .iter()
        .zip(y.row(j).iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum();
    1.0 / (1.0 + dist)
}

/// Unnormalised repulsive forces `sum_j q_ij^2 (y_i - y_j)` per row and the
/// normalisation `Z = sum_{i != j} q_ij`. Row sums are reduced in row order so the
/// result does not depend on thread scheduling.
fn repulsion(y: &Array2<f64>, theta: f64) -> (Array2<f64>, f64) {
    let (n, dims) = y.dim();
    let mut forces = Array2::<f64>::zeros((n, dims));
    let row_sums: Vec<f64> = if theta > 0.0 {
        let tree = SpTree::new(y);
        forces
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .map(|(i, mut force)| tree.repulsion(i, theta, &mut force))
            .collect()
    } else {
        forces
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .map(|(i, mut force)| {
                let yi = y.row(i);
                let mut z = 0.0;
                for j in (0..n).filter(|&j| j != i) {
                    let q = kernel(y, i, j);
                    z += q;
                    for d in 0..dims {
                        force[d] += q * q * (yi[d] - y[[j, d]]);
                    }
                }
                z
            })
            .collect()
    };
    (forces, row_sums.iter().sum())
}

fn gradient(y: &Array2<f64>, p: &SparseAffinities, exaggeration: f64, theta: f64) -> Array2<f64> {
    let (forces, z) = repulsion(y, theta);
    let mut grad = Array2::<f64>::zeros(y.dim());

    grad.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut g)| {
            let yi = y.row(i);
            for &(j, pij) in &p[i] {
                let w = exaggeration * pij * kernel(y, i, j);
                for d in 0..yi.len() {
                    g[d] += w * (yi[d] - y[[j, d]]);
                }
            }
            g.zip_mut_with(&forces.row(i), |v, &f| *v = 4.0 * (*v - f / z));
        });
    grad
}

fn kl_divergence(y: &Array2<f64>, p: &SparseAffinities, theta: f64) -> f64 {
    let (_, z) = repulsion(y, theta);
    p.iter()
        .enumerate()
        .map(|(i, row)| {
            row.iter()
                .map(|&(j, pij)| {
                    let qij = (kernel(y, i, j) / z).max(MIN_PROBABILITY);
                    pij * (pij / qij).ln()
                })
                .sum::<f64>()
        })
        .sum()
}

impl Reducer for Tsne {
    fn name(&self) -> &'static str {
        "tsne"
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
            ParamValue::from(self.perplexity),
            ParamValue::from(self.learning_rate),
            ParamValue::from(self.random_state),
            ParamValue::from(self.n_iter),
            ParamValue::from(self.early_exaggeration),
            ParamValue::from(self.exaggeration_iter),
            ParamValue::from(self.theta),
        ]
    }

    fn validate(&self, n_samples: usize, n_features: usize) -> Result<()> {
        validate_components(self.n_components, n_samples, n_features)?;
        if n_samples < 2 {
            return Err(Error::validation("t-SNE needs at least 2 rows"));
        }
        if !(self.perplexity.is_finite() && self.perplexity > 0.0) {
            return Err(Error::validation(format!(
                "perplexity must be positive, got {}",
                self.perplexity
            )));
        }
        if self.perplexity >= n_samples as f64 {
            return Err(Error::validation(format!(
                "perplexity ({}) must be less than the number of rows ({})",
                self.perplexity, n_samples
            )));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::validation(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.n_iter == 0 {
            return Err(Error::validation("n_iter must be at least 1"));
        }
        if !(self.early_exaggeration.is_finite() && self.early_exaggeration >= 1.0) {
            return Err(Error::validation(format!(
                "early_exaggeration must be >= 1, got {}",
                self.early_exaggeration
            )));
        }
        if !(self.theta.is_finite() && self.theta >= 0.0) {
            return Err(Error::validation(format!(
                "theta must be >= 0, got {}",
                self.theta
            )));
        }
        if self.theta > 0.0 && self.n_components > MAX_TREE_COMPONENTS {
            return Err(Error::validation(format!(
                "Barnes-Hut t-SNE supports at most {} components, got {}; use theta 0",
                MAX_TREE_COMPONENTS, self.n_components
            )));
        }
        Ok(())
    }

    fn fit_transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        Ok(self.embed(x)?.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::seeded_rng;
    use rand::Rng;

    /// Two well separated gaussian blobs in 10 dimensions.
    fn two_blobs(per_blob: usize) -> Array2<f64> {
        let mut rng = seeded_rng(Some(11));
        Array2::from_shape_fn((2 * per_blob, 10), |(i, _)| {
            let center = if i < per_blob { 0.0 } else { 20.0 };
            center + rng.random_range(-1.0..1.0)
        })
    }

    fn centroid_distance(y: &Array2<f64>, per_blob: usize) -> (f64, f64) {
        let a = y.slice(ndarray::s![..per_blob, ..]).mean_axis(Axis(0)).unwrap();
        let b = y.slice(ndarray::s![per_blob.., ..]).mean_axis(Axis(0)).unwrap();
        let between = (&a - &b).mapv(|v| v * v).sum().sqrt();
        let spread = y
            .slice(ndarray::s![..per_blob, ..])
            .axis_iter(Axis(0))
            .map(|row| (&row - &a).mapv(|v| v * v).sum().sqrt())
            .sum::<f64>()
            / per_blob as f64;
        (between, spread)
    }

    #[test]
    fn test_conditional_row_matches_perplexity() {
        let distances: Vec<(usize, f64)> = (0..40).map(|j| (j, j as f64 * 0.1)).collect();
        let row = conditional_row(&distances, 10.0f64.ln());
        let total: f64 = row.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-9);
        let entropy: f64 = -row
            .iter()
            .filter(|(_, p)| *p > 0.0)
            .map(|(_, p)| p * p.ln())
            .sum::<f64>();
        assert!((entropy.exp() - 10.0).abs() < 1e-2);
    }

    #[test]
    fn test_affinities_are_symmetric() {
        let x = two_blobs(10);
        let tsne = TsneBuilder::new().perplexity(5.0).build();
        let p = tsne.input_affinities(x.view()).unwrap();
        let lookup = |i: usize, j: usize| {
            p[i].iter().find(|(c, _)| *c == j).map(|(_, v)| *v).unwrap_or(0.0)
        };
        for i in 0..x.nrows() {
            for &(j, pij) in &p[i] {
                assert!((pij - lookup(j, i)).abs() < 1e-15);
            }
        }
        let total: f64 = p.iter().flatten().map(|(_, v)| v).sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_separates_blobs() {
        let per_blob = 15;
        let x = two_blobs(per_blob);
        let tsne = TsneBuilder::new()
            .n_components(2)
            .perplexity(5.0)
            .n_iter(400)
            .random_state(42)
            .build();
        let out = tsne.embed(x.view()).unwrap();
        assert_eq!(out.embedding.dim(), (2 * per_blob, 2));
        assert!(out.kl_divergence.is_finite());

        let (between, spread) = centroid_distance(&out.embedding, per_blob);
        assert!(between > 2.0 * spread, "between={} spread={}", between, spread);
    }

    #[test]
    fn test_random_state_reproducible() {
        let x = two_blobs(8);
        let tsne = TsneBuilder::new()
            .perplexity(4.0)
            .n_iter(100)
            .random_state(7)
            .build();
        let a = tsne.fit_transform(x.view()).unwrap();
        let b = tsne.fit_transform(x.view()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_validation() {
        let x = two_blobs(5);
        let too_perplexed = TsneBuilder::new().perplexity(30.0).build();
        assert!(matches!(
            too_perplexed.fit_transform(x.view()),
            Err(Error::Validation(_))
        ));
        let bad_rate = TsneBuilder::new().perplexity(3.0).learning_rate(-1.0).build();
        assert!(matches!(
            bad_rate.validate(10, 10),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_barnes_hut_repulsion_tracks_exact() {
        let mut rng = seeded_rng(Some(5));
        let y = Array2::from_shape_simple_fn((200, 2), || 5.0 * gaussian(&mut rng));

        let (exact, z_exact) = repulsion(&y, 0.0);
        let (approx, z_approx) = repulsion(&y, 0.5);
        assert!((z_exact - z_approx).abs() / z_exact < 0.05, "{} vs {}", z_exact, z_approx);

        let err = (&exact - &approx).mapv(|v| v * v).sum().sqrt();
        let norm = exact.mapv(|v| v * v).sum().sqrt();
        assert!(err / norm < 0.1, "relative force error {}", err / norm);

        // a tiny opening angle opens every cell down to the leaves
        let (tight, z_tight) = repulsion(&y, 1e-9);
        assert!((z_exact - z_tight).abs() < 1e-9 * z_exact);
        assert!((&exact - &tight).iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_coincident_embedding_points() {
        let y = Array2::from_shape_vec((4, 2), vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0])
            .unwrap();
        let (exact, z_exact) = repulsion(&y, 0.0);
        let (approx, z_approx) = repulsion(&y, 0.5);
        assert!((z_exact - z_approx).abs() < 1e-12);
        assert!((&exact - &approx).iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_exact_and_barnes_hut_both_separate_blobs() {
        let per_blob = 20;
        let x = two_blobs(per_blob);
        for theta in [0.0, 0.5] {
            let out = TsneBuilder::new()
                .n_components(2)
                .perplexity(5.0)
                .n_iter(400)
                .theta(theta)
                .random_state(3)
                .build()
                .embed(x.view())
                .unwrap();
            let (between, spread) = centroid_distance(&out.embedding, per_blob);
            assert!(between > 2.0 * spread, "theta={} between={} spread={}", theta, between, spread);
        }
    }

    #[test]
    fn test_theta_is_part_of_params() {
        let exact = TsneBuilder::new().theta(0.0).build();
        let approx = TsneBuilder::new().build();
        assert_ne!(exact.params(), approx.params());
        assert_eq!(approx.params().last(), Some(&ParamValue::Float(0.5)));
    }

    #[test]
    fn test_theta_validation() {
        let negative = TsneBuilder::new().perplexity(3.0).theta(-0.1).build();
        assert!(matches!(negative.validate(20, 5), Err(Error::Validation(_))));

        let wide = TsneBuilder::new().perplexity(3.0).n_components(9).build();
        assert!(matches!(wide.validate(20, 12), Err(Error::Validation(_))));
        let wide_exact = TsneBuilder::new().perplexity(3.0).n_components(9).theta(0.0).build();
        assert!(wide_exact.validate(20, 12).is_ok());
    }

    #[test]
    fn test_divergence_is_reported() {
        let x = two_blobs(6);
        let tsne = TsneBuilder::new()
            .perplexity(3.0)
            .learning_rate(1e300)
            .n_iter(50)
            .random_state(1)
            .build();
        match tsne.fit_transform(x.view()) {
            Err(Error::Numeric { algorithm, params, .. }) => {
                assert_eq!(algorithm, "tsne");
                assert!(params.contains("1e300"));
            }
            other => panic!("expected a numeric error, got {:?}", other.map(|m| m.dim())),
        }
    }
}
