//! Dense SVD kernels shared by the linear reductions.
//!
//! Both solvers work on an ndarray view, hand the heavy lifting to nalgebra and
//! return factors truncated to the requested rank, ordered by decreasing singular
//! value and sign-normalized with [`svd_flip`].

use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView2};
use rand::Rng;

use crate::cache::ParamValue;
use crate::error::{Error, Result};
use crate::utils::seeded_rng;

const SVD_EPS: f64 = f64::EPSILON;
const SVD_MAX_ITERATIONS: usize = 10_000;

/// Rank-`k` factorization `X ~= U diag(S) Vt`.
#[derive(Debug, Clone)]
pub struct SvdOutput {
    /// `n x k`
    pub u: Array2<f64>,
    /// `k`, descending
    pub s: Array1<f64>,
    /// `k x d`
    pub vt: Array2<f64>,
}

pub trait SvdSolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Settings that change the factors this solver produces. Empty for exact solvers.
    fn params(&self) -> Vec<ParamValue> {
        Vec::new()
    }

    fn compute(&self, matrix: ArrayView2<f64>, rank: usize) -> Result<SvdOutput>;
}

/// Full thin SVD (one-sided Jacobi/Golub-Kahan via nalgebra), then truncation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactSvd;

impl SvdSolver for ExactSvd {
    fn name(&self) -> &'static str {
        "exact_svd"
    }

    fn compute(&self, matrix: ArrayView2<f64>, rank: usize) -> Result<SvdOutput> {
        check_rank(matrix, rank)?;
        let m = to_dmatrix(matrix);
        let (u, s, vt) = decompose(m, self.name(), rank)?;
        Ok(truncate(u, s, vt, rank))
    }
}

/// Randomized range-finder SVD (Halko, Martinsson & Tropp 2011).
///
/// Projects onto `rank + n_oversamples` random directions, sharpens the range with
/// `n_power_iterations` QR-normalized power iterations and factors the small
/// projected matrix exactly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomizedSvd {
    pub n_oversamples: usize,
    pub n_power_iterations: usize,
    pub seed: Option<u64>,
}

impl Default for RandomizedSvd {
    fn default() -> Self {
        Self {
            n_oversamples: 10,
            n_power_iterations: 5,
            seed: None,
        }
    }
}

impl SvdSolver for RandomizedSvd {
    fn name(&self) -> &'static str {
        "randomized_svd"
    }

    fn params(&self) -> Vec<ParamValue> {
        vec![
            ParamValue::from(self.name()),
            ParamValue::from(self.n_oversamples),
            ParamValue::from(self.n_power_iterations),
            ParamValue::from(self.seed),
        ]
    }

    fn compute(&self, matrix: ArrayView2<f64>, rank: usize) -> Result<SvdOutput> {
        check_rank(matrix, rank)?;
        let (n, d) = matrix.dim();
        let sketch = (rank + self.n_oversamples).min(n.min(d));

        let a = to_dmatrix(matrix);
        let mut rng = seeded_rng(self.seed);
        let omega = DMatrix::<f64>::from_fn(d, sketch, |_, _| rng.random_range(-1.0..1.0));

        let mut q = orthonormalize(&a * omega);
        for _ in 0..self.n_power_iterations {
            let z = orthonormalize(a.transpose() * &q);
            q = orthonormalize(&a * z);
        }

        let b = q.transpose() * &a;
        let (u_small, s, vt) = decompose(b, self.name(), rank)?;
        let u = from_dmatrix(&q).dot(&u_small);
        Ok(truncate(u, s, vt, rank))
    }
}

fn check_rank(matrix: ArrayView2<f64>, rank: usize) -> Result<()> {
    let (n, d) = matrix.dim();
    if rank == 0 || rank > n.min(d) {
        return Err(Error::validation(format!(
            "rank {} is outside 1..={} for a {}x{} matrix",
            rank,
            n.min(d),
            n,
            d
        )));
    }
    Ok(())
}

fn orthonormalize(m: DMatrix<f64>) -> DMatrix<f64> {
    m.qr().q()
}

/// Thin SVD with singular triplets sorted by decreasing singular value.
fn decompose(
    m: DMatrix<f64>,
    solver: &str,
    rank: usize,
) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>)> {
    let (rows, cols) = m.shape();
    let numeric = |reason: &str| Error::Numeric {
        algorithm: solver.to_string(),
        params: format!("rank={}, shape={}x{}", rank, rows, cols),
        reason: reason.to_string(),
    };

    let svd = m
        .try_svd(true, true, SVD_EPS, SVD_MAX_ITERATIONS)
        .ok_or_else(|| numeric("SVD did not converge"))?;
    let u = svd.u.ok_or_else(|| numeric("left singular vectors missing"))?;
    let vt = svd.v_t.ok_or_else(|| numeric("right singular vectors missing"))?;
    let s = svd.singular_values;

    let mut order: Vec<usize> = (0..s.len()).collect();
    order.sort_by(|&a, &b| s[b].total_cmp(&s[a]));

    let u_sorted = Array2::from_shape_fn((u.nrows(), order.len()), |(i, k)| u[(i, order[k])]);
    let vt_sorted = Array2::from_shape_fn((order.len(), vt.ncols()), |(k, j)| vt[(order[k], j)]);
    let s_sorted = Array1::from_iter(order.iter().map(|&k| s[k]));
    Ok((u_sorted, s_sorted, vt_sorted))
}

fn truncate(u: Array2<f64>, s: Array1<f64>, vt: Array2<f64>, rank: usize) -> SvdOutput {
    use ndarray::s;
    let mut out = SvdOutput {
        u: u.slice(s![.., ..rank]).to_owned(),
        s: s.slice(s![..rank]).to_owned(),
        vt: vt.slice(s![..rank, ..]).to_owned(),
    };
    svd_flip(&mut out.u, &mut out.vt);
    out
}

/// Deterministic signs: the largest-magnitude entry of every row of `vt` is made positive,
/// flipping the matching column of `u` with it.
pub fn svd_flip(u: &mut Array2<f64>, vt: &mut Array2<f64>) {
    for k in 0..vt.nrows() {
        let pivot = vt
            .row(k)
            .iter()
            .copied()
            .fold(0.0f64, |best, v| if v.abs() > best.abs() { v } else { best });
        if pivot < 0.0 {
            vt.row_mut(k).mapv_inplace(|v| -v);
            u.column_mut(k).mapv_inplace(|v| -v);
        }
    }
}

pub(crate) fn to_dmatrix(x: ArrayView2<f64>) -> DMatrix<f64> {
    let (n, d) = x.dim();
    DMatrix::from_fn(n, d, |i, j| x[[i, j]])
}

pub(crate) fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn reconstruct(out: &SvdOutput) -> Array2<f64> {
        out.u.dot(&Array2::from_diag(&out.s)).dot(&out.vt)
    }

    #[test]
    fn test_exact_singular_values() {
        let a = array![[1.0, 2.0], [3.0, 4.0]];
        let out = ExactSvd.compute(a.view(), 2).unwrap();

        assert_abs_diff_eq!(out.s[0], 5.4649857, epsilon = 1e-6);
        assert_abs_diff_eq!(out.s[1], 0.3659662, epsilon = 1e-6);

        let rebuilt = reconstruct(&out);
        for i in 0..2 {
            for j in 0..2 {
                assert_abs_diff_eq!(rebuilt[[i, j]], a[[i, j]], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_exact_wide_matrix_is_sorted_and_truncated() {
        let a = array![
            [1.0, 0.0, 2.0, 0.5, 3.0],
            [0.0, 4.0, 1.0, 1.5, 0.0],
            [2.0, 1.0, 0.0, 0.0, 1.0]
        ];
        let out = ExactSvd.compute(a.view(), 2).unwrap();
        assert_eq!(out.u.dim(), (3, 2));
        assert_eq!(out.vt.dim(), (2, 5));
        assert!(out.s[0] >= out.s[1]);
    }

    #[test]
    fn test_rank_validation() {
        let a = array![[1.0, 2.0], [3.0, 4.0]];
        assert!(matches!(ExactSvd.compute(a.view(), 3), Err(Error::Validation(_))));
        assert!(matches!(ExactSvd.compute(a.view(), 0), Err(Error::Validation(_))));
    }

    #[test]
    fn test_randomized_matches_exact_on_low_rank() {
        // rank-2 matrix: randomized SVD recovers it exactly
        let left = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [2.0, -1.0], [0.5, 3.0]];
        let right = array![[1.0, 2.0, 0.0, -1.0], [0.0, 1.0, 3.0, 1.0]];
        let a = left.dot(&right);

        let exact = ExactSvd.compute(a.view(), 2).unwrap();
        let randomized = RandomizedSvd {
            seed: Some(3),
            ..RandomizedSvd::default()
        }
        .compute(a.view(), 2)
        .unwrap();

        for k in 0..2 {
            assert_abs_diff_eq!(exact.s[k], randomized.s[k], epsilon = 1e-8);
        }
        let projected_exact = a.dot(&exact.vt.t());
        let projected_random = a.dot(&randomized.vt.t());
        for i in 0..5 {
            for k in 0..2 {
                assert_abs_diff_eq!(projected_exact[[i, k]], projected_random[[i, k]], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_svd_flip_makes_pivot_positive() {
        let mut u = array![[1.0, 2.0], [3.0, 4.0]];
        let mut vt = array![[-0.9, 0.1], [0.2, 0.8]];
        svd_flip(&mut u, &mut vt);
        assert_eq!(vt.row(0).to_vec(), vec![0.9, -0.1]);
        assert_eq!(u.column(0).to_vec(), vec![-1.0, -3.0]);
        assert_eq!(vt.row(1).to_vec(), vec![0.2, 0.8]);
    }
}
