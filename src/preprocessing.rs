use ndarray::{Array2, Axis};
use rayon::prelude::*;

/// Column-wise standardization to zero mean and unit variance.
pub trait Standardize {
    /// Standardizes in place and returns the per-column `(mean, std)` that were used.
    /// Constant columns keep a scale of 1, so they end up as zeros instead of NaN.
    fn standardize(&mut self) -> Vec<(f64, f64)>;
}

impl Standardize for Array2<f64> {
    fn standardize(&mut self) -> Vec<(f64, f64)> {
        let n = self.nrows() as f64;
        self.axis_iter_mut(Axis(1))
            .into_par_iter()
            .map(|mut column| {
                if n == 0.0 {
                    return (0.0, 1.0);
                }
                let mean = column.sum() / n;
                // population variance, ddof = 0
                let var = column.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
                let std = var.sqrt();
                let scale = if std > 0.0 && std.is_finite() { std } else { 1.0 };
                column.mapv_inplace(|v| (v - mean) / scale);
                (mean, scale)
            })
            .collect()
    }
}

/// Sets every entry strictly below `threshold` to zero. Returns the number of zeroed entries.
pub fn apply_density_threshold(x: &mut Array2<f64>, threshold: f64) -> usize {
    let mut zeroed = 0usize;
    x.iter_mut().for_each(|v| {
        if *v < threshold && *v != 0.0 {
            *v = 0.0;
            zeroed += 1;
        }
    });
    zeroed
}

/// Position of the first NaN or infinite entry, as `(row, column)`.
pub fn first_non_finite(x: &Array2<f64>) -> Option<(usize, usize)> {
    x.indexed_iter()
        .find(|(_, v)| !v.is_finite())
        .map(|(idx, _)| idx)
}
