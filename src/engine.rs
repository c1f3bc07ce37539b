//! Identifier-preserving adapter around a [`Reducer`].

use std::sync::Arc;
use std::time::Instant;

use arrow::array::{ArrayRef, Float64Array};
use log::{debug, error, info};
use ndarray::{Array2, Axis};

use crate::dimred::Reducer;
use crate::error::{Error, Result};
use crate::logging::LogTarget;
use crate::preprocessing::{first_non_finite, Standardize};
use crate::reshape::{column_name, COLUMN_PREFIX};
use crate::table::Table;

/// Runs a reducer over a feature table:
///
/// 1. split off the identifier column (absent: every column is numeric)
/// 2. validate the reducer against the matrix shape
/// 3. reject non-finite input
/// 4. reducer prefilter, then optional standardization
/// 5. `fit_transform`
/// 6. check the row count and reattach the identifier column by position
///
/// The output has columns `param_0 .. param_{k-1}` followed by the identifier.
#[derive(Debug, Clone)]
pub struct ReductionEngine {
    target: LogTarget,
}

impl Default for ReductionEngine {
    fn default() -> Self {
        Self::new(LogTarget::ENGINE)
    }
}

impl ReductionEngine {
    pub fn new(target: LogTarget) -> Self {
        Self { target }
    }

    pub fn run(&self, reducer: &dyn Reducer, table: &Table, id_column: &str) -> Result<Table> {
        let target = self.target.as_str();
        self.reduce(reducer, table, id_column).map_err(|e| {
            error!(
                target: target,
                "{} reduction failed ({}): {}",
                reducer.name(),
                e.kind(),
                e
            );
            e
        })
    }

    fn reduce(&self, reducer: &dyn Reducer, table: &Table, id_column: &str) -> Result<Table> {
        let target = self.target.as_str();
        let id = if table.has_column(id_column) {
            Some(table.column(id_column)?.clone())
        } else {
            debug!(
                target: target,
                "No '{}' column, treating all {} columns as numeric",
                id_column,
                table.num_columns()
            );
            None
        };
        let numeric: Vec<String> = table
            .column_names()
            .into_iter()
            .filter(|name| id.is_none() || name != id_column)
            .collect();

        let n_samples = table.num_rows();
        reducer.validate(n_samples, numeric.len())?;

        info!(
            target: target,
            "Running {} on {} rows x {} columns with [{}]",
            reducer.name(),
            n_samples,
            numeric.len(),
            reducer.describe_params()
        );

        let mut x = table.to_matrix(&numeric)?;
        if let Some((row, col)) = first_non_finite(&x) {
            return Err(numeric_error(
                reducer,
                format!(
                    "input data contains a missing or non-finite value at row {}, column '{}'",
                    row, numeric[col]
                ),
            ));
        }

        reducer.prefilter(&mut x);
        if reducer.normalize() {
            x.standardize();
            if let Some((row, col)) = first_non_finite(&x) {
                return Err(numeric_error(
                    reducer,
                    format!(
                        "normalization produced a non-finite value at row {}, column '{}'",
                        row, numeric[col]
                    ),
                ));
            }
        }

        let start = Instant::now();
        let reduced = reducer.fit_transform(x.view()).map_err(|e| match e {
            Error::Numeric { reason, .. } => numeric_error(reducer, reason),
            other => other,
        })?;
        debug!(
            target: target,
            "{} finished in {:?}",
            reducer.name(),
            start.elapsed()
        );

        if reduced.nrows() != n_samples {
            return Err(Error::Alignment {
                input: n_samples,
                output: reduced.nrows(),
            });
        }
        if let Some((row, col)) = first_non_finite(&reduced) {
            return Err(numeric_error(
                reducer,
                format!("output component {} is not finite at row {}", col, row),
            ));
        }

        attach(reduced, id.map(|column| (id_column.to_string(), column)))
    }
}

/// Column names [`ReductionEngine::run`] produces for `reducer` over `table`.
pub fn output_columns(reducer: &dyn Reducer, table: &Table, id_column: &str) -> Vec<String> {
    let mut names: Vec<String> = (0..reducer.n_components())
        .map(|k| column_name(COLUMN_PREFIX, k))
        .collect();
    if table.has_column(id_column) {
        names.push(id_column.to_string());
    }
    names
}

fn numeric_error(reducer: &dyn Reducer, reason: String) -> Error {
    Error::Numeric {
        algorithm: reducer.name().to_string(),
        params: reducer.describe_params(),
        reason,
    }
}

fn attach(reduced: Array2<f64>, id: Option<(String, ArrayRef)>) -> Result<Table> {
    let mut columns: Vec<(String, ArrayRef)> = reduced
        .axis_iter(Axis(1))
        .enumerate()
        .map(|(k, component)| {
            let values = Float64Array::from_iter_values(component.iter().copied());
            (column_name(COLUMN_PREFIX, k), Arc::new(values) as ArrayRef)
        })
        .collect();
    columns.extend(id);
    Table::from_columns(columns)
}
