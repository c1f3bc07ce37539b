//! In-memory columnar table backed by an arrow [`RecordBatch`].

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use ndarray::Array2;
use rayon::prelude::*;

use crate::error::{Error, Result};

/// Immutable table. Every transform produces a new `Table`; nothing mutates in place.
#[derive(Debug, Clone)]
pub struct Table {
    batch: RecordBatch,
}

/// Same column names and element-wise identical columns. Schema metadata and
/// nullability flags are not compared.
impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.column_names() == other.column_names()
            && self.batch.columns() == other.batch.columns()
    }
}

impl Table {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    /// Builds a table from named columns, in the given order.
    pub fn from_columns(columns: Vec<(String, ArrayRef)>) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::schema("a table needs at least one column"));
        }
        let fields: Vec<Field> = columns
            .iter()
            .map(|(name, array)| Field::new(name, array.data_type().clone(), true))
            .collect();
        let arrays: Vec<ArrayRef> = columns.into_iter().map(|(_, array)| array).collect();
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;
        Ok(Self { batch })
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.batch.column_by_name(name).is_some()
    }

    pub fn column(&self, name: &str) -> Result<&ArrayRef> {
        self.batch
            .column_by_name(name)
            .ok_or_else(|| Error::schema(format!("column '{}' not found", name)))
    }

    /// Identifier-style column as utf8, whatever string encoding the file used.
    pub fn string_column(&self, name: &str) -> Result<StringArray> {
        let column = self.column(name)?;
        let utf8 = match column.data_type() {
            DataType::Utf8 => column.clone(),
            DataType::LargeUtf8 | DataType::Utf8View => cast(column.as_ref(), &DataType::Utf8)?,
            other => {
                return Err(Error::schema(format!(
                    "column '{}' has type {}, expected a string column",
                    name, other
                )))
            }
        };
        Ok(utf8.as_string::<i32>().clone())
    }

    /// Numeric column widened to f64. Non-numeric columns are a schema error.
    pub fn float_column(&self, name: &str) -> Result<Float64Array> {
        let column = self.column(name)?;
        if !column.data_type().is_numeric() {
            return Err(Error::schema(format!(
                "column '{}' has type {}, expected a numeric column",
                name,
                column.data_type()
            )));
        }
        let widened = cast(column.as_ref(), &DataType::Float64)?;
        Ok(widened.as_primitive::<arrow::datatypes::Float64Type>().clone())
    }

    /// Rows `[offset, offset + len)`. Out-of-range windows are a validation error.
    pub fn slice(&self, offset: usize, len: usize) -> Result<Table> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| Error::validation("row window overflows"))?;
        if end > self.num_rows() {
            return Err(Error::validation(format!(
                "row window {}..{} exceeds table of {} rows",
                offset,
                end,
                self.num_rows()
            )));
        }
        Ok(Table::new(self.batch.slice(offset, len)))
    }

    pub fn head(&self, n: usize) -> Table {
        Table::new(self.batch.slice(0, n.min(self.num_rows())))
    }

    /// Row-major matrix of the given columns. Nulls become NaN so that the
    /// finiteness checks downstream report them against the input data.
    pub fn to_matrix(&self, columns: &[String]) -> Result<Array2<f64>> {
        let n_rows = self.num_rows();
        let values: Vec<Float64Array> = columns
            .iter()
            .map(|name| self.float_column(name))
            .collect::<Result<_>>()?;

        let mut matrix = Array2::<f64>::zeros((n_rows, columns.len()));
        matrix
            .axis_iter_mut(ndarray::Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(i, mut row)| {
                for (j, column) in values.iter().enumerate() {
                    row[j] = if column.is_null(i) {
                        f64::NAN
                    } else {
                        column.value(i)
                    };
                }
            });
        Ok(matrix)
    }
}
