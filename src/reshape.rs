//! Table reshaping: wide-to-long transpose, array explode and its inverse.
//!
//! All functions here are pure projections. They never reorder, filter or
//! duplicate rows: row `i` of the output is row `i` of the input (or, for
//! [`transpose_wide`], column `i` of the input).

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, Float64Array, Float64Builder, ListArray, ListBuilder, StringArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::table::Table;

/// Prefix of the scalar columns produced by [`explode`].
pub const COLUMN_PREFIX: &str = "param_";

/// Deterministic name of the scalar column holding array index `index`.
pub fn column_name(prefix: &str, index: usize) -> String {
    format!("{}{}", prefix, index)
}

fn float_list_type() -> DataType {
    DataType::List(Arc::new(Field::new("item", DataType::Float64, true)))
}

/// Any list-like column (list, large list, fixed size list) widened to `List<Float64>`.
fn float_lists(table: &Table, array_column: &str) -> Result<ListArray> {
    let column = table.column(array_column)?;
    match column.data_type() {
        DataType::List(_) | DataType::LargeList(_) | DataType::FixedSizeList(_, _) => {}
        other => {
            return Err(Error::schema(format!(
                "column '{}' has type {}, expected an array column",
                array_column, other
            )))
        }
    }
    let widened = cast(column.as_ref(), &float_list_type()).map_err(|e| {
        Error::schema(format!(
            "column '{}' cannot be read as float arrays: {}",
            array_column, e
        ))
    })?;
    Ok(widened.as_list::<i32>().clone())
}

/// Length shared by every row, or a schema error naming the first offending row.
fn uniform_length(lists: &ListArray, array_column: &str) -> Result<Option<usize>> {
    let mut expected: Option<usize> = None;
    for row in 0..lists.len() {
        if lists.is_null(row) {
            return Err(Error::schema(format!(
                "column '{}' is null at row {}",
                array_column, row
            )));
        }
        let len = lists.value_length(row) as usize;
        match expected {
            None => expected = Some(len),
            Some(e) if e != len => {
                return Err(Error::schema(format!(
                    "column '{}' has arrays of length {} but row {} has length {}",
                    array_column, e, row, len
                )))
            }
            Some(_) => {}
        }
    }
    Ok(expected)
}

/// Explodes `array_column` into one scalar column per array index, named `param_0 .. param_{L-1}`.
pub fn explode(table: &Table, id_column: &str, array_column: &str) -> Result<Table> {
    explode_with_prefix(table, id_column, array_column, COLUMN_PREFIX)
}

/// [`explode`] with a caller-chosen column prefix.
///
/// The output holds `id_column` unchanged followed by the scalar columns. Arrays
/// must share one length across rows, otherwise the call fails with a schema error.
pub fn explode_with_prefix(
    table: &Table,
    id_column: &str,
    array_column: &str,
    prefix: &str,
) -> Result<Table> {
    let ids = table.column(id_column)?.clone();
    let lists = float_lists(table, array_column)?;
    let length = uniform_length(&lists, array_column)?.unwrap_or(0);

    let offsets = lists.value_offsets();
    let values = lists.values().as_primitive::<Float64Type>();
    let n_rows = lists.len();
    let has_nulls = values.null_count() > 0;

    let exploded: Vec<ArrayRef> = (0..length)
        .into_par_iter()
        .map(|j| {
            let position = |row: usize| offsets[row] as usize + j;
            let column: Float64Array = if has_nulls {
                (0..n_rows)
                    .map(|row| {
                        let p = position(row);
                        values.is_valid(p).then(|| values.value(p))
                    })
                    .collect()
            } else {
                Float64Array::from(
                    (0..n_rows)
                        .map(|row| values.value(position(row)))
                        .collect::<Vec<f64>>(),
                )
            };
            Arc::new(column) as ArrayRef
        })
        .collect();

    let mut columns = Vec::with_capacity(length + 1);
    columns.push((id_column.to_string(), ids));
    columns.extend(
        exploded
            .into_iter()
            .enumerate()
            .map(|(j, column)| (column_name(prefix, j), column)),
    );
    Table::from_columns(columns)
}

/// Scalar columns `prefix{index}` of `table`, ordered by index.
pub fn indexed_columns(table: &Table, prefix: &str) -> Vec<String> {
    let mut indexed: Vec<(usize, String)> = table
        .column_names()
        .into_iter()
        .filter_map(|name| {
            let index = name.strip_prefix(prefix)?.parse::<usize>().ok()?;
            Some((index, name))
        })
        .collect();
    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, name)| name).collect()
}

/// Inverse of [`explode`]: packs `value_columns`, in order, back into one array column.
pub fn assemble(
    table: &Table,
    id_column: &str,
    value_columns: &[String],
    array_column: &str,
) -> Result<Table> {
    let ids = table.column(id_column)?.clone();
    let columns: Vec<Float64Array> = value_columns
        .iter()
        .map(|name| table.float_column(name))
        .collect::<Result<_>>()?;

    let mut builder = ListBuilder::with_capacity(
        Float64Builder::with_capacity(table.num_rows() * columns.len()),
        table.num_rows(),
    );
    for row in 0..table.num_rows() {
        for column in &columns {
            builder
                .values()
                .append_option(column.is_valid(row).then(|| column.value(row)));
        }
        builder.append(true);
    }

    Table::from_columns(vec![
        (id_column.to_string(), ids),
        (array_column.to_string(), Arc::new(builder.finish()) as ArrayRef),
    ])
}

/// Turns a wide table (one column per item, column name = item identifier) into
/// an embedding table with one row per item, in source column order.
///
/// Two wide layouts are accepted, per column:
/// - an array column with exactly one row, the single cell being the item's vector;
/// - a numeric column, the whole column being the item's vector.
///
/// A table without columns is a schema error.
pub fn transpose_wide(table: &Table, id_column: &str, array_column: &str) -> Result<Table> {
    let names = table.column_names();
    if names.is_empty() {
        return Err(Error::schema("wide table has no columns"));
    }
    let mut builder = ListBuilder::new(Float64Builder::new());

    for name in &names {
        let column = table.column(name)?;
        let vector: Float64Array = match column.data_type() {
            DataType::List(_) | DataType::LargeList(_) | DataType::FixedSizeList(_, _) => {
                if table.num_rows() != 1 {
                    return Err(Error::schema(format!(
                        "wide table with array cells must have exactly one row, found {}",
                        table.num_rows()
                    )));
                }
                let lists = float_lists(table, name)?;
                if lists.is_null(0) {
                    return Err(Error::schema(format!("column '{}' holds a null array", name)));
                }
                lists.value(0).as_primitive::<Float64Type>().clone()
            }
            dt if dt.is_numeric() => table.float_column(name)?,
            other => {
                return Err(Error::schema(format!(
                    "wide column '{}' has type {}, expected an array or numeric column",
                    name, other
                )))
            }
        };
        builder.values().extend(vector.iter());
        builder.append(true);
    }

    let ids = StringArray::from(names);
    let lists = builder.finish();
    uniform_length(&lists, array_column)?;
    Table::from_columns(vec![
        (id_column.to_string(), Arc::new(ids) as ArrayRef),
        (array_column.to_string(), Arc::new(lists) as ArrayRef),
    ])
}

/// Checks every array in `array_column` has exactly `length` values and stores the
/// column as a fixed size list.
pub fn fix_array_length(table: &Table, array_column: &str, length: usize) -> Result<Table> {
    let lists = float_lists(table, array_column)?;
    if let Some(actual) = uniform_length(&lists, array_column)? {
        if actual != length {
            return Err(Error::schema(format!(
                "column '{}' holds arrays of length {}, expected {}",
                array_column, actual, length
            )));
        }
    }
    let fixed = cast(
        &lists,
        &DataType::FixedSizeList(
            Arc::new(Field::new("item", DataType::Float64, true)),
            length as i32,
        ),
    )?;

    let columns = table
        .column_names()
        .into_iter()
        .map(|name| -> Result<(String, ArrayRef)> {
            let column = if name == array_column {
                fixed.clone()
            } else {
                table.column(&name)?.clone()
            };
            Ok((name, column))
        })
        .collect::<Result<Vec<_>>>()?;
    Table::from_columns(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding_table(rows: &[(&str, Vec<f64>)]) -> Table {
        let mut builder = ListBuilder::new(Float64Builder::new());
        for (_, values) in rows {
            builder.values().append_slice(values);
            builder.append(true);
        }
        let ids = StringArray::from(rows.iter().map(|(id, _)| *id).collect::<Vec<_>>());
        Table::from_columns(vec![
            ("image_ID".to_string(), Arc::new(ids) as ArrayRef),
            (
                "image_params_list".to_string(),
                Arc::new(builder.finish()) as ArrayRef,
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_explode_names_and_order() {
        let table = embedding_table(&[
            ("b.jpg", vec![1.0, 2.0, 3.0]),
            ("a.jpg", vec![4.0, 5.0, 6.0]),
        ]);
        let exploded = explode(&table, "image_ID", "image_params_list").unwrap();

        assert_eq!(
            exploded.column_names(),
            vec!["image_ID", "param_0", "param_1", "param_2"]
        );
        let ids = exploded.string_column("image_ID").unwrap();
        assert_eq!(ids.value(0), "b.jpg");
        assert_eq!(ids.value(1), "a.jpg");
        assert_eq!(exploded.float_column("param_0").unwrap().value(1), 4.0);
        assert_eq!(exploded.float_column("param_2").unwrap().value(0), 3.0);
    }

    #[test]
    fn test_explode_rejects_ragged_arrays() {
        let table = embedding_table(&[("a", vec![1.0, 2.0]), ("b", vec![1.0])]);
        let err = explode(&table, "image_ID", "image_params_list").unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn test_explode_sliced_input_keeps_offsets() {
        let table = embedding_table(&[
            ("a", vec![1.0, 2.0]),
            ("b", vec![3.0, 4.0]),
            ("c", vec![5.0, 6.0]),
        ]);
        let window = table.slice(1, 2).unwrap();
        let exploded = explode(&window, "image_ID", "image_params_list").unwrap();
        assert_eq!(exploded.string_column("image_ID").unwrap().value(0), "b");
        assert_eq!(exploded.float_column("param_1").unwrap().value(1), 6.0);
    }

    #[test]
    fn test_indexed_columns_sorted_numerically() {
        let table = embedding_table(&[("a", (0..12).map(|v| v as f64).collect())]);
        let exploded = explode(&table, "image_ID", "image_params_list").unwrap();
        let columns = indexed_columns(&exploded, COLUMN_PREFIX);
        assert_eq!(columns.len(), 12);
        assert_eq!(columns[2], "param_2");
        assert_eq!(columns[11], "param_11");
    }

    #[test]
    fn test_transpose_wide_single_row() {
        let mut first = ListBuilder::new(Float64Builder::new());
        first.values().append_slice(&[0.1, 0.2]);
        first.append(true);
        let mut second = ListBuilder::new(Float64Builder::new());
        second.values().append_slice(&[0.3, 0.4]);
        second.append(true);

        let wide = Table::from_columns(vec![
            ("cat.jpg".to_string(), Arc::new(first.finish()) as ArrayRef),
            ("dog.jpg".to_string(), Arc::new(second.finish()) as ArrayRef),
        ])
        .unwrap();

        let long = transpose_wide(&wide, "image_ID", "image_params_list").unwrap();
        assert_eq!(long.num_rows(), 2);
        let ids = long.string_column("image_ID").unwrap();
        assert_eq!(ids.value(1), "dog.jpg");

        let exploded = explode(&long, "image_ID", "image_params_list").unwrap();
        assert_eq!(exploded.float_column("param_1").unwrap().value(1), 0.4);
    }

    #[test]
    fn test_transpose_wide_numeric_columns() {
        let wide = Table::from_columns(vec![
            (
                "x.png".to_string(),
                Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0])) as ArrayRef,
            ),
            (
                "y.png".to_string(),
                Arc::new(Float64Array::from(vec![4.0, 5.0, 6.0])) as ArrayRef,
            ),
        ])
        .unwrap();
        let long = transpose_wide(&wide, "image_ID", "image_params_list").unwrap();
        let exploded = explode(&long, "image_ID", "image_params_list").unwrap();
        assert_eq!(exploded.num_columns(), 4);
        assert_eq!(exploded.float_column("param_2").unwrap().value(0), 3.0);
    }

    #[test]
    fn test_transpose_wide_rejects_bad_layouts() {
        let mut lists = ListBuilder::new(Float64Builder::new());
        for row in [[0.1, 0.2], [0.3, 0.4]] {
            lists.values().append_slice(&row);
            lists.append(true);
        }
        let two_rows = Table::from_columns(vec![(
            "cat.jpg".to_string(),
            Arc::new(lists.finish()) as ArrayRef,
        )])
        .unwrap();
        assert!(matches!(
            transpose_wide(&two_rows, "image_ID", "image_params_list"),
            Err(Error::Schema(_))
        ));

        let empty = Table::new(arrow::record_batch::RecordBatch::new_empty(Arc::new(
            arrow::datatypes::Schema::empty(),
        )));
        assert!(matches!(
            transpose_wide(&empty, "image_ID", "image_params_list"),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn test_fix_array_length() {
        let table = embedding_table(&[("a", vec![1.0, 2.0, 3.0]), ("b", vec![4.0, 5.0, 6.0])]);
        let fixed = fix_array_length(&table, "image_params_list", 3).unwrap();
        assert!(matches!(
            fixed.column("image_params_list").unwrap().data_type(),
            DataType::FixedSizeList(_, 3)
        ));
        assert!(matches!(
            fix_array_length(&table, "image_params_list", 1000),
            Err(Error::Schema(_))
        ));
    }
}
