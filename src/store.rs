//! Parquet-backed tabular store.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Instant;

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use log::{error, info};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use crate::error::{Error, Result};
use crate::logging::LogTarget;
use crate::table::Table;

/// Loads and persists [`Table`]s as parquet files.
///
/// The store remembers the last successfully loaded table. A failed load leaves
/// that slot untouched, so there is never a half-loaded table to observe.
pub struct TabularStore {
    target: LogTarget,
    table: Option<Table>,
}

impl Default for TabularStore {
    fn default() -> Self {
        Self::new(LogTarget::STORE)
    }
}

impl TabularStore {
    pub fn new(target: LogTarget) -> Self {
        Self {
            target,
            table: None,
        }
    }

    pub fn table(&self) -> Option<&Table> {
        self.table.as_ref()
    }

    pub fn take_table(&mut self) -> Option<Table> {
        self.table.take()
    }

    /// Loads `path` and keeps it as the store's current table.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<&Table> {
        let table = self.read(path)?;
        Ok(&*self.table.insert(table))
    }

    /// Reads `path` without touching the store's current table.
    pub fn read(&self, path: impl AsRef<Path>) -> Result<Table> {
        let path = path.as_ref();
        let target = self.target.as_str();
        info!(target: target, "Checking if '{}' exists", path.display());
        if !path.exists() {
            error!(target: target, "Path '{}' does not exist.", path.display());
            return Err(Error::NotFound(path.to_path_buf()));
        }

        let start = Instant::now();
        let table = read_parquet(path).map_err(|e| {
            error!(target: target, "Error while loading parquet file '{}': {}", path.display(), e);
            e
        })?;
        info!(
            target: target,
            "Parquet file loaded: {} rows x {} columns in {:?}",
            table.num_rows(),
            table.num_columns(),
            start.elapsed()
        );
        Ok(table)
    }

    /// Writes `table` to `path`, creating missing parent directories. The file is
    /// written next to its destination and renamed into place once complete.
    pub fn save(&self, table: &Table, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let target = self.target.as_str();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let staging = staging_path(path);
        let written = write_parquet(table.batch(), &staging).and_then(|_| {
            fs::rename(&staging, path)?;
            Ok(())
        });
        if let Err(e) = written {
            error!(target: target, "Failed to write '{}': {}", path.display(), e);
            let _ = fs::remove_file(&staging);
            return Err(e);
        }

        info!(
            target: target,
            "Saved {} rows x {} columns to '{}'",
            table.num_rows(),
            table.num_columns(),
            path.display()
        );
        Ok(())
    }

    /// Writes the first `n` rows of `table` to `path` and returns the absolute path.
    pub fn save_head(&self, table: &Table, n: usize, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        self.save(&table.head(n), path)?;
        Ok(fs::canonicalize(path)?)
    }

    /// Float values of the first row, in column order. Non-numeric columns are skipped.
    pub fn first_row(&self, path: impl AsRef<Path>) -> Result<Vec<f64>> {
        let table = self.read(path)?;
        if table.num_rows() == 0 {
            return Ok(Vec::new());
        }
        let mut values = Vec::new();
        for name in table.column_names() {
            if let Ok(column) = table.float_column(&name) {
                values.push(column.value(0));
            }
        }
        Ok(values)
    }
}

fn read_parquet(path: &Path) -> Result<Table> {
    let file = File::open(path)?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| Error::corrupt(path, e))?;
    let schema = builder.schema().clone();
    let reader = builder.build().map_err(|e| Error::corrupt(path, e))?;
    let batches: Vec<RecordBatch> = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::corrupt(path, e))?;
    let batch = if batches.len() == 1 {
        batches.into_iter().next().ok_or_else(|| Error::corrupt(path, "no record batches"))?
    } else {
        concat_batches(&schema, &batches)?
    };
    if batch.num_columns() == 0 {
        return Err(Error::corrupt(path, "file has no columns"));
    }
    Ok(Table::new(batch))
}

fn write_parquet(batch: &RecordBatch, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp-{}", std::process::id()));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Float64Array, StringArray};
    use std::sync::Arc;

    fn sample() -> Table {
        Table::from_columns(vec![
            (
                "image_ID".to_string(),
                Arc::new(StringArray::from(vec!["x.png", "y.png"])) as ArrayRef,
            ),
            (
                "param_0".to_string(),
                Arc::new(Float64Array::from(vec![0.25, -1.5])) as ArrayRef,
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/table.parquet");

        let mut store = TabularStore::default();
        store.save(&sample(), &path).unwrap();
        let loaded = store.load(&path).unwrap();

        assert_eq!(loaded, &sample());
        assert!(store.table().is_some());
    }

    #[test]
    fn test_missing_path_leaves_table_unset() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TabularStore::default();
        let err = store.load(dir.path().join("nope.parquet")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(store.table().is_none());
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.parquet");
        fs::write(&path, b"definitely not parquet").unwrap();

        let mut store = TabularStore::default();
        let err = store.load(&path).unwrap_err();
        assert!(matches!(err, Error::CorruptData { .. }));
        assert!(store.table().is_none());
    }

    #[test]
    fn test_save_head_and_first_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = TabularStore::default();
        let written = store
            .save_head(&sample(), 1, dir.path().join("first_1_rows.parquet"))
            .unwrap();
        assert!(written.is_absolute());

        let head = store.read(&written).unwrap();
        assert_eq!(head.num_rows(), 1);
        assert_eq!(store.first_row(&written).unwrap(), vec![0.25]);
    }
}
