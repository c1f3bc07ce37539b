//! # Result cache
//!
//! Reductions are memoized as parquet files in one directory, one file per
//! `(algorithm, parameter tuple)` key. A present-but-unreadable file, or one that does
//! not fit the request (another table reduced into the same directory), is treated as a
//! miss and overwritten; failing to persist a fresh result is logged and does not fail
//! the request.
//!
//! Concurrent processes sharing a directory may both compute the same key; the last
//! rename wins. There is no cross-process lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use arrow::array::Array;
use arrow::util::display::array_value_to_string;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::dimred::Reducer;
use crate::engine::{output_columns, ReductionEngine};
use crate::error::{Error, Result};
use crate::logging::LogTarget;
use crate::store::TabularStore;
use crate::table::Table;

mod key;

pub use key::{cache_key, ParamValue};

pub const DEFAULT_CACHE_DIR: &str = ".embedscope-cache";
const CACHE_EXTENSION: &str = "parquet";

pub struct ResultCache {
    dir: PathBuf,
    store: TabularStore,
    target: LogTarget,
    fingerprint_inputs: bool,
}

impl ResultCache {
    pub fn new(dir: impl Into<PathBuf>, target: LogTarget) -> Self {
        Self {
            dir: dir.into(),
            store: TabularStore::new(target.clone()),
            target,
            fingerprint_inputs: false,
        }
    }

    /// Include a digest of the input table in every key computed through
    /// [`CachedReducer`], so a changed source table never hits a stale entry.
    pub fn fingerprint_inputs(mut self, enabled: bool) -> Self {
        self.fingerprint_inputs = enabled;
        self
    }

    pub fn fingerprints_inputs(&self) -> bool {
        self.fingerprint_inputs
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, CACHE_EXTENSION))
    }

    /// Returns the cached table for `(algorithm, params)`, or runs `compute`,
    /// persists its result and returns it.
    pub fn with_cache<F>(&self, algorithm: &str, params: &[ParamValue], compute: F) -> Result<Table>
    where
        F: FnOnce() -> Result<Table>,
    {
        self.lookup_or_compute(&cache_key(algorithm, params), compute)
    }

    pub fn lookup_or_compute<F>(&self, key: &str, compute: F) -> Result<Table>
    where
        F: FnOnce() -> Result<Table>,
    {
        self.lookup_or_compute_checked(key, |_| Ok(()), compute)
    }

    /// Like [`ResultCache::lookup_or_compute`], but a stored table rejected by `accept`
    /// is discarded like an unreadable one: recomputed and overwritten.
    pub fn lookup_or_compute_checked<A, F>(&self, key: &str, accept: A, compute: F) -> Result<Table>
    where
        A: FnOnce(&Table) -> Result<()>,
        F: FnOnce() -> Result<Table>,
    {
        let target = self.target.as_str();
        let path = self.path_for(key);

        if path.exists() {
            match self.store.read(&path).and_then(|table| accept(&table).map(|_| table)) {
                Ok(table) => {
                    info!(target: target, "Cache hit for '{}'", key);
                    return Ok(table);
                }
                Err(e) => warn!(
                    target: target,
                    "Discarding cache entry '{}' ({}): {}",
                    path.display(),
                    e.kind(),
                    e
                ),
            }
        } else {
            debug!(target: target, "No cache entry at '{}'", path.display());
        }

        info!(target: target, "Cache miss for '{}', computing", key);
        let start = Instant::now();
        let table = compute()?;
        debug!(target: target, "Computed '{}' in {:?}", key, start.elapsed());

        if let Err(e) = self.store.save(&table, &path) {
            warn!(
                target: target,
                "Could not persist cache entry '{}': {}",
                path.display(),
                e
            );
        }
        Ok(table)
    }
}

/// SHA-256 over column names and every cell, truncated to 16 hex characters.
pub fn fingerprint(table: &Table) -> Result<String> {
    let mut hasher = Sha256::new();
    for name in table.column_names() {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        if let Ok(values) = table.float_column(&name) {
            for i in 0..values.len() {
                let v = if values.is_null(i) { f64::NAN } else { values.value(i) };
                hasher.update(v.to_le_bytes());
            }
        } else {
            let column = table.column(&name)?;
            for i in 0..column.len() {
                hasher.update(array_value_to_string(column.as_ref(), i)?.as_bytes());
                hasher.update([0u8]);
            }
        }
    }
    let digest = hasher.finalize();
    Ok(hex::encode(&digest[..8]))
}

/// A [`Reducer`] whose results go through a [`ResultCache`].
pub struct CachedReducer {
    reducer: Box<dyn Reducer>,
    engine: ReductionEngine,
    cache: Arc<ResultCache>,
}

impl CachedReducer {
    pub fn new(reducer: Box<dyn Reducer>, engine: ReductionEngine, cache: Arc<ResultCache>) -> Self {
        Self {
            reducer,
            engine,
            cache,
        }
    }

    pub fn reducer(&self) -> &dyn Reducer {
        self.reducer.as_ref()
    }

    /// Key this reducer uses for `table`.
    pub fn key(&self, table: &Table) -> Result<String> {
        let mut key = cache_key(self.reducer.name(), &self.reducer.params());
        if self.cache.fingerprints_inputs() {
            key.push_str("_fp-");
            key.push_str(&fingerprint(table)?);
        }
        Ok(key)
    }

    /// Cached entries must match `table`: same row count, the columns the engine would
    /// produce and, when present, the same identifiers in the same order. Anything else
    /// is a stale entry and gets recomputed.
    pub fn reduce(&self, table: &Table, id_column: &str) -> Result<Table> {
        let key = self.key(table)?;
        self.cache.lookup_or_compute_checked(
            &key,
            |cached| self.check_entry(cached, table, id_column),
            || self.engine.run(self.reducer.as_ref(), table, id_column),
        )
    }

    fn check_entry(&self, cached: &Table, table: &Table, id_column: &str) -> Result<()> {
        if cached.num_rows() != table.num_rows() {
            return Err(Error::schema(format!(
                "entry has {} rows, input has {}",
                cached.num_rows(),
                table.num_rows()
            )));
        }
        let expected = output_columns(self.reducer.as_ref(), table, id_column);
        if cached.column_names() != expected {
            return Err(Error::schema(format!(
                "entry has columns {:?}, expected {:?}",
                cached.column_names(),
                expected
            )));
        }
        if table.has_column(id_column)
            && cached.column(id_column)?.as_ref() != table.column(id_column)?.as_ref()
        {
            return Err(Error::schema(format!(
                "entry identifiers in '{}' differ from the input",
                id_column
            )));
        }
        Ok(())
    }
}
