//! Viewer-facing entry point: one loaded feature table, reduced on request.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use crate::cache::{CachedReducer, ResultCache};
use crate::config::Settings;
use crate::dimred::{Algorithm, Reducer};
use crate::engine::ReductionEngine;
use crate::error::{Error, Result};
use crate::logging::LogTarget;
use crate::store::TabularStore;
use crate::table::Table;

pub struct ExplorerSession {
    table: Table,
    cache: Arc<ResultCache>,
    engine: ReductionEngine,
    id_column: String,
    images_dir: Option<PathBuf>,
    target: LogTarget,
}

impl ExplorerSession {
    pub fn new(
        table: Table,
        cache: Arc<ResultCache>,
        id_column: impl Into<String>,
        target: LogTarget,
    ) -> Self {
        Self {
            table,
            cache,
            engine: ReductionEngine::default(),
            id_column: id_column.into(),
            images_dir: None,
            target,
        }
    }

    /// Loads the feature table at `path` and wires cache and column names from `settings`.
    pub fn open(settings: &Settings, path: impl AsRef<Path>) -> Result<Self> {
        let table = TabularStore::default().read(path)?;

        let cache = ResultCache::new(&settings.cache_dir, LogTarget::CACHE)
            .fingerprint_inputs(settings.fingerprint_inputs);
        let mut session = Self::new(table, Arc::new(cache), &settings.id_column, LogTarget::SESSION);
        session.images_dir = settings.images_dir.clone();
        Ok(session)
    }

    pub fn images_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.images_dir = Some(dir.into());
        self
    }

    pub fn engine(mut self, engine: ReductionEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn row_count(&self) -> usize {
        self.table.num_rows()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.table.column_names()
    }

    /// Reduces the whole table with `algorithm`'s defaults and returns rows `rows`
    /// of the result. The cache entry covers the full table, so moving the window
    /// never recomputes.
    pub fn reduce(&self, algorithm: Algorithm, k: usize, rows: Range<usize>) -> Result<Table> {
        self.reduce_with(algorithm.reducer(k), rows)
    }

    pub fn reduce_with(&self, reducer: Box<dyn Reducer>, rows: Range<usize>) -> Result<Table> {
        let target = self.target.as_str();
        self.check_window(&rows)?;
        info!(
            target: target,
            "Reduce request: {} rows {}..{}",
            reducer.name(),
            rows.start,
            rows.end
        );
        let cached = CachedReducer::new(reducer, self.engine.clone(), Arc::clone(&self.cache));
        let reduced = cached.reduce(&self.table, &self.id_column)?;
        reduced.slice(rows.start, rows.end - rows.start)
    }

    fn check_window(&self, rows: &Range<usize>) -> Result<()> {
        if rows.start > rows.end || rows.end > self.row_count() {
            return Err(Error::validation(format!(
                "row window {}..{} is outside 0..{}",
                rows.start,
                rows.end,
                self.row_count()
            )));
        }
        Ok(())
    }

    /// Location of the image file for identifier `id`.
    pub fn image_path(&self, id: &str) -> Result<PathBuf> {
        let dir = self
            .images_dir
            .as_ref()
            .ok_or_else(|| Error::validation("no image directory configured"))?;
        let ids = self.table.string_column(&self.id_column)?;
        if !ids.iter().any(|candidate| candidate == Some(id)) {
            return Err(Error::validation(format!("unknown identifier '{}'", id)));
        }
        Ok(dir.join(id))
    }
}

/// Title of a reduced dataset as shown in the viewer, e.g. `PCA DATA 0-100`.
pub fn dataset_label(algorithm: Algorithm, rows: &Range<usize>) -> String {
    format!("{} DATA {}-{}", algorithm.label(), rows.start, rows.end)
}
