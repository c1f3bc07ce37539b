//! Eager, ordered table transforms that turn the upstream embedding file into a
//! feature table.

use std::fmt;
use std::time::Instant;

use log::{error, info};

use crate::config::Settings;
use crate::error::Result;
use crate::logging::LogTarget;
use crate::reshape::{explode_with_prefix, fix_array_length, transpose_wide};
use crate::table::Table;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// One column per item -> one row per item, see [`transpose_wide`].
    TransposeWide,
    /// Require every array to hold exactly `length` values.
    CastArray { length: usize },
    /// Array column -> scalar columns, see [`crate::reshape::explode`].
    Explode,
    /// Keep the first `n` rows.
    Head(usize),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::TransposeWide => f.write_str("transpose_wide"),
            Step::CastArray { length } => write!(f, "cast_array({})", length),
            Step::Explode => f.write_str("explode"),
            Step::Head(n) => write!(f, "head({})", n),
        }
    }
}

pub struct Pipeline {
    steps: Vec<Step>,
    id_column: String,
    array_column: String,
    column_prefix: String,
    target: LogTarget,
}

impl Pipeline {
    pub fn new(id_column: impl Into<String>, array_column: impl Into<String>, target: LogTarget) -> Self {
        Self {
            steps: Vec::new(),
            id_column: id_column.into(),
            array_column: array_column.into(),
            column_prefix: crate::reshape::COLUMN_PREFIX.to_string(),
            target,
        }
    }

    /// `[TransposeWide, Explode]` with the column names from `settings`.
    pub fn embedding_default(settings: &Settings) -> Self {
        Self::new(&settings.id_column, &settings.array_column, LogTarget::PIPELINE)
            .column_prefix(&settings.column_prefix)
            .step(Step::TransposeWide)
            .step(Step::Explode)
    }

    pub fn column_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.column_prefix = prefix.into();
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Applies every step in insertion order. The input table is consumed; each step
    /// produces a fresh table.
    pub fn run(&self, table: Table) -> Result<Table> {
        let target = self.target.as_str();
        info!(
            target: target,
            "Running {} steps on {} rows x {} columns",
            self.steps.len(),
            table.num_rows(),
            table.num_columns()
        );

        let mut current = table;
        for step in &self.steps {
            let start = Instant::now();
            current = self.apply(step, &current).map_err(|e| {
                error!(target: target, "Step {} failed: {}", step, e);
                e
            })?;
            info!(
                target: target,
                "{}: {} rows x {} columns in {:?}",
                step,
                current.num_rows(),
                current.num_columns(),
                start.elapsed()
            );
        }
        Ok(current)
    }

    fn apply(&self, step: &Step, table: &Table) -> Result<Table> {
        match step {
            Step::TransposeWide => transpose_wide(table, &self.id_column, &self.array_column),
            Step::CastArray { length } => fix_array_length(table, &self.array_column, *length),
            Step::Explode => {
                explode_with_prefix(table, &self.id_column, &self.array_column, &self.column_prefix)
            }
            Step::Head(n) => Ok(table.head(*n)),
        }
    }
}
