use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy shared by every stage of the reshape-reduce-cache pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("path '{}' does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("corrupt data in '{}': {reason}", path.display())]
    CorruptData { path: PathBuf, reason: String },

    #[error("invalid parameter: {0}")]
    Validation(String),

    #[error("{algorithm} failed with parameters [{params}]: {reason}")]
    Numeric {
        algorithm: String,
        params: String,
        reason: String,
    },

    /// Output row count drifted from the input row count. Internal invariant.
    #[error("row alignment lost: input had {input} rows, output has {output}")]
    Alignment { input: usize, output: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        Error::Schema(msg.into())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::CorruptData {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Short stage-agnostic label, used in log records.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not-found",
            Error::Schema(_) => "schema",
            Error::CorruptData { .. } => "corrupt-data",
            Error::Validation(_) => "validation",
            Error::Numeric { .. } => "numeric",
            Error::Alignment { .. } => "alignment",
            Error::Io(_) => "io",
            Error::Arrow(_) => "arrow",
            Error::Parquet(_) => "parquet",
            Error::Json(_) => "json",
        }
    }
}
