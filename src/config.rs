use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CACHE_DIR;
use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use crate::reshape::COLUMN_PREFIX;

/// Process-wide settings, read from a JSON file. Every field is optional in the file.
///
/// ```json
/// {
///   "cache_dir": ".embedscope-cache",
///   "id_column": "image_ID",
///   "images_dir": "data/imagenet-val",
///   "logging": { "level": "debug", "file": "embedscope.log" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache_dir: PathBuf,
    pub id_column: String,
    pub array_column: String,
    pub column_prefix: String,
    /// Directory the image files named by the identifier column live in.
    pub images_dir: Option<PathBuf>,
    pub fingerprint_inputs: bool,
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            id_column: "image_ID".to_string(),
            array_column: "image_params_list".to_string(),
            column_prefix: COLUMN_PREFIX.to_string(),
            images_dir: None,
            fingerprint_inputs: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| Error::corrupt(path, e))
    }

    /// Settings from `path` when given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}
