//! Process-wide log backend setup and the named targets handed to each component.
//!
//! Components never reach for a global logger name. Each one is constructed with a
//! [`LogTarget`] and tags every record with it, so filtering by `RUST_LOG=embedscope::cache=debug`
//! (or by a caller-chosen name) works without any shared state beyond the `log` facade.

use std::borrow::Cow;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogTarget(Cow<'static, str>);

impl LogTarget {
    pub const STORE: LogTarget = LogTarget(Cow::Borrowed("embedscope::store"));
    pub const PIPELINE: LogTarget = LogTarget(Cow::Borrowed("embedscope::pipeline"));
    pub const ENGINE: LogTarget = LogTarget(Cow::Borrowed("embedscope::engine"));
    pub const CACHE: LogTarget = LogTarget(Cow::Borrowed("embedscope::cache"));
    pub const SESSION: LogTarget = LogTarget(Cow::Borrowed("embedscope::session"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        LogTarget(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level filter; `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Append records to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(&self.level)
            .map_err(|_| Error::validation(format!("unknown log level '{}'", self.level)))
    }
}

/// Installs the `env_logger` backend. Returns `Ok(false)` when a logger was already
/// installed by an earlier call.
pub fn init(config: &LoggingConfig) -> Result<bool> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(config.level_filter()?);
    builder.parse_env(env_logger::Env::default());
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} - {} - {} - {} - {}",
            buf.timestamp(),
            record.file().unwrap_or("<unknown>"),
            record.line().unwrap_or(0),
            record.level(),
            record.args()
        )
    });

    if let Some(path) = &config.file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    Ok(builder.try_init().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        let config = LoggingConfig {
            level: "debug".into(),
            file: None,
        };
        assert_eq!(config.level_filter().unwrap(), LevelFilter::Debug);

        let bad = LoggingConfig {
            level: "chatty".into(),
            file: None,
        };
        assert!(matches!(bad.level_filter(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_custom_target() {
        let target = LogTarget::new(format!("viewer::{}", 3));
        assert_eq!(target.as_str(), "viewer::3");
        assert_eq!(LogTarget::CACHE.to_string(), "embedscope::cache");
    }
}
