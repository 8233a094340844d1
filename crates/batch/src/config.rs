//! Engine configuration: chunking, limits, timeouts and locations.
//!
//! Loaded from `NIGHTBATCH_*` environment variables or a JSON file; anything
//! not given keeps its default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::FaultPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    Parse {
        var: String,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {field} {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("cannot read {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("cannot parse {path}: {reason}")]
    Json { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub chunk_size: usize,
    pub skip_limit: u32,
    pub retry_limit: u32,
    pub io_timeout_secs: u64,
    pub processing_window_secs: u64,
    pub max_reported_failures: usize,
    /// JSON metadata file, used when no database URL is configured.
    pub metadata_path: PathBuf,
    pub database_url: Option<String>,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            skip_limit: 10,
            retry_limit: 3,
            io_timeout_secs: 30,
            processing_window_secs: 4 * 60 * 60,
            max_reported_failures: 10,
            metadata_path: PathBuf::from("nightbatch-metadata.json"),
            database_url: None,
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
        }
    }
}

impl BatchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source (the process environment in
    /// production, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = parsed(&lookup, "NIGHTBATCH_CHUNK_SIZE")? {
            config.chunk_size = v;
        }
        if let Some(v) = parsed(&lookup, "NIGHTBATCH_SKIP_LIMIT")? {
            config.skip_limit = v;
        }
        if let Some(v) = parsed(&lookup, "NIGHTBATCH_RETRY_LIMIT")? {
            config.retry_limit = v;
        }
        if let Some(v) = parsed(&lookup, "NIGHTBATCH_IO_TIMEOUT_SECS")? {
            config.io_timeout_secs = v;
        }
        if let Some(v) = parsed(&lookup, "NIGHTBATCH_PROCESSING_WINDOW_SECS")? {
            config.processing_window_secs = v;
        }
        if let Some(v) = parsed(&lookup, "NIGHTBATCH_MAX_REPORTED_FAILURES")? {
            config.max_reported_failures = v;
        }
        if let Some(v) = lookup("NIGHTBATCH_METADATA_PATH") {
            config.metadata_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("NIGHTBATCH_DATABASE_URL").filter(|v| !v.is_empty()) {
            config.database_url = Some(v);
        }
        if let Some(v) = lookup("NIGHTBATCH_INPUT_DIR") {
            config.input_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("NIGHTBATCH_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(v);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| ConfigError::Json {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "chunk_size",
                reason: "must be at least 1".into(),
            });
        }
        if self.io_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "io_timeout_secs",
                reason: "must be positive".into(),
            });
        }
        if self.processing_window_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "processing_window_secs",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_skip_limit(mut self, limit: u32) -> Self {
        self.skip_limit = limit;
        self
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    pub fn with_processing_window(mut self, window: Duration) -> Self {
        self.processing_window_secs = window.as_secs().max(1);
        self
    }

    pub fn with_metadata_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.metadata_path = path.into();
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.input_dir = dir.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn processing_window(&self) -> Duration {
        Duration::from_secs(self.processing_window_secs)
    }

    /// Default skip/retry table with this configuration's limits.
    pub fn fault_policy(&self) -> FaultPolicy {
        FaultPolicy::default()
            .with_skip_limit(self.skip_limit)
            .with_retry_limit(self.retry_limit)
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Parse {
                var: var.to_string(),
                value,
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = BatchConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, BatchConfig::default());
        assert_eq!(config.processing_window(), Duration::from_secs(14_400));
    }

    #[test]
    fn environment_overrides() {
        let config = BatchConfig::from_lookup(lookup(&[
            ("NIGHTBATCH_CHUNK_SIZE", "250"),
            ("NIGHTBATCH_SKIP_LIMIT", "5"),
            ("NIGHTBATCH_DATABASE_URL", "postgres://batch@localhost/nightbatch"),
        ]))
        .unwrap();
        assert_eq!(config.chunk_size, 250);
        assert_eq!(config.fault_policy().skip_limit(), 5);
        assert!(config.database_url.is_some());
    }

    #[test]
    fn bad_numbers_name_the_variable() {
        let err = BatchConfig::from_lookup(lookup(&[("NIGHTBATCH_RETRY_LIMIT", "three")])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref var, .. } if var == "NIGHTBATCH_RETRY_LIMIT"));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = BatchConfig::from_lookup(lookup(&[("NIGHTBATCH_CHUNK_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "chunk_size", .. }));
    }

    #[test]
    fn json_file_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(&path, r#"{"chunk_size": 500, "output_dir": "/data/out"}"#).unwrap();

        let config = BatchConfig::from_json_file(&path).unwrap();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.output_dir, PathBuf::from("/data/out"));
        assert_eq!(config.retry_limit, 3);
    }
}
