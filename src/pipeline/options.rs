use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{PipelineExecuter, SingleThreadedExecuter, WorkerPoolExecuter};

/// Environment variable overriding [`PipelineOptions::executer`].
pub const EXECUTER_ENV: &str = "ROWFLOW_EXECUTER";

/// Concurrency strategy used to drive a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecuterKind {
    /// Every stage is pulled in place on the calling thread.
    SingleThreaded,
    /// Like [`ExecuterKind::SingleThreaded`], with each stage's output behind
    /// a replay cache.
    SingleThreadedCached,
    /// One worker thread per stage, connected by handoff queues.
    #[default]
    WorkerPool,
}

impl ExecuterKind {
    /// Name used in configuration files and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecuterKind::SingleThreaded => "single-threaded",
            ExecuterKind::SingleThreadedCached => "single-threaded-cached",
            ExecuterKind::WorkerPool => "worker-pool",
        }
    }

    /// Creates an executer of this kind.
    pub fn build(self) -> Arc<dyn PipelineExecuter> {
        match self {
            ExecuterKind::SingleThreaded => Arc::new(SingleThreadedExecuter::new()),
            ExecuterKind::SingleThreadedCached => Arc::new(SingleThreadedExecuter::cached()),
            ExecuterKind::WorkerPool => Arc::new(WorkerPoolExecuter::new()),
        }
    }
}

impl fmt::Display for ExecuterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecuterKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "single-threaded" => Ok(ExecuterKind::SingleThreaded),
            "single-threaded-cached" => Ok(ExecuterKind::SingleThreadedCached),
            "worker-pool" | "thread-pool" => Ok(ExecuterKind::WorkerPool),
            _ => Err(ConfigError::UnknownExecuter {
                value: value.to_string(),
            }),
        }
    }
}

/// Run-level settings for a [`super::PipelineProcess`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Executer strategy.
    pub executer: ExecuterKind,
    /// Rows between `info!` progress events per operation.
    pub progress_interval: u64,
    /// Milliseconds a blocked worker sleeps before re-checking cancellation.
    pub wait_poll_ms: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            executer: ExecuterKind::default(),
            progress_interval: 1000,
            wait_poll_ms: 10,
        }
    }
}

impl PipelineOptions {
    /// Parses options from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawOptions = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: None,
            source,
        })?;
        raw.into_options()
    }

    /// Reads options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawOptions = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
        raw.into_options()
    }

    /// Applies `ROWFLOW_EXECUTER` when it is set.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(std::env::var(EXECUTER_ENV).ok().as_deref())
    }

    fn with_overrides(mut self, executer: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(value) = executer {
            self.executer = value.parse()?;
        }
        Ok(self)
    }

    /// [`PipelineOptions::wait_poll_ms`] as a duration, never zero.
    pub fn wait_poll(&self) -> Duration {
        Duration::from_millis(self.wait_poll_ms.max(1))
    }

    /// Serializes the options back to TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let raw = RawOptions {
            executer: Some(self.executer.as_str().to_string()),
            progress_interval: Some(self.progress_interval),
            wait_poll_ms: Some(self.wait_poll_ms),
        };
        toml::to_string_pretty(&raw).map_err(|source| ConfigError::Serialize { source })
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawOptions {
    executer: Option<String>,
    progress_interval: Option<u64>,
    wait_poll_ms: Option<u64>,
}

impl RawOptions {
    fn into_options(self) -> Result<PipelineOptions, ConfigError> {
        let defaults = PipelineOptions::default();
        let executer = match self.executer.as_deref() {
            Some(value) => value.parse()?,
            None => defaults.executer,
        };
        Ok(PipelineOptions {
            executer,
            progress_interval: self.progress_interval.unwrap_or(defaults.progress_interval).max(1),
            wait_poll_ms: self.wait_poll_ms.unwrap_or(defaults.wait_poll_ms),
        })
    }
}

/// Failures loading [`PipelineOptions`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The options file could not be read.
    #[error("failed to read pipeline options {path}: {source}")]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The options were not valid TOML or had unknown keys.
    #[error("failed to parse pipeline options{}: {source}", describe_path(.path))]
    Parse {
        /// File that was parsed, if any.
        path: Option<PathBuf>,
        /// Parser error.
        source: toml::de::Error,
    },
    /// Options could not be rendered as TOML.
    #[error("failed to serialize pipeline options: {source}")]
    Serialize {
        /// Serializer error.
        source: toml::ser::Error,
    },
    /// The executer name is not one of the supported strategies.
    #[error("unknown executer '{value}'; expected single-threaded, single-threaded-cached or worker-pool")]
    UnknownExecuter {
        /// Name that was given.
        value: String,
    },
}

fn describe_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" {}", path.display()),
        None => String::new(),
    }
}
