//! Configuration structures for scored
//!
//! Configuration is layered: built-in defaults, then an optional YAML/TOML
//! file, then `SCORED_*` environment variables. The binary applies its
//! command-line flags on top and calls [`ServeConfig::validate`].

use crate::error::{Result, ScoredError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment variable overrides (`SCORED_WORKERS=8`)
pub const ENV_PREFIX: &str = "SCORED";

/// Top-level configuration for the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeConfig {
    /// Directory holding `<name>.<ext>` model files
    #[serde(default)]
    pub models_dir: PathBuf,

    /// Number of replicated workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Server binding address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Append logs here instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Pid file written at startup and removed on exit
    #[serde(default = "default_pid_file")]
    pub pid_file: Option<PathBuf>,

    /// Seconds between reconciliation passes
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,

    /// Model file extension, without the dot
    #[serde(default = "default_model_extension")]
    pub model_extension: String,

    /// Pending requests each worker queues before callers wait
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Engine adapter used to load model files
    #[serde(default)]
    pub engine: EngineKind,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Engine adapter selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Plain-text linear models, no native library needed
    #[default]
    Linear,

    /// Vowpal Wabbit through its C wrapper (requires the `vw` feature)
    Vw,
}

impl std::str::FromStr for EngineKind {
    type Err = ScoredError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(EngineKind::Linear),
            "vw" => Ok(EngineKind::Vw),
            other => Err(ScoredError::config(format!("unknown engine: {}", other))),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Default value functions
fn default_workers() -> usize {
    4
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    12345
}

fn default_pid_file() -> Option<PathBuf> {
    Some(PathBuf::from("/tmp/scored.pid"))
}

fn default_reload_interval() -> u64 {
    30
}

fn default_model_extension() -> String {
    "vw".to_string()
}

fn default_queue_capacity() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::new(),
            workers: default_workers(),
            bind_address: default_bind_address(),
            port: default_port(),
            log_file: None,
            pid_file: default_pid_file(),
            reload_interval_secs: default_reload_interval(),
            model_extension: default_model_extension(),
            queue_capacity: default_queue_capacity(),
            engine: EngineKind::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ServeConfig {
    /// Load configuration from an optional file plus `SCORED_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, Self::env_source())
    }

    /// Load configuration with an explicit environment source
    pub fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ScoredError::config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }

        let config: ServeConfig = builder.add_source(env).build()?.try_deserialize()?;
        Ok(config)
    }

    fn env_source() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.models_dir.as_os_str().is_empty() {
            return Err(ScoredError::config("models directory is required"));
        }
        if self.workers == 0 {
            return Err(ScoredError::config("at least one worker is required"));
        }
        if self.reload_interval_secs == 0 {
            return Err(ScoredError::config("reload interval must be at least one second"));
        }
        if self.queue_capacity == 0 {
            return Err(ScoredError::config("queue capacity must be positive"));
        }
        if self.model_extension.trim_start_matches('.').is_empty() {
            return Err(ScoredError::config("model extension must not be empty"));
        }
        Ok(())
    }

    /// Suffix that marks a model file, including the leading dot
    pub fn model_suffix(&self) -> String {
        format!(".{}", self.model_extension.trim_start_matches('.'))
    }

    /// Get reload interval as Duration
    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }

    /// `bind_address:port`
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
