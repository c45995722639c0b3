use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use system::serde_json;
use system::{ClockOutPolicy, TrackerConfig};
use thiserror::Error;

/// realtime server for learner time tracking and study-room whiteboards
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about)]
pub struct Cli {
    /// JSON config file; flags given on the command line override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// address to listen on
    #[arg(short, long)]
    pub bind: Option<String>,

    /// directory for snapshot files (state stays in memory when omitted)
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// what clock-out does while a break or lunch is running
    #[arg(long, value_enum)]
    pub clock_out_policy: Option<PolicyArg>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    Strict,
    AutoEndPause,
}

impl From<PolicyArg> for ClockOutPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Strict => ClockOutPolicy::Strict,
            PolicyArg::AutoEndPause => ClockOutPolicy::AutoEndPause,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind: String,
    pub data_dir: Option<PathBuf>,
    pub tracker: TrackerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            data_dir: None,
            tracker: TrackerConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(bind) = &cli.bind {
            config.bind = bind.clone();
        }
        if let Some(data_dir) = &cli.data_dir {
            config.data_dir = Some(data_dir.clone());
        }
        if let Some(policy) = cli.clock_out_policy {
            config.tracker.clock_out_policy = policy.into();
        }
        log::debug!("Loaded config: {:?}", config);
        Ok(config)
    }
}
