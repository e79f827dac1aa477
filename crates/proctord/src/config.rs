use std::path::{Path, PathBuf};

use proctor_core::{FrameSize, GraphOptions};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon configuration: TOML file (if any), then environment overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// TOML file the settings were loaded from.
    pub config_path: Option<PathBuf>,
    pub graph: GraphOptions,
    /// Bound of the request channel to the engine thread.
    pub channel_capacity: usize,
}

/// On-disk layout of the TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    graph: GraphOptions,
    channel_capacity: Option<usize>,
}

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: None,
            graph: GraphOptions::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from `PROCTOR_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an arbitrary variable source.
    pub fn from_vars(vars: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match vars("PROCTOR_CONFIG") {
            Some(path) => Self::load_file(Path::new(&path))?,
            None => Self::default(),
        };

        let graph = &mut config.graph;
        graph.input_size = FrameSize::new(
            var_u32(&vars, "PROCTOR_INPUT_WIDTH", graph.input_size.width),
            var_u32(&vars, "PROCTOR_INPUT_HEIGHT", graph.input_size.height),
        );
        graph.output_size = FrameSize::new(
            var_u32(&vars, "PROCTOR_OUTPUT_WIDTH", graph.output_size.width),
            var_u32(&vars, "PROCTOR_OUTPUT_HEIGHT", graph.output_size.height),
        );
        graph.sync_horizon = var_usize(&vars, "PROCTOR_SYNC_HORIZON", graph.sync_horizon);
        config.channel_capacity =
            var_usize(&vars, "PROCTOR_CHANNEL_CAPACITY", config.channel_capacity).max(1);

        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            config_path: Some(path.to_path_buf()),
            graph: file.graph,
            channel_capacity: file.channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY),
        })
    }
}

fn var_u32(vars: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    vars(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn var_usize(vars: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    vars(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
