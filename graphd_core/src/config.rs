/// Configuration file support for graphd
///
/// Server settings can come from a TOML or YAML file. The format is picked
/// from the extension, and a few standard locations are searched when no
/// path is given.
use crate::error::{GraphError, GraphResult};
use crate::protocol::DEFAULT_MAX_FRAME_BYTES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 7788;

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_max_concurrent_requests() -> usize {
    num_cpus::get().max(1)
}

/// Settings of the inference server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Frames above this size close the connection
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Requests evaluated at the same time across all connections
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Abort inference after this many milliseconds (off when unset)
    #[serde(default)]
    pub inference_timeout_ms: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_frame_bytes: default_max_frame_bytes(),
            max_concurrent_requests: default_max_concurrent_requests(),
            inference_timeout_ms: None,
        }
    }
}

impl ServerConfig {
    /// Load config from a file (auto-detect format)
    pub fn from_file<P: AsRef<Path>>(path: P) -> GraphResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            GraphError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Self::from_toml(&contents),
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            _ => Self::from_toml(&contents).or_else(|_| Self::from_yaml(&contents)),
        }?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> GraphResult<Self> {
        toml::from_str(contents)
            .map_err(|e| GraphError::config(format!("Failed to parse TOML: {}", e)))
    }

    pub fn from_yaml(contents: &str) -> GraphResult<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| GraphError::config(format!("Failed to parse YAML: {}", e)))
    }

    /// Load the first config file found in the standard search paths
    ///
    /// Search order:
    /// 1. ./graphd.toml or ./graphd.yaml
    /// 2. ~/.graphd/config.toml or ~/.graphd/config.yaml
    /// 3. /etc/graphd/config.toml or /etc/graphd/config.yaml
    ///
    /// Falls back to the defaults when none exists.
    pub fn find_and_load() -> GraphResult<Self> {
        match Self::get_search_paths().into_iter().find(|p| p.exists()) {
            Some(path) => {
                log::info!("Loading config from {}", path.display());
                Self::from_file(&path)
            }
            None => {
                log::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn get_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("graphd.toml"),
            PathBuf::from("graphd.yaml"),
            PathBuf::from("graphd.yml"),
        ];

        if let Some(home) = dirs::home_dir() {
            let graphd_dir = home.join(".graphd");
            paths.push(graphd_dir.join("config.toml"));
            paths.push(graphd_dir.join("config.yaml"));
            paths.push(graphd_dir.join("config.yml"));
        }

        paths.push(PathBuf::from("/etc/graphd/config.toml"));
        paths.push(PathBuf::from("/etc/graphd/config.yaml"));

        paths
    }

    pub fn validate(&self) -> GraphResult<()> {
        if self.max_concurrent_requests == 0 {
            return Err(GraphError::config("max_concurrent_requests must be at least 1"));
        }
        if self.max_frame_bytes == 0 || self.max_frame_bytes > u32::MAX as usize {
            return Err(GraphError::config(format!(
                "max_frame_bytes must be between 1 and {}",
                u32::MAX
            )));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn inference_timeout(&self) -> Option<Duration> {
        self.inference_timeout_ms.map(Duration::from_millis)
    }
}
