//! Client configuration file format.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Management server address as written in a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolfileServerConfig {
    /// `socket`, `tcp`, `unix` or `rdma`; unset means `socket`.
    #[serde(default)]
    pub transport: Option<String>,
    /// Host name, address or socket path.
    pub host: String,
    /// 0 means the default management port.
    #[serde(default)]
    pub port: u16,
}

/// Client settings loaded from TOML or JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Volume name.
    pub volume: String,
    /// Local volfile. Exclusive with `volfile_server`.
    pub volfile: Option<PathBuf>,
    /// Management server to fetch the volfile from.
    pub volfile_server: Option<VolfileServerConfig>,
    /// Log destination.
    pub log_file: Option<PathBuf>,
    /// GlusterFS log level.
    pub log_level: u32,
    /// Management dial timeout.
    pub connect_timeout_ms: u64,
    /// Per-request timeout.
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            volume: String::new(),
            volfile: None,
            volfile_server: None,
            log_file: None,
            log_level: 7,
            connect_timeout_ms: 5000,
            request_timeout_ms: 30000,
        }
    }
}

impl ClientConfig {
    /// Loads a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: ClientConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: ClientConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }
}
