// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use topograph_core::{HistoryConfig, QueryConfig, ReplicationConfig};

/// Topograph Server Configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpServerConfig,
    #[serde(default)]
    pub replica: ReplicaConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpServerConfig {
    /// HTTP API listen address (e.g., "127.0.0.1:8082")
    #[serde(default = "default_http_addr")]
    pub listen_addr: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Enable CORS
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_http_addr(),
            request_timeout_secs: default_request_timeout(),
            enable_cors: default_enable_cors(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplicaConfig {
    /// Host identity of this replica. Entities it creates are owned by it.
    #[serde(default = "default_host")]
    pub host: String,

    /// History file restored on start and written on shutdown
    #[serde(default)]
    pub history_path: Option<PathBuf>,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            history_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` wins when set
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

// Default values
fn default_http_addr() -> String {
    "127.0.0.1:8082".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_enable_cors() -> bool {
    true
}

fn default_host() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

impl ServerConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment overrides
    ///
    /// Supported environment variables:
    /// - TOPOGRAPH_LISTEN_ADDR: HTTP listen address (default: 127.0.0.1:8082)
    /// - TOPOGRAPH_REQUEST_TIMEOUT: Request timeout in seconds (default: 30)
    /// - TOPOGRAPH_ENABLE_CORS: Enable CORS (default: true)
    /// - TOPOGRAPH_HOST: Host identity of the replica
    /// - TOPOGRAPH_HISTORY_PATH: History persistence file
    /// - TOPOGRAPH_LOG: Log filter directives
    /// - TOPOGRAPH_LOG_JSON: JSON log output
    /// - TOPOGRAPH_REORDER_WINDOW_MS: Reorder window for out of order edges
    /// - TOPOGRAPH_RETENTION_MS: History retention
    pub fn merge_with_env(mut self) -> Self {
        if let Ok(addr) = std::env::var("TOPOGRAPH_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }

        if let Ok(timeout) = std::env::var("TOPOGRAPH_REQUEST_TIMEOUT") {
            if let Ok(val) = timeout.parse() {
                self.server.request_timeout_secs = val;
            }
        }

        if let Ok(cors) = std::env::var("TOPOGRAPH_ENABLE_CORS") {
            self.server.enable_cors = cors.parse().unwrap_or(true);
        }

        if let Ok(host) = std::env::var("TOPOGRAPH_HOST") {
            self.replica.host = host;
        }

        if let Ok(path) = std::env::var("TOPOGRAPH_HISTORY_PATH") {
            self.replica.history_path = Some(PathBuf::from(path));
        }

        if let Ok(filter) = std::env::var("TOPOGRAPH_LOG") {
            self.logging.filter = Some(filter);
        }

        if let Ok(json) = std::env::var("TOPOGRAPH_LOG_JSON") {
            self.logging.json = json.parse().unwrap_or(false);
        }

        if let Ok(window) = std::env::var("TOPOGRAPH_REORDER_WINDOW_MS") {
            if let Ok(val) = window.parse() {
                self.replication.reorder_window_ms = val;
            }
        }

        if let Ok(retention) = std::env::var("TOPOGRAPH_RETENTION_MS") {
            if let Ok(val) = retention.parse() {
                self.history.retention_ms = Some(val);
            }
        }

        self
    }

    /// Load configuration: defaults, then the file, then the environment
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        Ok(config.merge_with_env())
    }

    /// Parse listen address as SocketAddr
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(self.server.listen_addr.parse()?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.replica.host.trim().is_empty() {
            anyhow::bail!("replica host identity must not be empty");
        }
        if self.server.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be positive");
        }

        topograph_core::config::validate(&self.history, &self.replication, &self.query)?;

        if let Some(parent) = self
            .replica
            .history_path
            .as_ref()
            .and_then(|p| p.parent())
            .filter(|p| !p.as_os_str().is_empty())
        {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(())
    }
}
