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

//! Configuration for topograph core behavior
//!
//! Every section deserializes with defaults so a partial TOML file only
//! needs to name what it overrides.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TopographError};

/// Default bound on out-of-order revision arrival (1 minute)
pub const DEFAULT_MAX_CLOCK_SKEW_MS: u64 = 60_000;

/// Default lifetime of a buffered edge waiting for its endpoints
pub const DEFAULT_REORDER_WINDOW_MS: u64 = 5_000;

/// History index behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Revisions older than the newest one by more than this are rejected
    /// instead of re-split
    pub max_clock_skew_ms: u64,

    /// Closed revisions ending further back than this are purged.
    /// None = keep forever
    pub retention_ms: Option<u64>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_clock_skew_ms: DEFAULT_MAX_CLOCK_SKEW_MS,
            retention_ms: None,
        }
    }
}

/// Replication behavior per peer connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub reorder_window_ms: u64,
    pub sync_timeout_ms: u64,
    /// Malformed envelopes tolerated before the connection is closed
    pub max_malformed_messages: u32,
    /// How often the reorder buffer is swept for expired edges
    pub expiry_interval_ms: u64,
    /// Outbound queue depth at which a warning is logged
    pub outbound_queue_warn: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            reorder_window_ms: DEFAULT_REORDER_WINDOW_MS,
            sync_timeout_ms: 10_000,
            max_malformed_messages: 10,
            expiry_interval_ms: 500,
            outbound_queue_warn: 10_000,
        }
    }
}

impl ReplicationConfig {
    pub fn reorder_window(&self) -> Duration {
        Duration::from_millis(self.reorder_window_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn expiry_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_interval_ms)
    }
}

/// Traversal engine limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub timeout_ms: u64,
    /// Working sets larger than this abort the traversal
    pub max_results: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_results: 100_000,
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Validate the core sections together
pub fn validate(
    history: &HistoryConfig,
    replication: &ReplicationConfig,
    query: &QueryConfig,
) -> Result<()> {
    if replication.reorder_window_ms == 0 {
        return Err(TopographError::Validation(
            "replication.reorder_window_ms must be > 0".into(),
        ));
    }
    if replication.expiry_interval_ms == 0 {
        return Err(TopographError::Validation(
            "replication.expiry_interval_ms must be > 0".into(),
        ));
    }
    if replication.sync_timeout_ms == 0 {
        return Err(TopographError::Validation(
            "replication.sync_timeout_ms must be > 0".into(),
        ));
    }
    if query.max_results == 0 {
        return Err(TopographError::Validation(
            "query.max_results must be > 0".into(),
        ));
    }
    if let Some(retention) = history.retention_ms {
        if retention < history.max_clock_skew_ms {
            tracing::warn!(
                retention_ms = retention,
                max_clock_skew_ms = history.max_clock_skew_ms,
                "history retention shorter than clock skew window"
            );
        }
    }
    Ok(())
}
