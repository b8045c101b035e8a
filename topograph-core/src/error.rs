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

//! Error taxonomy shared by every topograph crate

use thiserror::Error;

use crate::entity::EntityKind;
use crate::identifier::Identifier;

/// Result type for topograph operations
pub type Result<T> = std::result::Result<T, TopographError>;

/// Errors surfaced by the graph store, history index, traversal engine
/// and replication layer
#[derive(Debug, Error)]
pub enum TopographError {
    /// Referenced entity is missing or no longer live
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: Identifier },

    /// Revision or interval inconsistency found during reconciliation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed or unknown traversal step
    #[error("Query error in step {step}: {reason}")]
    Query { step: String, reason: String },

    /// Malformed envelope or replication failure
    #[error("Sync error: {0}")]
    Sync(String),

    /// Deadline exceeded
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid input or configuration
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TopographError {
    pub fn node_not_found(id: &Identifier) -> Self {
        TopographError::NotFound {
            kind: EntityKind::Node,
            id: id.clone(),
        }
    }

    pub fn edge_not_found(id: &Identifier) -> Self {
        TopographError::NotFound {
            kind: EntityKind::Edge,
            id: id.clone(),
        }
    }

    pub fn query(step: impl Into<String>, reason: impl Into<String>) -> Self {
        TopographError::Query {
            step: step.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TopographError::NotFound { .. })
    }
}

impl From<serde_json::Error> for TopographError {
    fn from(e: serde_json::Error) -> Self {
        TopographError::Serialization(e.to_string())
    }
}
