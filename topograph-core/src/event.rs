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

//! Mutation events emitted by probe collaborators

use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;
use crate::error::{Result, TopographError};
use crate::identifier::Identifier;
use crate::metadata::Metadata;
use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventOp {
    Add,
    Update,
    Delete,
}

/// `{op, kind, id, host, metadata, parent?, child?}` as delivered by a probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEvent {
    pub op: EventOp,
    pub kind: EntityKind,
    pub id: Identifier,
    pub host: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<Identifier>,
    /// Observation time; the store clock is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Timestamp>,
    /// Update replaces the whole metadata map instead of merging keys
    #[serde(default)]
    pub replace: bool,
}

impl GraphEvent {
    fn base(op: EventOp, kind: EntityKind, id: Identifier, host: &str) -> Self {
        Self {
            op,
            kind,
            id,
            host: host.to_string(),
            metadata: Metadata::new(),
            parent: None,
            child: None,
            time: None,
            replace: false,
        }
    }

    pub fn add_node(id: Identifier, host: &str, metadata: Metadata) -> Self {
        Self {
            metadata,
            ..Self::base(EventOp::Add, EntityKind::Node, id, host)
        }
    }

    pub fn update_node(id: Identifier, host: &str, metadata: Metadata) -> Self {
        Self {
            metadata,
            ..Self::base(EventOp::Update, EntityKind::Node, id, host)
        }
    }

    pub fn delete_node(id: Identifier, host: &str) -> Self {
        Self::base(EventOp::Delete, EntityKind::Node, id, host)
    }

    pub fn add_edge(
        id: Identifier,
        parent: Identifier,
        child: Identifier,
        host: &str,
        metadata: Metadata,
    ) -> Self {
        Self {
            metadata,
            parent: Some(parent),
            child: Some(child),
            ..Self::base(EventOp::Add, EntityKind::Edge, id, host)
        }
    }

    pub fn delete_edge(id: Identifier, host: &str) -> Self {
        Self::base(EventOp::Delete, EntityKind::Edge, id, host)
    }

    pub fn at(mut self, time: Timestamp) -> Self {
        self.time = Some(time);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(TopographError::Validation("event without id".into()));
        }
        if self.host.is_empty() {
            return Err(TopographError::Validation(format!(
                "event for {} has no host",
                self.id
            )));
        }
        if self.kind == EntityKind::Edge && self.op == EventOp::Add {
            match (&self.parent, &self.child) {
                (Some(_), Some(_)) => {}
                _ => {
                    return Err(TopographError::Validation(format!(
                        "edge {} added without parent and child",
                        self.id
                    )))
                }
            }
        }
        Ok(())
    }
}
