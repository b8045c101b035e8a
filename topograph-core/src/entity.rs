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

//! Nodes, edges and their lifecycle fields

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::filter::FieldGetter;
use crate::identifier::Identifier;
use crate::metadata::Metadata;
use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Node,
    Edge,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Node => f.write_str("node"),
            EntityKind::Edge => f.write_str("edge"),
        }
    }
}

/// A topology element: interface, bridge, namespace, container, host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Node {
    #[serde(rename = "ID")]
    pub id: Identifier,
    pub host: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
}

impl Node {
    pub fn new(id: Identifier, host: impl Into<String>, metadata: Metadata, at: Timestamp) -> Self {
        Self {
            id,
            host: host.into(),
            metadata,
            revision: 1,
            created_at: at,
            updated_at: at,
            deleted_at: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Ownership relation between two nodes. `parent` owns `child`; the
/// direction is not necessarily the physical one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Edge {
    #[serde(rename = "ID")]
    pub id: Identifier,
    pub parent: Identifier,
    pub child: Identifier,
    pub host: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
}

impl Edge {
    pub fn new(
        id: Identifier,
        parent: Identifier,
        child: Identifier,
        host: impl Into<String>,
        metadata: Metadata,
        at: Timestamp,
    ) -> Self {
        Self {
            id,
            parent,
            child,
            host: host.into(),
            metadata,
            revision: 1,
            created_at: at,
            updated_at: at,
            deleted_at: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// The endpoint opposite to `id`, if `id` is one of them
    pub fn other_end(&self, id: &Identifier) -> Option<&Identifier> {
        if &self.parent == id {
            Some(&self.child)
        } else if &self.child == id {
            Some(&self.parent)
        } else {
            None
        }
    }
}

/// Either kind of entity, as stored in history and sync replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Kind", content = "Entity")]
pub enum Element {
    Node(Node),
    Edge(Edge),
}

impl Element {
    pub fn id(&self) -> &Identifier {
        match self {
            Element::Node(n) => &n.id,
            Element::Edge(e) => &e.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Element::Node(_) => EntityKind::Node,
            Element::Edge(_) => EntityKind::Edge,
        }
    }

    pub fn host(&self) -> &str {
        match self {
            Element::Node(n) => &n.host,
            Element::Edge(e) => &e.host,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Element::Node(n) => &n.metadata,
            Element::Edge(e) => &e.metadata,
        }
    }

    pub fn revision(&self) -> u64 {
        match self {
            Element::Node(n) => n.revision,
            Element::Edge(e) => e.revision,
        }
    }

    pub fn updated_at(&self) -> Timestamp {
        match self {
            Element::Node(n) => n.updated_at,
            Element::Edge(e) => e.updated_at,
        }
    }

    pub fn deleted_at(&self) -> Option<Timestamp> {
        match self {
            Element::Node(n) => n.deleted_at,
            Element::Edge(e) => e.deleted_at,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Element::Node(n) => Some(n),
            Element::Edge(_) => None,
        }
    }

    pub fn as_edge(&self) -> Option<&Edge> {
        match self {
            Element::Edge(e) => Some(e),
            Element::Node(_) => None,
        }
    }
}

impl From<Node> for Element {
    fn from(n: Node) -> Self {
        Element::Node(n)
    }
}

impl From<Edge> for Element {
    fn from(e: Edge) -> Self {
        Element::Edge(e)
    }
}

impl FieldGetter for Node {
    fn field(&self, key: &str) -> Option<Value> {
        match key {
            "ID" => Some(Value::String(self.id.to_string())),
            "Host" => Some(Value::String(self.host.clone())),
            _ => self.metadata.get_field(key).cloned(),
        }
    }
}

impl FieldGetter for Edge {
    fn field(&self, key: &str) -> Option<Value> {
        match key {
            "ID" => Some(Value::String(self.id.to_string())),
            "Host" => Some(Value::String(self.host.clone())),
            "Parent" => Some(Value::String(self.parent.to_string())),
            "Child" => Some(Value::String(self.child.to_string())),
            _ => self.metadata.get_field(key).cloned(),
        }
    }
}

impl FieldGetter for Element {
    fn field(&self, key: &str) -> Option<Value> {
        match self {
            Element::Node(n) => n.field(key),
            Element::Edge(e) => e.field(key),
        }
    }
}
