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

//! Sync wire envelope
//!
//! Every frame exchanged between replicas is one JSON [`Envelope`]. The
//! payload shape depends on the message type and is decoded into a typed
//! [`SyncMessage`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use topograph_core::{Edge, HlcTimestamp, Node, Result, Timestamp, TopographError};
use topograph_storage::GraphChange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    SyncRequest,
    SyncReply,
    HostGraphDeleted,
    NodeAdded,
    NodeUpdated,
    NodeDeleted,
    EdgeAdded,
    EdgeUpdated,
    EdgeDeleted,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::SyncRequest => "SyncRequest",
            MessageType::SyncReply => "SyncReply",
            MessageType::HostGraphDeleted => "HostGraphDeleted",
            MessageType::NodeAdded => "NodeAdded",
            MessageType::NodeUpdated => "NodeUpdated",
            MessageType::NodeDeleted => "NodeDeleted",
            MessageType::EdgeAdded => "EdgeAdded",
            MessageType::EdgeUpdated => "EdgeUpdated",
            MessageType::EdgeDeleted => "EdgeDeleted",
        }
    }

    /// True for the six per-entity mutation messages
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            MessageType::SyncRequest | MessageType::SyncReply | MessageType::HostGraphDeleted
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub payload: Value,
    /// Host owning the carried entities. Relays keep the original value.
    pub origin_host: String,
    #[serde(default)]
    pub time: HlcTimestamp,
}

impl Envelope {
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| TopographError::Serialization(e.to_string()))
    }

    pub fn decode(frame: &str) -> Result<Self> {
        serde_json::from_str(frame)
            .map_err(|e| TopographError::Sync(format!("malformed envelope: {}", e)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SyncRequestPayload {
    #[serde(default)]
    time: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SyncReplyPayload {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostGraphDeletedPayload {
    host: String,
    #[serde(default)]
    time: Timestamp,
}

/// Decoded envelope payload
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// Ask the peer for its graph. Time zero means the live graph.
    SyncRequest { time: Timestamp },
    SyncReply { nodes: Vec<Node>, edges: Vec<Edge> },
    HostGraphDeleted { host: String, at: Timestamp },
    NodeAdded(Node),
    NodeUpdated(Node),
    NodeDeleted(Node),
    EdgeAdded(Edge),
    EdgeUpdated(Edge),
    EdgeDeleted(Edge),
}

fn payload<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Result<T> {
    T::deserialize(&envelope.payload).map_err(|e| {
        TopographError::Sync(format!(
            "malformed {} payload from {}: {}",
            envelope.message_type, envelope.origin_host, e
        ))
    })
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| TopographError::Serialization(e.to_string()))
}

impl SyncMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            SyncMessage::SyncRequest { .. } => MessageType::SyncRequest,
            SyncMessage::SyncReply { .. } => MessageType::SyncReply,
            SyncMessage::HostGraphDeleted { .. } => MessageType::HostGraphDeleted,
            SyncMessage::NodeAdded(_) => MessageType::NodeAdded,
            SyncMessage::NodeUpdated(_) => MessageType::NodeUpdated,
            SyncMessage::NodeDeleted(_) => MessageType::NodeDeleted,
            SyncMessage::EdgeAdded(_) => MessageType::EdgeAdded,
            SyncMessage::EdgeUpdated(_) => MessageType::EdgeUpdated,
            SyncMessage::EdgeDeleted(_) => MessageType::EdgeDeleted,
        }
    }

    /// Outbound message for a graph change
    pub fn from_change(change: &GraphChange) -> Self {
        match change {
            GraphChange::NodeAdded(n) => SyncMessage::NodeAdded(n.clone()),
            GraphChange::NodeUpdated(n) => SyncMessage::NodeUpdated(n.clone()),
            GraphChange::NodeDeleted(n) => SyncMessage::NodeDeleted(n.clone()),
            GraphChange::EdgeAdded(e) => SyncMessage::EdgeAdded(e.clone()),
            GraphChange::EdgeUpdated(e) => SyncMessage::EdgeUpdated(e.clone()),
            GraphChange::EdgeDeleted(e) => SyncMessage::EdgeDeleted(e.clone()),
            GraphChange::HostGraphDeleted { host, at } => SyncMessage::HostGraphDeleted {
                host: host.clone(),
                at: *at,
            },
        }
    }

    pub fn into_envelope(self, origin_host: impl Into<String>, time: HlcTimestamp) -> Result<Envelope> {
        let message_type = self.message_type();
        let payload = match self {
            SyncMessage::SyncRequest { time } => to_value(&SyncRequestPayload { time })?,
            SyncMessage::SyncReply { nodes, edges } => to_value(&SyncReplyPayload { nodes, edges })?,
            SyncMessage::HostGraphDeleted { host, at } => {
                to_value(&HostGraphDeletedPayload { host, time: at })?
            }
            SyncMessage::NodeAdded(n) | SyncMessage::NodeUpdated(n) | SyncMessage::NodeDeleted(n) => {
                to_value(&n)?
            }
            SyncMessage::EdgeAdded(e) | SyncMessage::EdgeUpdated(e) | SyncMessage::EdgeDeleted(e) => {
                to_value(&e)?
            }
        };
        Ok(Envelope {
            message_type,
            payload,
            origin_host: origin_host.into(),
            time,
        })
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let message = match envelope.message_type {
            MessageType::SyncRequest => {
                // a bare request without payload asks for the live graph
                let request: SyncRequestPayload = if envelope.payload.is_null() {
                    SyncRequestPayload::default()
                } else {
                    payload(envelope)?
                };
                SyncMessage::SyncRequest { time: request.time }
            }
            MessageType::SyncReply => {
                let reply: SyncReplyPayload = payload(envelope)?;
                SyncMessage::SyncReply {
                    nodes: reply.nodes,
                    edges: reply.edges,
                }
            }
            MessageType::HostGraphDeleted => {
                let deleted: HostGraphDeletedPayload = payload(envelope)?;
                SyncMessage::HostGraphDeleted {
                    host: deleted.host,
                    at: deleted.time,
                }
            }
            MessageType::NodeAdded => SyncMessage::NodeAdded(payload(envelope)?),
            MessageType::NodeUpdated => SyncMessage::NodeUpdated(payload(envelope)?),
            MessageType::NodeDeleted => SyncMessage::NodeDeleted(payload(envelope)?),
            MessageType::EdgeAdded => SyncMessage::EdgeAdded(payload(envelope)?),
            MessageType::EdgeUpdated => SyncMessage::EdgeUpdated(payload(envelope)?),
            MessageType::EdgeDeleted => SyncMessage::EdgeDeleted(payload(envelope)?),
        };
        Ok(message)
    }

    /// Host owning the carried entity, if the message carries one
    pub fn entity_host(&self) -> Option<&str> {
        match self {
            SyncMessage::NodeAdded(n) | SyncMessage::NodeUpdated(n) | SyncMessage::NodeDeleted(n) => {
                Some(&n.host)
            }
            SyncMessage::EdgeAdded(e) | SyncMessage::EdgeUpdated(e) | SyncMessage::EdgeDeleted(e) => {
                Some(&e.host)
            }
            SyncMessage::HostGraphDeleted { host, .. } => Some(host),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use topograph_core::{Identifier, Metadata};

    #[test]
    fn test_wire_field_names() {
        let node = Node::new(Identifier::new("n1"), "h1", Metadata::new().with("Type", "host"), 10);
        let envelope = SyncMessage::NodeAdded(node)
            .into_envelope("h1", HlcTimestamp::from_parts(10, 2))
            .unwrap();
        let json: Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();

        assert_eq!(json["type"], "NodeAdded");
        assert_eq!(json["originHost"], "h1");
        assert_eq!(json["payload"]["ID"], "n1");
        assert_eq!(json["payload"]["Metadata"]["Type"], "host");
    }

    #[test]
    fn test_bare_sync_request_means_live() {
        let envelope = Envelope::decode(r#"{"type":"SyncRequest","originHost":"h2"}"#).unwrap();
        assert_eq!(
            SyncMessage::from_envelope(&envelope).unwrap(),
            SyncMessage::SyncRequest { time: 0 }
        );

        let envelope =
            Envelope::decode(r#"{"type":"SyncRequest","payload":{"Time":1500},"originHost":"h2"}"#)
                .unwrap();
        assert_eq!(
            SyncMessage::from_envelope(&envelope).unwrap(),
            SyncMessage::SyncRequest { time: 1500 }
        );
    }

    #[test]
    fn test_malformed_frames_are_sync_errors() {
        assert!(matches!(Envelope::decode("not json"), Err(TopographError::Sync(_))));
        assert!(matches!(
            Envelope::decode(r#"{"type":"Bogus","originHost":"h"}"#),
            Err(TopographError::Sync(_))
        ));

        let envelope =
            Envelope::decode(r#"{"type":"EdgeAdded","payload":{"ID":"e1"},"originHost":"h"}"#)
                .unwrap();
        assert!(matches!(
            SyncMessage::from_envelope(&envelope),
            Err(TopographError::Sync(_))
        ));
    }

    #[test]
    fn test_host_graph_deleted_payload() {
        let change = GraphChange::HostGraphDeleted {
            host: "h3".into(),
            at: 42,
        };
        let envelope = SyncMessage::from_change(&change)
            .into_envelope("h3", HlcTimestamp::default())
            .unwrap();
        assert_eq!(envelope.payload["Host"], "h3");
        assert_eq!(
            SyncMessage::from_envelope(&envelope).unwrap(),
            SyncMessage::HostGraphDeleted {
                host: "h3".into(),
                at: 42
            }
        );
    }
}
