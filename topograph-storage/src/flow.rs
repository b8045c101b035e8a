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

//! Flow records and the metrics attached to them

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::{Add, AddAssign};
use topograph_core::{FieldGetter, Filter, Identifier, Pagination, Result, SortOrder, Timestamp};

/// Packet and byte counters in both directions of a flow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlowMetric {
    #[serde(rename = "ABPackets")]
    pub ab_packets: u64,
    #[serde(rename = "BAPackets")]
    pub ba_packets: u64,
    #[serde(rename = "ABBytes")]
    pub ab_bytes: u64,
    #[serde(rename = "BABytes")]
    pub ba_bytes: u64,
}

impl FlowMetric {
    pub fn packets(&self) -> u64 {
        self.ab_packets + self.ba_packets
    }

    pub fn bytes(&self) -> u64 {
        self.ab_bytes + self.ba_bytes
    }

    pub fn is_zero(&self) -> bool {
        *self == FlowMetric::default()
    }

    fn field(&self, key: &str) -> Option<Value> {
        let v = match key {
            "ABPackets" => self.ab_packets,
            "BAPackets" => self.ba_packets,
            "ABBytes" => self.ab_bytes,
            "BABytes" => self.ba_bytes,
            _ => return None,
        };
        Some(Value::from(v))
    }
}

impl Add for FlowMetric {
    type Output = FlowMetric;

    fn add(self, rhs: FlowMetric) -> FlowMetric {
        FlowMetric {
            ab_packets: self.ab_packets + rhs.ab_packets,
            ba_packets: self.ba_packets + rhs.ba_packets,
            ab_bytes: self.ab_bytes + rhs.ab_bytes,
            ba_bytes: self.ba_bytes + rhs.ba_bytes,
        }
    }
}

impl AddAssign for FlowMetric {
    fn add_assign(&mut self, rhs: FlowMetric) {
        *self = *self + rhs;
    }
}

/// Counters observed over `[start, last]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimedMetric {
    pub start: Timestamp,
    pub last: Timestamp,
    #[serde(flatten)]
    pub metric: FlowMetric,
}

impl FieldGetter for TimedMetric {
    fn field(&self, key: &str) -> Option<Value> {
        match key {
            "Start" => Some(Value::from(self.start)),
            "Last" => Some(Value::from(self.last)),
            _ => self.metric.field(key),
        }
    }
}

/// A captured flow, owned by the node it was observed on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Flow {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "NodeID")]
    pub node_id: Identifier,
    pub application: String,
    #[serde(default)]
    pub metric: FlowMetric,
    pub start: Timestamp,
    pub last: Timestamp,
    #[serde(default)]
    pub last_update_metric: FlowMetric,
    #[serde(default)]
    pub last_update_start: Timestamp,
    #[serde(default)]
    pub last_update_last: Timestamp,
}

impl Flow {
    /// Metric record for the last update window, if the flow has one
    pub fn last_update(&self) -> Option<TimedMetric> {
        if self.last_update_start == 0 {
            return None;
        }
        Some(TimedMetric {
            start: self.last_update_start,
            last: self.last_update_last,
            metric: self.last_update_metric,
        })
    }
}

impl FieldGetter for Flow {
    fn field(&self, key: &str) -> Option<Value> {
        match key {
            "UUID" => Some(Value::from(self.uuid.clone())),
            "NodeID" => Some(Value::from(self.node_id.to_string())),
            "Application" => Some(Value::from(self.application.clone())),
            "Start" => Some(Value::from(self.start)),
            "Last" => Some(Value::from(self.last)),
            _ => key
                .strip_prefix("Metric/")
                .and_then(|k| self.metric.field(k)),
        }
    }
}

/// Parameters of a flow search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub filter: Option<Filter>,
    pub pagination: Option<Pagination>,
    pub sort: bool,
    pub sort_by: String,
    pub sort_order: SortOrder,
    pub dedup: bool,
    pub dedup_by: String,
}

impl SearchQuery {
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(p) = &self.pagination {
            p.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_sum() {
        let a = FlowMetric {
            ab_packets: 3,
            ba_packets: 1,
            ab_bytes: 300,
            ba_bytes: 100,
        };
        let mut total = a;
        total += a;
        assert_eq!(total.ab_packets, 6);
        assert_eq!(total.packets(), 8);
        assert_eq!(total.bytes(), 800);
    }

    #[test]
    fn test_timed_metric_wire_format() {
        let m = TimedMetric {
            start: 10,
            last: 20,
            metric: FlowMetric {
                ab_packets: 3,
                ..Default::default()
            },
        };
        let json = serde_json::to_value(m).unwrap();
        assert_eq!(json["Start"], 10);
        assert_eq!(json["ABPackets"], 3);
    }

    #[test]
    fn test_flow_without_update_window() {
        let flow = Flow {
            uuid: "f1".into(),
            node_id: Identifier::new("n1"),
            application: "TCP".into(),
            metric: FlowMetric::default(),
            start: 1,
            last: 2,
            last_update_metric: FlowMetric::default(),
            last_update_start: 0,
            last_update_last: 0,
        };
        assert!(flow.last_update().is_none());
        assert_eq!(flow.field("Application"), Some(Value::from("TCP")));
    }
}
