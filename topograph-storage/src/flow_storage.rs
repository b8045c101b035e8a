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

//! Flow storage collaborator contract
//!
//! The traversal engine only ever talks to [`FlowStorage`]. Translating
//! filters to a native query, pagination and any parent/child document
//! join are the backend's business. [`MemoryFlowStorage`] is the
//! in-process implementation used by the server and tests.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use topograph_core::paging::compare_values;
use topograph_core::{FieldGetter, Filter, Identifier, Result, SortOrder, Timestamp};
use tracing::debug;

use crate::flow::{Flow, SearchQuery, TimedMetric};

/// Storage capability consumed by the `Metrics()` traversal step
pub trait FlowStorage: Send + Sync {
    /// Index flows and, for flows carrying a last update window, the
    /// matching metric record
    fn store_flows(&self, flows: &[Flow]) -> Result<()>;

    fn search_flows(&self, query: &SearchQuery) -> Result<Vec<Flow>>;

    /// Metric records of the flows matching `query`, filtered by
    /// `metric_filter` and grouped by the flow's owning node. Records of a
    /// node are ordered by start time.
    fn search_metrics(
        &self,
        query: &SearchQuery,
        metric_filter: Option<&Filter>,
    ) -> Result<BTreeMap<Identifier, Vec<TimedMetric>>>;
}

#[derive(Debug, Clone)]
struct MetricRecord {
    flow_uuid: String,
    node_id: Identifier,
    metric: TimedMetric,
}

#[derive(Debug, Default)]
struct MemoryFlows {
    flows: Vec<Flow>,
    by_uuid: HashMap<String, usize>,
    metrics: Vec<MetricRecord>,
    /// (flow uuid, window start) of every stored metric record
    metric_keys: HashSet<(String, Timestamp)>,
}

impl MemoryFlows {
    fn select(&self, query: &SearchQuery) -> Vec<&Flow> {
        let mut matched: Vec<&Flow> = self
            .flows
            .iter()
            .filter(|f| query.filter.as_ref().map_or(true, |filter| filter.eval(*f)))
            .collect();

        if query.sort && !query.sort_by.is_empty() {
            matched.sort_by(|a, b| {
                let ord = compare_values(
                    a.field(&query.sort_by).as_ref(),
                    b.field(&query.sort_by).as_ref(),
                );
                match query.sort_order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            });
        }

        if query.dedup {
            let key = if query.dedup_by.is_empty() {
                "UUID"
            } else {
                query.dedup_by.as_str()
            };
            let mut seen = HashSet::new();
            matched.retain(|f| seen.insert(f.field(key).map(|v| v.to_string())));
        }

        match &query.pagination {
            Some(p) => p.apply(matched),
            None => matched,
        }
    }
}

/// Lock-guarded in-memory flow store
#[derive(Debug, Default)]
pub struct MemoryFlowStorage {
    inner: RwLock<MemoryFlows>,
}

impl MemoryFlowStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flow_count(&self) -> usize {
        self.inner.read().flows.len()
    }

    pub fn metric_count(&self) -> usize {
        self.inner.read().metrics.len()
    }
}

impl FlowStorage for MemoryFlowStorage {
    fn store_flows(&self, flows: &[Flow]) -> Result<()> {
        let mut inner = self.inner.write();
        for flow in flows {
            match inner.by_uuid.get(&flow.uuid).copied() {
                Some(idx) => inner.flows[idx] = flow.clone(),
                None => {
                    let idx = inner.flows.len();
                    inner.flows.push(flow.clone());
                    inner.by_uuid.insert(flow.uuid.clone(), idx);
                }
            }

            if let Some(metric) = flow.last_update() {
                if inner.metric_keys.insert((flow.uuid.clone(), metric.start)) {
                    inner.metrics.push(MetricRecord {
                        flow_uuid: flow.uuid.clone(),
                        node_id: flow.node_id.clone(),
                        metric,
                    });
                }
            }
        }
        debug!(count = flows.len(), "stored flows");
        Ok(())
    }

    fn search_flows(&self, query: &SearchQuery) -> Result<Vec<Flow>> {
        query.validate()?;
        let inner = self.inner.read();
        Ok(inner.select(query).into_iter().cloned().collect())
    }

    fn search_metrics(
        &self,
        query: &SearchQuery,
        metric_filter: Option<&Filter>,
    ) -> Result<BTreeMap<Identifier, Vec<TimedMetric>>> {
        query.validate()?;
        let inner = self.inner.read();
        let uuids: HashSet<&str> = inner
            .select(query)
            .into_iter()
            .map(|f| f.uuid.as_str())
            .collect();

        let mut grouped: BTreeMap<Identifier, Vec<TimedMetric>> = BTreeMap::new();
        for record in &inner.metrics {
            if !uuids.contains(record.flow_uuid.as_str()) {
                continue;
            }
            if !metric_filter.map_or(true, |f| f.eval(&record.metric)) {
                continue;
            }
            grouped
                .entry(record.node_id.clone())
                .or_default()
                .push(record.metric);
        }
        for metrics in grouped.values_mut() {
            metrics.sort_by_key(|m| (m.start, m.last));
        }
        Ok(grouped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowMetric;
    use topograph_core::Pagination;

    fn flow(uuid: &str, node: &str, app: &str, update: (u64, u64, u64)) -> Flow {
        Flow {
            uuid: uuid.into(),
            node_id: Identifier::new(node),
            application: app.into(),
            metric: FlowMetric {
                ab_packets: update.2,
                ..Default::default()
            },
            start: update.0,
            last: update.1,
            last_update_metric: FlowMetric {
                ab_packets: update.2,
                ..Default::default()
            },
            last_update_start: update.0,
            last_update_last: update.1,
        }
    }

    #[test]
    fn test_store_upserts_by_uuid() {
        let store = MemoryFlowStorage::new();
        store.store_flows(&[flow("f1", "n1", "TCP", (10, 20, 3))]).unwrap();
        store.store_flows(&[flow("f1", "n1", "TCP", (20, 30, 3))]).unwrap();
        assert_eq!(store.flow_count(), 1);
        assert_eq!(store.metric_count(), 2);
    }

    #[test]
    fn test_restored_window_is_not_duplicated() {
        let store = MemoryFlowStorage::new();
        let batch: Vec<Flow> = (0..50)
            .map(|i| flow(&format!("f{}", i), "n1", "TCP", (10, 20, 1)))
            .collect();
        store.store_flows(&batch).unwrap();
        store.store_flows(&batch).unwrap();
        store.store_flows(&[flow("f0", "n1", "TCP", (20, 30, 1))]).unwrap();

        assert_eq!(store.flow_count(), 50);
        assert_eq!(store.metric_count(), 51);
    }

    #[test]
    fn test_search_flows_sort_dedup_paginate() {
        let store = MemoryFlowStorage::new();
        store
            .store_flows(&[
                flow("f1", "n1", "UDP", (30, 40, 1)),
                flow("f2", "n1", "TCP", (10, 20, 1)),
                flow("f3", "n2", "TCP", (20, 30, 1)),
            ])
            .unwrap();

        let query = SearchQuery {
            sort: true,
            sort_by: "Start".into(),
            ..Default::default()
        };
        let uuids: Vec<_> = store
            .search_flows(&query)
            .unwrap()
            .into_iter()
            .map(|f| f.uuid)
            .collect();
        assert_eq!(uuids, vec!["f2", "f3", "f1"]);

        let dedup = SearchQuery {
            dedup: true,
            dedup_by: "Application".into(),
            ..Default::default()
        };
        assert_eq!(store.search_flows(&dedup).unwrap().len(), 2);

        let page = SearchQuery {
            pagination: Some(Pagination { from: 1, to: 2 }),
            ..Default::default()
        };
        assert_eq!(store.search_flows(&page).unwrap()[0].uuid, "f2");

        let bad = SearchQuery {
            pagination: Some(Pagination { from: 3, to: 1 }),
            ..Default::default()
        };
        assert!(store.search_flows(&bad).is_err());
    }

    #[test]
    fn test_search_metrics_groups_by_node() {
        let store = MemoryFlowStorage::new();
        store
            .store_flows(&[
                flow("f1", "n1", "TCP", (10, 20, 3)),
                flow("f2", "n1", "TCP", (5, 15, 3)),
                flow("f3", "n2", "UDP", (10, 20, 7)),
            ])
            .unwrap();

        let query = SearchQuery::filtered(Filter::term("Application", "TCP"));
        let metrics = store.search_metrics(&query, None).unwrap();
        assert_eq!(metrics.len(), 1);
        let n1 = &metrics[&Identifier::new("n1")];
        assert_eq!(n1.len(), 2);
        assert_eq!(n1[0].start, 5);

        let late = Filter::Gte {
            key: "Start".into(),
            value: 8.0,
        };
        let metrics = store
            .search_metrics(&SearchQuery::default(), Some(&late))
            .unwrap();
        assert_eq!(metrics[&Identifier::new("n1")].len(), 1);
        assert_eq!(metrics[&Identifier::new("n2")][0].metric.ab_packets, 7);
    }
}
