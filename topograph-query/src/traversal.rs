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

//! Traversal evaluation
//!
//! A traversal runs against one immutable snapshot taken when it starts:
//! the live graph, or a history reconstruction when the first step is
//! `Context`. Steps never mutate the store.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use topograph_core::paging::compare_values;
use topograph_core::{
    FieldGetter, Filter, Identifier, Node, Pagination, QueryConfig, Result, SortOrder, TimeSlice,
    TopographError,
};
use topograph_storage::{Direction, FlowStorage, Graph, GraphSnapshot, SearchQuery, TimedMetric};
use tracing::debug;

use crate::aggregation::aggregate_per_node;
use crate::parser::parse;
use crate::step::{predicates_filter, Predicate, Step};

/// What a traversal produced
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TraversalResult {
    Nodes(Vec<Node>),
    /// Metric series per node
    Metrics(BTreeMap<Identifier, Vec<TimedMetric>>),
    /// One summed record per node
    Aggregates(BTreeMap<Identifier, TimedMetric>),
    Count(usize),
}

impl TraversalResult {
    pub fn nodes(&self) -> Option<&[Node]> {
        match self {
            TraversalResult::Nodes(n) => Some(n),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TraversalResult::Nodes(n) => n.len(),
            TraversalResult::Metrics(m) => m.len(),
            TraversalResult::Aggregates(a) => a.len(),
            TraversalResult::Count(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Query input as accepted over the API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TraversalRequest {
    #[serde(rename = "GremlinQuery")]
    pub query: String,
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: SortOrder,
}

impl TraversalRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

enum WorkingSet<'a> {
    Nodes(Vec<&'a Node>),
    Metrics(BTreeMap<Identifier, Vec<TimedMetric>>),
    Aggregates(BTreeMap<Identifier, TimedMetric>),
    Count(usize),
}

impl WorkingSet<'_> {
    fn len(&self) -> usize {
        match self {
            WorkingSet::Nodes(n) => n.len(),
            WorkingSet::Metrics(m) => m.len(),
            WorkingSet::Aggregates(a) => a.len(),
            WorkingSet::Count(c) => *c,
        }
    }

    fn into_result(self) -> TraversalResult {
        match self {
            WorkingSet::Nodes(n) => TraversalResult::Nodes(n.into_iter().cloned().collect()),
            WorkingSet::Metrics(m) => TraversalResult::Metrics(m),
            WorkingSet::Aggregates(a) => TraversalResult::Aggregates(a),
            WorkingSet::Count(c) => TraversalResult::Count(c),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Nodes,
    Metrics,
    Aggregates,
    Count,
}

/// Metric records relevant to a time context: everything for the live
/// graph, records started by `t` for a point, overlapping ones for an
/// interval
pub fn metric_window(slice: Option<TimeSlice>) -> Option<Filter> {
    let slice = slice?;
    let started = Filter::Lte {
        key: "Start".into(),
        value: slice.last as f64,
    };
    if slice.is_point() {
        return Some(started);
    }
    Some(Filter::And(vec![
        started,
        Filter::Gte {
            key: "Last".into(),
            value: slice.start as f64,
        },
    ]))
}

pub struct TraversalEngine {
    graph: Arc<Graph>,
    flows: Option<Arc<dyn FlowStorage>>,
    config: QueryConfig,
}

impl TraversalEngine {
    pub fn new(graph: Arc<Graph>, config: QueryConfig) -> Self {
        Self {
            graph,
            flows: None,
            config,
        }
    }

    pub fn with_flow_storage(mut self, flows: Arc<dyn FlowStorage>) -> Self {
        self.flows = Some(flows);
        self
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Reject malformed traversals before anything is evaluated
    pub fn validate(&self, steps: &[Step]) -> Result<()> {
        let mut shape = Shape::Nodes;
        for (i, step) in steps.iter().enumerate() {
            let err = |reason: &str| Err(TopographError::query(step.name(), reason));
            match step {
                Step::Context { .. } if i != 0 => return err("must be the first step"),
                Step::Context { .. } => {}
                Step::V(_) => {
                    let first = i == 0 || (i == 1 && matches!(steps[0], Step::Context { .. }));
                    if !first {
                        return err("must start the traversal");
                    }
                }
                Step::Has(preds) if preds.is_empty() => return err("needs at least one predicate"),
                Step::Has(_)
                | Step::HasKey(_)
                | Step::Out(_)
                | Step::In(_)
                | Step::Both(_)
                | Step::Dedup(_)
                | Step::Limit(_) => {
                    if shape != Shape::Nodes {
                        return err("only applies to nodes");
                    }
                }
                Step::Metrics => {
                    if shape != Shape::Nodes {
                        return err("only applies to nodes");
                    }
                    if self.flows.is_none() {
                        return err("no flow storage configured");
                    }
                    shape = Shape::Metrics;
                }
                Step::Aggregates => {
                    if shape != Shape::Metrics {
                        return err("requires Metrics()");
                    }
                    shape = Shape::Aggregates;
                }
                Step::Count => {
                    if shape == Shape::Count {
                        return err("already counted");
                    }
                    shape = Shape::Count;
                }
            }
        }
        Ok(())
    }

    /// Parse and run a textual traversal
    pub fn query(&self, text: &str) -> Result<TraversalResult> {
        let steps = parse(text)?;
        self.execute(&steps)
    }

    /// Run a traversal under the configured timeout
    pub fn execute(&self, steps: &[Step]) -> Result<TraversalResult> {
        self.execute_with_deadline(steps, Instant::now() + self.config.timeout())
    }

    pub fn execute_with_deadline(&self, steps: &[Step], deadline: Instant) -> Result<TraversalResult> {
        self.validate(steps)?;
        let started = Instant::now();

        let (slice, rest) = match steps.first() {
            Some(Step::Context { time, duration }) => {
                (Some(TimeSlice::from_context(*time, *duration)), &steps[1..])
            }
            _ => (None, steps),
        };
        let snapshot = match slice {
            Some(s) => self.graph.snapshot_at(s),
            None => self.graph.snapshot(),
        };

        let mut set = WorkingSet::Nodes(snapshot.nodes().iter().collect());
        for step in rest {
            check_deadline(deadline, step)?;
            set = self.apply(&snapshot, step, set, deadline)?;
            let fans_out = matches!(step, Step::Out(_) | Step::In(_) | Step::Both(_));
            if fans_out && set.len() > self.config.max_results {
                return Err(TopographError::query(
                    step.name(),
                    format!("working set exceeds {} elements", self.config.max_results),
                ));
            }
        }

        debug!(
            steps = steps.len(),
            historical = slice.is_some(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "traversal evaluated"
        );
        Ok(set.into_result())
    }

    /// Run a request: parse, evaluate, then sort and paginate the result
    pub fn execute_request(&self, request: &TraversalRequest) -> Result<TraversalResult> {
        if let Some(p) = &request.pagination {
            p.validate()?;
        }
        let result = self.query(&request.query)?;

        let result = match (result, &request.sort_by) {
            (TraversalResult::Nodes(mut nodes), Some(key)) => {
                nodes.sort_by(|a, b| {
                    let ord = compare_values(a.field(key).as_ref(), b.field(key).as_ref());
                    match request.sort_order {
                        SortOrder::Asc => ord,
                        SortOrder::Desc => ord.reverse(),
                    }
                });
                TraversalResult::Nodes(nodes)
            }
            (other, _) => other,
        };

        Ok(match (result, request.pagination) {
            (TraversalResult::Nodes(nodes), Some(p)) => TraversalResult::Nodes(p.apply(nodes)),
            (TraversalResult::Metrics(m), Some(p)) => {
                TraversalResult::Metrics(p.apply(m.into_iter().collect()).into_iter().collect())
            }
            (TraversalResult::Aggregates(a), Some(p)) => {
                TraversalResult::Aggregates(p.apply(a.into_iter().collect()).into_iter().collect())
            }
            (other, _) => other,
        })
    }

    fn apply<'a>(
        &self,
        snapshot: &'a GraphSnapshot,
        step: &Step,
        set: WorkingSet<'a>,
        deadline: Instant,
    ) -> Result<WorkingSet<'a>> {
        let next = match (step, set) {
            (Step::V(None), _) => WorkingSet::Nodes(snapshot.nodes().iter().collect()),
            (Step::V(Some(id)), _) => WorkingSet::Nodes(snapshot.node_versions(id).collect()),
            (Step::Has(preds), WorkingSet::Nodes(nodes)) => match predicates_filter(preds) {
                Some(filter) => {
                    WorkingSet::Nodes(nodes.into_iter().filter(|n| filter.eval(*n)).collect())
                }
                None => WorkingSet::Nodes(nodes),
            },
            (Step::HasKey(key), WorkingSet::Nodes(nodes)) => WorkingSet::Nodes(
                nodes
                    .into_iter()
                    .filter(|n| n.field(key).is_some())
                    .collect(),
            ),
            (Step::Out(preds), WorkingSet::Nodes(nodes)) => {
                WorkingSet::Nodes(hop(snapshot, &nodes, Direction::Out, preds, step, deadline)?)
            }
            (Step::In(preds), WorkingSet::Nodes(nodes)) => {
                WorkingSet::Nodes(hop(snapshot, &nodes, Direction::In, preds, step, deadline)?)
            }
            (Step::Both(preds), WorkingSet::Nodes(nodes)) => {
                WorkingSet::Nodes(hop(snapshot, &nodes, Direction::Both, preds, step, deadline)?)
            }
            (Step::Dedup(key), WorkingSet::Nodes(nodes)) => {
                WorkingSet::Nodes(dedup(nodes, key.as_deref()))
            }
            (Step::Limit(n), WorkingSet::Nodes(mut nodes)) => {
                nodes.truncate(*n);
                WorkingSet::Nodes(nodes)
            }
            (Step::Count, set) => WorkingSet::Count(set.len()),
            (Step::Metrics, WorkingSet::Nodes(nodes)) => {
                WorkingSet::Metrics(self.metrics(snapshot, &nodes)?)
            }
            (Step::Aggregates, WorkingSet::Metrics(metrics)) => {
                WorkingSet::Aggregates(aggregate_per_node(&metrics))
            }
            (step, _) => {
                return Err(TopographError::query(step.name(), "not applicable here"));
            }
        };
        Ok(next)
    }

    fn metrics(
        &self,
        snapshot: &GraphSnapshot,
        nodes: &[&Node],
    ) -> Result<BTreeMap<Identifier, Vec<TimedMetric>>> {
        let flows = self
            .flows
            .as_ref()
            .ok_or_else(|| TopographError::query("Metrics", "no flow storage configured"))?;

        let mut seen = HashSet::new();
        let ids: Vec<serde_json::Value> = nodes
            .iter()
            .filter(|n| seen.insert(n.id.clone()))
            .map(|n| serde_json::Value::from(n.id.to_string()))
            .collect();
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let query = SearchQuery::filtered(Filter::within("NodeID", ids));
        let window = metric_window(snapshot.slice());
        flows.search_metrics(&query, window.as_ref())
    }
}

fn check_deadline(deadline: Instant, step: &Step) -> Result<()> {
    if Instant::now() >= deadline {
        return Err(TopographError::Timeout(format!(
            "traversal deadline exceeded at step {}",
            step.name()
        )));
    }
    Ok(())
}

/// One hop from every node of the set. In range mode a node present with
/// several revisions is expanded once.
fn hop<'a>(
    snapshot: &'a GraphSnapshot,
    nodes: &[&'a Node],
    direction: Direction,
    preds: &[Predicate],
    step: &Step,
    deadline: Instant,
) -> Result<Vec<&'a Node>> {
    let filter = predicates_filter(preds);
    let collapse = snapshot.is_range();
    let mut expanded = HashSet::new();
    let mut out = Vec::new();

    for node in nodes {
        if collapse && !expanded.insert(&node.id) {
            continue;
        }
        check_deadline(deadline, step)?;
        out.extend(snapshot.neighbors(&node.id, direction, filter.as_ref()));
    }
    Ok(out)
}

/// Keep the first element per key value. Elements lacking the key share a
/// single bucket.
fn dedup<'a>(nodes: Vec<&'a Node>, key: Option<&str>) -> Vec<&'a Node> {
    let mut seen: HashSet<Option<String>> = HashSet::new();
    nodes
        .into_iter()
        .filter(|n| {
            let k = match key {
                None => Some(n.id.to_string()),
                Some(key) => n.field(key).map(|v| v.to_string()),
            };
            seen.insert(k)
        })
        .collect()
}
