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

//! The mutable graph store of one replica
//!
//! All mutation, history recording and listener notification happen under
//! a single write lock, so a snapshot never observes half of a change.
//! Listeners receive changes over unbounded channels and must do their own
//! I/O elsewhere.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use topograph_core::{
    Clock, Edge, Element, EntityKind, EventOp, Filter, GraphEvent, HistoryConfig, Identifier,
    Metadata, Node, Result, SystemClock, TimeSlice, Timestamp, TopographError,
};
use tracing::{debug, warn};

use crate::history::{HistoryIndex, RecordOutcome};
use crate::snapshot::{Direction, GraphSnapshot};

/// A change applied to the graph
#[derive(Debug, Clone, PartialEq)]
pub enum GraphChange {
    NodeAdded(Node),
    NodeUpdated(Node),
    NodeDeleted(Node),
    EdgeAdded(Edge),
    EdgeUpdated(Edge),
    EdgeDeleted(Edge),
    /// Every entity owned by `host` was removed
    HostGraphDeleted { host: String, at: Timestamp },
}

impl GraphChange {
    /// Host owning the changed entities
    pub fn owner(&self) -> &str {
        match self {
            GraphChange::NodeAdded(n) | GraphChange::NodeUpdated(n) | GraphChange::NodeDeleted(n) => {
                &n.host
            }
            GraphChange::EdgeAdded(e) | GraphChange::EdgeUpdated(e) | GraphChange::EdgeDeleted(e) => {
                &e.host
            }
            GraphChange::HostGraphDeleted { host, .. } => host,
        }
    }
}

/// A change as delivered to listeners
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub change: GraphChange,
    /// Peer the change was received from; None for local changes
    pub origin: Option<String>,
}

#[derive(Debug, Clone)]
struct Tombstone {
    revision: u64,
    host: String,
    deleted_at: Timestamp,
}

#[derive(Debug)]
struct GraphInner {
    nodes: HashMap<Identifier, Node>,
    edges: HashMap<Identifier, Edge>,
    out_edges: HashMap<Identifier, BTreeSet<Identifier>>,
    in_edges: HashMap<Identifier, BTreeSet<Identifier>>,
    tombstones: HashMap<Identifier, Tombstone>,
    history: HistoryIndex,
    listeners: Vec<mpsc::UnboundedSender<ChangeEvent>>,
}

impl GraphInner {
    fn notify(&mut self, change: GraphChange, origin: Option<&str>) {
        let event = ChangeEvent {
            change,
            origin: origin.map(str::to_string),
        };
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn next_revision(&self, id: &Identifier) -> u64 {
        self.tombstones.get(id).map_or(1, |t| t.revision + 1)
    }

    /// Host owning `id`, live or tombstoned
    fn owner_of(&self, kind: EntityKind, id: &Identifier) -> Option<&str> {
        let live = match kind {
            EntityKind::Node => self.nodes.get(id).map(|n| n.host.as_str()),
            EntityKind::Edge => self.edges.get(id).map(|e| e.host.as_str()),
        };
        live.or_else(|| self.tombstones.get(id).map(|t| t.host.as_str()))
    }

    /// A peer may only touch entities of the host it claims
    fn check_remote_owner(&self, kind: EntityKind, id: &Identifier, host: &str) -> Result<()> {
        match self.owner_of(kind, id) {
            Some(owner) if owner != host => Err(TopographError::Conflict(format!(
                "{} {} is owned by {}, not {}",
                kind, id, owner, host
            ))),
            _ => Ok(()),
        }
    }

    /// Deleted at a revision at least as new as `revision`
    fn buried(&self, id: &Identifier, revision: u64) -> Option<Timestamp> {
        self.tombstones
            .get(id)
            .filter(|t| revision <= t.revision)
            .map(|t| t.deleted_at)
    }

    fn create_node(
        &mut self,
        id: Identifier,
        metadata: Metadata,
        host: &str,
        at: Timestamp,
    ) -> Result<Node> {
        if self.nodes.contains_key(&id) {
            return Err(TopographError::Conflict(format!("node {} already exists", id)));
        }
        let mut node = Node::new(id, host, metadata, at);
        node.revision = self.next_revision(&node.id);
        self.insert_node(node.clone())?;
        self.notify(GraphChange::NodeAdded(node.clone()), None);
        Ok(node)
    }

    fn create_edge(
        &mut self,
        id: Identifier,
        parent: Identifier,
        child: Identifier,
        metadata: Metadata,
        host: &str,
        at: Timestamp,
    ) -> Result<Edge> {
        if self.edges.contains_key(&id) {
            return Err(TopographError::Conflict(format!("edge {} already exists", id)));
        }
        let mut edge = Edge::new(id, parent, child, host, metadata, at);
        edge.revision = self.next_revision(&edge.id);
        self.insert_edge(edge.clone())?;
        self.notify(GraphChange::EdgeAdded(edge.clone()), None);
        Ok(edge)
    }

    fn update_from_event(&mut self, event: &GraphEvent, at: Timestamp) -> Result<()> {
        let result = self.update_metadata(
            &event.id,
            event.metadata.clone(),
            event.replace,
            at,
            Some(&event.host),
        );
        match result {
            Err(TopographError::NotFound { .. }) => Err(TopographError::NotFound {
                kind: event.kind,
                id: event.id.clone(),
            }),
            other => other.map(|_| ()),
        }
    }

    fn insert_node(&mut self, node: Node) -> Result<RecordOutcome> {
        let outcome = self
            .history
            .record(Element::Node(node.clone()), node.updated_at)?;
        self.tombstones.remove(&node.id);
        self.nodes.insert(node.id.clone(), node);
        Ok(outcome)
    }

    fn insert_edge(&mut self, edge: Edge) -> Result<RecordOutcome> {
        for endpoint in [&edge.parent, &edge.child] {
            if !self.nodes.contains_key(endpoint) {
                return Err(TopographError::node_not_found(endpoint));
            }
        }
        let outcome = self
            .history
            .record(Element::Edge(edge.clone()), edge.updated_at)?;
        self.tombstones.remove(&edge.id);
        self.out_edges
            .entry(edge.parent.clone())
            .or_default()
            .insert(edge.id.clone());
        self.in_edges
            .entry(edge.child.clone())
            .or_default()
            .insert(edge.id.clone());
        self.edges.insert(edge.id.clone(), edge);
        Ok(outcome)
    }

    fn incident_edges(&self, id: &Identifier) -> Vec<Identifier> {
        let mut ids: BTreeSet<Identifier> = BTreeSet::new();
        if let Some(out) = self.out_edges.get(id) {
            ids.extend(out.iter().cloned());
        }
        if let Some(inn) = self.in_edges.get(id) {
            ids.extend(inn.iter().cloned());
        }
        ids.into_iter().collect()
    }

    fn remove_edge(
        &mut self,
        id: &Identifier,
        at: Timestamp,
        origin: Option<&str>,
        notify: bool,
    ) -> Result<bool> {
        if !self.edges.contains_key(id) {
            if self.tombstones.contains_key(id) {
                return Ok(false);
            }
            return Err(TopographError::edge_not_found(id));
        }
        self.history.close(id, at)?;

        let Some(mut edge) = self.edges.remove(id) else {
            return Ok(false);
        };
        if let Some(set) = self.out_edges.get_mut(&edge.parent) {
            set.remove(id);
        }
        if let Some(set) = self.in_edges.get_mut(&edge.child) {
            set.remove(id);
        }
        edge.deleted_at = Some(at);
        self.tombstones.insert(
            id.clone(),
            Tombstone {
                revision: edge.revision,
                host: edge.host.clone(),
                deleted_at: at,
            },
        );
        if notify {
            self.notify(GraphChange::EdgeDeleted(edge), origin);
        }
        Ok(true)
    }

    fn remove_node(
        &mut self,
        id: &Identifier,
        at: Timestamp,
        origin: Option<&str>,
        notify: bool,
    ) -> Result<bool> {
        if !self.nodes.contains_key(id) {
            if self.tombstones.contains_key(id) {
                return Ok(false);
            }
            return Err(TopographError::node_not_found(id));
        }

        // validate the whole cascade before touching anything
        let edges = self.incident_edges(id);
        self.history.check_close(id, at)?;
        for edge_id in &edges {
            self.history.check_close(edge_id, at)?;
        }

        for edge_id in &edges {
            self.remove_edge(edge_id, at, origin, notify)?;
        }
        self.history.close(id, at)?;

        let Some(mut node) = self.nodes.remove(id) else {
            return Ok(false);
        };
        self.out_edges.remove(id);
        self.in_edges.remove(id);
        node.deleted_at = Some(at);
        self.tombstones.insert(
            id.clone(),
            Tombstone {
                revision: node.revision,
                host: node.host.clone(),
                deleted_at: at,
            },
        );
        if notify {
            self.notify(GraphChange::NodeDeleted(node), origin);
        }
        Ok(true)
    }

    fn remove_host(&mut self, host: &str, at: Timestamp, origin: Option<&str>) -> usize {
        let mut edge_ids: Vec<(Identifier, Timestamp)> = self
            .edges
            .values()
            .filter(|e| e.host == host)
            .map(|e| (e.id.clone(), e.updated_at))
            .collect();
        let node_ids: Vec<(Identifier, Timestamp)> = self
            .nodes
            .values()
            .filter(|n| n.host == host)
            .map(|n| (n.id.clone(), n.updated_at))
            .collect();
        for (node_id, _) in &node_ids {
            for edge_id in self.incident_edges(node_id) {
                if let Some(edge) = self.edges.get(&edge_id) {
                    edge_ids.push((edge_id, edge.updated_at));
                }
            }
        }
        edge_ids.sort();
        edge_ids.dedup_by(|a, b| a.0 == b.0);

        let mut removed = 0;
        for (edge_id, updated_at) in edge_ids {
            match self.remove_edge(&edge_id, at.max(updated_at), origin, false) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(edge_id = %edge_id, host, error = %e, "failed to remove edge of host graph"),
            }
        }
        for (node_id, updated_at) in node_ids {
            match self.remove_node(&node_id, at.max(updated_at), origin, false) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(node_id = %node_id, host, error = %e, "failed to remove node of host graph"),
            }
        }

        self.notify(
            GraphChange::HostGraphDeleted {
                host: host.to_string(),
                at,
            },
            origin,
        );
        removed
    }

    fn update_metadata(
        &mut self,
        id: &Identifier,
        metadata: Metadata,
        replace: bool,
        at: Timestamp,
        host: Option<&str>,
    ) -> Result<bool> {
        fn apply(current: &mut Metadata, metadata: Metadata, replace: bool) -> bool {
            if replace {
                if *current == metadata {
                    return false;
                }
                *current = metadata;
                true
            } else {
                current.merge(&metadata)
            }
        }

        if let Some(node) = self.nodes.get(id) {
            check_owner(EntityKind::Node, id, &node.host, host)?;
            let mut updated = node.clone();
            if !apply(&mut updated.metadata, metadata, replace) {
                return Ok(false);
            }
            updated.revision += 1;
            updated.updated_at = at.max(node.updated_at);
            self.insert_node(updated.clone())?;
            self.notify(GraphChange::NodeUpdated(updated), None);
            return Ok(true);
        }

        if let Some(edge) = self.edges.get(id) {
            check_owner(EntityKind::Edge, id, &edge.host, host)?;
            let mut updated = edge.clone();
            if !apply(&mut updated.metadata, metadata, replace) {
                return Ok(false);
            }
            updated.revision += 1;
            updated.updated_at = at.max(edge.updated_at);
            self.insert_edge(updated.clone())?;
            self.notify(GraphChange::EdgeUpdated(updated), None);
            return Ok(true);
        }

        Err(TopographError::node_not_found(id))
    }
}

fn check_owner(kind: EntityKind, id: &Identifier, owner: &str, host: Option<&str>) -> Result<()> {
    match host {
        Some(h) if h != owner => Err(TopographError::Validation(format!(
            "{} {} is owned by {}, not {}",
            kind, id, owner, h
        ))),
        _ => Ok(()),
    }
}

/// Shared graph store handle
#[derive(Debug)]
pub struct Graph {
    inner: RwLock<GraphInner>,
    clock: Arc<dyn Clock>,
    config: HistoryConfig,
}

impl Graph {
    pub fn new(config: HistoryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: HistoryConfig, clock: Arc<dyn Clock>) -> Self {
        let history = HistoryIndex::new(&config);
        Self::from_parts(config, clock, history)
    }

    /// Start from a persisted history. Revisions still open in it are
    /// closed now, since the live graph is rebuilt from probes and peers.
    pub fn with_history(config: HistoryConfig, clock: Arc<dyn Clock>, mut history: HistoryIndex) -> Self {
        let closed = history.close_all_open(clock.now());
        debug!(closed, entities = history.len(), "restored history");
        Self::from_parts(config, clock, history)
    }

    fn from_parts(config: HistoryConfig, clock: Arc<dyn Clock>, history: HistoryIndex) -> Self {
        Self {
            inner: RwLock::new(GraphInner {
                nodes: HashMap::new(),
                edges: HashMap::new(),
                out_edges: HashMap::new(),
                in_edges: HashMap::new(),
                tombstones: HashMap::new(),
                history,
                listeners: Vec::new(),
            }),
            clock,
            config,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Register a listener. Every change applied after this call is sent
    /// on the returned channel.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().listeners.push(tx);
        rx
    }

    // ---- local mutations -------------------------------------------------

    pub fn add_node(&self, metadata: Metadata, host: &str) -> Result<Node> {
        self.add_node_with_id(Identifier::generate(), metadata, host, None)
    }

    pub fn add_node_with_id(
        &self,
        id: Identifier,
        metadata: Metadata,
        host: &str,
        at: Option<Timestamp>,
    ) -> Result<Node> {
        let at = at.unwrap_or_else(|| self.clock.now());
        self.inner.write().create_node(id, metadata, host, at)
    }

    pub fn add_edge(
        &self,
        parent: &Identifier,
        child: &Identifier,
        metadata: Metadata,
        host: &str,
    ) -> Result<Edge> {
        self.add_edge_with_id(
            Identifier::generate(),
            parent.clone(),
            child.clone(),
            metadata,
            host,
            None,
        )
    }

    pub fn add_edge_with_id(
        &self,
        id: Identifier,
        parent: Identifier,
        child: Identifier,
        metadata: Metadata,
        host: &str,
        at: Option<Timestamp>,
    ) -> Result<Edge> {
        let at = at.unwrap_or_else(|| self.clock.now());
        self.inner
            .write()
            .create_edge(id, parent, child, metadata, host, at)
    }

    /// Shallow merge of `metadata` into a node or edge. Returns false when
    /// nothing changed, in which case no revision is created.
    pub fn set_metadata(&self, id: &Identifier, metadata: Metadata) -> Result<bool> {
        let at = self.clock.now();
        self.inner
            .write()
            .update_metadata(id, metadata, false, at, None)
    }

    /// Replace the whole metadata map of a node or edge
    pub fn replace_metadata(&self, id: &Identifier, metadata: Metadata) -> Result<bool> {
        let at = self.clock.now();
        self.inner
            .write()
            .update_metadata(id, metadata, true, at, None)
    }

    /// Soft-delete a node and its incident edges. Deleting an already
    /// deleted node is a no-op.
    pub fn del_node(&self, id: &Identifier) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let at = inner.nodes.get(id).map_or(now, |n| now.max(n.updated_at));
        inner.remove_node(id, at, None, true)?;
        Ok(())
    }

    pub fn del_edge(&self, id: &Identifier) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let at = inner.edges.get(id).map_or(now, |e| now.max(e.updated_at));
        inner.remove_edge(id, at, None, true)?;
        Ok(())
    }

    /// Soft-delete everything owned by `host`
    pub fn del_host_graph(&self, host: &str) -> usize {
        let at = self.clock.now();
        self.inner.write().remove_host(host, at, None)
    }

    /// Apply a probe event
    pub fn apply_event(&self, event: &GraphEvent) -> Result<()> {
        event.validate()?;
        let at = event.time.unwrap_or_else(|| self.clock.now());
        // existence check and mutation share one write section
        let mut inner = self.inner.write();

        match (event.op, event.kind) {
            (EventOp::Add, EntityKind::Node) => {
                if inner.nodes.contains_key(&event.id) {
                    inner.update_from_event(event, at)
                } else {
                    inner
                        .create_node(event.id.clone(), event.metadata.clone(), &event.host, at)
                        .map(|_| ())
                }
            }
            (EventOp::Add, EntityKind::Edge) => {
                if inner.edges.contains_key(&event.id) {
                    return inner.update_from_event(event, at);
                }
                let (Some(parent), Some(child)) = (&event.parent, &event.child) else {
                    return Err(TopographError::Validation(format!(
                        "edge {} added without endpoints",
                        event.id
                    )));
                };
                inner
                    .create_edge(
                        event.id.clone(),
                        parent.clone(),
                        child.clone(),
                        event.metadata.clone(),
                        &event.host,
                        at,
                    )
                    .map(|_| ())
            }
            (EventOp::Update, _) => inner.update_from_event(event, at),
            (EventOp::Delete, kind) => {
                let owner = match kind {
                    EntityKind::Node => inner.nodes.get(&event.id).map(|n| (n.host.clone(), n.updated_at)),
                    EntityKind::Edge => inner.edges.get(&event.id).map(|e| (e.host.clone(), e.updated_at)),
                };
                let mut at = at;
                if let Some((owner, updated_at)) = owner {
                    check_owner(kind, &event.id, &owner, Some(&event.host))?;
                    at = at.max(updated_at);
                }
                match kind {
                    EntityKind::Node => inner.remove_node(&event.id, at, None, true)?,
                    EntityKind::Edge => inner.remove_edge(&event.id, at, None, true)?,
                };
                Ok(())
            }
        }
    }

    // ---- remote application ----------------------------------------------

    /// Apply a node received from `origin`, keeping its revision and
    /// timestamps. Returns false when the live graph already holds this or
    /// a newer revision, or the node was deleted at this revision or
    /// later; the revision is still recorded in history. Fails with
    /// `Conflict` when the id belongs to another host.
    pub fn apply_remote_node(&self, mut node: Node, origin: &str) -> Result<bool> {
        node.deleted_at = None;
        let mut inner = self.inner.write();
        inner.check_remote_owner(EntityKind::Node, &node.id, &node.host)?;
        if !inner.nodes.contains_key(&node.id) {
            if let Some(deleted_at) = inner.buried(&node.id, node.revision) {
                debug!(node_id = %node.id, revision = node.revision, "ignoring revision of a deleted node");
                if node.updated_at < deleted_at {
                    let at = node.updated_at;
                    inner.history.record(Element::Node(node), at)?;
                }
                return Ok(false);
            }
        }
        match inner.nodes.get(&node.id).map(|n| n.revision) {
            Some(current) if node.revision <= current => {
                let at = node.updated_at;
                inner.history.record(Element::Node(node), at)?;
                Ok(false)
            }
            Some(_) => {
                inner.insert_node(node.clone())?;
                inner.notify(GraphChange::NodeUpdated(node), Some(origin));
                Ok(true)
            }
            None => {
                inner.insert_node(node.clone())?;
                inner.notify(GraphChange::NodeAdded(node), Some(origin));
                Ok(true)
            }
        }
    }

    /// Apply an edge received from `origin`. Fails with `NotFound` when an
    /// endpoint is not live yet.
    pub fn apply_remote_edge(&self, mut edge: Edge, origin: &str) -> Result<bool> {
        edge.deleted_at = None;
        let mut inner = self.inner.write();
        inner.check_remote_owner(EntityKind::Edge, &edge.id, &edge.host)?;
        if !inner.edges.contains_key(&edge.id) {
            if let Some(deleted_at) = inner.buried(&edge.id, edge.revision) {
                debug!(edge_id = %edge.id, revision = edge.revision, "ignoring revision of a deleted edge");
                if edge.updated_at < deleted_at {
                    let at = edge.updated_at;
                    inner.history.record(Element::Edge(edge), at)?;
                }
                return Ok(false);
            }
        }
        match inner.edges.get(&edge.id).map(|e| e.revision) {
            Some(current) if edge.revision <= current => {
                let at = edge.updated_at;
                inner.history.record(Element::Edge(edge), at)?;
                Ok(false)
            }
            Some(_) => {
                inner.insert_edge(edge.clone())?;
                inner.notify(GraphChange::EdgeUpdated(edge), Some(origin));
                Ok(true)
            }
            None => {
                inner.insert_edge(edge.clone())?;
                inner.notify(GraphChange::EdgeAdded(edge), Some(origin));
                Ok(true)
            }
        }
    }

    /// Delete a node of `host` on behalf of `origin` at the remote
    /// deletion time. Fails with `Conflict` when the node belongs to
    /// another host.
    pub fn delete_remote_node(
        &self,
        id: &Identifier,
        host: &str,
        at: Timestamp,
        origin: &str,
    ) -> Result<bool> {
        let mut inner = self.inner.write();
        inner.check_remote_owner(EntityKind::Node, id, host)?;
        inner.remove_node(id, at, Some(origin), true)
    }

    pub fn delete_remote_edge(
        &self,
        id: &Identifier,
        host: &str,
        at: Timestamp,
        origin: &str,
    ) -> Result<bool> {
        let mut inner = self.inner.write();
        inner.check_remote_owner(EntityKind::Edge, id, host)?;
        inner.remove_edge(id, at, Some(origin), true)
    }

    pub fn delete_remote_host_graph(&self, host: &str, at: Timestamp, origin: &str) -> usize {
        self.inner.write().remove_host(host, at, Some(origin))
    }

    // ---- reads -----------------------------------------------------------

    pub fn get_node(&self, id: &Identifier) -> Option<Node> {
        self.inner.read().nodes.get(id).cloned()
    }

    pub fn get_edge(&self, id: &Identifier) -> Option<Edge> {
        self.inner.read().edges.get(id).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().edges.len()
    }

    /// Live nodes one hop away from `id`, optionally filtered
    pub fn neighbors(
        &self,
        id: &Identifier,
        direction: Direction,
        filter: Option<&Filter>,
    ) -> Result<Vec<Node>> {
        let inner = self.inner.read();
        if !inner.nodes.contains_key(id) {
            return Err(TopographError::node_not_found(id));
        }

        let mut edge_ids: Vec<&Identifier> = Vec::new();
        if matches!(direction, Direction::Out | Direction::Both) {
            edge_ids.extend(inner.out_edges.get(id).into_iter().flatten());
        }
        if matches!(direction, Direction::In | Direction::Both) {
            edge_ids.extend(inner.in_edges.get(id).into_iter().flatten());
        }

        Ok(edge_ids
            .into_iter()
            .filter_map(|eid| inner.edges.get(eid))
            .filter_map(|edge| edge.other_end(id))
            .filter_map(|other| inner.nodes.get(other))
            .filter(|node| filter.map_or(true, |f| f.eval(*node)))
            .cloned()
            .collect())
    }

    /// All live nodes and edges
    pub fn live_elements(&self) -> (Vec<Node>, Vec<Edge>) {
        let inner = self.inner.read();
        (
            inner.nodes.values().cloned().collect(),
            inner.edges.values().cloned().collect(),
        )
    }

    /// Consistent copy of the live graph
    pub fn snapshot(&self) -> GraphSnapshot {
        let (nodes, edges) = self.live_elements();
        GraphSnapshot::build(None, nodes, edges)
    }

    /// Graph reconstructed from history. A point slice yields the revision
    /// valid at that instant; an interval yields every overlapping revision.
    pub fn snapshot_at(&self, slice: TimeSlice) -> GraphSnapshot {
        let elements = {
            let inner = self.inner.read();
            if slice.is_point() {
                inner.history.at(slice.start)
            } else {
                inner.history.range(&slice)
            }
        };
        GraphSnapshot::from_elements(slice, elements)
    }

    /// Revision history of one entity
    pub fn revisions(&self, id: &Identifier) -> Vec<crate::history::RevisionRecord> {
        self.inner
            .read()
            .history
            .revisions(id)
            .map(<[_]>::to_vec)
            .unwrap_or_default()
    }

    /// Drop closed revisions ending at or before `t`, and the tombstones
    /// of entities left without any history
    pub fn purge_history_before(&self, t: Timestamp) -> usize {
        let mut inner = self.inner.write();
        let GraphInner {
            history,
            tombstones,
            ..
        } = &mut *inner;
        let purged = history.purge_before(t);
        tombstones.retain(|id, _| history.revisions(id).is_some());
        purged
    }

    /// Purge according to the configured retention
    pub fn apply_retention(&self) -> usize {
        match self.config.retention_ms {
            Some(retention) => {
                let cutoff = self.clock.now().saturating_sub(retention);
                let purged = self.purge_history_before(cutoff);
                if purged > 0 {
                    debug!(purged, cutoff, "purged history revisions");
                }
                purged
            }
            None => 0,
        }
    }

    pub fn save_history(&self, path: impl AsRef<Path>) -> Result<()> {
        self.inner.read().history.save_to_path(path)
    }
}
