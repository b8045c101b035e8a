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

//! Per-peer replication
//!
//! Each connected peer gets one [`Replicator::run_peer`] future. On connect
//! the replica asks the peer for its graph, applies the reply, and from then
//! on exchanges live mutations. Local changes reach the peer through the
//! graph's change channel, so mutations never wait on network I/O.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, MissedTickBehavior};
use topograph_core::{
    Edge, EntityKind, HybridLogicalClock, Identifier, Node, ReplicationConfig, Result, TimeSlice,
    Timestamp, TopographError,
};
use topograph_storage::{ChangeEvent, Graph, GraphChange};
use tracing::{debug, info, warn};

use crate::envelope::{Envelope, MessageType, SyncMessage};
use crate::peer::{PeerEvent, PeerState};
use crate::reorder::ReorderBuffer;
use crate::transport::SyncTransport;

struct PeerSession {
    peer: String,
    state: PeerState,
    reorder: ReorderBuffer,
    malformed: u32,
    /// Set once the peer has been served a SyncReply
    forwarding: bool,
}

pub struct Replicator {
    host: String,
    graph: Arc<Graph>,
    config: ReplicationConfig,
    clock: HybridLogicalClock,
    peers: DashMap<String, PeerState>,
}

impl Replicator {
    pub fn new(host: impl Into<String>, graph: Arc<Graph>, config: ReplicationConfig) -> Self {
        let clock = HybridLogicalClock::new(graph.clock());
        Self {
            host: host.into(),
            graph,
            config,
            clock,
            peers: DashMap::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn peer_state(&self, peer: &str) -> Option<PeerState> {
        self.peers.get(peer).map(|s| *s)
    }

    pub fn peers(&self) -> Vec<(String, PeerState)> {
        let mut peers: Vec<_> = self
            .peers
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        peers.sort_by(|a, b| a.0.cmp(&b.0));
        peers
    }

    /// Replicate the live graph with `peer` until the connection ends
    pub async fn run_peer<T: SyncTransport>(&self, peer: &str, transport: T) -> Result<()> {
        self.run_peer_at(peer, transport, 0).await
    }

    /// Like [`run_peer`](Self::run_peer), bootstrapping from the peer's
    /// graph as of `time` (zero for live)
    pub async fn run_peer_at<T: SyncTransport>(
        &self,
        peer: &str,
        mut transport: T,
        time: Timestamp,
    ) -> Result<()> {
        if peer == self.host {
            return Err(TopographError::Sync(format!(
                "refusing to peer with own host {}",
                peer
            )));
        }
        match self.peers.entry(peer.to_string()) {
            Entry::Occupied(_) => {
                return Err(TopographError::Sync(format!("peer {} is already connected", peer)));
            }
            Entry::Vacant(slot) => {
                slot.insert(PeerState::Disconnected);
            }
        }

        let mut changes = self.graph.subscribe();
        let mut session = PeerSession {
            peer: peer.to_string(),
            state: PeerState::Disconnected,
            reorder: ReorderBuffer::new(self.config.reorder_window()),
            malformed: 0,
            forwarding: false,
        };
        self.transition(&mut session, PeerEvent::Connect);

        let result = self
            .drive(&mut session, &mut transport, &mut changes, time)
            .await;

        let dropped = session.reorder.clear();
        if dropped > 0 {
            warn!(peer = %peer, dropped, "discarding edges whose endpoints never arrived");
        }
        if session.state.is_connected() {
            self.transition(&mut session, PeerEvent::Disconnect);
        }
        self.peers.remove(peer);

        let removed = self
            .graph
            .delete_remote_host_graph(peer, self.graph.now(), peer);
        info!(peer = %peer, removed, "peer disconnected");

        if let Err(e) = transport.close().await {
            debug!(peer = %peer, error = %e, "closing transport failed");
        }
        result
    }

    async fn drive<T: SyncTransport>(
        &self,
        session: &mut PeerSession,
        transport: &mut T,
        changes: &mut UnboundedReceiver<ChangeEvent>,
        time: Timestamp,
    ) -> Result<()> {
        self.send(transport, SyncMessage::SyncRequest { time }, &self.host)
            .await?;
        self.transition(session, PeerEvent::RequestSent);

        let sync_deadline = tokio::time::sleep(self.config.sync_timeout());
        tokio::pin!(sync_deadline);
        let mut expiry = tokio::time::interval(self.config.expiry_interval());
        expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = transport.recv() => match frame? {
                    Some(frame) => self.handle_frame(session, transport, changes, &frame).await?,
                    None => {
                        debug!(peer = %session.peer, "connection closed by peer");
                        return Ok(());
                    }
                },
                change = changes.recv() => match change {
                    Some(event) => {
                        self.retry_parked(session, &event);
                        if session.forwarding {
                            self.forward(session, transport, &event).await?;
                        }
                        let backlog = changes.len();
                        if backlog == self.config.outbound_queue_warn {
                            warn!(peer = %session.peer, backlog, "outbound queue is backing up");
                        }
                    }
                    None => return Ok(()),
                },
                _ = &mut sync_deadline, if session.state == PeerState::Syncing => {
                    let dropped = session.reorder.clear();
                    warn!(peer = %session.peer, dropped, "sync request timed out");
                    self.transition(session, PeerEvent::SyncTimeout);
                    return Err(TopographError::Timeout(format!(
                        "no SyncReply from {} within {:?}",
                        session.peer,
                        self.config.sync_timeout()
                    )));
                }
                _ = expiry.tick() => {
                    for edge in session.reorder.expire(Instant::now()) {
                        warn!(
                            peer = %session.peer,
                            edge_id = %edge.id,
                            parent = %edge.parent,
                            child = %edge.child,
                            "inconsistency: dropping edge whose endpoint never arrived"
                        );
                    }
                }
            }

            if session.malformed > self.config.max_malformed_messages {
                return Err(TopographError::Sync(format!(
                    "{} malformed messages from {}",
                    session.malformed, session.peer
                )));
            }
        }
    }

    async fn handle_frame<T: SyncTransport>(
        &self,
        session: &mut PeerSession,
        transport: &mut T,
        changes: &mut UnboundedReceiver<ChangeEvent>,
        frame: &str,
    ) -> Result<()> {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                session.malformed += 1;
                warn!(peer = %session.peer, error = %e, "dropping envelope");
                return Ok(());
            }
        };
        self.clock.receive(envelope.time);

        let message = match SyncMessage::from_envelope(&envelope) {
            Ok(message) => message,
            Err(e) => {
                session.malformed += 1;
                warn!(peer = %session.peer, error = %e, "dropping envelope");
                return Ok(());
            }
        };

        if let Some(owner) = message.entity_host() {
            if owner == self.host {
                debug!(peer = %session.peer, message = %envelope.message_type, "ignoring echo of a local entity");
                return Ok(());
            }
            if owner != envelope.origin_host {
                session.malformed += 1;
                warn!(
                    peer = %session.peer,
                    message = %envelope.message_type,
                    owner = %owner,
                    origin = %envelope.origin_host,
                    "dropping envelope: entity is not owned by its origin host"
                );
                return Ok(());
            }
        }

        match message {
            SyncMessage::SyncRequest { time } => {
                // everything queued so far is part of the reply
                while let Ok(event) = changes.try_recv() {
                    self.retry_parked(session, &event);
                }
                let (nodes, edges) = self.reply_content(time);
                info!(
                    peer = %session.peer,
                    time,
                    nodes = nodes.len(),
                    edges = edges.len(),
                    "serving sync request"
                );
                self.send(transport, SyncMessage::SyncReply { nodes, edges }, &self.host)
                    .await?;
                session.forwarding = true;
            }
            SyncMessage::SyncReply { nodes, edges } => {
                if session.state != PeerState::Syncing {
                    warn!(peer = %session.peer, state = ?session.state, "dropping unexpected SyncReply");
                    return Ok(());
                }
                let (applied_nodes, applied_edges) = self.apply_reply(session, nodes, edges);
                self.transition(session, PeerEvent::ReplyApplied);
                info!(
                    peer = %session.peer,
                    nodes = applied_nodes,
                    edges = applied_edges,
                    parked = session.reorder.len(),
                    "sync reply applied"
                );
            }
            mutation => self.apply_mutation(session, mutation),
        }
        Ok(())
    }

    fn reply_content(&self, time: Timestamp) -> (Vec<Node>, Vec<Edge>) {
        if time == 0 {
            return self.graph.live_elements();
        }
        let snapshot = self.graph.snapshot_at(TimeSlice::point(time));
        (snapshot.nodes().to_vec(), snapshot.edges().to_vec())
    }

    fn apply_reply(&self, session: &mut PeerSession, nodes: Vec<Node>, edges: Vec<Edge>) -> (usize, usize) {
        let mut applied_nodes = 0;
        for node in nodes.into_iter().filter(|n| n.host != self.host) {
            let id = node.id.clone();
            match self.graph.apply_remote_node(node, &session.peer) {
                Ok(changed) => {
                    applied_nodes += usize::from(changed);
                    self.release_waiting(session, &id);
                }
                Err(e) => self.reject(session, MessageType::SyncReply, &e),
            }
        }

        let now = Instant::now();
        let applied_edges = edges
            .into_iter()
            .filter(|e| e.host != self.host)
            .filter(|e| self.apply_edge(session, e.clone(), now))
            .count();
        (applied_nodes, applied_edges)
    }

    fn apply_mutation(&self, session: &mut PeerSession, message: SyncMessage) {
        let message_type = message.message_type();
        let peer = session.peer.clone();
        match message {
            SyncMessage::NodeAdded(node) | SyncMessage::NodeUpdated(node) => {
                let id = node.id.clone();
                match self.graph.apply_remote_node(node, &peer) {
                    Ok(_) => self.release_waiting(session, &id),
                    Err(e) => self.reject(session, message_type, &e),
                }
            }
            SyncMessage::NodeDeleted(node) => {
                let at = node.deleted_at.unwrap_or(node.updated_at);
                match self.graph.delete_remote_node(&node.id, &node.host, at, &peer) {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {
                        debug!(peer = %peer, node_id = %node.id, "deletion of an unknown node");
                    }
                    Err(e) => self.reject(session, message_type, &e),
                }
            }
            SyncMessage::EdgeAdded(edge) | SyncMessage::EdgeUpdated(edge) => {
                self.apply_edge(session, edge, Instant::now());
            }
            SyncMessage::EdgeDeleted(edge) => {
                if session.reorder.discard(&edge.id) {
                    debug!(peer = %peer, edge_id = %edge.id, "deleted edge was still parked");
                    return;
                }
                let at = edge.deleted_at.unwrap_or(edge.updated_at);
                match self.graph.delete_remote_edge(&edge.id, &edge.host, at, &peer) {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {
                        debug!(peer = %peer, edge_id = %edge.id, "deletion of an unknown edge");
                    }
                    Err(e) => self.reject(session, message_type, &e),
                }
            }
            SyncMessage::HostGraphDeleted { host, at } => {
                let removed = self.graph.delete_remote_host_graph(&host, at, &peer);
                info!(peer = %peer, host = %host, removed, "host graph deleted");
            }
            SyncMessage::SyncRequest { .. } | SyncMessage::SyncReply { .. } => {}
        }
    }

    /// Apply an edge, parking it while an endpoint is missing. Returns true
    /// when the live graph changed.
    fn apply_edge(&self, session: &mut PeerSession, edge: Edge, parked_at: Instant) -> bool {
        let edge_id = edge.id.clone();
        match self.graph.apply_remote_edge(edge.clone(), &session.peer) {
            Ok(changed) => changed,
            Err(TopographError::NotFound {
                kind: EntityKind::Node,
                id,
            }) => {
                debug!(peer = %session.peer, edge_id = %edge_id, missing = %id, "parking edge");
                session.reorder.park(id, edge, parked_at);
                false
            }
            Err(e) => {
                self.reject(session, MessageType::EdgeAdded, &e);
                false
            }
        }
    }

    fn release_waiting(&self, session: &mut PeerSession, node: &Identifier) {
        let window = self.config.reorder_window();
        for (edge, parked_at) in session.reorder.release(node) {
            if parked_at.elapsed() > window {
                warn!(
                    peer = %session.peer,
                    edge_id = %edge.id,
                    "inconsistency: dropping edge whose endpoint arrived too late"
                );
                continue;
            }
            self.apply_edge(session, edge, parked_at);
        }
    }

    /// Nodes can arrive from another peer or a local probe; edges parked
    /// on them are retried either way
    fn retry_parked(&self, session: &mut PeerSession, event: &ChangeEvent) {
        if session.reorder.is_empty() {
            return;
        }
        if let GraphChange::NodeAdded(node) = &event.change {
            self.release_waiting(session, &node.id);
        }
    }

    fn reject(&self, session: &PeerSession, message: MessageType, err: &TopographError) {
        warn!(peer = %session.peer, message = %message, error = %err, "dropping envelope");
    }

    async fn forward<T: SyncTransport>(
        &self,
        session: &PeerSession,
        transport: &mut T,
        event: &ChangeEvent,
    ) -> Result<()> {
        let owner = event.change.owner();
        if event.origin.as_deref() == Some(session.peer.as_str()) || owner == session.peer {
            return Ok(());
        }
        self.send(transport, SyncMessage::from_change(&event.change), owner)
            .await
    }

    async fn send<T: SyncTransport>(
        &self,
        transport: &mut T,
        message: SyncMessage,
        origin_host: &str,
    ) -> Result<()> {
        let frame = message.into_envelope(origin_host, self.clock.now())?.encode()?;
        transport.send(frame).await?;
        Ok(())
    }

    fn transition(&self, session: &mut PeerSession, event: PeerEvent) {
        match session.state.transition(event) {
            Ok(next) => {
                info!(peer = %session.peer, from = ?session.state, to = ?next, "peer state changed");
                session.state = next;
                if let Some(mut state) = self.peers.get_mut(&session.peer) {
                    *state = next;
                }
            }
            Err(e) => warn!(peer = %session.peer, error = %e, "ignoring peer event"),
        }
    }
}
