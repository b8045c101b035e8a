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


use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use topograph_core::{
    Edge, HistoryConfig, HlcTimestamp, Identifier, ManualClock, Metadata, Node, ReplicationConfig,
    Result, TimeSlice, TopographError,
};
use topograph_storage::Graph;
use topograph_sync::{
    ChannelTransport, Envelope, MessageType, PeerState, Replicator, SyncMessage, SyncTransport,
};

fn replica(host: &str) -> (Arc<Replicator>, Arc<Graph>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_000));
    let graph = Arc::new(Graph::with_clock(HistoryConfig::default(), clock.clone()));
    let replicator = Arc::new(Replicator::new(
        host,
        graph.clone(),
        ReplicationConfig::default(),
    ));
    (replicator, graph, clock)
}

fn spawn_peer(
    replicator: &Arc<Replicator>,
    peer: &'static str,
    transport: ChannelTransport,
) -> JoinHandle<Result<()>> {
    let replicator = replicator.clone();
    tokio::spawn(async move { replicator.run_peer(peer, transport).await })
}

fn node(id: &str, host: &str) -> Node {
    Node::new(
        Identifier::new(id),
        host,
        Metadata::new().with("Name", id),
        1_000,
    )
}

fn edge(id: &str, parent: &str, child: &str, host: &str) -> Edge {
    Edge::new(
        Identifier::new(id),
        Identifier::new(parent),
        Identifier::new(child),
        host,
        Metadata::new(),
        1_000,
    )
}

async fn send(remote: &mut ChannelTransport, message: SyncMessage, origin: &str) {
    let frame = message
        .into_envelope(origin, HlcTimestamp::default())
        .unwrap()
        .encode()
        .unwrap();
    remote.send(frame).await.unwrap();
}

async fn recv(remote: &mut ChannelTransport) -> Envelope {
    let frame = tokio::time::timeout(Duration::from_secs(30), remote.recv())
        .await
        .expect("no frame received")
        .unwrap()
        .expect("transport closed");
    Envelope::decode(&frame).unwrap()
}

/// Answer the replica's SyncRequest with an empty graph, then request its
/// graph so that it starts forwarding
async fn handshake(remote: &mut ChannelTransport, remote_host: &str) -> SyncMessage {
    let request = recv(remote).await;
    assert_eq!(request.message_type, MessageType::SyncRequest);
    send(
        remote,
        SyncMessage::SyncReply {
            nodes: vec![],
            edges: vec![],
        },
        remote_host,
    )
    .await;
    send(remote, SyncMessage::SyncRequest { time: 0 }, remote_host).await;
    let reply = recv(remote).await;
    assert_eq!(reply.message_type, MessageType::SyncReply);
    SyncMessage::from_envelope(&reply).unwrap()
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_sync_reply_bootstraps_empty_replica() {
    let (a, ga, clock_a) = replica("a");
    let (b, gb, _) = replica("b");

    let n1 = ga.add_node(Metadata::new().with("Type", "host"), "a").unwrap();
    let n2 = ga.add_node(Metadata::new().with("Type", "bridge"), "a").unwrap();
    ga.add_edge(&n1.id, &n2.id, Metadata::new().with("RelationType", "ownership"), "a")
        .unwrap();

    let (ta, tb) = ChannelTransport::pair();
    let a_task = spawn_peer(&a, "b", ta);
    let b_task = spawn_peer(&b, "a", tb);

    wait_for(|| {
        a.peer_state("b") == Some(PeerState::Synced) && b.peer_state("a") == Some(PeerState::Synced)
    })
    .await;

    let (nodes, edges) = ga.live_elements();
    assert_eq!(gb.node_count(), nodes.len());
    assert_eq!(gb.edge_count(), edges.len());
    for n in &nodes {
        assert_eq!(gb.get_node(&n.id).as_ref(), Some(n));
    }
    for e in &edges {
        assert_eq!(gb.get_edge(&e.id).as_ref(), Some(e));
    }
    let rebuilt = gb.snapshot_at(TimeSlice::point(gb.now()));
    assert_eq!(rebuilt.node_count(), 2);
    assert_eq!(rebuilt.edge_count(), 1);

    // live mutations keep flowing after the bootstrap
    clock_a.advance(100);
    ga.set_metadata(&n1.id, Metadata::new().with("Name", "renamed"))
        .unwrap();
    wait_for(|| {
        gb.get_node(&n1.id)
            .map_or(false, |n| n.metadata.get_str("Name") == Some("renamed"))
    })
    .await;

    // losing the peer removes everything it owned
    a_task.abort();
    let finished = b_task.await.unwrap();
    assert!(finished.is_ok());
    assert_eq!(gb.node_count(), 0);
    assert_eq!(gb.edge_count(), 0);
    assert_eq!(b.peer_state("a"), None);
}

#[tokio::test]
async fn test_relay_skips_origin_and_keeps_owner() {
    let (b, gb, _) = replica("b");
    let (mut remote_a, end_a) = ChannelTransport::pair();
    let (mut remote_c, end_c) = ChannelTransport::pair();
    let _a_task = spawn_peer(&b, "a", end_a);
    let _c_task = spawn_peer(&b, "c", end_c);
    handshake(&mut remote_a, "a").await;
    handshake(&mut remote_c, "c").await;

    send(&mut remote_a, SyncMessage::NodeAdded(node("x", "a")), "a").await;

    let relayed = recv(&mut remote_c).await;
    assert_eq!(relayed.message_type, MessageType::NodeAdded);
    assert_eq!(relayed.origin_host, "a");

    // the next frame towards a is the local node, not an echo of x
    let local = gb.add_node(Metadata::new().with("Name", "local"), "b").unwrap();
    let next = recv(&mut remote_a).await;
    match SyncMessage::from_envelope(&next).unwrap() {
        SyncMessage::NodeAdded(n) => assert_eq!(n.id, local.id),
        other => panic!("unexpected message {:?}", other),
    }
    assert_eq!(next.origin_host, "b");
}

#[tokio::test]
async fn test_foreign_and_echoed_entities_are_dropped() {
    let (b, gb, _) = replica("b");
    let (mut remote, end) = ChannelTransport::pair();
    let task = spawn_peer(&b, "a", end);
    handshake(&mut remote, "a").await;

    // owned by c but claimed by a
    send(&mut remote, SyncMessage::NodeAdded(node("forged", "c")), "a").await;
    // a local entity coming back
    send(&mut remote, SyncMessage::NodeAdded(node("mine", "b")), "b").await;
    // relayed entity with its owner preserved
    send(&mut remote, SyncMessage::NodeAdded(node("relayed", "c")), "c").await;

    wait_for(|| gb.get_node(&Identifier::new("relayed")).is_some()).await;
    assert!(gb.get_node(&Identifier::new("forged")).is_none());
    assert!(gb.get_node(&Identifier::new("mine")).is_none());
    assert!(!task.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_edge_before_endpoint_within_window() {
    let (b, gb, _) = replica("b");
    let (mut remote, end) = ChannelTransport::pair();
    let _task = spawn_peer(&b, "a", end);
    handshake(&mut remote, "a").await;

    send(&mut remote, SyncMessage::NodeAdded(node("x", "a")), "a").await;
    send(&mut remote, SyncMessage::EdgeAdded(edge("e", "x", "y", "a")), "a").await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(gb.get_edge(&Identifier::new("e")).is_none());

    send(&mut remote, SyncMessage::NodeAdded(node("y", "a")), "a").await;
    wait_for(|| gb.get_edge(&Identifier::new("e")).is_some()).await;
}

#[tokio::test(start_paused = true)]
async fn test_edge_before_endpoint_beyond_window() {
    let (b, gb, _) = replica("b");
    let (mut remote, end) = ChannelTransport::pair();
    let _task = spawn_peer(&b, "a", end);
    handshake(&mut remote, "a").await;

    send(&mut remote, SyncMessage::NodeAdded(node("x", "a")), "a").await;
    send(&mut remote, SyncMessage::EdgeAdded(edge("e", "x", "y", "a")), "a").await;
    tokio::time::sleep(Duration::from_secs(6)).await;

    send(&mut remote, SyncMessage::NodeAdded(node("y", "a")), "a").await;
    send(&mut remote, SyncMessage::NodeAdded(node("probe", "a")), "a").await;
    wait_for(|| gb.get_node(&Identifier::new("probe")).is_some()).await;

    assert!(gb.get_node(&Identifier::new("y")).is_some());
    assert!(gb.get_edge(&Identifier::new("e")).is_none());
}

#[tokio::test]
async fn test_duplicate_deletion_is_harmless() {
    let (b, gb, _) = replica("b");
    let (mut remote, end) = ChannelTransport::pair();
    let task = spawn_peer(&b, "a", end);
    handshake(&mut remote, "a").await;

    let x = node("x", "a");
    send(&mut remote, SyncMessage::NodeAdded(x.clone()), "a").await;
    let mut deleted = x.clone();
    deleted.deleted_at = Some(2_000);
    send(&mut remote, SyncMessage::NodeDeleted(deleted.clone()), "a").await;
    send(&mut remote, SyncMessage::NodeDeleted(deleted), "a").await;
    // never seen here
    send(&mut remote, SyncMessage::NodeDeleted(node("ghost", "a")), "a").await;
    send(&mut remote, SyncMessage::NodeAdded(node("probe", "a")), "a").await;

    wait_for(|| gb.get_node(&Identifier::new("probe")).is_some()).await;
    assert!(gb.get_node(&x.id).is_none());
    let revisions = gb.revisions(&x.id);
    assert_eq!(revisions.len(), 1);
    assert_eq!(revisions[0].valid_to, Some(2_000));
    assert!(!task.is_finished());
    assert_eq!(b.peer_state("a"), Some(PeerState::Synced));
}

#[tokio::test]
async fn test_stale_add_after_deletion_stays_deleted() {
    let (b, gb, _) = replica("b");
    let (mut remote, end) = ChannelTransport::pair();
    let task = spawn_peer(&b, "a", end);
    handshake(&mut remote, "a").await;

    let x = node("x", "a");
    send(&mut remote, SyncMessage::NodeAdded(x.clone()), "a").await;
    let mut deleted = x.clone();
    deleted.deleted_at = Some(2_000);
    send(&mut remote, SyncMessage::NodeDeleted(deleted), "a").await;
    // the same addition delivered again, e.g. through a relay
    send(&mut remote, SyncMessage::NodeAdded(x.clone()), "a").await;
    send(&mut remote, SyncMessage::NodeUpdated(x.clone()), "a").await;
    send(&mut remote, SyncMessage::NodeAdded(node("probe", "a")), "a").await;

    wait_for(|| gb.get_node(&Identifier::new("probe")).is_some()).await;
    assert!(gb.get_node(&x.id).is_none());
    assert_eq!(gb.revisions(&x.id).len(), 1);
    assert!(!task.is_finished());
}

#[tokio::test]
async fn test_peer_cannot_mutate_local_entities() {
    let (b, gb, _) = replica("b");
    let eth0 = gb.add_node(Metadata::new().with("Name", "eth0"), "b").unwrap();
    let eth1 = gb.add_node(Metadata::new().with("Name", "eth1"), "b").unwrap();

    let (mut remote, end) = ChannelTransport::pair();
    let task = spawn_peer(&b, "a", end);
    handshake(&mut remote, "a").await;

    let mut takeover = Node::new(
        eth0.id.clone(),
        "a",
        Metadata::new().with("Name", "hijacked"),
        1_500,
    );
    takeover.revision = 99;
    send(&mut remote, SyncMessage::NodeUpdated(takeover), "a").await;
    let mut removal = Node::new(eth1.id.clone(), "a", Metadata::new(), 1_500);
    removal.deleted_at = Some(1_500);
    send(&mut remote, SyncMessage::NodeDeleted(removal), "a").await;
    send(&mut remote, SyncMessage::NodeAdded(node("probe", "a")), "a").await;

    wait_for(|| gb.get_node(&Identifier::new("probe")).is_some()).await;
    let local = gb.get_node(&eth0.id).unwrap();
    assert_eq!(local.host, "b");
    assert_eq!(local.metadata.get_str("Name"), Some("eth0"));
    assert_eq!(local.revision, 1);
    assert!(gb.get_node(&eth1.id).is_some());
    assert!(!task.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_parked_edge_released_by_node_from_another_peer() {
    let (b, gb, _) = replica("b");
    let (mut remote_a, end_a) = ChannelTransport::pair();
    let (mut remote_c, end_c) = ChannelTransport::pair();
    let _task_a = spawn_peer(&b, "a", end_a);
    let _task_c = spawn_peer(&b, "c", end_c);
    handshake(&mut remote_a, "a").await;
    handshake(&mut remote_c, "c").await;

    send(&mut remote_a, SyncMessage::NodeAdded(node("x", "a")), "a").await;
    send(&mut remote_a, SyncMessage::EdgeAdded(edge("e", "x", "y", "a")), "a").await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(gb.get_edge(&Identifier::new("e")).is_none());

    // y is owned by a but relayed by c
    send(&mut remote_c, SyncMessage::NodeAdded(node("y", "a")), "a").await;
    wait_for(|| gb.get_edge(&Identifier::new("e")).is_some()).await;
}

#[tokio::test(start_paused = true)]
async fn test_parked_edge_released_by_local_node() {
    let (b, gb, _) = replica("b");
    let (mut remote, end) = ChannelTransport::pair();
    let _task = spawn_peer(&b, "a", end);
    handshake(&mut remote, "a").await;

    send(&mut remote, SyncMessage::NodeAdded(node("x", "a")), "a").await;
    send(&mut remote, SyncMessage::EdgeAdded(edge("e", "x", "br0", "a")), "a").await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(gb.get_edge(&Identifier::new("e")).is_none());

    gb.add_node_with_id(Identifier::new("br0"), Metadata::new(), "b", None)
        .unwrap();
    wait_for(|| gb.get_edge(&Identifier::new("e")).is_some()).await;
}

#[tokio::test]
async fn test_historical_sync_request() {
    let (b, gb, clock) = replica("b");
    let n = gb.add_node(Metadata::new().with("State", "DOWN"), "b").unwrap();
    clock.set(2_000);
    gb.set_metadata(&n.id, Metadata::new().with("State", "UP")).unwrap();

    let (mut remote, end) = ChannelTransport::pair();
    let _task = spawn_peer(&b, "a", end);
    let request = recv(&mut remote).await;
    assert_eq!(request.message_type, MessageType::SyncRequest);

    send(&mut remote, SyncMessage::SyncRequest { time: 1_500 }, "a").await;
    let reply = SyncMessage::from_envelope(&recv(&mut remote).await).unwrap();
    let SyncMessage::SyncReply { nodes, .. } = reply else {
        panic!("expected a SyncReply");
    };
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].metadata.get_str("State"), Some("DOWN"));
}

#[tokio::test(start_paused = true)]
async fn test_sync_request_times_out() {
    let (b, _, _) = replica("b");
    let (mut remote, end) = ChannelTransport::pair();

    let run = b.run_peer("a", end);
    let drain = async {
        // swallow the request and never answer
        let _ = recv(&mut remote).await;
        std::future::pending::<()>().await
    };
    let result = tokio::select! {
        result = run => result,
        _ = drain => unreachable!(),
    };

    assert!(matches!(result, Err(TopographError::Timeout(_))));
    assert_eq!(b.peer_state("a"), None);
}

#[tokio::test]
async fn test_repeated_malformed_frames_close_the_session() {
    let (b, _, _) = replica("b");
    let (mut remote, end) = ChannelTransport::pair();
    let task = spawn_peer(&b, "a", end);
    handshake(&mut remote, "a").await;

    for _ in 0..=ReplicationConfig::default().max_malformed_messages {
        remote.send("{not an envelope".to_string()).await.unwrap();
    }
    let result = task.await.unwrap();
    assert!(matches!(result, Err(TopographError::Sync(_))));
}

#[tokio::test]
async fn test_disconnect_deletes_host_graph_only() {
    let (b, gb, _) = replica("b");
    let local = gb.add_node(Metadata::new(), "b").unwrap();
    let (mut remote, end) = ChannelTransport::pair();
    let task = spawn_peer(&b, "a", end);
    handshake(&mut remote, "a").await;

    send(&mut remote, SyncMessage::NodeAdded(node("x", "a")), "a").await;
    wait_for(|| gb.get_node(&Identifier::new("x")).is_some()).await;

    drop(remote);
    assert!(task.await.unwrap().is_ok());
    assert!(gb.get_node(&Identifier::new("x")).is_none());
    assert!(gb.get_node(&local.id).is_some());
}

#[tokio::test]
async fn test_self_peering_is_refused() {
    let (b, _, _) = replica("b");
    let (_remote, end) = ChannelTransport::pair();
    assert!(matches!(
        b.run_peer("b", end).await,
        Err(TopographError::Sync(_))
    ));
}
