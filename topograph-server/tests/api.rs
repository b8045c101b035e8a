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


// HTTP API integration tests, driven through the router without a socket

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use topograph_server::{build_state, config::ServerConfig, router};
use tower::ServiceExt;

fn app() -> Router {
    let mut config = ServerConfig::default();
    config.replica.host = "h1".into();
    let state = build_state(&config).unwrap();
    router(state, &config)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn query(app: &Router, gremlin: &str) -> (StatusCode, Value) {
    call(app, "POST", "/api/topology", Some(json!({ "GremlinQuery": gremlin }))).await
}

fn bridge_events() -> Value {
    json!([
        { "op": "Add", "kind": "Node", "id": "br0", "host": "h1",
          "metadata": { "Type": "bridge", "Name": "br0" } },
        { "op": "Add", "kind": "Node", "id": "eth0", "host": "h1",
          "metadata": { "Type": "device", "Name": "eth0" } },
        { "op": "Add", "kind": "Node", "id": "eth1", "host": "h1",
          "metadata": { "Type": "device", "Name": "eth1" } },
        { "op": "Add", "kind": "Edge", "id": "l0", "host": "h1",
          "parent": "br0", "child": "eth0", "metadata": { "RelationType": "ownership" } },
        { "op": "Add", "kind": "Edge", "id": "l1", "host": "h1",
          "parent": "br0", "child": "eth1", "metadata": { "RelationType": "ownership" } }
    ])
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = call(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["host"], "h1");
    assert_eq!(body["graph"]["nodes"], 0);
    assert_eq!(body["peers"], json!([]));
}

#[tokio::test]
async fn test_ingest_then_query() {
    let app = app();
    let (status, body) = call(&app, "POST", "/api/events", Some(bridge_events())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], 5);
    assert_eq!(body["rejected"], 0);

    let (status, body) = query(&app, r#"g.V().Has("Name", "br0").Out()"#).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["ID"].as_str().unwrap())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"eth0") && ids.contains(&"eth1"));

    let (status, body) = query(&app, r#"g.V().Has("Type", "device").Count()"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(2));

    let (_, health) = call(&app, "GET", "/health", None).await;
    assert_eq!(health["graph"]["nodes"], 3);
    assert_eq!(health["graph"]["edges"], 2);
}

#[tokio::test]
async fn test_query_pagination() {
    let app = app();
    call(&app, "POST", "/api/events", Some(bridge_events())).await;

    let request = json!({
        "GremlinQuery": r#"g.V().Has("Type", "device")"#,
        "SortBy": "Name",
        "SortOrder": "Desc",
        "Pagination": { "From": 0, "To": 1 }
    });
    let (status, body) = call(&app, "POST", "/api/topology", Some(request)).await;
    assert_eq!(status, StatusCode::OK);
    let nodes = body.as_array().unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["ID"], "eth1");
}

#[tokio::test]
async fn test_bad_query_names_the_step() {
    let app = app();
    let (status, body) = query(&app, r#"g.V().Frobnicate("x")"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Frobnicate"));
}

#[tokio::test]
async fn test_foreign_host_event_is_rejected() {
    let app = app();
    let events = json!([
        { "op": "Add", "kind": "Node", "id": "n1", "host": "h1", "metadata": { "Type": "host" } },
        { "op": "Add", "kind": "Node", "id": "n2", "host": "h2", "metadata": { "Type": "host" } }
    ]);
    let (status, body) = call(&app, "POST", "/api/events", Some(events)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], 1);
    assert_eq!(body["rejected"], 1);
    assert!(body["errors"][0].as_str().unwrap().contains("h2"));

    let (_, count) = query(&app, "g.V().Count()").await;
    assert_eq!(count, json!(1));
}

#[tokio::test]
async fn test_edge_with_missing_endpoint_is_reported() {
    let app = app();
    let events = json!([
        { "op": "Add", "kind": "Edge", "id": "l0", "host": "h1",
          "parent": "nowhere", "child": "nobody" }
    ]);
    let (status, body) = call(&app, "POST", "/api/events", Some(events)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], 0);
    assert_eq!(body["rejected"], 1);
}

#[tokio::test]
async fn test_flow_metrics_through_api() {
    let app = app();
    call(&app, "POST", "/api/events", Some(bridge_events())).await;

    let flows = json!([
        { "UUID": "f1", "NodeID": "eth0", "Application": "TCP",
          "Metric": { "ABPackets": 3, "BAPackets": 1, "ABBytes": 300, "BABytes": 100 },
          "Start": 100, "Last": 200 },
        { "UUID": "f2", "NodeID": "eth0", "Application": "UDP",
          "Metric": { "ABPackets": 3, "BAPackets": 1, "ABBytes": 300, "BABytes": 100 },
          "Start": 150, "Last": 250 }
    ]);
    let (status, body) = call(&app, "POST", "/api/flows", Some(flows)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stored"], 2);

    let (status, body) = query(&app, r#"g.V().Has("Name", "eth0").Metrics().Aggregates()"#).await;
    assert_eq!(status, StatusCode::OK);
    let sum = &body["eth0"];
    assert_eq!(sum["ABPackets"], 6);
    assert_eq!(sum["Start"], 100);
    assert_eq!(sum["Last"], 250);

    let search = json!({
        "filter": { "term": { "key": "Application", "value": "UDP" } }
    });
    let (status, body) = call(&app, "POST", "/api/flows/search", Some(search)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["UUID"], "f2");
}
