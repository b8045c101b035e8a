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


use axum::{extract::State, Json};
use serde::Serialize;
use topograph_sync::PeerState;

use crate::api::AppState;

/// Health check response structure
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub host: String,
    pub uptime_seconds: u64,
    pub graph: GraphHealth,
    pub peers: Vec<PeerHealth>,
}

#[derive(Debug, Serialize)]
pub struct GraphHealth {
    pub nodes: usize,
    pub edges: usize,
}

#[derive(Debug, Serialize)]
pub struct PeerHealth {
    pub host: String,
    pub state: PeerState,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let peers = state
        .replicator
        .peers()
        .into_iter()
        .map(|(host, state)| PeerHealth { host, state })
        .collect();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        host: state.host.clone(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        graph: GraphHealth {
            nodes: state.graph.node_count(),
            edges: state.graph.edge_count(),
        },
        peers,
    })
}
