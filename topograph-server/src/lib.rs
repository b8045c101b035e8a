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


//! Topograph Server
//!
//! HTTP query and ingest API plus the WebSocket sync endpoint of one
//! replica.

pub mod api;
pub mod config;
pub mod ws;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use topograph_core::SystemClock;
use topograph_query::TraversalEngine;
use topograph_storage::{Graph, HistoryIndex, MemoryFlowStorage};
use topograph_sync::Replicator;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::{health_check, ingest_events, search_flows, store_flows, topology_query, AppState};
use config::{LoggingConfig, ServerConfig};

const DEFAULT_LOG_FILTER: &str = "topograph_server=info,topograph_sync=info,tower_http=info";

/// Install the global tracing subscriber
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        logging
            .filter
            .as_deref()
            .unwrap_or(DEFAULT_LOG_FILTER)
            .into()
    });

    let json = logging.json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

/// Build the replica: graph (restored from history when a file exists),
/// flow storage, traversal engine and replicator
pub fn build_state(config: &ServerConfig) -> Result<AppState> {
    let graph = match &config.replica.history_path {
        Some(path) if path.exists() => {
            let history = HistoryIndex::load_from_path(path, &config.history)?;
            tracing::info!(
                "Restored {} history records for {} entities from {:?}",
                history.record_count(),
                history.len(),
                path
            );
            Graph::with_history(config.history.clone(), Arc::new(SystemClock), history)
        }
        _ => Graph::new(config.history.clone()),
    };
    let graph = Arc::new(graph);

    let flows = Arc::new(MemoryFlowStorage::new());
    let engine = TraversalEngine::new(graph.clone(), config.query.clone())
        .with_flow_storage(flows.clone());
    let replicator = Replicator::new(
        config.replica.host.clone(),
        graph.clone(),
        config.replication.clone(),
    );

    Ok(AppState {
        graph,
        engine: Arc::new(engine),
        replicator: Arc::new(replicator),
        flows,
        host: config.replica.host.clone(),
        started_at: Instant::now(),
    })
}

/// Application router
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/topology", post(topology_query))
        .route("/api/events", post(ingest_events))
        .route("/api/flows", post(store_flows))
        .route("/api/flows/search", post(search_flows))
        .route("/ws/sync", get(ws::ws_sync))
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(if config.server.enable_cors {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            CorsLayer::new()
        })
        .layer(TraceLayer::new_for_http())
}

fn spawn_retention(graph: Arc<Graph>, retention_ms: u64) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_millis((retention_ms / 10).clamp(1_000, 60_000));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let purged = graph.apply_retention();
            if purged > 0 {
                tracing::debug!(purged, "history retention applied");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    init_tracing(&config.logging);

    tracing::info!("Starting Topograph Server");
    tracing::info!("Configuration: {:#?}", config);

    config.validate()?;

    let state = build_state(&config)?;
    let graph = state.graph.clone();
    tracing::info!("Replica host: {}", state.host);

    let retention = config
        .history
        .retention_ms
        .map(|ms| spawn_retention(graph.clone(), ms));

    let addr = config.socket_addr()?;
    tracing::info!("Listening on http://{}", addr);

    let app = router(state, &config);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = retention {
        handle.abort();
    }

    if let Some(path) = &config.replica.history_path {
        graph.save_history(path)?;
        tracing::info!("History written to {:?}", path);
    }

    Ok(())
}
