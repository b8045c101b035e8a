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


//! HTTP handlers

pub mod events;
pub mod flows;
pub mod health;
pub mod topology;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use topograph_core::TopographError;
use topograph_query::TraversalEngine;
use topograph_storage::{FlowStorage, Graph};
use topograph_sync::Replicator;

pub use events::ingest_events;
pub use flows::{search_flows, store_flows};
pub use health::health_check;
pub use topology::topology_query;

/// API error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Request timeout: {0}")]
    RequestTimeout(String),
}

impl From<TopographError> for ApiError {
    fn from(err: TopographError) -> Self {
        match err {
            TopographError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            TopographError::Query { .. }
            | TopographError::Validation(_)
            | TopographError::Conflict(_)
            | TopographError::Serialization(_) => ApiError::BadRequest(err.to_string()),
            TopographError::Timeout(_) => ApiError::RequestTimeout(err.to_string()),
            TopographError::Sync(_) | TopographError::Io(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::RequestTimeout(msg) => (StatusCode::REQUEST_TIMEOUT, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub graph: Arc<Graph>,
    pub engine: Arc<TraversalEngine>,
    pub replicator: Arc<Replicator>,
    pub flows: Arc<dyn FlowStorage>,
    /// Host identity of this replica
    pub host: String,
    pub started_at: Instant,
}
