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
use topograph_query::{TraversalRequest, TraversalResult};
use tracing::debug;

use crate::api::{ApiError, AppState};

/// POST /api/topology - Evaluate a traversal
///
/// # Request Body
/// ```json
/// { "GremlinQuery": "g.V().Has(\"Type\", \"bridge\").Out()" }
/// ```
pub async fn topology_query(
    State(state): State<AppState>,
    Json(request): Json<TraversalRequest>,
) -> Result<Json<TraversalResult>, ApiError> {
    debug!(query = %request.query, "topology query");

    let engine = state.engine.clone();
    let result = tokio::task::spawn_blocking(move || engine.execute_request(&request))
        .await
        .map_err(|e| ApiError::Internal(format!("query task failed: {}", e)))??;

    Ok(Json(result))
}
