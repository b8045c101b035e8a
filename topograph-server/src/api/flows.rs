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
use topograph_storage::{Flow, SearchQuery};
use tracing::debug;

use crate::api::{ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct StoreResponse {
    pub stored: usize,
}

/// POST /api/flows - Index captured flows
pub async fn store_flows(
    State(state): State<AppState>,
    Json(flows): Json<Vec<Flow>>,
) -> Result<Json<StoreResponse>, ApiError> {
    state.flows.store_flows(&flows)?;
    debug!(count = flows.len(), "flows stored");
    Ok(Json(StoreResponse {
        stored: flows.len(),
    }))
}

/// POST /api/flows/search - Search captured flows
pub async fn search_flows(
    State(state): State<AppState>,
    Json(query): Json<SearchQuery>,
) -> Result<Json<Vec<Flow>>, ApiError> {
    query.validate()?;
    Ok(Json(state.flows.search_flows(&query)?))
}
