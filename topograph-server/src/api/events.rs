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


//! Probe event ingestion

use axum::{extract::State, Json};
use serde::Serialize;
use topograph_core::GraphEvent;
use tracing::{debug, warn};

use crate::api::{ApiError, AppState};

/// Response for POST /api/events
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub applied: usize,
    pub rejected: usize,
    pub errors: Vec<String>,
}

/// POST /api/events - Apply a batch of mutation events in order
///
/// Events are independent: a failing event is reported and the rest of the
/// batch still applies. Only entities owned by this replica may be mutated.
pub async fn ingest_events(
    State(state): State<AppState>,
    Json(events): Json<Vec<GraphEvent>>,
) -> Result<Json<IngestResponse>, ApiError> {
    let mut applied = 0;
    let mut errors = Vec::new();

    for (i, event) in events.iter().enumerate() {
        if event.host != state.host {
            errors.push(format!(
                "event {}: host {} is not owned by this replica ({})",
                i, event.host, state.host
            ));
            continue;
        }
        match state.graph.apply_event(event) {
            Ok(()) => applied += 1,
            Err(e) => {
                debug!(index = i, id = %event.id, error = %e, "event rejected");
                errors.push(format!("event {}: {}", i, e));
            }
        }
    }

    if !errors.is_empty() {
        warn!(applied, rejected = errors.len(), "some events were rejected");
    }

    Ok(Json(IngestResponse {
        applied,
        rejected: errors.len(),
        errors,
    }))
}
