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


//! WebSocket endpoint carrying sync envelopes between replicas

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use topograph_sync::{SyncTransport, TransportError};
use tracing::{debug, info, warn};

use crate::api::{ApiError, AppState};

/// Sync transport over an accepted WebSocket; one envelope per text frame
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl SyncTransport for WsTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.socket
            .send(Message::Text(frame))
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.socket.recv().await {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(bytes))) => {
                    return String::from_utf8(bytes)
                        .map(Some)
                        .map_err(|e| TransportError::Framing(e.to_string()));
                }
                // pings are answered by the socket itself
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Err(e)) => return Err(TransportError::Other(e.to_string())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.socket
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct SyncParams {
    /// Host identity of the connecting replica
    pub host: String,
}

/// GET /ws/sync?host=<peer> - replicate with a remote replica
pub async fn ws_sync(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<SyncParams>,
) -> Response {
    let peer = params.host.trim().to_string();
    if peer.is_empty() || peer == state.host {
        return ApiError::BadRequest(format!("invalid peer host {:?}", params.host)).into_response();
    }
    if state.replicator.peer_state(&peer).is_some() {
        return ApiError::BadRequest(format!("peer {} is already connected", peer)).into_response();
    }

    info!(peer = %peer, "sync connection requested");
    ws.on_upgrade(move |socket| async move {
        match state
            .replicator
            .run_peer(&peer, WsTransport::new(socket))
            .await
        {
            Ok(()) => debug!(peer = %peer, "sync session closed"),
            Err(e) => warn!(peer = %peer, error = %e, "sync session failed"),
        }
    })
}
