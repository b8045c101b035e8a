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

//! Peer connection lifecycle state machine.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeerState {
    Disconnected,
    Connected,
    Syncing,
    Synced,
}

impl PeerState {
    pub fn is_connected(self) -> bool {
        !matches!(self, PeerState::Disconnected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    Connect,
    RequestSent,
    ReplyApplied,
    SyncTimeout,
    Disconnect,
}

#[derive(Debug, Error)]
#[error("Invalid peer transition: {current:?} -> {event:?}")]
pub struct InvalidTransition {
    pub current: PeerState,
    pub event: PeerEvent,
}

impl PeerState {
    pub fn transition(self, event: PeerEvent) -> Result<PeerState, InvalidTransition> {
        use PeerEvent::*;
        use PeerState::*;

        let next = match (self, event) {
            (Disconnected, Connect) => Connected,
            (Connected, RequestSent) => Syncing,
            (Syncing, ReplyApplied) => Synced,
            (Syncing, SyncTimeout) => Disconnected,
            (s, Disconnect) if s.is_connected() => Disconnected,
            _ => {
                return Err(InvalidTransition {
                    current: self,
                    event,
                })
            }
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = PeerState::Disconnected
            .transition(PeerEvent::Connect)
            .and_then(|s| s.transition(PeerEvent::RequestSent))
            .and_then(|s| s.transition(PeerEvent::ReplyApplied))
            .unwrap();
        assert_eq!(state, PeerState::Synced);
        assert_eq!(state.transition(PeerEvent::Disconnect).unwrap(), PeerState::Disconnected);
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(PeerState::Disconnected.transition(PeerEvent::Disconnect).is_err());
        assert!(PeerState::Connected.transition(PeerEvent::ReplyApplied).is_err());
        assert!(PeerState::Synced.transition(PeerEvent::SyncTimeout).is_err());
        assert_eq!(
            PeerState::Syncing.transition(PeerEvent::SyncTimeout).unwrap(),
            PeerState::Disconnected
        );
    }
}
