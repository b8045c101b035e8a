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

//! Topograph Sync
//!
//! Replication of graph mutations between replicas over a message-oriented
//! transport.

pub mod envelope;
pub mod peer;
pub mod reorder;
pub mod replicator;
pub mod transport;

pub use envelope::{Envelope, MessageType, SyncMessage};
pub use peer::{PeerEvent, PeerState};
pub use reorder::ReorderBuffer;
pub use replicator::Replicator;
pub use transport::{ChannelTransport, SyncTransport, TransportError};
