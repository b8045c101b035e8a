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

//! Topograph Core
//!
//! Entity model for the distributed topology graph: identifiers, metadata,
//! nodes and edges, time slices, clocks, probe events and predicates.

pub mod clock;
pub mod config;
pub mod entity;
pub mod error;
pub mod event;
pub mod filter;
pub mod identifier;
pub mod metadata;
pub mod paging;
pub mod time;

pub use clock::{Clock, HlcTimestamp, HybridLogicalClock, ManualClock, SystemClock};
pub use config::{HistoryConfig, QueryConfig, ReplicationConfig};
pub use entity::{Edge, Element, EntityKind, Node};
pub use error::{Result, TopographError};
pub use event::{EventOp, GraphEvent};
pub use filter::{FieldGetter, Filter};
pub use identifier::Identifier;
pub use metadata::Metadata;
pub use paging::{Pagination, SortOrder};
pub use time::{now_millis, TimeSlice, Timestamp};
