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

//! Topograph Storage Layer
//!
//! In-memory graph store of one replica, its revision history and the
//! immutable snapshots traversals run on, plus the flow storage contract
//! metric overlays are read from.

pub mod flow;
pub mod flow_storage;
pub mod graph;
pub mod history;
pub mod snapshot;

pub use flow::{Flow, FlowMetric, SearchQuery, TimedMetric};
pub use flow_storage::{FlowStorage, MemoryFlowStorage};
pub use graph::{ChangeEvent, Graph, GraphChange};
pub use history::{HistoryIndex, RecordOutcome, RevisionRecord};
pub use snapshot::{Direction, GraphSnapshot};
