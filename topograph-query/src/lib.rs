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

//! Topograph Query
//!
//! Path traversals over graph snapshots, optionally joined with flow
//! metrics from a [`topograph_storage::FlowStorage`].

pub mod aggregation;
pub mod parser;
pub mod step;
pub mod traversal;

pub use parser::parse;
pub use step::{Predicate, PredicateValue, Step};
pub use traversal::{TraversalEngine, TraversalRequest, TraversalResult};
