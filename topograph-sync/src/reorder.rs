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

//! Buffer for edges whose endpoints have not arrived yet

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use topograph_core::{Edge, Identifier};

#[derive(Debug, Clone)]
struct Parked {
    edge: Edge,
    parked_at: Instant,
}

/// Edges waiting on a missing node, keyed by that node
#[derive(Debug)]
pub struct ReorderBuffer {
    window: Duration,
    waiting: HashMap<Identifier, Vec<Parked>>,
}

impl ReorderBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            waiting: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Park `edge` until `missing` arrives. A newer revision of an edge
    /// already parked replaces it.
    pub fn park(&mut self, missing: Identifier, edge: Edge, parked_at: Instant) {
        self.discard(&edge.id);
        self.waiting
            .entry(missing)
            .or_default()
            .push(Parked { edge, parked_at });
    }

    /// Edges that were waiting on `node`, with the instant they were first
    /// parked
    pub fn release(&mut self, node: &Identifier) -> Vec<(Edge, Instant)> {
        self.waiting
            .remove(node)
            .unwrap_or_default()
            .into_iter()
            .map(|p| (p.edge, p.parked_at))
            .collect()
    }

    /// Forget a parked edge, e.g. when its deletion arrives first
    pub fn discard(&mut self, edge: &Identifier) -> bool {
        let mut found = false;
        self.waiting.retain(|_, parked| {
            let before = parked.len();
            parked.retain(|p| &p.edge.id != edge);
            found |= parked.len() != before;
            !parked.is_empty()
        });
        found
    }

    /// Drop edges parked longer than the window
    pub fn expire(&mut self, now: Instant) -> Vec<Edge> {
        let window = self.window;
        let mut expired = Vec::new();
        self.waiting.retain(|_, parked| {
            parked.retain(|p| {
                let keep = now.saturating_duration_since(p.parked_at) <= window;
                if !keep {
                    expired.push(p.edge.clone());
                }
                keep
            });
            !parked.is_empty()
        });
        expired
    }

    /// Discard everything, returning how many edges were dropped
    pub fn clear(&mut self) -> usize {
        let count = self.len();
        self.waiting.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use topograph_core::Metadata;

    fn edge(id: &str, parent: &str, child: &str) -> Edge {
        Edge::new(
            Identifier::new(id),
            Identifier::new(parent),
            Identifier::new(child),
            "h",
            Metadata::new(),
            0,
        )
    }

    #[test]
    fn test_release_and_expire() {
        let start = Instant::now();
        let mut buffer = ReorderBuffer::new(Duration::from_secs(5));
        buffer.park(Identifier::new("y"), edge("e1", "x", "y"), start);
        buffer.park(Identifier::new("z"), edge("e2", "x", "z"), start + Duration::from_secs(3));
        assert_eq!(buffer.len(), 2);

        let released = buffer.release(&Identifier::new("y"));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].0.id.as_str(), "e1");

        assert!(buffer.expire(start + Duration::from_secs(6)).is_empty());
        let expired = buffer.expire(start + Duration::from_secs(9));
        assert_eq!(expired.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_reparking_replaces_and_discard() {
        let now = Instant::now();
        let mut buffer = ReorderBuffer::new(Duration::from_secs(5));
        buffer.park(Identifier::new("y"), edge("e1", "x", "y"), now);
        buffer.park(Identifier::new("x"), edge("e1", "x", "y"), now);
        assert_eq!(buffer.len(), 1);
        assert!(buffer.release(&Identifier::new("y")).is_empty());

        assert!(buffer.discard(&Identifier::new("e1")));
        assert!(!buffer.discard(&Identifier::new("e1")));
        assert_eq!(buffer.clear(), 0);
    }
}
