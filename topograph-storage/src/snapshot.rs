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

//! Immutable graph views handed to the traversal engine

use std::collections::{HashMap, HashSet};
use topograph_core::{Edge, Element, Filter, Identifier, Node, TimeSlice};

/// Edge direction relative to the node a walk starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards children
    Out,
    /// Towards parents
    In,
    Both,
}

/// A consistent, read-only copy of the graph.
///
/// In range mode one entity may be present once per revision overlapping
/// the slice, so lookups by id return every version.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    slice: Option<TimeSlice>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    node_versions: HashMap<Identifier, Vec<usize>>,
    out_edges: HashMap<Identifier, Vec<usize>>,
    in_edges: HashMap<Identifier, Vec<usize>>,
}

impl GraphSnapshot {
    /// Build a snapshot, dropping edges whose endpoints are absent
    pub fn build(slice: Option<TimeSlice>, mut nodes: Vec<Node>, mut edges: Vec<Edge>) -> Self {
        nodes.sort_by(|a, b| {
            (a.created_at, &a.id, a.updated_at).cmp(&(b.created_at, &b.id, b.updated_at))
        });

        let mut node_versions: HashMap<Identifier, Vec<usize>> = HashMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            node_versions.entry(node.id.clone()).or_default().push(idx);
        }

        edges.retain(|e| {
            node_versions.contains_key(&e.parent) && node_versions.contains_key(&e.child)
        });
        edges.sort_by(|a, b| {
            (a.created_at, &a.id, a.updated_at).cmp(&(b.created_at, &b.id, b.updated_at))
        });

        let mut out_edges: HashMap<Identifier, Vec<usize>> = HashMap::new();
        let mut in_edges: HashMap<Identifier, Vec<usize>> = HashMap::new();
        for (idx, edge) in edges.iter().enumerate() {
            out_edges.entry(edge.parent.clone()).or_default().push(idx);
            in_edges.entry(edge.child.clone()).or_default().push(idx);
        }

        Self {
            slice,
            nodes,
            edges,
            node_versions,
            out_edges,
            in_edges,
        }
    }

    /// Build from history elements
    pub fn from_elements(slice: TimeSlice, elements: Vec<Element>) -> Self {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for element in elements {
            match element {
                Element::Node(n) => nodes.push(n),
                Element::Edge(e) => edges.push(e),
            }
        }
        Self::build(Some(slice), nodes, edges)
    }

    /// None for the live graph
    pub fn slice(&self) -> Option<TimeSlice> {
        self.slice
    }

    pub fn is_range(&self) -> bool {
        self.slice.map_or(false, |s| !s.is_point())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Every version of a node present in this snapshot
    pub fn node_versions(&self, id: &Identifier) -> impl Iterator<Item = &Node> {
        self.node_versions
            .get(id)
            .into_iter()
            .flatten()
            .map(move |&idx| &self.nodes[idx])
    }

    pub fn get_node(&self, id: &Identifier) -> Option<&Node> {
        self.node_versions(id).last()
    }

    pub fn get_edge(&self, id: &Identifier) -> Option<&Edge> {
        self.edges.iter().rev().find(|e| &e.id == id)
    }

    /// Edges touching `id` in the given direction. An edge with several
    /// revisions in range mode is reported once.
    pub fn incident_edges(&self, id: &Identifier, direction: Direction) -> Vec<&Edge> {
        let lists = match direction {
            Direction::Out => [self.out_edges.get(id), None],
            Direction::In => [self.in_edges.get(id), None],
            Direction::Both => [self.out_edges.get(id), self.in_edges.get(id)],
        };

        let mut seen = HashSet::new();
        lists
            .iter()
            .flatten()
            .flat_map(|idxs| idxs.iter())
            .map(|&idx| &self.edges[idx])
            .filter(|e| seen.insert(e.id.clone()))
            .collect()
    }

    /// Nodes reached from `id` in one hop, optionally filtered on their
    /// metadata. Parallel edges yield the destination once per edge.
    pub fn neighbors(
        &self,
        id: &Identifier,
        direction: Direction,
        filter: Option<&Filter>,
    ) -> Vec<&Node> {
        let mut result = Vec::new();
        for edge in self.incident_edges(id, direction) {
            let Some(other) = edge.other_end(id) else {
                continue;
            };
            for node in self.node_versions(other) {
                if filter.map_or(true, |f| f.eval(node)) {
                    result.push(node);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use topograph_core::Metadata;

    fn node(id: &str, ty: &str, at: u64) -> Node {
        Node::new(Identifier::new(id), "h", Metadata::new().with("Type", ty), at)
    }

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
    fn test_dangling_edges_are_dropped() {
        let snap = GraphSnapshot::build(
            None,
            vec![node("a", "bridge", 1)],
            vec![edge("e1", "a", "missing")],
        );
        assert_eq!(snap.edge_count(), 0);
    }

    #[test]
    fn test_neighbors_by_direction() {
        let snap = GraphSnapshot::build(
            None,
            vec![node("a", "bridge", 1), node("b", "port", 2), node("c", "internal", 3)],
            vec![edge("e1", "a", "b"), edge("e2", "b", "c")],
        );
        let b = Identifier::new("b");
        let ids = |dir| -> Vec<String> {
            snap.neighbors(&b, dir, None)
                .iter()
                .map(|n| n.id.to_string())
                .collect()
        };
        let out = ids(Direction::Out);
        let inn = ids(Direction::In);
        assert_eq!(out, vec!["c"]);
        assert_eq!(inn, vec!["a"]);
        assert_eq!(snap.neighbors(&b, Direction::Both, None).len(), 2);

        let filter = Filter::term("Type", "internal");
        assert_eq!(snap.neighbors(&b, Direction::Both, Some(&filter)).len(), 1);
    }

    #[test]
    fn test_nodes_ordered_by_creation() {
        let snap = GraphSnapshot::build(
            None,
            vec![node("z", "host", 5), node("a", "host", 9), node("m", "host", 1)],
            vec![],
        );
        let ids: Vec<_> = snap.nodes().iter().map(|n| n.id.to_string()).collect();
        assert_eq!(ids, vec!["m", "z", "a"]);
    }
}
