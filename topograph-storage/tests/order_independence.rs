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

//! Events touching independent entities commute

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use topograph_core::{GraphEvent, HistoryConfig, Identifier, ManualClock, Metadata};
use topograph_storage::Graph;

type Script = Vec<Vec<GraphEvent>>;

fn scripts() -> impl Strategy<Value = Script> {
    proptest::collection::vec(
        (proptest::collection::vec(0u8..4, 0..4), any::<bool>()),
        1..6,
    )
    .prop_map(|entities| {
        entities
            .into_iter()
            .enumerate()
            .map(|(i, (updates, delete))| {
                let id = Identifier::new(format!("n{}", i));
                let mut t = 1_000;
                let mut events = vec![GraphEvent::add_node(
                    id.clone(),
                    "agent-1",
                    Metadata::new().with("Name", format!("if{}", i)),
                )
                .at(t)];
                for state in updates {
                    t += 10;
                    events.push(
                        GraphEvent::update_node(
                            id.clone(),
                            "agent-1",
                            Metadata::new().with("State", state as u64),
                        )
                        .at(t),
                    );
                }
                if delete {
                    events.push(GraphEvent::delete_node(id, "agent-1").at(t + 10));
                }
                events
            })
            .collect()
    })
}

fn apply_interleaved(script: &Script, choices: &[usize]) -> BTreeMap<String, (u64, Metadata)> {
    let graph = Graph::with_clock(HistoryConfig::default(), Arc::new(ManualClock::new(0)));
    let mut queues: Vec<std::collections::VecDeque<&GraphEvent>> =
        script.iter().map(|events| events.iter().collect()).collect();

    let mut step = 0;
    loop {
        let open: Vec<usize> = (0..queues.len()).filter(|&i| !queues[i].is_empty()).collect();
        if open.is_empty() {
            break;
        }
        let pick = open[choices.get(step).copied().unwrap_or(0) % open.len()];
        step += 1;
        if let Some(event) = queues[pick].pop_front() {
            graph.apply_event(event).unwrap();
        }
    }

    let (nodes, _) = graph.live_elements();
    nodes
        .into_iter()
        .map(|n| (n.id.to_string(), (n.revision, n.metadata)))
        .collect()
}

proptest! {
    #[test]
    fn prop_independent_entities_commute(
        script in scripts(),
        choices in proptest::collection::vec(0usize..16, 0..40),
    ) {
        let sequential = apply_interleaved(&script, &[]);
        let interleaved = apply_interleaved(&script, &choices);
        prop_assert_eq!(sequential, interleaved);
    }
}
