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

//! Per-entity revision log backing time travel queries
//!
//! Every entity owns a list of revision records ordered by `valid_from`.
//! Consecutive records are contiguous: a record is closed exactly when the
//! next one opens, except after a deletion where the entity may be absent
//! for a while before being re-created.
//!
//! Remote events may arrive late. A record older than the entity's newest
//! known time by at most `max_clock_skew_ms` re-splits the interval it
//! falls into; anything older is a [`TopographError::Conflict`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use topograph_core::{
    Element, HistoryConfig, Identifier, Result, TimeSlice, Timestamp, TopographError,
};
use tracing::debug;

/// One immutable revision of an entity and its validity `[valid_from, valid_to)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub element: Element,
    pub valid_from: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<Timestamp>,
    /// Closed by a deletion rather than by a newer revision
    #[serde(default)]
    pub terminal: bool,
}

impl RevisionRecord {
    fn open(element: Element, at: Timestamp) -> Self {
        Self {
            element,
            valid_from: at,
            valid_to: None,
            terminal: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.valid_to.is_none()
    }

    pub fn valid_at(&self, t: Timestamp) -> bool {
        self.valid_from <= t && self.valid_to.map_or(true, |to| t < to)
    }

    /// The element as a query sees it; a deletion shows up as `deleted_at`
    pub fn materialize(&self) -> Element {
        let mut element = self.element.clone();
        if self.terminal {
            match &mut element {
                Element::Node(n) => n.deleted_at = self.valid_to,
                Element::Edge(e) => e.deleted_at = self.valid_to,
            }
        }
        element
    }

    /// Latest instant this record speaks about
    fn horizon(&self) -> Timestamp {
        self.valid_to.unwrap_or(self.valid_from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// New tail revision
    Appended,
    /// Late revision inserted into an existing interval
    Resplit,
    /// Already recorded
    Duplicate,
}

#[derive(Debug, Default)]
pub struct HistoryIndex {
    entries: HashMap<Identifier, Vec<RevisionRecord>>,
    max_clock_skew_ms: u64,
}

impl HistoryIndex {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            entries: HashMap::new(),
            max_clock_skew_ms: config.max_clock_skew_ms,
        }
    }

    /// Number of entities with at least one retained revision
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn revisions(&self, id: &Identifier) -> Option<&[RevisionRecord]> {
        self.entries.get(id).map(Vec::as_slice)
    }

    fn check_skew(&self, id: &Identifier, newest: Timestamp, at: Timestamp) -> Result<()> {
        if newest.saturating_sub(at) > self.max_clock_skew_ms {
            return Err(TopographError::Conflict(format!(
                "revision of {} at {} is {}ms older than its newest revision (max skew {}ms)",
                id,
                at,
                newest - at,
                self.max_clock_skew_ms
            )));
        }
        Ok(())
    }

    /// Open a new revision for `element` valid from `at`.
    ///
    /// The index is left untouched when an error is returned.
    pub fn record(&mut self, element: Element, at: Timestamp) -> Result<RecordOutcome> {
        let id = element.id().clone();
        let newest = match self.entries.get(&id).and_then(|records| records.last()) {
            Some(tail) => tail.horizon(),
            None => {
                self.entries
                    .insert(id, vec![RevisionRecord::open(element, at)]);
                return Ok(RecordOutcome::Appended);
            }
        };

        let duplicate = self.entries.get(&id).map_or(false, |records| {
            records
                .iter()
                .any(|r| r.valid_from == at && r.element.revision() == element.revision())
        });
        if duplicate {
            return Ok(RecordOutcome::Duplicate);
        }

        if let Some(records) = self.entries.get_mut(&id) {
            let last = records.len() - 1;
            let tail = &mut records[last];
            let tail_to = tail.valid_to;
            if at >= tail.valid_from {
                match tail_to {
                    None => {
                        tail.valid_to = Some(at);
                        records.push(RevisionRecord::open(element, at));
                        return Ok(RecordOutcome::Appended);
                    }
                    Some(to) if at >= to => {
                        records.push(RevisionRecord::open(element, at));
                        return Ok(RecordOutcome::Appended);
                    }
                    Some(_) => {}
                }
            }
        }

        self.check_skew(&id, newest, at)?;
        self.resplit(&id, element, at)?;
        debug!(entity = %id, at, "history re-split for late revision");
        Ok(RecordOutcome::Resplit)
    }

    fn resplit(&mut self, id: &Identifier, element: Element, at: Timestamp) -> Result<()> {
        let records = self
            .entries
            .get_mut(id)
            .ok_or_else(|| TopographError::Conflict(format!("no history for {}", id)))?;

        let Some(idx) = records.iter().rposition(|r| r.valid_from <= at) else {
            // predates the first known revision
            let first_from = records[0].valid_from;
            records.insert(
                0,
                RevisionRecord {
                    element,
                    valid_from: at,
                    valid_to: Some(first_from),
                    terminal: false,
                },
            );
            return Ok(());
        };

        let container = &mut records[idx];
        let container_to = container.valid_to;
        match container_to {
            Some(to) if at < to => {
                let split = RevisionRecord {
                    element,
                    valid_from: at,
                    valid_to: Some(to),
                    terminal: container.terminal,
                };
                container.valid_to = Some(at);
                container.terminal = false;
                records.insert(idx + 1, split);
                Ok(())
            }
            _ => Err(TopographError::Conflict(format!(
                "revision of {} at {} falls after its deletion",
                id, at
            ))),
        }
    }

    /// Close the current revision of `id` because the entity was deleted.
    ///
    /// Returns false when the entity is unknown or already closed.
    pub fn close(&mut self, id: &Identifier, at: Timestamp) -> Result<bool> {
        let newest = match self.entries.get(id).and_then(|r| r.last()) {
            Some(tail) if tail.is_open() => tail.valid_from,
            _ => return Ok(false),
        };
        self.check_close(id, at)?;

        let records = match self.entries.get_mut(id) {
            Some(r) => r,
            None => return Ok(false),
        };
        if at < newest {
            // revisions opened after the deletion instant never existed
            records.retain(|r| r.valid_from <= at);
            debug!(entity = %id, at, "history truncated for late deletion");
        }
        if let Some(tail) = records.last_mut() {
            tail.valid_to = Some(at);
            tail.terminal = true;
        }
        Ok(true)
    }

    /// Whether [`close`](Self::close) would accept a deletion at `at`
    pub fn check_close(&self, id: &Identifier, at: Timestamp) -> Result<()> {
        let Some(records) = self.entries.get(id) else {
            return Ok(());
        };
        match records.last() {
            Some(tail) if tail.is_open() && at < tail.valid_from => {
                self.check_skew(id, tail.valid_from, at)?;
                if !records.iter().any(|r| r.valid_from <= at) {
                    return Err(TopographError::Conflict(format!(
                        "deletion of {} at {} predates its creation",
                        id, at
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Close every open revision, as after a restart where the live graph
    /// is rebuilt from scratch
    pub fn close_all_open(&mut self, at: Timestamp) -> usize {
        let mut closed = 0;
        for records in self.entries.values_mut() {
            if let Some(tail) = records.last_mut() {
                if tail.is_open() {
                    tail.valid_to = Some(at.max(tail.valid_from));
                    tail.terminal = true;
                    closed += 1;
                }
            }
        }
        closed
    }

    /// Revision of `id` valid at `t`
    pub fn entity_at(&self, id: &Identifier, t: Timestamp) -> Option<Element> {
        self.entries
            .get(id)?
            .iter()
            .find(|r| r.valid_at(t))
            .map(RevisionRecord::materialize)
    }

    /// Every entity's revision valid at `t`
    pub fn at(&self, t: Timestamp) -> Vec<Element> {
        self.entries
            .values()
            .filter_map(|records| records.iter().find(|r| r.valid_at(t)))
            .map(RevisionRecord::materialize)
            .collect()
    }

    /// Every revision overlapping the slice, one element per revision
    pub fn range(&self, slice: &TimeSlice) -> Vec<Element> {
        self.entries
            .values()
            .flat_map(|records| records.iter())
            .filter(|r| slice.overlaps_validity(r.valid_from, r.valid_to))
            .map(RevisionRecord::materialize)
            .collect()
    }

    /// Drop closed revisions that ended at or before `t`
    pub fn purge_before(&mut self, t: Timestamp) -> usize {
        let mut purged = 0;
        self.entries.retain(|_, records| {
            let before = records.len();
            records.retain(|r| r.valid_to.map_or(true, |to| to > t));
            purged += before - records.len();
            !records.is_empty()
        });
        purged
    }

    /// Write one JSON record per line, entities in identifier order
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        let mut ids: Vec<&Identifier> = self.entries.keys().collect();
        ids.sort();
        for id in ids {
            for record in &self.entries[id] {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Load a file written by [`save_to_path`](Self::save_to_path),
    /// rejecting it when an entity's intervals are not contiguous
    pub fn load_from_path(path: impl AsRef<Path>, config: &HistoryConfig) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut entries: HashMap<Identifier, Vec<RevisionRecord>> = HashMap::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: RevisionRecord = serde_json::from_str(&line).map_err(|e| {
                TopographError::Serialization(format!("line {}: {}", lineno + 1, e))
            })?;
            entries
                .entry(record.element.id().clone())
                .or_default()
                .push(record);
        }

        for (id, records) in &entries {
            validate_contiguity(id, records)?;
        }

        Ok(Self {
            entries,
            max_clock_skew_ms: config.max_clock_skew_ms,
        })
    }
}

fn validate_contiguity(id: &Identifier, records: &[RevisionRecord]) -> Result<()> {
    for record in records {
        if let Some(to) = record.valid_to {
            if to < record.valid_from {
                return Err(TopographError::Conflict(format!(
                    "revision of {} ends before it starts ({} < {})",
                    id, to, record.valid_from
                )));
            }
        }
    }
    for pair in records.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let Some(to) = prev.valid_to else {
            return Err(TopographError::Conflict(format!(
                "open revision of {} followed by another revision",
                id
            )));
        };
        let contiguous = if prev.terminal {
            next.valid_from >= to
        } else {
            next.valid_from == to
        };
        if !contiguous {
            return Err(TopographError::Conflict(format!(
                "revisions of {} are not contiguous at {}",
                id, to
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use topograph_core::{Metadata, Node};

    fn node_rev(id: &str, revision: u64, state: &str) -> Element {
        let mut node = Node::new(
            Identifier::new(id),
            "h1",
            Metadata::new().with("State", state),
            0,
        );
        node.revision = revision;
        Element::Node(node)
    }

    fn index() -> HistoryIndex {
        HistoryIndex::new(&HistoryConfig {
            max_clock_skew_ms: 1_000,
            retention_ms: None,
        })
    }

    fn state_at(h: &HistoryIndex, t: Timestamp) -> Option<String> {
        h.entity_at(&Identifier::new("n"), t)
            .and_then(|e| e.metadata().get_str("State").map(str::to_string))
    }

    #[test]
    fn test_intervals_select_revision() {
        let mut h = index();
        h.record(node_rev("n", 1, "DOWN"), 100).unwrap();
        h.record(node_rev("n", 2, "UP"), 200).unwrap();
        h.close(&Identifier::new("n"), 300).unwrap();

        assert_eq!(state_at(&h, 99), None);
        assert_eq!(state_at(&h, 100).as_deref(), Some("DOWN"));
        assert_eq!(state_at(&h, 199).as_deref(), Some("DOWN"));
        assert_eq!(state_at(&h, 200).as_deref(), Some("UP"));
        assert_eq!(state_at(&h, 300), None);

        let deleted = h.entity_at(&Identifier::new("n"), 250).unwrap();
        assert_eq!(deleted.deleted_at(), Some(300));
    }

    #[test]
    fn test_duplicate_record_is_ignored() {
        let mut h = index();
        assert_eq!(h.record(node_rev("n", 1, "UP"), 100).unwrap(), RecordOutcome::Appended);
        assert_eq!(h.record(node_rev("n", 1, "UP"), 100).unwrap(), RecordOutcome::Duplicate);
        assert_eq!(h.record_count(), 1);
    }

    #[test]
    fn test_late_revision_resplits_interval() {
        let mut h = index();
        h.record(node_rev("n", 1, "DOWN"), 100).unwrap();
        h.record(node_rev("n", 3, "UP"), 500).unwrap();
        let outcome = h.record(node_rev("n", 2, "DORMANT"), 300).unwrap();

        assert_eq!(outcome, RecordOutcome::Resplit);
        assert_eq!(state_at(&h, 200).as_deref(), Some("DOWN"));
        assert_eq!(state_at(&h, 300).as_deref(), Some("DORMANT"));
        assert_eq!(state_at(&h, 500).as_deref(), Some("UP"));

        let records = h.revisions(&Identifier::new("n")).unwrap();
        assert!(validate_contiguity(&Identifier::new("n"), records).is_ok());
    }

    #[test]
    fn test_revision_beyond_skew_is_conflict() {
        let mut h = index();
        h.record(node_rev("n", 1, "DOWN"), 5_000).unwrap();
        let err = h.record(node_rev("n", 2, "UP"), 1_000).unwrap_err();
        assert!(matches!(err, TopographError::Conflict(_)));
        assert_eq!(h.record_count(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut h = index();
        h.record(node_rev("n", 1, "UP"), 100).unwrap();
        assert!(h.close(&Identifier::new("n"), 200).unwrap());
        assert!(!h.close(&Identifier::new("n"), 250).unwrap());
        assert!(!h.close(&Identifier::new("unknown"), 250).unwrap());
    }

    #[test]
    fn test_recreation_after_delete_leaves_gap() {
        let mut h = index();
        h.record(node_rev("n", 1, "UP"), 100).unwrap();
        h.close(&Identifier::new("n"), 200).unwrap();
        h.record(node_rev("n", 1, "UP"), 400).unwrap();

        assert_eq!(state_at(&h, 300), None);
        assert_eq!(state_at(&h, 400).as_deref(), Some("UP"));
        let records = h.revisions(&Identifier::new("n")).unwrap();
        assert!(validate_contiguity(&Identifier::new("n"), records).is_ok());
    }

    #[test]
    fn test_range_returns_each_revision() {
        let mut h = index();
        h.record(node_rev("n", 1, "DOWN"), 100).unwrap();
        h.record(node_rev("n", 2, "UP"), 200).unwrap();

        let slice = TimeSlice::interval(150, 250).unwrap();
        assert_eq!(h.range(&slice).len(), 2);
        let later = TimeSlice::interval(210, 250).unwrap();
        assert_eq!(h.range(&later).len(), 1);
    }

    #[test]
    fn test_purge_before() {
        let mut h = index();
        h.record(node_rev("n", 1, "DOWN"), 100).unwrap();
        h.record(node_rev("n", 2, "UP"), 200).unwrap();
        h.record(node_rev("gone", 1, "UP"), 100).unwrap();
        h.close(&Identifier::new("gone"), 150).unwrap();

        assert_eq!(h.purge_before(200), 2);
        assert_eq!(h.len(), 1);
        assert_eq!(state_at(&h, 150), None);
        assert_eq!(state_at(&h, 250).as_deref(), Some("UP"));
    }
}
