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

//! Timestamps and time slices used to select historical graph state

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, TopographError};

/// Milliseconds since the Unix epoch
pub type Timestamp = u64;

/// Current wall clock time in milliseconds
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A single instant (`start == last`) or a closed interval `[start, last]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimeSlice {
    pub start: Timestamp,
    pub last: Timestamp,
}

impl TimeSlice {
    pub fn point(t: Timestamp) -> Self {
        Self { start: t, last: t }
    }

    pub fn interval(from: Timestamp, to: Timestamp) -> Result<Self> {
        if to < from {
            return Err(TopographError::Validation(format!(
                "time slice ends before it starts: {} < {}",
                to, from
            )));
        }
        Ok(Self {
            start: from,
            last: to,
        })
    }

    /// `[time, time + duration]`
    pub fn from_context(time: Timestamp, duration: Option<u64>) -> Self {
        match duration {
            Some(d) => Self {
                start: time,
                last: time.saturating_add(d),
            },
            None => Self::point(time),
        }
    }

    pub fn is_point(&self) -> bool {
        self.start == self.last
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && t <= self.last
    }

    /// Whether a half-open validity interval `[from, to)` intersects this
    /// slice. An open `to` extends forever.
    pub fn overlaps_validity(&self, from: Timestamp, to: Option<Timestamp>) -> bool {
        from <= self.last && to.map_or(true, |to| to > self.start)
    }

    /// Whether a closed interval `[from, to]` intersects this slice
    pub fn overlaps(&self, from: Timestamp, to: Timestamp) -> bool {
        from <= self.last && to >= self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_rejects_reversed_bounds() {
        assert!(TimeSlice::interval(10, 5).is_err());
        assert!(TimeSlice::interval(5, 5).unwrap().is_point());
    }

    #[test]
    fn test_validity_at_point() {
        let at = TimeSlice::point(100);
        assert!(at.overlaps_validity(100, Some(200)));
        assert!(at.overlaps_validity(50, None));
        // validity intervals are half-open
        assert!(!at.overlaps_validity(50, Some(100)));
        assert!(!at.overlaps_validity(101, None));
    }

    #[test]
    fn test_context_duration_extends_forward() {
        let slice = TimeSlice::from_context(1_000, Some(500));
        assert_eq!(slice.start, 1_000);
        assert_eq!(slice.last, 1_500);
        assert!(slice.contains(1_250));
    }
}
