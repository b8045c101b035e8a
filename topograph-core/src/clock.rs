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

//! Physical clocks and the hybrid logical clock stamped on sync envelopes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::time::{now_millis, Timestamp};

/// Number of bits reserved for the HLC logical counter
pub const HLC_LOGICAL_BITS: u32 = 16;

/// Mask extracting the logical counter from a packed timestamp
pub const HLC_LOGICAL_MASK: u64 = (1u64 << HLC_LOGICAL_BITS) - 1;

/// Source of wall clock time. The graph store stamps every revision through
/// this so tests can drive time explicitly.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        now_millis()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, t: Timestamp) {
        self.now.store(t, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: u64) -> Timestamp {
        self.now.fetch_add(delta, Ordering::SeqCst) + delta
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Packed HLC value: upper 48 bits wall time (ms), lower 16 bits logical
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct HlcTimestamp(pub u64);

impl HlcTimestamp {
    pub fn from_parts(wall_time_ms: u64, logical: u16) -> Self {
        let wall_shifted = (wall_time_ms & ((1u64 << 48) - 1)) << HLC_LOGICAL_BITS;
        HlcTimestamp(wall_shifted | logical as u64)
    }

    pub fn wall_time_ms(&self) -> u64 {
        self.0 >> HLC_LOGICAL_BITS
    }

    pub fn logical(&self) -> u16 {
        (self.0 & HLC_LOGICAL_MASK) as u16
    }
}

impl fmt::Display for HlcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.wall_time_ms(), self.logical())
    }
}

/// Hybrid logical clock.
///
/// `now` is strictly monotonic per replica; `receive` folds a remote
/// timestamp in so that anything issued afterwards orders after it.
#[derive(Debug)]
pub struct HybridLogicalClock {
    last: AtomicU64,
    physical: Arc<dyn Clock>,
}

impl HybridLogicalClock {
    pub fn new(physical: Arc<dyn Clock>) -> Self {
        Self {
            last: AtomicU64::new(0),
            physical,
        }
    }

    pub fn now(&self) -> HlcTimestamp {
        self.advance(None)
    }

    pub fn receive(&self, remote: HlcTimestamp) -> HlcTimestamp {
        self.advance(Some(remote))
    }

    pub fn last(&self) -> HlcTimestamp {
        HlcTimestamp(self.last.load(Ordering::Acquire))
    }

    fn advance(&self, remote: Option<HlcTimestamp>) -> HlcTimestamp {
        loop {
            let pt = self.physical.now();
            let last_raw = self.last.load(Ordering::Acquire);
            let last = HlcTimestamp(last_raw);

            let mut wall = pt.max(last.wall_time_ms());
            if let Some(r) = remote {
                wall = wall.max(r.wall_time_ms());
            }

            let mut logical: u32 = 0;
            if wall == last.wall_time_ms() {
                logical = last.logical() as u32 + 1;
            }
            if let Some(r) = remote {
                if wall == r.wall_time_ms() {
                    logical = logical.max(r.logical() as u32 + 1);
                }
            }

            let next = if logical > HLC_LOGICAL_MASK as u32 {
                // counter exhausted, borrow the next millisecond
                HlcTimestamp::from_parts(wall + 1, 0)
            } else {
                HlcTimestamp::from_parts(wall, logical as u16)
            };

            if self
                .last
                .compare_exchange_weak(last_raw, next.0, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return next;
            }
        }
    }
}
