//! Hybrid Logical Clock timestamps.
//!
//! Combines physical time with a logical counter so that timestamps issued
//! by one clock are strictly increasing even when the wall clock stalls or
//! steps backwards.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

fn wall_clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A Hybrid Logical Clock timestamp.
///
/// - `wall_time`: milliseconds since Unix epoch
/// - `logical`: counter for events issued within the same millisecond
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HybridTimestamp {
    wall_time: u64,
    logical: u32,
}

impl HybridTimestamp {
    /// Creates a timestamp at the current wall time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            wall_time: wall_clock_millis(),
            logical: 0,
        }
    }

    /// Creates a timestamp from components.
    #[must_use]
    pub const fn new(wall_time: u64, logical: u32) -> Self {
        Self { wall_time, logical }
    }

    /// Returns the wall time component.
    #[must_use]
    pub const fn wall_time(&self) -> u64 {
        self.wall_time
    }

    /// Returns the logical counter.
    #[must_use]
    pub const fn logical(&self) -> u32 {
        self.logical
    }

    /// Generates the next timestamp after `self`.
    #[must_use]
    pub fn tick(&self) -> Self {
        let now = wall_clock_millis();
        if now > self.wall_time {
            Self {
                wall_time: now,
                logical: 0,
            }
        } else {
            self.successor()
        }
    }

    /// The smallest timestamp after `self`. A full logical counter carries
    /// into the next millisecond.
    fn successor(&self) -> Self {
        match self.logical.checked_add(1) {
            Some(logical) => Self {
                wall_time: self.wall_time,
                logical,
            },
            None => Self {
                wall_time: self.wall_time.saturating_add(1),
                logical: 0,
            },
        }
    }

    /// Returns a timestamp greater than both `self` and a received one.
    #[must_use]
    pub fn receive(&self, other: &Self) -> Self {
        let now = wall_clock_millis();
        let max_wall = now.max(self.wall_time).max(other.wall_time);

        if max_wall == self.wall_time && max_wall == other.wall_time {
            Self {
                wall_time: max_wall,
                logical: self.logical.max(other.logical),
            }
            .successor()
        } else if max_wall == self.wall_time {
            self.successor()
        } else if max_wall == other.wall_time {
            other.successor()
        } else {
            Self {
                wall_time: max_wall,
                logical: 0,
            }
        }
    }
}

impl Default for HybridTimestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl PartialOrd for HybridTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HybridTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wall_time
            .cmp(&other.wall_time)
            .then(self.logical.cmp(&other.logical))
    }
}

/// A local clock that hands out strictly increasing timestamps.
///
/// Shared by the manager so every appended change gets a timestamp later
/// than the one before it.
#[derive(Debug)]
pub struct HybridClock {
    last: Mutex<HybridTimestamp>,
}

impl HybridClock {
    /// Creates a clock that has not issued any timestamp yet.
    pub fn new() -> Self {
        Self::starting_at(HybridTimestamp::new(0, 0))
    }

    /// Creates a clock whose next timestamp is after `last`.
    pub fn starting_at(last: HybridTimestamp) -> Self {
        Self {
            last: Mutex::new(last),
        }
    }

    /// Issues the next timestamp.
    pub fn tick(&self) -> HybridTimestamp {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let next = last.tick();
        *last = next;
        next
    }

    /// Advances the clock past an observed timestamp (e.g. one restored from disk).
    pub fn observe(&self, seen: HybridTimestamp) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if seen > *last {
            *last = seen;
        }
    }

    /// Returns the most recently issued or observed timestamp.
    pub fn last(&self) -> HybridTimestamp {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for HybridClock {
    fn default() -> Self {
        Self::new()
    }
}
