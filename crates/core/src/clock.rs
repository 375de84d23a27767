use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Returns the current wall-clock time as milliseconds since Unix epoch.
pub fn physical_now() -> Result<u64, CoreError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|_| CoreError::InvalidData("system clock before epoch".into()))
}

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }

    pub fn from_i64(ms: i64) -> Result<Self, CoreError> {
        u64::try_from(ms)
            .map(Self)
            .map_err(|_| CoreError::InvalidData(format!("negative timestamp: {ms}")))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A clock that hands out strictly increasing timestamps, so two edits made
/// within the same millisecond still order by `updated_at`.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_ms: u64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { last_ms: 0 }
    }

    pub fn tick(&mut self) -> Result<Timestamp, CoreError> {
        let now = physical_now()?;
        self.last_ms = if now > self.last_ms { now } else { self.last_ms + 1 };
        Ok(Timestamp(self.last_ms))
    }

    /// Advance past a timestamp observed elsewhere (e.g. a refetched row).
    pub fn observe(&mut self, seen: Timestamp) {
        if seen.0 > self.last_ms {
            self.last_ms = seen.0;
        }
    }
}
