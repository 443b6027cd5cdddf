//! Request counter state kept in the counter store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-(client, rule) window state.
///
/// A counter lives for one storage entry lifetime. Within that lifetime
/// `total_requests` only grows and `limit_exceeded` flips from `false` to
/// `true` at most once; both reset only when the store expires the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounter {
    /// Start of the window (UTC)
    pub timestamp: DateTime<Utc>,
    /// Requests counted in this window
    pub total_requests: u64,
    /// Set once the rule's limit has been crossed
    pub limit_exceeded: bool,
}

impl RequestCounter {
    /// A fresh counter for a window starting now.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            total_requests: 0,
            limit_exceeded: false,
        }
    }

    /// Time left in a window of length `period` that started at `timestamp`.
    ///
    /// Returns `Duration::ZERO` once the window has closed.
    pub fn remaining_in_window(&self, period: Duration) -> Duration {
        let elapsed = (Utc::now() - self.timestamp).to_std().unwrap_or(Duration::ZERO);
        period.saturating_sub(elapsed)
    }
}

impl Default for RequestCounter {
    fn default() -> Self {
        Self::new()
    }
}
