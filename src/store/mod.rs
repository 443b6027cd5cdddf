//! Counter storage.
//!
//! The [`CounterStore`] trait abstracts over the in-process
//! [`MemoryCounterStore`] and the networked [`RedisCounterStore`] so the
//! throttle processor can work with either.

mod memory;
mod redis_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::throttle::RequestCounter;

pub use self::memory::MemoryCounterStore;
pub use self::redis_store::RedisCounterStore;

/// Trait for counter store implementations.
///
/// Every entry carries an absolute expiry. Expired entries behave exactly as
/// missing ones.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Check whether a live entry exists for the key.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Get the entry for the key, if it exists.
    async fn get(&self, key: &str) -> Result<Option<RequestCounter>>;

    /// Get the entry for the key, creating a fresh counter that expires after
    /// `ttl` when none exists. Creation is atomic per key.
    async fn get_or_create(&self, key: &str, ttl: Duration) -> Result<RequestCounter>;

    /// Get-or-create the entry and add one request to it, atomically per key.
    ///
    /// Returns a snapshot of the counter after the increment. The expiry of an
    /// existing entry is left untouched.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<RequestCounter>;

    /// Store the counter, replacing any entry and its expiry.
    async fn set(&self, key: &str, counter: &RequestCounter, ttl: Duration) -> Result<()>;

    /// Remove the entry for the key.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// What to do with a request when the counter store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Admit the request
    FailOpen,
    /// Reject the request as unavailable
    FailClosed,
}
