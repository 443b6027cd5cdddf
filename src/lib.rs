//! Floodgate - Rule-based Request Throttling
//!
//! This crate decides, per incoming HTTP request, whether the caller is still
//! within the quotas configured for it. Rules are resolved per client (by
//! identity or by network address) with general rules as the fallback, and
//! counted in fixed windows held by a pluggable counter store. A rule may add
//! a cooldown that keeps a client blocked after its window would have reset.

pub mod config;
pub mod error;
pub mod http;
pub mod store;
pub mod throttle;

pub use config::FloodgateConfig;
pub use error::{Result, ThrottleError};
pub use store::{CounterStore, MemoryCounterStore, RedisCounterStore, StoreFailurePolicy};
pub use throttle::{ClientRequest, ThrottleDecision, ThrottleOptions, ThrottleProcessor};
