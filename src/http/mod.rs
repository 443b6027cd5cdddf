//! HTTP integration: request normalization, the throttle middleware and the
//! demo server.

mod identity;
mod middleware;
mod server;

pub use identity::{IdentitySource, RequestNormalizer, DEFAULT_CLIENT_ID_HEADER};
pub use middleware::{quota_exceeded_message, throttle_middleware, ThrottleState};
pub use server::{build_router, HttpServer};
