//! Throttling rules, matching and the decision engine.

mod address;
mod counter;
mod key;
mod matcher;
mod period;
mod processor;
mod request;
mod rules;

pub use address::AddressSet;
pub use counter::RequestCounter;
pub use key::CounterKey;
pub use matcher::{build_matcher, AddressRuleMatcher, ClientRuleMatcher, IdentityRuleMatcher};
pub use period::{parse_period, MAX_PERIOD};
pub use processor::{ThrottleDecision, ThrottleProcessor};
pub use request::ClientRequest;
pub use rules::{
    ClientPolicy, EndpointPattern, PolicyConfig, RuleConfig, RuleSet, ThrottleMode, ThrottleOptions,
    ThrottleRule, DEFAULT_HTTP_STATUS_CODE, DEFAULT_THROTTLE_NAME,
};
