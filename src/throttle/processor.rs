//! The throttle decision engine.

use std::sync::Arc;
use tracing::{debug, info, trace};

use super::counter::RequestCounter;
use super::key::CounterKey;
use super::matcher::{build_matcher, ClientRuleMatcher};
use super::request::ClientRequest;
use super::rules::{ThrottleOptions, ThrottleRule};
use crate::error::{Result, ThrottleError};
use crate::store::CounterStore;

/// Outcome of evaluating a request against the throttle rules.
#[derive(Debug, Clone)]
pub enum ThrottleDecision<'a> {
    /// The client or endpoint is exempt; nothing was counted
    Whitelisted,
    /// Every matching rule is within its limit
    Admitted,
    /// The first rule whose limit is exceeded
    Rejected {
        rule: &'a ThrottleRule,
        counter: RequestCounter,
    },
}

impl ThrottleDecision<'_> {
    pub fn is_rejected(&self) -> bool {
        matches!(self, ThrottleDecision::Rejected { .. })
    }
}

/// Combines whitelists, rule resolution and counting.
///
/// Client-specific rules fully override general rules: general rules are only
/// consulted when no client rule matches the request's endpoint.
pub struct ThrottleProcessor {
    /// Namespace for counter keys
    name: String,
    store: Arc<dyn CounterStore>,
    matcher: Box<dyn ClientRuleMatcher>,
    general_rules: Vec<ThrottleRule>,
    /// Lower-cased endpoint prefixes
    endpoint_whitelist: Vec<String>,
}

impl ThrottleProcessor {
    /// Compile the options and build the matcher selected by `options.mode`.
    pub fn new(options: &ThrottleOptions, store: Arc<dyn CounterStore>) -> Result<Self> {
        let rules = options.compile()?;
        let matcher = build_matcher(
            options.mode,
            &options.client_whitelist,
            rules.client_policies,
            options.id_ignore_case,
        )?;

        Ok(Self::from_parts(options, store, matcher, rules.general_rules))
    }

    /// Create a processor with a custom matcher. Client policies and the client
    /// whitelist in `options` are ignored in favour of the matcher's.
    pub fn with_matcher(
        options: &ThrottleOptions,
        store: Arc<dyn CounterStore>,
        matcher: Box<dyn ClientRuleMatcher>,
    ) -> Result<Self> {
        let options = ThrottleOptions {
            client_policies: Vec::new(),
            ..options.clone()
        };
        let rules = options.compile()?;

        Ok(Self::from_parts(&options, store, matcher, rules.general_rules))
    }

    fn from_parts(
        options: &ThrottleOptions,
        store: Arc<dyn CounterStore>,
        matcher: Box<dyn ClientRuleMatcher>,
        general_rules: Vec<ThrottleRule>,
    ) -> Self {
        let endpoint_whitelist = options
            .endpoint_whitelist
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        info!(
            name = %options.name,
            mode = ?options.mode,
            general_rules = general_rules.len(),
            "Throttle processor initialized"
        );

        Self {
            name: options.name.clone(),
            store,
            matcher,
            general_rules,
            endpoint_whitelist,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check whether the request is exempt from throttling.
    ///
    /// The endpoint whitelist is a case-insensitive prefix test against
    /// `verb:path` and `*:path`, not a pattern match.
    pub fn is_whitelisted(&self, request: &ClientRequest) -> bool {
        if self.matcher.is_whitelisted(&request.client_id) {
            return true;
        }

        let endpoint = request.endpoint();
        let any_verb = format!("*:{}", request.path).to_lowercase();

        self.endpoint_whitelist
            .iter()
            .any(|prefix| endpoint.starts_with(prefix.as_str()) || any_verb.starts_with(prefix.as_str()))
    }

    /// Resolve the rules that apply to the request, in evaluation order.
    pub fn matching_rules(&self, request: &ClientRequest) -> Vec<&ThrottleRule> {
        let endpoint = request.endpoint();

        let client_rules = filter_rules(self.matcher.client_rules(&request.client_id), &endpoint);
        if !client_rules.is_empty() {
            return client_rules;
        }

        filter_rules(self.general_rules.iter(), &endpoint)
    }

    /// The key of the counter kept for this client and rule.
    pub fn counter_key(&self, request: &ClientRequest, rule: &ThrottleRule) -> CounterKey {
        CounterKey::new(&self.name, &request.client_id, rule.id())
    }

    /// Count the request against the rule and return the updated counter.
    ///
    /// The first request over the limit marks the counter as exceeded and
    /// writes it back: with the rule's cooldown as the new TTL when one is
    /// configured, otherwise with whatever remains of the window.
    pub async fn process_request(
        &self,
        request: &ClientRequest,
        rule: &ThrottleRule,
    ) -> Result<RequestCounter> {
        let period = rule.period_duration();
        if period.is_zero() {
            return Err(ThrottleError::Internal(format!(
                "rule '{}' has no usable period",
                rule.id()
            )));
        }

        let key = self.counter_key(request, rule);
        let storage_key = key.storage_key();

        let mut counter = self.store.increment(&storage_key, period).await?;

        trace!(
            key = %key,
            total = counter.total_requests,
            limit = rule.limit(),
            "Counted request"
        );

        let over_limit = i64::try_from(counter.total_requests).map_or(true, |total| total > rule.limit());
        if over_limit && !counter.limit_exceeded {
            counter.limit_exceeded = true;

            let ttl = rule
                .cooldown()
                .unwrap_or_else(|| counter.remaining_in_window(period));
            if !ttl.is_zero() {
                self.store.set(&storage_key, &counter, ttl).await?;
            }

            debug!(
                key = %key,
                total = counter.total_requests,
                limit = rule.limit(),
                cooldown = ?rule.cooldown(),
                "Rule limit exceeded"
            );
        }

        Ok(counter)
    }

    /// Evaluate the request against every matching enabled rule in order.
    ///
    /// Each examined rule is counted; evaluation stops at the first rule whose
    /// counter is exceeded.
    pub async fn check(&self, request: &ClientRequest) -> Result<ThrottleDecision<'_>> {
        if self.is_whitelisted(request) {
            trace!(client_id = %request.client_id, path = %request.path, "Request whitelisted");
            return Ok(ThrottleDecision::Whitelisted);
        }

        for rule in self.matching_rules(request) {
            if !rule.is_enabled() {
                continue;
            }

            let counter = self.process_request(request, rule).await?;
            if !counter.limit_exceeded {
                continue;
            }

            info!(
                path = %request.path,
                client_id = %request.client_id,
                endpoint = %rule.endpoint(),
                quota = %format!("{}/{}", rule.limit(), rule.period()),
                total = counter.total_requests,
                "Request blocked, quota exceeded"
            );
            return Ok(ThrottleDecision::Rejected { rule, counter });
        }

        Ok(ThrottleDecision::Admitted)
    }

    /// Read the counter for this client and rule without counting.
    pub async fn counter(
        &self,
        request: &ClientRequest,
        rule: &ThrottleRule,
    ) -> Result<Option<RequestCounter>> {
        let key = self.counter_key(request, rule);
        self.store.get(&key.storage_key()).await
    }

    /// Drop the counter for this client and rule.
    pub async fn reset(&self, request: &ClientRequest, rule: &ThrottleRule) -> Result<()> {
        let key = self.counter_key(request, rule);
        debug!(key = %key, "Resetting counter");
        self.store.remove(&key.storage_key()).await
    }
}

/// Keep the rules matching `endpoint`, stopping after the first matching rule
/// that has `stop_probing_when_matched` set.
fn filter_rules<'a, I>(rules: I, endpoint: &str) -> Vec<&'a ThrottleRule>
where
    I: IntoIterator<Item = &'a ThrottleRule>,
{
    let mut matched = Vec::new();
    for rule in rules {
        if !rule.matches(endpoint) {
            continue;
        }
        matched.push(rule);
        if rule.stop_probing_when_matched() {
            break;
        }
    }
    matched
}
