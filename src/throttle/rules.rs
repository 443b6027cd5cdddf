//! Throttle rules configuration and endpoint matching.
//!
//! Rules are declared in configuration as [`RuleConfig`] entries, either as
//! general rules or grouped into per-client [`PolicyConfig`] bundles. They are
//! compiled once into immutable [`ThrottleRule`] values: periods and cooldowns
//! are parsed, endpoint patterns are compiled, and missing ids are generated.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use super::period::parse_period;
use crate::error::{Result, ThrottleError};

/// Default HTTP status code returned when a quota is exceeded.
pub const DEFAULT_HTTP_STATUS_CODE: u16 = 429;
/// Default namespace used to compose counter keys.
pub const DEFAULT_THROTTLE_NAME: &str = "floodgate";

/// How callers are identified and matched against client policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleMode {
    /// Opaque client identifiers (API keys, user names, ...)
    #[default]
    Identity,
    /// Network addresses, matched against addresses, ranges and CIDR blocks
    Address,
}

/// A throttle rule as it appears in configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Unique rule id; generated when not set
    #[serde(default)]
    pub id: Option<String>,
    /// Endpoint pattern such as `get:/api/values`, `*:/api/*` or `*`
    #[serde(default)]
    pub endpoint: String,
    /// Window length, e.g. `1s`, `5m`, `1h`, `1d`
    pub period: String,
    /// Optional time the counter is kept once the limit is exceeded
    #[serde(default)]
    pub cooldown: Option<String>,
    /// Maximum number of requests per period; `<= 0` disables the rule
    pub limit: i64,
    /// Stop collecting further rules once this one matches
    #[serde(default)]
    pub stop_probing_when_matched: bool,
}

/// A client policy as it appears in configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Client identifier, or address tokens in address mode
    pub client_id: String,
    /// Rules applied to this client, in evaluation order
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// Throttle options: rules, policies, whitelists and response settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleOptions {
    /// Namespace used to compose counter keys
    #[serde(default = "default_throttle_name")]
    pub name: String,
    /// How callers are matched against client policies
    #[serde(default)]
    pub mode: ThrottleMode,
    /// Rules applied to every client without a matching policy
    #[serde(default)]
    pub general_rules: Vec<RuleConfig>,
    /// Per-client rule overrides
    #[serde(default)]
    pub client_policies: Vec<PolicyConfig>,
    /// Clients that are never throttled
    #[serde(default)]
    pub client_whitelist: Vec<String>,
    /// Endpoint prefixes (`verb:path` or `*:path`) that are never throttled
    #[serde(default)]
    pub endpoint_whitelist: Vec<String>,
    /// Status code of the rejection response
    #[serde(default = "default_http_status_code")]
    pub http_status_code: u16,
    /// Rejection message; may reference `{limit}` and `{period}`
    #[serde(default)]
    pub quota_exceeded_message: Option<String>,
    /// Compare client identifiers case-insensitively
    #[serde(default = "default_id_ignore_case")]
    pub id_ignore_case: bool,
}

fn default_throttle_name() -> String {
    DEFAULT_THROTTLE_NAME.to_string()
}

fn default_http_status_code() -> u16 {
    DEFAULT_HTTP_STATUS_CODE
}

fn default_id_ignore_case() -> bool {
    true
}

impl Default for ThrottleOptions {
    fn default() -> Self {
        Self {
            name: default_throttle_name(),
            mode: ThrottleMode::default(),
            general_rules: Vec::new(),
            client_policies: Vec::new(),
            client_whitelist: Vec::new(),
            endpoint_whitelist: Vec::new(),
            http_status_code: default_http_status_code(),
            quota_exceeded_message: None,
            id_ignore_case: default_id_ignore_case(),
        }
    }
}

/// Rules and policies compiled from [`ThrottleOptions`].
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub general_rules: Vec<ThrottleRule>,
    pub client_policies: Vec<ClientPolicy>,
}

impl ThrottleOptions {
    /// Load throttle options from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ThrottleError::Config(format!("Failed to parse throttle options: {}", e)))
    }

    /// Compile every rule and policy, failing on the first malformed entry.
    pub fn compile(&self) -> Result<RuleSet> {
        let mut seen_ids = HashSet::new();

        let general_rules = compile_rules(&self.general_rules, &mut seen_ids)?;
        let client_policies = self
            .client_policies
            .iter()
            .map(|policy| {
                Ok(ClientPolicy {
                    client_id: policy.client_id.clone(),
                    rules: compile_rules(&policy.rules, &mut seen_ids)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            general_rules = general_rules.len(),
            client_policies = client_policies.len(),
            "Compiled throttle rules"
        );

        Ok(RuleSet {
            general_rules,
            client_policies,
        })
    }
}

fn compile_rules(configs: &[RuleConfig], seen_ids: &mut HashSet<String>) -> Result<Vec<ThrottleRule>> {
    configs
        .iter()
        .map(|config| {
            let rule = ThrottleRule::from_config(config)?;
            if !seen_ids.insert(rule.id().to_string()) {
                return Err(ThrottleError::Config(format!(
                    "duplicate throttle rule id '{}'",
                    rule.id()
                )));
            }
            Ok(rule)
        })
        .collect()
}

/// A compiled endpoint pattern.
///
/// The verb segment is either `*` or an exact verb; the path segment is a
/// glob where `*` matches any run of characters, `/` included.
#[derive(Debug, Clone)]
pub enum EndpointPattern {
    /// Matches every request
    Any,
    /// Matches requests by verb (`None` for any verb) and path glob
    Match {
        verb: Option<String>,
        path: glob::Pattern,
    },
}

impl EndpointPattern {
    /// Compile an endpoint pattern. Blank patterns and `*` match everything.
    pub fn parse(endpoint: &str) -> Result<Self> {
        let endpoint = endpoint.trim().to_lowercase();
        if endpoint.is_empty() || endpoint == "*" {
            return Ok(EndpointPattern::Any);
        }

        let (verb, path) = match endpoint.split_once(':') {
            Some((verb, path)) => (verb.trim(), path.trim()),
            None => ("*", endpoint.as_str()),
        };

        let path = glob::Pattern::new(path).map_err(|e| {
            ThrottleError::Config(format!("invalid endpoint pattern '{}': {}", endpoint, e))
        })?;
        let verb = (verb != "*").then(|| verb.to_string());

        Ok(EndpointPattern::Match { verb, path })
    }

    /// Check a lower-cased `verb:path` string against this pattern.
    pub fn matches(&self, request_endpoint: &str) -> bool {
        match self {
            EndpointPattern::Any => true,
            EndpointPattern::Match { verb, path } => {
                let (request_verb, request_path) =
                    request_endpoint.split_once(':').unwrap_or(("", request_endpoint));
                let verb_matches = verb.as_deref().map_or(true, |v| v == request_verb);
                verb_matches && path.matches(request_path)
            }
        }
    }
}

/// A compiled, immutable throttle rule.
#[derive(Debug, Clone)]
pub struct ThrottleRule {
    id: String,
    endpoint: String,
    pattern: EndpointPattern,
    period: String,
    period_duration: Duration,
    cooldown: Option<Duration>,
    limit: i64,
    stop_probing_when_matched: bool,
}

impl ThrottleRule {
    /// Create a rule with a generated id and no cooldown.
    pub fn new(endpoint: &str, period: &str, limit: i64) -> Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            endpoint: endpoint.to_string(),
            pattern: EndpointPattern::parse(endpoint)?,
            period: period.to_string(),
            period_duration: parse_period(period)?,
            cooldown: None,
            limit,
            stop_probing_when_matched: false,
        })
    }

    /// Compile a rule from its configuration entry.
    pub fn from_config(config: &RuleConfig) -> Result<Self> {
        let mut rule = Self::new(&config.endpoint, &config.period, config.limit)?
            .with_stop_probing(config.stop_probing_when_matched);

        if let Some(id) = config.id.as_deref().filter(|id| !id.trim().is_empty()) {
            rule = rule.with_id(id);
        }
        if let Some(ref cooldown) = config.cooldown {
            rule = rule.with_cooldown(cooldown)?;
        }

        Ok(rule)
    }

    /// Replace the generated id.
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    /// Set the cooldown applied once the limit is exceeded.
    pub fn with_cooldown(mut self, cooldown: &str) -> Result<Self> {
        self.cooldown = Some(parse_period(cooldown)?);
        Ok(self)
    }

    pub fn with_stop_probing(mut self, stop: bool) -> Self {
        self.stop_probing_when_matched = stop;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The period exactly as configured, e.g. `1m`.
    pub fn period(&self) -> &str {
        &self.period
    }

    pub fn period_duration(&self) -> Duration {
        self.period_duration
    }

    pub fn cooldown(&self) -> Option<Duration> {
        self.cooldown
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn stop_probing_when_matched(&self) -> bool {
        self.stop_probing_when_matched
    }

    /// A rule with a limit of zero or less never throttles.
    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    /// Check a lower-cased `verb:path` string against the rule's endpoint.
    pub fn matches(&self, request_endpoint: &str) -> bool {
        self.pattern.matches(request_endpoint)
    }
}

/// A compiled client policy.
#[derive(Debug, Clone)]
pub struct ClientPolicy {
    /// Client identifier, or address tokens in address mode
    pub client_id: String,
    /// Rules in evaluation order
    pub rules: Vec<ThrottleRule>,
}
