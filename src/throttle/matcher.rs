//! Client rule matching.
//!
//! A [`ClientRuleMatcher`] answers two questions about a caller identifier:
//! is it whitelisted, and which client-specific rules apply to it. Two
//! implementations are provided, selected by [`ThrottleMode`]:
//!
//! - [`IdentityRuleMatcher`] compares opaque identifiers, optionally ignoring
//!   case, and resolves at most one policy.
//! - [`AddressRuleMatcher`] parses whitelist entries and policy keys into
//!   [`AddressSet`]s and unions the rules of every policy containing the address.

use tracing::debug;

use super::address::AddressSet;
use super::rules::{ClientPolicy, ThrottleMode, ThrottleRule};
use crate::error::Result;

/// Trait for resolving whitelist membership and client rules.
pub trait ClientRuleMatcher: Send + Sync {
    /// Check whether the identifier is exempt from throttling.
    fn is_whitelisted(&self, client_id: &str) -> bool;

    /// Get the client-specific rules for the identifier, in evaluation order.
    ///
    /// Returns an empty list when nothing matches.
    fn client_rules(&self, client_id: &str) -> Vec<&ThrottleRule>;
}

/// Build the matcher for the given mode.
pub fn build_matcher(
    mode: ThrottleMode,
    whitelist: &[String],
    policies: Vec<ClientPolicy>,
    ignore_case: bool,
) -> Result<Box<dyn ClientRuleMatcher>> {
    Ok(match mode {
        ThrottleMode::Identity => Box::new(IdentityRuleMatcher::new(whitelist, policies, ignore_case)),
        ThrottleMode::Address => Box::new(AddressRuleMatcher::new(whitelist, policies)?),
    })
}

/// Matches opaque client identifiers.
#[derive(Debug, Clone)]
pub struct IdentityRuleMatcher {
    whitelist: Vec<String>,
    policies: Vec<ClientPolicy>,
    ignore_case: bool,
}

impl IdentityRuleMatcher {
    pub fn new(whitelist: &[String], policies: Vec<ClientPolicy>, ignore_case: bool) -> Self {
        Self {
            whitelist: whitelist.to_vec(),
            policies,
            ignore_case,
        }
    }

    fn same_id(&self, a: &str, b: &str) -> bool {
        if self.ignore_case {
            a.to_lowercase() == b.to_lowercase()
        } else {
            a == b
        }
    }
}

impl ClientRuleMatcher for IdentityRuleMatcher {
    fn is_whitelisted(&self, client_id: &str) -> bool {
        if client_id.trim().is_empty() {
            return false;
        }
        self.whitelist.iter().any(|id| self.same_id(id, client_id))
    }

    fn client_rules(&self, client_id: &str) -> Vec<&ThrottleRule> {
        if client_id.trim().is_empty() {
            return Vec::new();
        }

        self.policies
            .iter()
            .find(|policy| self.same_id(&policy.client_id, client_id))
            .map(|policy| policy.rules.iter().collect())
            .unwrap_or_default()
    }
}

/// Matches network addresses against address sets.
#[derive(Debug, Clone)]
pub struct AddressRuleMatcher {
    whitelist: AddressSet,
    policies: Vec<(AddressSet, ClientPolicy)>,
}

impl AddressRuleMatcher {
    /// Create a matcher, failing on the first unparsable whitelist entry or
    /// policy key.
    pub fn new(whitelist: &[String], policies: Vec<ClientPolicy>) -> Result<Self> {
        let whitelist = AddressSet::parse_all(whitelist)?;
        let policies = policies
            .into_iter()
            .map(|policy| Ok((AddressSet::parse(&policy.client_id)?, policy)))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            whitelist_blocks = whitelist.len(),
            policies = policies.len(),
            "Created address rule matcher"
        );

        Ok(Self { whitelist, policies })
    }
}

impl ClientRuleMatcher for AddressRuleMatcher {
    fn is_whitelisted(&self, client_id: &str) -> bool {
        self.whitelist.contains_str(client_id)
    }

    fn client_rules(&self, client_id: &str) -> Vec<&ThrottleRule> {
        if client_id.trim().is_empty() {
            return Vec::new();
        }

        self.policies
            .iter()
            .filter(|(addresses, _)| addresses.contains_str(client_id))
            .flat_map(|(_, policy)| policy.rules.iter())
            .collect()
    }
}
