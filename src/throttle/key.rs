//! Counter key composition.

use sha2::{Digest, Sha256};

/// A key that uniquely identifies a counter for one client and one rule.
///
/// The storage form is a SHA-256 digest of `{namespace}_{client}_{rule}`, which
/// keeps keys short and free of characters a backing store might reject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// The throttle namespace
    pub namespace: String,
    /// The caller identity
    pub client_id: String,
    /// The rule id
    pub rule_id: String,
}

impl CounterKey {
    pub fn new(namespace: &str, client_id: &str, rule_id: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            client_id: client_id.to_string(),
            rule_id: rule_id.to_string(),
        }
    }

    /// The unhashed key, useful for logging and debugging.
    pub fn to_string_key(&self) -> String {
        format!("{}_{}_{}", self.namespace, self.client_id, self.rule_id)
    }

    /// The hashed key handed to the counter store.
    pub fn storage_key(&self) -> String {
        hex::encode(Sha256::digest(self.to_string_key().as_bytes()))
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_key_to_string() {
        let key = CounterKey::new("api", "client_a", "rule1");
        assert_eq!(key.to_string_key(), "api_client_a_rule1");
        assert_eq!(key.to_string(), "api_client_a_rule1");
    }

    #[test]
    fn test_storage_key_is_stable_hex() {
        let key1 = CounterKey::new("api", "client_a", "rule1");
        let key2 = CounterKey::new("api", "client_a", "rule1");

        assert_eq!(key1.storage_key(), key2.storage_key());
        assert_eq!(key1.storage_key().len(), 64);
        assert!(key1.storage_key().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_storage_key_differs_per_component() {
        let base = CounterKey::new("api", "client_a", "rule1").storage_key();

        assert_ne!(base, CounterKey::new("web", "client_a", "rule1").storage_key());
        assert_ne!(base, CounterKey::new("api", "client_b", "rule1").storage_key());
        assert_ne!(base, CounterKey::new("api", "client_a", "rule2").storage_key());
    }
}
