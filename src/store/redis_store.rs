//! Redis-backed counter store shared between service replicas.
//!
//! Counters are stored as JSON strings. Get-or-create and increment run as Lua
//! scripts so each is a single atomic step on the server.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use std::time::Duration;
use tracing::{debug, info};

use super::CounterStore;
use crate::error::{Result, ThrottleError};
use crate::throttle::RequestCounter;

/// Create the entry with ARGV[1] unless it exists, then return the stored value.
const GET_OR_CREATE_SCRIPT: &str = r#"
redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2])
return redis.call('GET', KEYS[1])
"#;

/// Add one request to the entry, keeping its TTL; create it from ARGV[1]
/// (already counting this request) when missing.
const INCREMENT_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if raw then
  local counter = cjson.decode(raw)
  counter.total_requests = counter.total_requests + 1
  local encoded = cjson.encode(counter)
  redis.call('SET', KEYS[1], encoded, 'KEEPTTL')
  return encoded
end
redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
return ARGV[1]
"#;

/// A counter store backed by a Redis server.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: MultiplexedConnection,
    get_or_create_script: Script,
    increment_script: Script,
}

impl RedisCounterStore {
    /// Connect to the Redis server at `redis_url`.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| ThrottleError::Store(format!("Failed to create Redis client: {}", e)))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| ThrottleError::Store(format!("Failed to connect to Redis: {}", e)))?;

        info!(url = %redis_url, "Connected to Redis counter store");

        Ok(Self {
            connection,
            get_or_create_script: Script::new(GET_OR_CREATE_SCRIPT),
            increment_script: Script::new(INCREMENT_SCRIPT),
        })
    }

    /// Check that the server answers.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn encode(counter: &RequestCounter) -> Result<String> {
    Ok(serde_json::to_string(counter)?)
}

fn decode(raw: &str) -> Result<RequestCounter> {
    Ok(serde_json::from_str(raw)?)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let exists: bool = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(exists)
    }

    async fn get(&self, key: &str) -> Result<Option<RequestCounter>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        raw.as_deref().map(decode).transpose()
    }

    async fn get_or_create(&self, key: &str, ttl: Duration) -> Result<RequestCounter> {
        let mut conn = self.connection.clone();
        let fresh = encode(&RequestCounter::new())?;

        let raw: String = self
            .get_or_create_script
            .key(key)
            .arg(fresh)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        decode(&raw)
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<RequestCounter> {
        let mut conn = self.connection.clone();
        let mut fresh = RequestCounter::new();
        fresh.total_requests = 1;

        let raw: String = self
            .increment_script
            .key(key)
            .arg(encode(&fresh)?)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;

        let counter = decode(&raw)?;
        debug!(key = %key, total = counter.total_requests, "Incremented Redis counter");
        Ok(counter)
    }

    async fn set(&self, key: &str, counter: &RequestCounter, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(encode(counter)?)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    fn test_key(name: &str) -> String {
        format!("floodgate-test:{}:{}", name, uuid::Uuid::new_v4())
    }

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn test_encoded_counter_decodes() {
        let mut counter = RequestCounter::new();
        counter.total_requests = 7;
        counter.limit_exceeded = true;

        let decoded = decode(&encode(&counter).unwrap()).unwrap();
        assert_eq!(decoded, counter);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode("not json"), Err(ThrottleError::Serialization(_))));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_redis_increment_and_expiry() {
        let store = RedisCounterStore::connect(&redis_url()).await.unwrap();
        store.ping().await.unwrap();
        let key = test_key("increment");

        let first = store.increment(&key, Duration::from_millis(300)).await.unwrap();
        let second = store.increment(&key, Duration::from_millis(300)).await.unwrap();
        assert_eq!(first.total_requests, 1);
        assert_eq!(second.total_requests, 2);
        assert_eq!(second.timestamp, first.timestamp);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_redis_set_get_remove() {
        let store = RedisCounterStore::connect(&redis_url()).await.unwrap();
        let key = test_key("set");

        let created = store.get_or_create(&key, Duration::from_secs(5)).await.unwrap();
        assert_eq!(created.total_requests, 0);

        let mut counter = created.clone();
        counter.limit_exceeded = true;
        store.set(&key, &counter, Duration::from_secs(5)).await.unwrap();

        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored, counter);

        store.remove(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
    }
}
