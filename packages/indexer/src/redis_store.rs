//! Redis Store
//!
//! [`KeyValueStore`] over a Redis multiplexed connection. The connection is
//! opened lazily and dropped on I/O failures so that a Redis outage fails the
//! current iteration only; the next call reconnects.

use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError, Script};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::store::{KeyValueStore, StoreError};

/// Keys requested per SCAN round trip
pub const SCAN_COUNT: usize = 200;

/// Writes ARGV[3] if the key holds ARGV[2] (or is absent when ARGV[1] == '0')
static COMPARE_AND_SET: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local current = redis.call('GET', KEYS[1])
        if ARGV[1] == '0' then
            if current then return 0 end
        elseif current ~= ARGV[2] then
            return 0
        end
        redis.call('SET', KEYS[1], ARGV[3])
        return 1
        ",
    )
});

/// Deletes the lock only if it still holds the caller's token
static RELEASE_LOCK: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        else
            return 0
        end
        ",
    )
});

/// Redis-backed store
pub struct RedisStore {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisStore {
    /// Create a store for the given URL without connecting yet
    pub fn new(url: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            connection: Mutex::new(None),
        })
    }

    /// Create a store and verify the server answers
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let store = Self::new(url)?;
        store.ping().await?;
        Ok(store)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let reply: Result<String, RedisError> = redis::cmd("PING").query_async(&mut conn).await;
        self.check(reply).map(|_| ())
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Forget the cached connection after transport failures
    fn check<T>(&self, result: Result<T, RedisError>) -> Result<T, StoreError> {
        if let Err(e) = &result {
            if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
                warn!("Redis connection lost: {}", e);
                if let Ok(mut slot) = self.connection.try_lock() {
                    *slot = None;
                }
            }
        }
        result.map_err(StoreError::from)
    }
}

/// Escape glob metacharacters so a prefix matches literally in SCAN MATCH
pub fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Result<Option<String>, RedisError> = conn.get(key).await;
        self.check(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl_secs(ttl));
        }
        let reply: Result<(), RedisError> = cmd.query_async(&mut conn).await;
        self.check(reply)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let found: Result<bool, RedisError> = conn.exists(key).await;
        self.check(found)
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let removed: Result<i64, RedisError> = conn.del(key).await;
        self.check(removed).map(|n| n > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", glob_escape(prefix));
        let mut keys = BTreeSet::new();
        let mut cursor: u64 = 0;
        loop {
            let page: Result<(u64, Vec<String>), RedisError> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await;
            let (next, batch) = self.check(page)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys.into_iter().collect())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let mut invocation = COMPARE_AND_SET.key(key);
        invocation
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.unwrap_or_default())
            .arg(value);
        let swapped: Result<i64, RedisError> = invocation.invoke_async(&mut conn).await;
        self.check(swapped).map(|n| n == 1)
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let reply: Result<Option<String>, RedisError> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await;
        self.check(reply).map(|ok| ok.is_some())
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let mut invocation = RELEASE_LOCK.key(key);
        invocation.arg(token);
        let released: Result<i64, RedisError> = invocation.invoke_async(&mut conn).await;
        self.check(released).map(|n| n == 1)
    }
}
