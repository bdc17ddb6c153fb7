//! Redis-backed lease store

use super::LeaseStore;
use crate::connection::ConnectionInfo;
use crate::error::LockResult;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::fmt;
use tracing::debug;

/// Lease store on top of a Redis connection manager
///
/// The connection manager multiplexes commands over one connection and
/// reconnects on failure, so a single `RedisStore` is shared by every lock
/// that uses the same descriptor. Any retry on connection faults is the
/// connection manager's; lease code never retries a failed command.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    endpoint: String,
}

impl RedisStore {
    /// Connect using a parsed descriptor, filling in defaults
    pub async fn connect(info: &ConnectionInfo) -> LockResult<Self> {
        let client = redis::Client::open(info.redis_url()?.as_str())?;
        let conn = client.get_connection_manager().await?;
        debug!(connection = %info, "Connected to Redis");

        Ok(Self {
            conn,
            endpoint: info.to_string(),
        })
    }

    /// Wrap an existing connection manager
    pub fn from_connection(conn: ConnectionManager, endpoint: impl Into<String>) -> Self {
        Self {
            conn,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl LeaseStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str) -> LockResult<bool> {
        let mut conn = self.conn.clone();
        let created: bool = redis::cmd("SETNX")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(created)
    }

    async fn get(&self, key: &str) -> LockResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn get_and_set(&self, key: &str, value: &str) -> LockResult<Option<String>> {
        let mut conn = self.conn.clone();
        let previous: Option<String> = redis::cmd("GETSET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(previous)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> LockResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> LockResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
