//! Concrete lock and KV implementations backed by a Redis server.
//!
//! The lock follows the single-instance Redlock recipe: `SET key <token> NX
//! PX <ttl>` to acquire, and compare-token Lua scripts for refresh and
//! release so only the lease holder can extend or drop the key.

use std::collections::HashMap;
use std::time::Duration;

use redis::{AsyncCommands, aio::ConnectionManager};
use uuid::Uuid;

use crate::traits::{KvStore, KvWrite, Lease, LockClient};

const REFRESH_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end"#;

/// [`LockClient`] over a Redis connection.
#[derive(Clone)]
pub struct RedisLockClient {
    conn: ConnectionManager,
}

impl RedisLockClient {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

impl LockClient for RedisLockClient {
    type Error = redis::RedisError;
    type Lease = RedisLease;

    async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<RedisLease>, redis::RedisError> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();

        // NX makes the write atomic set-if-absent: a nil reply means another
        // replica's lease is live.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(reply.map(|_| RedisLease {
            conn: self.conn.clone(),
            key: key.to_owned(),
            token,
        }))
    }
}

/// A live claim on a Redis lock key, identified by a random token.
pub struct RedisLease {
    conn: ConnectionManager,
    key: String,
    token: String,
}

impl Lease for RedisLease {
    type Error = redis::RedisError;

    async fn refresh(&self, ttl: Duration) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();

        let extended: i64 = redis::Script::new(REFRESH_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;

        if extended == 0 {
            return Err((redis::ErrorKind::ExtensionError, "lease is no longer held").into());
        }
        Ok(())
    }

    async fn release(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();

        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut conn)
            .await?;

        if deleted == 0 {
            return Err((redis::ErrorKind::ExtensionError, "lease already expired").into());
        }
        Ok(())
    }
}

/// [`KvStore`] over a Redis connection.
#[derive(Clone)]
pub struct RedisKvStore {
    conn: ConnectionManager,
}

impl RedisKvStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

impl KvStore for RedisKvStore {
    type Error = redis::RedisError;

    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.hget(key, field).await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.hgetall(key).await
    }

    async fn hlen(&self, key: &str) -> Result<i64, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.hlen(key).await
    }

    async fn lpush(&self, key: &str, value: &[u8]) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn rpop(&self, key: &str) -> Result<Option<Vec<u8>>, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.rpop(key, None).await
    }

    async fn lrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<Vec<u8>>, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.lrange(key, start as isize, stop as isize).await
    }

    async fn llen(&self, key: &str) -> Result<i64, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.llen(key).await
    }

    async fn tx_pipeline(&self, writes: Vec<KvWrite>) -> Result<(), redis::RedisError> {
        if writes.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for write in &writes {
            match write {
                KvWrite::HashSet { key, field, value } => {
                    pipe.hset(key, field, value.as_slice()).ignore();
                }
                KvWrite::ListPush { key, value } => {
                    pipe.lpush(key, value.as_slice()).ignore();
                }
            }
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}
