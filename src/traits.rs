use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::task::TaskInfo;

/// Boxed error returned by user task functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Future returned by one task function invocation.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

/// The body of a synchronized task.
///
/// Invoked once per won election with a cancellation token (cancelled on lease
/// loss, leadership timeout or shutdown) and a handle to the owning task. A
/// task function that ignores its token may keep running past the lease; the
/// coordinator only cancels cooperatively.
pub type TaskFn = Arc<dyn Fn(CancellationToken, TaskInfo) -> TaskFuture + Send + Sync>;

/// A time-bounded, renewable claim on a named lock.
///
/// After the TTL elapses without a refresh, the lease is invalid and the lock
/// service hands the key to the next contender.
pub trait Lease: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Extend the lease by another TTL window. Fails once the lease was lost.
    fn refresh(&self, ttl: Duration) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Give the lease up early so the next contender does not have to wait
    /// for the TTL to expire.
    fn release(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Acquire short-lived distributed locks through an atomic set-if-absent
/// primitive of a strongly-consistent service.
pub trait LockClient: Send + Sync + Clone + 'static {
    type Error: std::error::Error + Send + Sync + 'static;
    type Lease: Lease;

    /// Try to take the lock under `key` for `ttl`.
    ///
    /// Returns `Ok(Some(lease))` on success and `Ok(None)` when the lock is
    /// held elsewhere; losing the race is an ordinary outcome, not an error.
    /// `Err` is reserved for transport failures.
    fn acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<Option<Self::Lease>, Self::Error>> + Send;
}

/// A write queued into a transactional pipeline.
#[derive(Debug, Clone)]
pub enum KvWrite {
    /// `HSET key field value`.
    HashSet {
        key: String,
        field: String,
        value: Vec<u8>,
    },
    /// `LPUSH key value`.
    ListPush { key: String, value: Vec<u8> },
}

/// The key-value verbs the bookkeeper needs, with Redis semantics.
///
/// List indices follow Redis conventions: zero-based, negative values count
/// from the tail, `lrange` bounds are inclusive. Any backend supplying these
/// verbs plus an atomic multi-write commit will do.
pub trait KvStore: Send + Sync + Clone + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn hset(
        &self,
        key: &str,
        field: &str,
        value: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn hget(
        &self,
        key: &str,
        field: &str,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    fn hgetall(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<HashMap<String, Vec<u8>>, Self::Error>> + Send;

    fn hlen(&self, key: &str) -> impl Future<Output = Result<i64, Self::Error>> + Send;

    fn lpush(
        &self,
        key: &str,
        value: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn rpop(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    fn lrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> impl Future<Output = Result<Vec<Vec<u8>>, Self::Error>> + Send;

    fn llen(&self, key: &str) -> impl Future<Output = Result<i64, Self::Error>> + Send;

    /// Commit all queued writes together, or none of them.
    fn tx_pipeline(
        &self,
        writes: Vec<KvWrite>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
