//! # cronlock
//!
//! Synchronized periodic tasks across a fleet of replicas, with at most one
//! concurrent execution per task.
//!
//! ## Features
//!
//! - Every replica declares the same tasks on the same cron schedule; when a
//!   tick fires, replicas race for a short-lived distributed lock and only
//!   the winner executes (at-most-once per tick across the fleet).
//! - Leases are renewed on a heartbeat during long executions; losing the
//!   lease cancels the in-flight task function.
//! - A local atomic guard skips ticks that land while a previous one is
//!   still executing on the same replica, without a lock round trip.
//! - Optional `TimeKeeper` bookkeeping: every execution is recorded
//!   transactionally (a newest-first list plus a latest-run-per-task hash),
//!   with queries and an age-based cleanup task.
//! - Graceful shutdown with a bounded drain.
//! - Lock and KV backends are trait seams; Redis implementations ship in
//!   [`redis_impls`], in-memory mocks behind the `test-support` feature.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use cronlock::{SynchronizedTask, TaskOptions, redis_impls::RedisLockClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = redis::Client::open("redis://localhost:6379").unwrap();
//!     let conn = client.get_connection_manager().await.unwrap();
//!
//!     let task = SynchronizedTask::new(
//!         RedisLockClient::new(conn),
//!         Arc::new(|_cancel, task| {
//!             Box::pin(async move {
//!                 println!("running {}, next fire at {}", task.name(), task.next_time());
//!                 Ok(())
//!             })
//!         }),
//!         TaskOptions::default().with_cron_expression("0 */5 * * * *"),
//!     )
//!     .unwrap();
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!     task.stop(Duration::from_secs(5)).await;
//! }
//! ```

pub mod error;
pub mod options;
pub mod redis_impls;
pub mod result;
pub mod task;
pub mod timekeeper;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod mocks;

pub use error::CronlockError;
pub use options::{CleanupOptions, TaskOptions, TimeKeeperOptions};
pub use result::ExecutionResult;
pub use task::{SynchronizedTask, TaskInfo};
pub use timekeeper::TimeKeeper;
pub use traits::{BoxError, KvStore, KvWrite, Lease, LockClient, TaskFn, TaskFuture};
