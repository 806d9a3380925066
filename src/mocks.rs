//! Mock lock and KV implementations for unit testing without a Redis server.
//!
//! Enabled with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! cronlock = { path = "...", features = ["test-support"] }
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;

use crate::{
    task::TaskInfo,
    traits::{KvStore, KvWrite, Lease, LockClient},
};

/// Build a detached [`TaskInfo`] for exercising wrapped task functions
/// directly, without spinning up a whole synchronized task.
pub fn task_info(name: &str, cron_expression: &str) -> TaskInfo {
    let schedule = cron::Schedule::from_str(cron_expression).expect("valid cron expression");
    TaskInfo::new(name.to_owned(), Arc::new(schedule))
}

#[derive(Debug)]
pub struct MockError(pub &'static str);

impl std::fmt::Display for MockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MockError {}

// ── MockLockClient ────────────────────────────────────────────────────────────

/// Controllable lock service for testing election logic.
///
/// By default every `acquire` succeeds, and a key stays held until its lease
/// is released; acquiring a held key reports contention (`Ok(None)`), which
/// models another replica's live lease.
#[derive(Clone, Default)]
pub struct MockLockClient {
    held: Arc<Mutex<HashSet<String>>>,
    deny_acquire: Arc<AtomicBool>,
    fail_acquire: Arc<AtomicBool>,
    fail_refresh: Arc<AtomicBool>,
    fail_release: Arc<AtomicBool>,
    acquire_attempts: Arc<AtomicUsize>,
    contended_attempts: Arc<AtomicUsize>,
    refresh_count: Arc<AtomicUsize>,
}

impl MockLockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate another replica holding every lock: `acquire` returns
    /// `Ok(None)`.
    pub fn deny_acquire(&self) {
        self.deny_acquire.store(true, Ordering::SeqCst);
    }

    /// Simulate a lock service outage: `acquire` fails with an error.
    pub fn fail_acquire(&self) {
        self.fail_acquire.store(true, Ordering::SeqCst);
    }

    /// Simulate losing the lease mid-execution: `refresh` will fail.
    pub fn fail_refresh(&self) {
        self.fail_refresh.store(true, Ordering::SeqCst);
    }

    /// Simulate a failure when resigning: `release` will fail.
    pub fn fail_release(&self) {
        self.fail_release.store(true, Ordering::SeqCst);
    }

    /// Total `acquire` calls, contended or not.
    pub fn acquire_attempts(&self) -> usize {
        self.acquire_attempts.load(Ordering::SeqCst)
    }

    /// `acquire` calls that lost because a lease was live.
    pub fn contended_attempts(&self) -> usize {
        self.contended_attempts.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_count.load(Ordering::SeqCst)
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held.lock().unwrap().contains(key)
    }
}

impl LockClient for MockLockClient {
    type Error = MockError;
    type Lease = MockLease;

    async fn acquire(&self, key: &str, _ttl: Duration) -> Result<Option<MockLease>, MockError> {
        self.acquire_attempts.fetch_add(1, Ordering::SeqCst);

        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(MockError("lock service unavailable"));
        }
        if self.deny_acquire.load(Ordering::SeqCst) {
            self.contended_attempts.fetch_add(1, Ordering::SeqCst);
            return Ok(None);
        }

        if !self.held.lock().unwrap().insert(key.to_owned()) {
            self.contended_attempts.fetch_add(1, Ordering::SeqCst);
            return Ok(None);
        }

        Ok(Some(MockLease {
            client: self.clone(),
            key: key.to_owned(),
        }))
    }
}

pub struct MockLease {
    client: MockLockClient,
    key: String,
}

impl Lease for MockLease {
    type Error = MockError;

    async fn refresh(&self, _ttl: Duration) -> Result<(), MockError> {
        self.client.refresh_count.fetch_add(1, Ordering::SeqCst);

        if self.client.fail_refresh.load(Ordering::SeqCst) {
            return Err(MockError("lease is no longer held"));
        }
        if !self.client.held.lock().unwrap().contains(&self.key) {
            return Err(MockError("lease already expired"));
        }
        Ok(())
    }

    async fn release(&self) -> Result<(), MockError> {
        if self.client.fail_release.load(Ordering::SeqCst) {
            return Err(MockError("lock service unavailable"));
        }

        self.client.held.lock().unwrap().remove(&self.key);
        Ok(())
    }
}

// ── MockKvStore ───────────────────────────────────────────────────────────────

/// In-memory KV store with Redis list and hash semantics, including negative
/// `lrange` indices.
#[derive(Clone, Default)]
pub struct MockKvStore {
    state: Arc<Mutex<KvState>>,
    fail_pipeline: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
    write_count: Arc<AtomicUsize>,
}

#[derive(Default)]
struct KvState {
    hashes: HashMap<String, HashMap<String, Vec<u8>>>,
    lists: HashMap<String, VecDeque<Vec<u8>>>,
}

impl MockKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the transactional pipeline fail; nothing is applied.
    pub fn fail_pipeline(&self) {
        self.fail_pipeline.store(true, Ordering::SeqCst);
    }

    /// Make every read verb fail until [`MockKvStore::recover_reads`].
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub fn recover_reads(&self) {
        self.fail_reads.store(false, Ordering::SeqCst);
    }

    /// Total writes applied (pipeline writes count individually).
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    fn read_guard(&self) -> Result<(), MockError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(MockError("KV service unavailable"));
        }
        Ok(())
    }
}

/// Redis index semantics: negative counts from the tail, bounds inclusive.
fn range_slice(list: &VecDeque<Vec<u8>>, start: i64, stop: i64) -> Vec<Vec<u8>> {
    let len = list.len() as i64;
    if len == 0 {
        return Vec::new();
    }

    let normalize = |index: i64| if index < 0 { len + index } else { index };
    let start = normalize(start).max(0);
    let stop = normalize(stop).min(len - 1);
    if start > stop {
        return Vec::new();
    }

    list.iter()
        .skip(start as usize)
        .take((stop - start + 1) as usize)
        .cloned()
        .collect()
}

impl KvStore for MockKvStore {
    type Error = MockError;

    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<(), MockError> {
        let mut state = self.state.lock().unwrap();
        state
            .hashes
            .entry(key.to_owned())
            .or_default()
            .insert(field.to_owned(), value.to_vec());
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, MockError> {
        self.read_guard()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, MockError> {
        self.read_guard()?;
        let state = self.state.lock().unwrap();
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hlen(&self, key: &str) -> Result<i64, MockError> {
        self.read_guard()?;
        let state = self.state.lock().unwrap();
        Ok(state.hashes.get(key).map_or(0, |hash| hash.len() as i64))
    }

    async fn lpush(&self, key: &str, value: &[u8]) -> Result<(), MockError> {
        let mut state = self.state.lock().unwrap();
        state
            .lists
            .entry(key.to_owned())
            .or_default()
            .push_front(value.to_vec());
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rpop(&self, key: &str) -> Result<Option<Vec<u8>>, MockError> {
        let mut state = self.state.lock().unwrap();
        let popped = state.lists.get_mut(key).and_then(VecDeque::pop_back);
        if popped.is_some() {
            self.write_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(popped)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>, MockError> {
        self.read_guard()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .lists
            .get(key)
            .map_or_else(Vec::new, |list| range_slice(list, start, stop)))
    }

    async fn llen(&self, key: &str) -> Result<i64, MockError> {
        self.read_guard()?;
        let state = self.state.lock().unwrap();
        Ok(state.lists.get(key).map_or(0, |list| list.len() as i64))
    }

    async fn tx_pipeline(&self, writes: Vec<KvWrite>) -> Result<(), MockError> {
        if self.fail_pipeline.load(Ordering::SeqCst) {
            return Err(MockError("pipeline aborted"));
        }

        // One lock over all queued writes makes the commit atomic.
        let mut state = self.state.lock().unwrap();
        for write in writes {
            match write {
                KvWrite::HashSet { key, field, value } => {
                    state.hashes.entry(key).or_default().insert(field, value);
                }
                KvWrite::ListPush { key, value } => {
                    state.lists.entry(key).or_default().push_front(value);
                }
            }
            self.write_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
