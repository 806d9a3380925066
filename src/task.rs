use std::str::FromStr;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    error::CronlockError,
    options::TaskOptions,
    traits::{Lease, LockClient, TaskFn},
};

/// Cheap cloneable handle to a running task, handed to the task function so
/// it can query its own name and next fire time.
#[derive(Clone)]
pub struct TaskInfo {
    name: Arc<str>,
    schedule: Arc<cron::Schedule>,
    stopped: Arc<AtomicBool>,
}

impl TaskInfo {
    pub(crate) fn new(name: String, schedule: Arc<cron::Schedule>) -> Self {
        Self {
            name: name.into(),
            schedule,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The next time the task will fire, in UTC.
    ///
    /// Once the task has been stopped (or the schedule has no upcoming
    /// occurrence), this is the zero instant, the Unix epoch.
    pub fn next_time(&self) -> DateTime<Utc> {
        if self.stopped.load(Ordering::SeqCst) {
            warn!(
                "Tried to retrieve next execution of synchronized cron task {}, which was already stopped.",
                self.name
            );
            return DateTime::<Utc>::default();
        }

        self.schedule.after(&Utc::now()).next().unwrap_or_default()
    }
}

/// A periodic task which coordinates its executions across running replicas
/// through a short-lived distributed lock.
///
/// Every replica declares the same task on the same schedule. When the cron
/// fires, replicas race for the lock under `"<name>.lock"`; the winner runs
/// the task function while renewing the lease on a heartbeat, the losers skip
/// the tick. Supports graceful shutdowns via [`SynchronizedTask::stop`].
pub struct SynchronizedTask<L: LockClient> {
    inner: Arc<Inner<L>>,
    cron_loop: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

struct Inner<L: LockClient> {
    info: TaskInfo,
    lock_client: L,
    task_fn: TaskFn,

    leadership_timeout: Duration,
    lock_timeout: Duration,
    lock_heartbeat: Duration,

    /// Local reentrancy guard. Purely per-replica: the distributed lock is
    /// what coordinates across the fleet; this flag just saves the lock
    /// round trip when a tick lands while another one is still executing.
    election_in_progress: AtomicBool,
    shutdown: CancellationToken,
}

/// Clears the election flag on every exit path of the tick handler,
/// including a panicking task function.
struct ElectionGuard<'a>(&'a AtomicBool);

impl Drop for ElectionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<L: LockClient> SynchronizedTask<L> {
    /// Create a new synchronized task and start its cron loop, or error out
    /// if the cron expression or the timeout ordering is invalid.
    ///
    /// Must be called within a Tokio runtime, since the cron loop is spawned
    /// immediately.
    pub fn new(
        lock_client: L,
        task_fn: TaskFn,
        options: TaskOptions,
    ) -> Result<Self, CronlockError> {
        options.validate()?;
        let schedule = parse_expression(&options.cron_expression)?;

        let inner = Arc::new(Inner {
            info: TaskInfo::new(options.name, Arc::new(schedule)),
            lock_client,
            task_fn,
            leadership_timeout: options.leadership_timeout,
            lock_timeout: options.lock_timeout,
            lock_heartbeat: options.lock_heartbeat,
            election_in_progress: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        let cron_loop = spawn_cron_loop(Arc::clone(&inner));

        Ok(Self {
            inner,
            cron_loop: tokio::sync::Mutex::new(Some(cron_loop)),
        })
    }

    /// The name of the task.
    pub fn name(&self) -> &str {
        self.inner.info.name()
    }

    /// The next time the cron task will fire, or the zero instant once the
    /// task was stopped.
    pub fn next_time(&self) -> DateTime<Utc> {
        self.inner.info.next_time()
    }

    /// Force an immediate tick. Locking is still honored, so no concurrent
    /// task execution can be forced this way.
    pub async fn execute_now(&self) {
        if self.inner.info.stopped.load(Ordering::SeqCst) {
            warn!(
                "Tried to force execution of synchronized cron task {}, which was already stopped.",
                self.name()
            );
            return;
        }

        self.inner.run_once().await;
    }

    /// Gracefully stop the task.
    ///
    /// Cancels the shutdown context (aborting any in-flight election), then
    /// waits for the cron loop to drain, bounded by `grace`. Afterwards the
    /// task is terminal: `execute_now` and `next_time` log a warning and
    /// no-op.
    pub async fn stop(&self, grace: Duration) {
        self.inner.shutdown.cancel();

        let drained = self.cron_loop.lock().await.take();
        if let Some(handle) = drained {
            if tokio::time::timeout(grace, handle).await.is_err() {
                warn!(
                    "Synchronized task {:?} did not drain within {:?}, detaching",
                    self.name(),
                    grace
                );
            }
        }

        self.inner.info.stopped.store(true, Ordering::SeqCst);
    }
}

impl<L: LockClient> Serialize for SynchronizedTask<L> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SynchronizedTask", 2)?;
        state.serialize_field("name", self.name())?;
        state.serialize_field("nextTime", &self.next_time())?;
        state.end()
    }
}

impl<L: LockClient> Inner<L> {
    /// The tick handler: fires on each cron occurrence and on `execute_now`.
    async fn run_once(&self) {
        let name = self.info.name();

        if self
            .election_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            trace!("Skipping election for synchronized task {name:?}, as leadership is already owned");
            return;
        }
        let _election = ElectionGuard(&self.election_in_progress);

        let leadership = self.shutdown.child_token();
        let deadline = Instant::now() + self.leadership_timeout;

        let started = Instant::now();
        match self.attempt_election(&leadership, deadline).await {
            Ok(()) => {
                info!(
                    "Successfully executed synchronized task {name:?} in {:?}",
                    started.elapsed()
                );
            }
            Err(CronlockError::NotObtained) => {
                debug!("Could not gain temporary leadership for synchronized task {name:?} - ignoring");
            }
            Err(CronlockError::Cancelled | CronlockError::DeadlineExceeded) => {
                error!(
                    "Forcefully giving up leadership for synchronized task {name:?} - timeout of {:?} reached",
                    self.leadership_timeout
                );
            }
            Err(err) => {
                error!("Error while trying to temporarily gain leadership for synchronized task {name:?}: {err}");
            }
        }
    }

    async fn attempt_election(
        &self,
        leadership: &CancellationToken,
        deadline: Instant,
    ) -> Result<(), CronlockError> {
        let name = self.info.name();
        trace!("Trying to temporarily gain leadership for synchronized task {name:?}");

        let key = format!("{name}.lock");
        let lease = tokio::select! {
            acquired = self.lock_client.acquire(&key, self.lock_timeout) => match acquired {
                Ok(Some(lease)) => lease,
                Ok(None) => return Err(CronlockError::NotObtained),
                Err(e) => return Err(CronlockError::Lock(e.to_string())),
            },
            _ = leadership.cancelled() => return Err(CronlockError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => return Err(CronlockError::DeadlineExceeded),
        };

        let outcome = self.supervise(&lease, leadership, deadline).await;

        // Release on every exit path. A failed release is only logged: the
        // lease expires on its own once the TTL runs out.
        trace!("Resigning temporary leadership for synchronized task {name:?}");
        if let Err(e) = lease.release().await {
            warn!(
                "Failed to resign leadership for synchronized task {name:?}: {e} - the service should be able to recover from this"
            );
        }

        outcome
    }

    /// Run the task function on its own concurrency unit while renewing the
    /// lease on every heartbeat, until completion, lease loss, the leadership
    /// deadline or shutdown, whichever comes first.
    async fn supervise(
        &self,
        lease: &<L as LockClient>::Lease,
        leadership: &CancellationToken,
        deadline: Instant,
    ) -> Result<(), CronlockError> {
        let name = self.info.name();

        // Child token so the heartbeat loop can abort the task function
        // mid-execution. The drop guard cancels it on every exit path.
        let wrapped = leadership.child_token();
        let _abort = wrapped.clone().drop_guard();

        let mut heartbeat = tokio::time::interval_at(
            Instant::now() + self.lock_heartbeat,
            self.lock_heartbeat,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut done = tokio::spawn((self.task_fn)(wrapped.clone(), self.info.clone()));

        loop {
            tokio::select! {
                _ = wrapped.cancelled() => return Err(CronlockError::Cancelled),

                _ = tokio::time::sleep_until(deadline) => return Err(CronlockError::DeadlineExceeded),

                joined = &mut done => {
                    return match joined {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(source)) => Err(CronlockError::TaskFunction {
                            task: name.to_owned(),
                            source,
                        }),
                        // The task function panicked. The election guard and
                        // the deferred release still run.
                        Err(join_err) => Err(CronlockError::TaskFunction {
                            task: name.to_owned(),
                            source: Box::new(join_err),
                        }),
                    };
                }

                _ = heartbeat.tick() => {
                    if let Err(e) = lease.refresh(self.lock_timeout).await {
                        return Err(CronlockError::Renewal {
                            task: name.to_owned(),
                            reason: e.to_string(),
                        });
                    }
                    debug!("Renewed leadership lock for long running synchronized task {name:?}");
                }
            }
        }
    }
}

/// One loop per task: sleep until the next fire time, then run the tick
/// handler inline so occurrences of the same task never overlap locally.
fn spawn_cron_loop<L: LockClient>(inner: Arc<Inner<L>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some(next) = inner.info.schedule.after(&Utc::now()).next() else {
                debug!(
                    "Cron schedule of synchronized task {:?} has no upcoming occurrence, parking the loop",
                    inner.info.name()
                );
                inner.shutdown.cancelled().await;
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => inner.run_once().await,
            }
        }
    })
}

/// Parse a cron expression, accepting both the classic 5-field form and the
/// seconds-bearing 6-field form. A 5-field expression fires at second 0.
fn parse_expression(expr: &str) -> Result<cron::Schedule, CronlockError> {
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_owned()
    };

    cron::Schedule::from_str(&normalized).map_err(|e| CronlockError::InvalidCronExpression {
        expr: expr.to_owned(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_field_expression_parses() {
        assert!(parse_expression("0 */5 * * * *").is_ok());
    }

    #[test]
    fn five_field_expression_is_normalized_to_second_zero() {
        let schedule = parse_expression("0 1 1 1 *").unwrap();
        let next = schedule.after(&Utc::now()).next().unwrap();
        assert_eq!(
            (next.timestamp_subsec_nanos(), next.timestamp() % 60),
            (0, 0),
            "normalized expression must fire at second 0"
        );
    }

    #[test]
    fn malformed_expression_is_rejected() {
        let err = parse_expression("not-a-cron").err().unwrap();
        assert!(matches!(err, CronlockError::InvalidCronExpression { .. }));
        assert!(err.to_string().contains("not-a-cron"));
    }

    #[test]
    fn descriptor_field_counts_are_passed_through() {
        // Neither 5 nor 6 fields: handed to the parser untouched, which
        // rejects it.
        assert!(parse_expression("* * *").is_err());
    }
}
