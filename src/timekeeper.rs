use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use crate::{
    error::CronlockError,
    options::{TaskOptions, TimeKeeperOptions},
    result::ExecutionResult,
    task::SynchronizedTask,
    traits::{KvStore, KvWrite, LockClient, TaskFn},
};

/// Schedule of the internal cleanup task: once per minute.
const CLEANUP_CRON_EXPRESSION: &str = "0 * * * * *";

/// Records data about executed [`SynchronizedTask`]s in a key-value service.
///
/// Wrap a task function via [`TimeKeeper::wrap`] before handing it to a
/// synchronized task; every execution is then written transactionally into an
/// execution list (newest at the head) and a latest-run-per-task hash. An
/// internal synchronized cleanup task purges list entries past a configured
/// age.
///
/// It supports graceful shutdowns via its [`TimeKeeper::stop`] function.
pub struct TimeKeeper<K: KvStore, L: LockClient> {
    inner: Arc<Shared<K>>,
    cleanup_task: Option<SynchronizedTask<L>>,
}

struct Shared<K> {
    kv: K,
    exec_list_key: String,
    last_exec_key: String,
    keep_task_list: bool,
    keep_last_task: bool,
}

impl<K: KvStore, L: LockClient> TimeKeeper<K, L> {
    /// Create a new time keeper.
    ///
    /// Must be called within a Tokio runtime when a cleanup task is
    /// configured, since the cleanup task starts its cron loop immediately.
    pub fn new(kv: K, options: TimeKeeperOptions<L>) -> Self {
        if !options.keep_task_list && !options.keep_last_task {
            warn!(
                "Time keeper is configured to neither keep the last task nor a task list. This means, this time keeper is a no-op!"
            );
        }

        let inner = Arc::new(Shared {
            kv,
            exec_list_key: options.exec_list_key,
            last_exec_key: options.last_exec_key,
            keep_task_list: options.keep_task_list,
            keep_last_task: options.keep_last_task,
        });

        // The cleanup task is built only after the shared state exists: its
        // wrapped function captures that state, never the TimeKeeper itself.
        let mut cleanup_task = None;
        if let Some(cleanup) = options.cleanup {
            if let Some(lock_client) = cleanup.lock_client {
                let shared = Arc::clone(&inner);
                let age = cleanup.tasks_timeout;
                let body: TaskFn = Arc::new(move |_cancel, _task| {
                    let shared = Arc::clone(&shared);
                    Box::pin(async move { shared.cleanup_old_runs(age).await.map_err(Into::into) })
                });

                let task = SynchronizedTask::new(
                    lock_client,
                    wrap_with(&inner, body),
                    TaskOptions::default()
                        .with_name(cleanup.task_name)
                        .with_cron_expression(CLEANUP_CRON_EXPRESSION),
                );

                match task {
                    Ok(task) => cleanup_task = Some(task),
                    Err(e) => error!("Failed to construct the time keeper cleanup task: {e}"),
                }
            } else {
                error!(
                    "Specified clean up task for time keeper, but provided no lock client - disabling task."
                );
            }
        }

        Self {
            inner,
            cleanup_task,
        }
    }

    /// Wrap a task function so every execution is recorded via this time
    /// keeper. Tracking metadata is taken from the task handle the wrapped
    /// function is invoked with.
    pub fn wrap(&self, task_fn: TaskFn) -> TaskFn {
        wrap_with(&self.inner, task_fn)
    }

    /// Purge recorded executions whose start lies more than `older_than` in
    /// the past.
    ///
    /// The list is only ever pushed at the head, so its tail is the oldest
    /// entry; popping from the tail until it falls inside the window is
    /// sufficient. Transport errors while reading the tail end the pass
    /// silently; the next scheduled run picks the work up again.
    pub async fn cleanup_old_runs(&self, older_than: Duration) -> Result<(), CronlockError> {
        self.inner.cleanup_old_runs(older_than).await
    }

    /// All task executions recorded and not yet cleaned up, newest first.
    pub async fn get_all_runs(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ExecutionResult>, CronlockError> {
        let raw = self
            .inner
            .kv
            .lrange(&self.inner.exec_list_key, offset, offset + limit - 1)
            .await
            .map_err(kv_err)?;

        raw.iter().map(|data| ExecutionResult::decode(data)).collect()
    }

    /// Total amount of task executions recorded and not yet cleaned up.
    pub async fn count_all_runs(&self) -> Result<i64, CronlockError> {
        self.inner
            .kv
            .llen(&self.inner.exec_list_key)
            .await
            .map_err(kv_err)
    }

    /// The latest execution of every task recorded so far, sorted ascending
    /// by task name. Tasks which have not run yet are not included.
    pub async fn get_last_run_of_all_tasks(&self) -> Result<Vec<ExecutionResult>, CronlockError> {
        let raw = self
            .inner
            .kv
            .hgetall(&self.inner.last_exec_key)
            .await
            .map_err(kv_err)?;

        let mut results = raw
            .values()
            .map(|data| ExecutionResult::decode(data))
            .collect::<Result<Vec<_>, _>>()?;
        results.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(results)
    }

    /// Amount of individual tasks recorded so far. Tasks which have not run
    /// yet are not counted.
    pub async fn count_tasks(&self) -> Result<i64, CronlockError> {
        self.inner
            .kv
            .hlen(&self.inner.last_exec_key)
            .await
            .map_err(kv_err)
    }

    /// The latest execution of the task with the given name, or a not-found
    /// error if it has never run.
    pub async fn get_last_run_of_task(&self, name: &str) -> Result<ExecutionResult, CronlockError> {
        match self
            .inner
            .kv
            .hget(&self.inner.last_exec_key, name)
            .await
            .map_err(kv_err)?
        {
            Some(raw) => ExecutionResult::decode(&raw),
            None => Err(CronlockError::NotFound {
                name: name.to_owned(),
            }),
        }
    }

    /// The internal cleanup coordinator, when one was configured.
    pub fn cleanup_task(&self) -> Option<&SynchronizedTask<L>> {
        self.cleanup_task.as_ref()
    }

    /// Gracefully stop the time keeper. This has no practical implications
    /// other than inevitably stopping the internal cleanup task.
    pub async fn stop(&mut self, grace: Duration) {
        if let Some(task) = self.cleanup_task.take() {
            task.stop(grace).await;
        }
    }
}

fn wrap_with<K: KvStore>(shared: &Arc<Shared<K>>, task_fn: TaskFn) -> TaskFn {
    let shared = Arc::clone(shared);

    Arc::new(move |cancel, task| {
        let shared = Arc::clone(&shared);
        let task_fn = Arc::clone(&task_fn);

        Box::pin(async move {
            let last_execution = Utc::now();
            let task_result = task_fn(cancel, task.clone()).await;
            let last_duration = (Utc::now() - last_execution)
                .to_std()
                .unwrap_or(Duration::ZERO);

            if shared.keep_task_list || shared.keep_last_task {
                let record = ExecutionResult {
                    name: task.name().to_owned(),
                    last_execution,
                    next_execution: task.next_time(),
                    last_duration,
                    error: task_result.as_ref().err().map(|e| e.to_string()),
                };

                if let Err(e) = shared.record(&record).await {
                    // A task error takes precedence over the bookkeeping one.
                    return match task_result {
                        Err(task_err) => Err(task_err),
                        Ok(()) => Err(e.into()),
                    };
                }
            }

            task_result
        })
    })
}

fn kv_err(e: impl std::error::Error) -> CronlockError {
    CronlockError::Kv(e.to_string())
}

impl<K: KvStore> Shared<K> {
    /// Write the per-run record and the per-task aggregate in one
    /// transactional pipeline.
    async fn record(&self, record: &ExecutionResult) -> Result<(), CronlockError> {
        let encoded = record.encode()?;

        let mut writes = Vec::with_capacity(2);
        if self.keep_last_task {
            writes.push(KvWrite::HashSet {
                key: self.last_exec_key.clone(),
                field: record.name.clone(),
                value: encoded.clone(),
            });
        }
        if self.keep_task_list {
            writes.push(KvWrite::ListPush {
                key: self.exec_list_key.clone(),
                value: encoded,
            });
        }

        self.kv.tx_pipeline(writes).await.map_err(kv_err)
    }

    async fn cleanup_old_runs(&self, older_than: Duration) -> Result<(), CronlockError> {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        loop {
            let tail = match self.kv.lrange(&self.exec_list_key, -1, -1).await {
                Ok(tail) => tail,
                // Read failures end this pass; the next run retries.
                Err(_) => return Ok(()),
            };

            let Some(last) = tail.first() else {
                // List is empty, nothing to do.
                return Ok(());
            };

            let record = ExecutionResult::decode(last)?;

            if record.last_execution >= cutoff {
                // The tail is not outside the window yet, so nothing before
                // it can be either. We are done here.
                return Ok(());
            }

            // Always safe to rpop: inserts are lpush only, so we never
            // interfere with the end of the list.
            if let Err(e) = self.kv.rpop(&self.exec_list_key).await {
                return Err(kv_err(e));
            }
        }
    }
}
