use std::time::Duration;

use crate::{error::CronlockError, traits::LockClient};

/// Default name of a synchronized cron task.
pub const DEFAULT_NAME: &str = "Default Synchronized Task";

/// Default cron expression of a synchronized cron task: every minute.
pub const DEFAULT_CRON_EXPRESSION: &str = "0 * * * * *";

/// Default hard ceiling on a single execution of a synchronized cron task.
pub const DEFAULT_LEADERSHIP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default TTL of the distributed lock backing a single execution.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval in which an acquired lock is renewed (up to the total of
/// the leadership timeout).
pub const DEFAULT_LOCK_HEARTBEAT: Duration = Duration::from_secs(1);

/// Default key of the list tracking every recorded execution.
pub const DEFAULT_EXEC_LIST_KEY: &str = "timekeeper.executions.list";

/// Default key of the hash tracking the latest execution per task.
pub const DEFAULT_LAST_EXEC_KEY: &str = "timekeeper.executions.aggregation";

/// Default name of the internal cleanup task.
pub const DEFAULT_CLEANUP_TASK_NAME: &str = "timekeeper.cleanup";

/// Default age after which recorded executions are purged: 30 days.
pub const DEFAULT_TASK_LIST_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Configuration of a synchronized cron task.
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub name: String,
    pub cron_expression: String,
    /// Hard ceiling on one execution. Once elapsed, the election is abandoned
    /// and the task function is cancelled.
    pub leadership_timeout: Duration,
    /// TTL the lock is initially held for. Keep it small for fast failure
    /// detection across replicas.
    pub lock_timeout: Duration,
    /// Renewal interval of the lock. Must be strictly less than
    /// `lock_timeout`, otherwise the task never gets a chance to renew.
    pub lock_heartbeat: Duration,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            cron_expression: DEFAULT_CRON_EXPRESSION.to_owned(),
            leadership_timeout: DEFAULT_LEADERSHIP_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_heartbeat: DEFAULT_LOCK_HEARTBEAT,
        }
    }
}

impl TaskOptions {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_cron_expression(mut self, cron_expression: impl Into<String>) -> Self {
        self.cron_expression = cron_expression.into();
        self
    }

    pub fn with_leadership_timeout(mut self, leadership_timeout: Duration) -> Self {
        self.leadership_timeout = leadership_timeout;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_lock_heartbeat(mut self, lock_heartbeat: Duration) -> Self {
        self.lock_heartbeat = lock_heartbeat;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), CronlockError> {
        if self.lock_heartbeat >= self.lock_timeout {
            return Err(CronlockError::InvalidConfig {
                reason: format!(
                    "lock heartbeat ({:?}) must be strictly less than the lock timeout ({:?})",
                    self.lock_heartbeat, self.lock_timeout
                ),
            });
        }
        if self.lock_timeout > self.leadership_timeout {
            return Err(CronlockError::InvalidConfig {
                reason: format!(
                    "lock timeout ({:?}) must not exceed the leadership timeout ({:?})",
                    self.lock_timeout, self.leadership_timeout
                ),
            });
        }
        Ok(())
    }
}

/// Configuration of a time keeper.
#[derive(Debug, Clone)]
pub struct TimeKeeperOptions<L> {
    pub exec_list_key: String,
    pub last_exec_key: String,
    /// Track every execution in a list (newest at the head).
    pub keep_task_list: bool,
    /// Track the latest execution per task in a hash.
    pub keep_last_task: bool,
    /// Internal cleanup task purging expired list entries. `None` disables
    /// cleanup entirely.
    pub cleanup: Option<CleanupOptions<L>>,
}

impl<L> Default for TimeKeeperOptions<L> {
    fn default() -> Self {
        Self {
            exec_list_key: DEFAULT_EXEC_LIST_KEY.to_owned(),
            last_exec_key: DEFAULT_LAST_EXEC_KEY.to_owned(),
            keep_task_list: true,
            keep_last_task: true,
            cleanup: None,
        }
    }
}

impl<L> TimeKeeperOptions<L> {
    pub fn with_exec_list_key(mut self, exec_list_key: impl Into<String>) -> Self {
        self.exec_list_key = exec_list_key.into();
        self
    }

    pub fn with_last_exec_key(mut self, last_exec_key: impl Into<String>) -> Self {
        self.last_exec_key = last_exec_key.into();
        self
    }

    pub fn with_keep_task_list(mut self, keep_task_list: bool) -> Self {
        self.keep_task_list = keep_task_list;
        self
    }

    pub fn with_keep_last_task(mut self, keep_last_task: bool) -> Self {
        self.keep_last_task = keep_last_task;
        self
    }

    pub fn with_cleanup(mut self, cleanup: CleanupOptions<L>) -> Self {
        self.cleanup = Some(cleanup);
        self
    }
}

/// Configuration of the time keeper's internal cleanup task.
#[derive(Debug, Clone)]
pub struct CleanupOptions<L> {
    /// Lock client coordinating the cleanup task across replicas. Without
    /// one the cleanup task is disabled (with a logged warning).
    pub lock_client: Option<L>,
    /// Age after which recorded executions are purged from the list.
    pub tasks_timeout: Duration,
    pub task_name: String,
}

impl<L: LockClient> CleanupOptions<L> {
    pub fn new(lock_client: L) -> Self {
        Self {
            lock_client: Some(lock_client),
            tasks_timeout: DEFAULT_TASK_LIST_TIMEOUT,
            task_name: DEFAULT_CLEANUP_TASK_NAME.to_owned(),
        }
    }

    pub fn with_tasks_timeout(mut self, tasks_timeout: Duration) -> Self {
        self.tasks_timeout = tasks_timeout;
        self
    }

    pub fn with_task_name(mut self, task_name: impl Into<String>) -> Self {
        self.task_name = task_name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_options_defaults() {
        let options = TaskOptions::default();
        assert_eq!(options.name, DEFAULT_NAME);
        assert_eq!(options.cron_expression, DEFAULT_CRON_EXPRESSION);
        assert_eq!(options.leadership_timeout, DEFAULT_LEADERSHIP_TIMEOUT);
        assert_eq!(options.lock_timeout, DEFAULT_LOCK_TIMEOUT);
        assert_eq!(options.lock_heartbeat, DEFAULT_LOCK_HEARTBEAT);
    }

    #[test]
    fn task_options_builders_override_defaults() {
        let options = TaskOptions::default()
            .with_name("nightly-report")
            .with_cron_expression("0 0 3 * * *")
            .with_leadership_timeout(Duration::from_secs(60))
            .with_lock_timeout(Duration::from_secs(10))
            .with_lock_heartbeat(Duration::from_secs(2));

        assert_eq!(options.name, "nightly-report");
        assert_eq!(options.cron_expression, "0 0 3 * * *");
        assert_eq!(options.leadership_timeout, Duration::from_secs(60));
        assert_eq!(options.lock_timeout, Duration::from_secs(10));
        assert_eq!(options.lock_heartbeat, Duration::from_secs(2));
    }

    #[test]
    fn default_timeouts_are_consistent() {
        assert!(TaskOptions::default().validate().is_ok());
    }

    #[test]
    fn heartbeat_equal_to_lock_timeout_is_rejected() {
        let options = TaskOptions::default()
            .with_lock_timeout(Duration::from_secs(1))
            .with_lock_heartbeat(Duration::from_secs(1));
        let err = options.validate().err().unwrap();
        assert!(err.to_string().contains("heartbeat"));
    }

    #[test]
    fn lock_timeout_beyond_leadership_timeout_is_rejected() {
        let options = TaskOptions::default().with_lock_timeout(Duration::from_secs(31));
        let err = options.validate().err().unwrap();
        assert!(err.to_string().contains("leadership"));
    }

    #[test]
    fn time_keeper_options_defaults() {
        let options: TimeKeeperOptions<crate::mocks::MockLockClient> = TimeKeeperOptions::default();
        assert_eq!(options.exec_list_key, DEFAULT_EXEC_LIST_KEY);
        assert_eq!(options.last_exec_key, DEFAULT_LAST_EXEC_KEY);
        assert!(options.keep_task_list);
        assert!(options.keep_last_task);
        assert!(options.cleanup.is_none());
    }

    #[test]
    fn cleanup_options_defaults() {
        let cleanup = CleanupOptions::new(crate::mocks::MockLockClient::new());
        assert!(cleanup.lock_client.is_some());
        assert_eq!(cleanup.tasks_timeout, DEFAULT_TASK_LIST_TIMEOUT);
        assert_eq!(cleanup.task_name, DEFAULT_CLEANUP_TASK_NAME);
    }
}
