use crate::traits::BoxError;

#[derive(Debug)]
pub enum CronlockError {
    /// The cron expression could not be parsed.
    InvalidCronExpression { expr: String, reason: String },
    /// The configured timeouts contradict each other.
    InvalidConfig { reason: String },
    /// Another replica currently holds the task lock. This is the normal
    /// loser path of an election, not a failure.
    NotObtained,
    /// The election was cancelled by a shutdown.
    Cancelled,
    /// The leadership timeout elapsed before the election finished.
    DeadlineExceeded,
    /// The heartbeat failed to extend the lease mid-execution.
    Renewal { task: String, reason: String },
    /// The user task function returned an error or panicked.
    TaskFunction { task: String, source: BoxError },
    /// The lock service failed with a transport error.
    Lock(String),
    /// The key-value service failed with a transport error.
    Kv(String),
    /// A persisted execution record could not be decoded.
    Decode(serde_json::Error),
    /// No execution has been recorded under the given task name.
    NotFound { name: String },
}

impl std::fmt::Display for CronlockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCronExpression { expr, reason } => {
                write!(f, "invalid cron expression {expr:?}: {reason}")
            }
            Self::InvalidConfig { reason } => write!(f, "invalid task configuration: {reason}"),
            Self::NotObtained => write!(f, "lock not obtained"),
            Self::Cancelled => write!(f, "context cancelled"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
            Self::Renewal { task, reason } => write!(
                f,
                "failed to renew leadership for synchronized task {task:?} lock while executing: {reason} - crudely canceling"
            ),
            Self::TaskFunction { task, source } => write!(
                f,
                "error while executing synchronized task function {task:?}: {source}"
            ),
            Self::Lock(msg) => write!(f, "lock service error: {msg}"),
            Self::Kv(msg) => write!(f, "KV error: {msg}"),
            Self::Decode(e) => write!(f, "failed to decode execution record: {e}"),
            Self::NotFound { name } => write!(f, "no execution recorded for task {name:?}"),
        }
    }
}

impl std::error::Error for CronlockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TaskFunction { source, .. } => Some(source.as_ref()),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CronlockError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e)
    }
}
