use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CronlockError;

/// A single recorded run of a synchronized task.
///
/// The wire form is JSON with the field order `Name`, `LastExecution`,
/// `NextExecution`, `LastDuration`, `Error`. Timestamps are RFC 3339 UTC with
/// nanosecond precision, the duration is an integer nanosecond count, and
/// `Error` is `null` exactly when the run succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecutionResult {
    pub name: String,

    /// Wall-clock start of the task function, UTC.
    pub last_execution: DateTime<Utc>,
    /// The task's computed next fire time, captured after the function
    /// returned.
    pub next_execution: DateTime<Utc>,
    #[serde(with = "duration_nanos")]
    pub last_duration: Duration,

    /// Message of the task function's error, if any. `None` and `Some("")`
    /// are distinct and both survive a round trip.
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn encode(&self) -> Result<Vec<u8>, CronlockError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a persisted record. Unknown extra fields are ignored; malformed
    /// JSON is an error.
    pub fn decode(data: &[u8]) -> Result<Self, CronlockError> {
        Ok(serde_json::from_slice(data)?)
    }
}

mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.as_nanos() as i64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = i64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos.max(0) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> ExecutionResult {
        let instant = DateTime::parse_from_rfc3339("1991-05-23T01:02:03.000000004Z")
            .unwrap()
            .with_timezone(&Utc);

        ExecutionResult {
            name: "some-task".to_owned(),
            last_execution: instant,
            next_execution: instant,
            last_duration: Duration::from_secs(3600),
            error: Some("some-error".to_owned()),
        }
    }

    const FIXTURE_JSON: &str = r#"{"Name":"some-task","LastExecution":"1991-05-23T01:02:03.000000004Z","NextExecution":"1991-05-23T01:02:03.000000004Z","LastDuration":3600000000000,"Error":"some-error"}"#;

    #[test]
    fn encodes_to_exact_wire_form() {
        let encoded = fixture().encode().unwrap();
        assert_eq!(String::from_utf8(encoded).unwrap(), FIXTURE_JSON);
    }

    #[test]
    fn decodes_the_exact_wire_form() {
        let decoded = ExecutionResult::decode(FIXTURE_JSON.as_bytes()).unwrap();
        assert_eq!(decoded, fixture());
    }

    #[test]
    fn round_trips_a_successful_run() {
        let mut result = fixture();
        result.error = None;

        let encoded = result.encode().unwrap();
        assert!(String::from_utf8_lossy(&encoded).contains(r#""Error":null"#));
        assert_eq!(ExecutionResult::decode(&encoded).unwrap(), result);
    }

    #[test]
    fn empty_error_string_stays_distinct_from_null() {
        let mut result = fixture();
        result.error = Some(String::new());

        let decoded = ExecutionResult::decode(&result.encode().unwrap()).unwrap();
        assert_eq!(decoded.error, Some(String::new()));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = FIXTURE_JSON.replace(
            r#""Error":"some-error"}"#,
            r#""Error":"some-error","Extra":42}"#,
        );
        let decoded = ExecutionResult::decode(json.as_bytes()).unwrap();
        assert_eq!(decoded, fixture());
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = ExecutionResult::decode(b"{not valid json}").err().unwrap();
        assert!(matches!(err, CronlockError::Decode(_)));
    }
}
