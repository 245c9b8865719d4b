use super::error::ValidationError;
use super::workflow::{CheckRun, WorkflowRun};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub const UNKNOWN_EVENT_TYPE: &str = "unknown";

/// One normalized GitHub webhook delivery.
///
/// Fields the service does not know about are kept in `extra` so that stored
/// records survive upstream schema changes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: String,
    #[serde(default = "unknown_event_type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_run: Option<WorkflowRun>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_run: Option<CheckRun>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn unknown_event_type() -> String {
    UNKNOWN_EVENT_TYPE.to_owned()
}

/// How to treat a `timestamp` that is missing or does not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampPolicy {
    /// Substitute the current time. Used when accepting fresh or imported data.
    Lenient,
    /// Keep unparseable strings as they are. Used when reading back stored
    /// records, which may predate the current timestamp format.
    Preserve,
}

/// Current time in the canonical stored format.
///
/// Fixed precision and a `Z` suffix keep lexical and chronological order the same.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(datetime: DateTime<Utc>) -> String {
    datetime.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Best-effort ISO-8601 parse. Naive timestamps are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Some(datetime.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

impl TimestampPolicy {
    fn resolve(self, value: Option<Value>) -> Result<String, ValidationError> {
        match (self, value) {
            (Self::Lenient, Some(Value::String(timestamp)))
                if parse_timestamp(&timestamp).is_some() =>
            {
                Ok(timestamp)
            }
            (Self::Lenient, other) => {
                debug!(?other, "Replacing missing or unparseable timestamp with now");
                Ok(now_timestamp())
            }
            (Self::Preserve, Some(Value::String(timestamp))) => {
                if parse_timestamp(&timestamp).is_none() {
                    debug!(%timestamp, "Keeping unparseable legacy timestamp");
                }
                Ok(timestamp)
            }
            (Self::Preserve, None | Some(Value::Null)) => {
                Err(ValidationError::MissingField { field: "timestamp" })
            }
            (Self::Preserve, Some(other)) => Err(ValidationError::InvalidField {
                field: "timestamp",
                reason: format!("expected a string, got {}", json_kind(&other)),
            }),
        }
    }
}

impl Event {
    /// Validates an untrusted JSON record into an event.
    ///
    /// # Errors
    ///
    /// Fails when the record is not an object, or when `timestamp` (under
    /// [`TimestampPolicy::Preserve`]) or one of the top-level string fields has
    /// the wrong shape. Invalid `workflow_run`/`check_run` objects are logged and
    /// dropped instead.
    pub fn from_value(value: Value, policy: TimestampPolicy) -> Result<Self, ValidationError> {
        let Value::Object(mut map) = value else {
            return Err(ValidationError::NotAnObject);
        };

        let event_type = optional_string(&mut map, "event_type")?.unwrap_or_else(unknown_event_type);
        let timestamp = policy.resolve(map.remove("timestamp"))?;
        let action = optional_string(&mut map, "action")?;
        let repository = optional_string(&mut map, "repository")?;
        let sender = optional_string(&mut map, "sender")?;
        let workflow_run = map
            .remove("workflow_run")
            .and_then(|run| validate_nested(run, "workflow_run", &event_type));
        let check_run = map
            .remove("check_run")
            .and_then(|run| validate_nested(run, "check_run", &event_type));
        let raw_payload = map.remove("raw_payload").filter(|payload| !payload.is_null());

        Ok(Self {
            timestamp,
            event_type,
            action,
            repository,
            sender,
            workflow_run,
            check_run,
            raw_payload,
            extra: map,
        })
    }

    /// Builds the canonical event for a webhook delivery received at `received_at`.
    #[tracing::instrument(skip(payload))]
    pub fn from_webhook(event_type: &str, payload: &Value, received_at: DateTime<Utc>) -> Self {
        let nested_str = |outer: &str, inner: &str| {
            payload
                .get(outer)
                .and_then(|value| value.get(inner))
                .and_then(Value::as_str)
                .map(str::to_owned)
        };

        Self {
            timestamp: format_timestamp(received_at),
            event_type: event_type.to_owned(),
            action: payload
                .get("action")
                .and_then(Value::as_str)
                .map(str::to_owned),
            repository: nested_str("repository", "full_name"),
            sender: nested_str("sender", "login"),
            workflow_run: payload
                .get("workflow_run")
                .cloned()
                .and_then(|run| validate_nested(run, "workflow_run", event_type)),
            check_run: payload
                .get("check_run")
                .cloned()
                .and_then(|run| validate_nested(run, "check_run", event_type)),
            raw_payload: Some(payload.clone()),
            extra: Map::new(),
        }
    }

    /// Parsed receipt time, if the stored timestamp is parseable.
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }

    pub fn workflow_name(&self) -> Option<&str> {
        self.workflow_run.as_ref().map(|run| run.name.as_str())
    }
}

/// Validates a list of raw records, keeping the ones that pass in order.
///
/// Every rejected record is logged with its position; the batch never aborts.
#[tracing::instrument(skip(records), fields(count = records.len()))]
pub fn validate_batch(records: Vec<Value>, policy: TimestampPolicy, operation: &str) -> Vec<Event> {
    records
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| match Event::from_value(record, policy) {
            Ok(event) => Some(event),
            Err(error) => {
                warn!(index, operation, %error, "Skipping invalid event");
                None
            }
        })
        .collect()
}

fn optional_string(
    map: &mut Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, ValidationError> {
    match map.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(other) => Err(ValidationError::InvalidField {
            field,
            reason: format!("expected a string, got {}", json_kind(&other)),
        }),
    }
}

fn validate_nested<T: DeserializeOwned>(value: Value, field: &str, event_type: &str) -> Option<T> {
    if value.is_null() {
        return None;
    }
    let keys: Vec<String> = value
        .as_object()
        .map(|object| object.keys().cloned().collect())
        .unwrap_or_default();
    serde_json::from_value(value)
        .map_err(|error| {
            warn!(field, event_type, ?keys, %error, "Failed to validate nested object, omitting it");
        })
        .ok()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
