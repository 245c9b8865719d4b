use super::file_lock::{Access, LockedFile, DEFAULT_LOCK_TIMEOUT};
use super::{EventId, EventStore, RecentOrder};
use crate::models::error::StoreError;
use crate::models::event::{parse_timestamp, validate_batch, Event, TimestampPolicy};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ITEMS: usize = 100;

/// Event log kept as one JSON array in a single file.
///
/// Every call takes the file's advisory lock for its whole read or
/// read-modify-write, so concurrent writers in any process never interleave.
/// Appends rewrite the whole file, which is fine at the bounded sizes this
/// store is meant for. Compared to the database store it relaxes two things:
/// `query_recent` follows insertion order, and `raw_payload` is not kept.
#[derive(Debug, Clone)]
pub struct FileEventStore {
    inner: Arc<FileLog>,
}

#[derive(Debug)]
struct FileLog {
    path: Utf8PathBuf,
    max_items: usize,
    lock_timeout: Duration,
}

impl FileEventStore {
    pub fn new(path: impl Into<Utf8PathBuf>, max_items: usize, lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(FileLog {
                path: path.into(),
                max_items,
                lock_timeout,
            }),
        }
    }

    pub fn with_defaults(path: impl Into<Utf8PathBuf>) -> Self {
        Self::new(path, DEFAULT_MAX_ITEMS, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.inner.path
    }

    /// Raw records currently in the file, without validation.
    ///
    /// # Errors
    ///
    /// [`StoreError::LockTimeout`] or [`StoreError::Io`].
    pub async fn snapshot(&self) -> Result<Vec<Value>, StoreError> {
        self.blocking(FileLog::read_records).await
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&FileLog) -> Result<T, StoreError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner)).await?
    }
}

impl FileLog {
    fn read_records(&self) -> Result<Vec<Value>, StoreError> {
        match LockedFile::acquire(&self.path, Access::Read, self.lock_timeout)? {
            Some(mut locked) => Ok(records_from(locked.read_json()?, &self.path)),
            None => Ok(Vec::new()),
        }
    }

    fn read_events(&self, operation: &str) -> Result<Vec<Event>, StoreError> {
        Ok(validate_batch(
            self.read_records()?,
            TimestampPolicy::Preserve,
            operation,
        ))
    }

    fn lock_for_write(&self) -> Result<LockedFile, StoreError> {
        LockedFile::acquire(&self.path, Access::ReadWrite, self.lock_timeout)?
            .ok_or_else(|| StoreError::Config(format!("{} could not be opened", self.path)))
    }

    /// Creates the file holding an empty list when it is missing or blank.
    /// Existing content is never touched, even when it is not a valid log.
    fn init(&self) -> Result<bool, StoreError> {
        let mut locked = self.lock_for_write()?;
        if !locked.is_blank()? {
            return Ok(false);
        }
        locked.rewrite_json(&Vec::<Value>::new())?;
        Ok(true)
    }

    /// Holds the lock across read, `modify` and rewrite.
    fn update<T>(
        &self,
        modify: impl FnOnce(&mut Vec<Value>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut locked = self.lock_for_write()?;
        let mut records = records_from(locked.read_json()?, &self.path);
        let out = modify(&mut records)?;
        if records.len() > self.max_items {
            let dropped = records.len() - self.max_items;
            records.drain(..dropped);
            debug!(path = %self.path, dropped, max_items = self.max_items, "Truncated log to max items");
        }
        locked.rewrite_json(&records)?;
        Ok(out)
    }

    fn append(&self, event: &Event) -> Result<EventId, StoreError> {
        let mut record = event.clone();
        record.raw_payload = None;
        let record = serde_json::to_value(record)?;
        let max_items = self.max_items;
        self.update(move |records| {
            records.push(record);
            let position = records.len().min(max_items);
            Ok(i64::try_from(position).unwrap_or(i64::MAX))
        })
    }

    fn cleanup(&self, keep_count: usize) -> Result<u64, StoreError> {
        self.update(|records| {
            if records.len() <= keep_count {
                return Ok(0);
            }
            let before = records.len();
            if keep_count == 0 {
                records.clear();
            } else {
                let mut keys: Vec<_> = records.iter().map(sort_key).collect();
                keys.sort_by_key(|key| Reverse(key.clone()));
                let cutoff = keys[keep_count - 1].clone();
                records.retain(|record| sort_key(record) >= cutoff);
            }
            Ok(u64::try_from(before - records.len()).unwrap_or(u64::MAX))
        })
    }
}

/// Ordering used by cleanup. Records at the same instant compare equal however
/// their timestamps are written. Unparseable or missing timestamps sort as the
/// oldest, ordered among themselves by the raw string.
fn sort_key(record: &Value) -> (Option<DateTime<Utc>>, Option<String>) {
    let raw = record
        .get("timestamp")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match parse_timestamp(raw) {
        Some(at) => (Some(at), None),
        None => (None, Some(raw.to_owned())),
    }
}

fn records_from(document: Option<Value>, path: &Utf8Path) -> Vec<Value> {
    match document {
        Some(Value::Array(records)) => records,
        Some(_) => {
            warn!(%path, "File does not contain a list, treating as empty");
            Vec::new()
        }
        None => Vec::new(),
    }
}

#[async_trait]
impl EventStore for FileEventStore {
    async fn init(&self) -> Result<(), StoreError> {
        let created = self.blocking(FileLog::init).await?;
        info!(path = %self.path(), created, "Events file ready");
        Ok(())
    }

    async fn append(&self, event: &Event) -> Result<EventId, StoreError> {
        let event = event.clone();
        self.blocking(move |log| log.append(&event)).await
    }

    async fn query_recent(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        let mut events = self
            .blocking(|log| log.read_events("query_recent"))
            .await?;
        let skip = events.len().saturating_sub(limit);
        Ok(events.split_off(skip))
    }

    async fn query_workflow_events(
        &self,
        workflow_name: Option<&str>,
    ) -> Result<Vec<Event>, StoreError> {
        let events = self
            .blocking(|log| log.read_events("query_workflow_events"))
            .await?;
        Ok(events
            .into_iter()
            .filter(|event| match (event.workflow_name(), workflow_name) {
                (Some(name), Some(wanted)) => name == wanted,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .collect())
    }

    async fn cleanup(&self, keep_count: usize) -> Result<u64, StoreError> {
        let deleted = self
            .blocking(move |log| log.cleanup(keep_count))
            .await?;
        info!(deleted, keep_count, "Cleaned up old events");
        Ok(deleted)
    }

    fn recent_order(&self) -> RecentOrder {
        RecentOrder::InsertionAscending
    }
}
