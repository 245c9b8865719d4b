//! One-shot import of the JSON events file into another store.

use super::{EventStore, FileEventStore};
use crate::models::error::StoreError;
use crate::models::event::{Event, TimestampPolicy};
use camino::Utf8Path;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Records found in the source file.
    pub total: usize,
    /// Records written to the destination (or that would be, on a dry run).
    pub migrated: usize,
    pub failed: usize,
}

/// Copies every record of the events file at `source` into `destination`.
///
/// Each record is validated and inserted on its own; a failure is counted and
/// logged, and the import carries on. Unparseable timestamps become the
/// current time and the source record is kept as the raw payload. With
/// `dry_run` nothing is initialized or written.
///
/// # Errors
///
/// Reading the source file ([`StoreError::LockTimeout`], [`StoreError::Io`])
/// or initializing the destination.
#[tracing::instrument(skip(destination))]
pub async fn migrate(
    source: &Utf8Path,
    destination: &dyn EventStore,
    dry_run: bool,
    lock_timeout: Duration,
) -> Result<MigrationReport, StoreError> {
    let records = FileEventStore::new(source, usize::MAX, lock_timeout)
        .snapshot()
        .await?;
    if records.is_empty() {
        info!(%source, "No events in source file, nothing to migrate");
        return Ok(MigrationReport::default());
    }

    let total = records.len();
    info!(total, "Found events in source file");

    if dry_run {
        info!(total, "Dry run, would migrate events");
        return Ok(MigrationReport {
            total,
            migrated: total,
            failed: 0,
        });
    }

    destination.init().await?;

    let mut report = MigrationReport {
        total,
        ..MigrationReport::default()
    };
    for (index, record) in records.into_iter().enumerate() {
        let event_type = record.get("event_type").cloned();
        let timestamp = record.get("timestamp").cloned();
        match migrate_record(record, destination).await {
            Ok(_) => report.migrated += 1,
            Err(error) => {
                report.failed += 1;
                warn!(index, ?event_type, ?timestamp, %error, "Failed to migrate event");
            }
        }
    }

    info!(
        migrated = report.migrated,
        failed = report.failed,
        total = report.total,
        "Migration completed"
    );
    Ok(report)
}

async fn migrate_record(record: Value, destination: &dyn EventStore) -> Result<i64, StoreError> {
    let mut event = Event::from_value(record.clone(), TimestampPolicy::Lenient)?;
    if event.raw_payload.is_none() {
        event.raw_payload = Some(record);
    }
    destination.append(&event).await
}
