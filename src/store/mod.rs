//! Durable, concurrency-safe event storage.
//!
//! [`EventStore`] is the single interface the webhook and the query tools
//! talk to. [`PgEventStore`] is the authoritative implementation;
//! [`FileEventStore`] is the offline fallback and reports through
//! [`EventStore::recent_order`] which ordering it actually provides.

pub mod file;
pub mod file_lock;
pub mod migrate;
pub mod postgres;

pub use file::FileEventStore;
pub use migrate::{migrate, MigrationReport};
pub use postgres::PgEventStore;

use crate::models::error::StoreError;
use crate::models::event::Event;
use async_trait::async_trait;
use derive_more::Display;
use ghwatch_cfg::{Backend, Config};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Identifier handed out by [`EventStore::append`].
///
/// Database row id for [`PgEventStore`]; 1-based position in the retained log
/// for [`FileEventStore`].
pub type EventId = i64;

/// Order of the events returned by [`EventStore::query_recent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RecentOrder {
    /// The last entries appended, oldest first.
    #[display(fmt = "insertion order, oldest first")]
    InsertionAscending,
    /// The newest entries by timestamp, newest first.
    #[display(fmt = "timestamp, newest first")]
    TimestampDescending,
}

#[async_trait]
pub trait EventStore: Debug + Send + Sync {
    /// Creates the schema or file if needed. Safe to call on every start.
    async fn init(&self) -> Result<(), StoreError>;

    /// Persists one event. It is visible to queries once this returns.
    async fn append(&self, event: &Event) -> Result<EventId, StoreError>;

    /// Up to `limit` of the most recent events, ordered per [`Self::recent_order`].
    async fn query_recent(&self, limit: usize) -> Result<Vec<Event>, StoreError>;

    /// Every event carrying a workflow run, optionally only for one workflow.
    async fn query_workflow_events(
        &self,
        workflow_name: Option<&str>,
    ) -> Result<Vec<Event>, StoreError>;

    /// Deletes events older than the `keep_count`-th newest one and returns how
    /// many were removed.
    async fn cleanup(&self, keep_count: usize) -> Result<u64, StoreError>;

    fn recent_order(&self) -> RecentOrder;
}

/// Builds the configured store. Does not call [`EventStore::init`].
///
/// # Errors
///
/// [`StoreError::Config`] when the database backend is selected without a
/// `database_url`, or the pool cannot be built.
pub fn from_config(config: &Config) -> Result<Arc<dyn EventStore>, StoreError> {
    let store: Arc<dyn EventStore> = match config.backend {
        Backend::File => Arc::new(FileEventStore::new(
            config.events_file.clone(),
            config.max_events,
            Duration::from_millis(config.lock_timeout_ms),
        )),
        Backend::Postgres => Arc::new(PgEventStore::from_config(config)?),
    };
    info!(backend = ?config.backend, order = %store.recent_order(), "Using event store");
    Ok(store)
}
