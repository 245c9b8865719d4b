//! PostgreSQL event store behind a deadpool connection pool.
//!
//! Nested run data and the raw webhook payload live in JSONB columns, with a
//! functional index on the workflow name so name-filtered queries stay cheap.

use super::{EventId, EventStore, RecentOrder};
use crate::models::error::StoreError;
use crate::models::event::{format_timestamp, validate_batch, Event, TimestampPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, PoolError, RecyclingMethod, Runtime};
use ghwatch_cfg::Config;
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info, warn};

const TABLE_EXISTS_SQL: &str = "
    SELECT EXISTS (
        SELECT FROM information_schema.tables
        WHERE table_schema = 'public'
        AND table_name = 'github_events'
    )";

const CREATE_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS github_events (
        id BIGSERIAL PRIMARY KEY,
        timestamp TIMESTAMP WITH TIME ZONE NOT NULL,
        event_type VARCHAR(100) NOT NULL,
        action VARCHAR(100),
        repository VARCHAR(255),
        sender VARCHAR(255),
        workflow_run JSONB,
        check_run JSONB,
        raw_payload JSONB,
        created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
    );
    CREATE INDEX IF NOT EXISTS idx_github_events_timestamp ON github_events(timestamp DESC);
    CREATE INDEX IF NOT EXISTS idx_github_events_event_type ON github_events(event_type);
    CREATE INDEX IF NOT EXISTS idx_github_events_repository ON github_events(repository);
    CREATE INDEX IF NOT EXISTS idx_github_events_workflow_name ON github_events((workflow_run->>'name'));
";

const INSERT_EVENT_SQL: &str = "
    INSERT INTO github_events (
        timestamp, event_type, action, repository, sender,
        workflow_run, check_run, raw_payload
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    RETURNING id";

const SELECT_COLUMNS: &str =
    "SELECT id, timestamp, event_type, action, repository, sender, workflow_run, check_run, raw_payload FROM github_events";

const CUTOFF_SQL: &str = "
    SELECT timestamp FROM github_events
    ORDER BY timestamp DESC
    OFFSET $1
    LIMIT 1";

const DELETE_OLDER_SQL: &str = "DELETE FROM github_events WHERE timestamp < $1";

/// Event store backed by the `github_events` table.
#[derive(Clone)]
pub struct PgEventStore {
    pool: Pool,
    max_size: usize,
}

impl std::fmt::Debug for PgEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgEventStore")
            .field("max_size", &self.max_size)
            .field("status", &self.pool.status())
            .finish_non_exhaustive()
    }
}

impl PgEventStore {
    /// Builds the pool. No connection is opened until the first query.
    ///
    /// # Errors
    ///
    /// [`StoreError::Config`] when `database_url` is missing or malformed,
    /// [`StoreError::PoolBuild`] when the pool cannot be created.
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        let url = config.database_url.as_deref().ok_or_else(|| {
            StoreError::Config(
                "database_url is not set; configure a PostgreSQL connection string".to_string(),
            )
        })?;
        let pg_config = tokio_postgres::Config::from_str(url)
            .map_err(|err| StoreError::Config(format!("invalid database_url: {err}")))?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let wait_timeout = Duration::from_secs(config.db_wait_timeout_secs);
        let pool = Pool::builder(manager)
            .max_size(config.db_pool_size)
            .wait_timeout(Some(wait_timeout))
            .create_timeout(Some(wait_timeout))
            .recycle_timeout(Some(Duration::from_secs(5)))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|err| StoreError::PoolBuild(err.to_string()))?;

        info!(max_size = config.db_pool_size, ?wait_timeout, "Created database connection pool");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: Pool) -> Self {
        let max_size = pool.status().max_size;
        Self { pool, max_size }
    }

    async fn client(&self) -> Result<deadpool_postgres::Client, StoreError> {
        self.pool.get().await.map_err(|err| {
            if matches!(err, PoolError::Timeout(_)) {
                warn!(
                    max_size = self.max_size,
                    "Connection pool exhausted, consider increasing db_pool_size"
                );
            }
            StoreError::from(err)
        })
    }

    async fn fetch(&self, sql: &str, params: &[&(dyn ToSql + Sync)], operation: &str) -> Result<Vec<Event>, StoreError> {
        let client = self.client().await?;
        let rows = client.query(sql, params).await?;
        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let events = validate_batch(records, TimestampPolicy::Preserve, operation);
        debug!(count = events.len(), operation, "Retrieved events from database");
        Ok(events)
    }
}

/// Rebuilds the canonical JSON shape of an event from a table row.
fn record_from_row(row: &Row) -> Result<Value, tokio_postgres::Error> {
    let timestamp: DateTime<Utc> = row.try_get("timestamp")?;
    let mut record = json!({
        "timestamp": format_timestamp(timestamp),
        "event_type": row.try_get::<_, String>("event_type")?,
        "action": row.try_get::<_, Option<String>>("action")?,
        "repository": row.try_get::<_, Option<String>>("repository")?,
        "sender": row.try_get::<_, Option<String>>("sender")?,
        "workflow_run": row.try_get::<_, Option<Value>>("workflow_run")?,
        "check_run": row.try_get::<_, Option<Value>>("check_run")?,
        "raw_payload": row.try_get::<_, Option<Value>>("raw_payload")?,
    });
    if let Some(object) = record.as_object_mut() {
        object.retain(|_, value| !value.is_null());
    }
    Ok(record)
}

#[async_trait]
impl EventStore for PgEventStore {
    #[tracing::instrument(skip(self))]
    async fn init(&self) -> Result<(), StoreError> {
        let client = self.client().await?;
        let exists: bool = client.query_one(TABLE_EXISTS_SQL, &[]).await?.try_get(0)?;
        if exists {
            debug!("Database schema already exists, skipping creation");
        } else {
            client.batch_execute(CREATE_TABLE_SQL).await?;
            info!("Database schema created");
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    async fn append(&self, event: &Event) -> Result<EventId, StoreError> {
        let timestamp = event.received_at().unwrap_or_else(|| {
            warn!(timestamp = %event.timestamp, "Unparseable timestamp, storing current time");
            Utc::now()
        });
        let workflow_run = event.workflow_run.as_ref().map(serde_json::to_value).transpose()?;
        let check_run = event.check_run.as_ref().map(serde_json::to_value).transpose()?;

        let client = self.client().await?;
        let row = client
            .query_one(
                INSERT_EVENT_SQL,
                &[
                    &timestamp,
                    &event.event_type,
                    &event.action,
                    &event.repository,
                    &event.sender,
                    &workflow_run,
                    &check_run,
                    &event.raw_payload,
                ],
            )
            .await?;
        let id: i64 = row.try_get(0)?;
        debug!(id, "Event inserted into database");
        Ok(id)
    }

    async fn query_recent(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!("{SELECT_COLUMNS} ORDER BY timestamp DESC LIMIT $1");
        self.fetch(&sql, &[&limit], "query_recent").await
    }

    async fn query_workflow_events(
        &self,
        workflow_name: Option<&str>,
    ) -> Result<Vec<Event>, StoreError> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE workflow_run IS NOT NULL \
             AND ($1::text IS NULL OR workflow_run->>'name' = $1) \
             ORDER BY timestamp DESC"
        );
        self.fetch(&sql, &[&workflow_name], "query_workflow_events")
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn cleanup(&self, keep_count: usize) -> Result<u64, StoreError> {
        let client = self.client().await?;
        if keep_count == 0 {
            let deleted = client.execute("DELETE FROM github_events", &[]).await?;
            info!(deleted, "Deleted all events");
            return Ok(deleted);
        }

        let offset = i64::try_from(keep_count - 1).unwrap_or(i64::MAX);
        let cutoff: Option<DateTime<Utc>> = client
            .query_opt(CUTOFF_SQL, &[&offset])
            .await?
            .map(|row| row.try_get(0))
            .transpose()?;

        match cutoff {
            Some(cutoff) => {
                let deleted = client.execute(DELETE_OLDER_SQL, &[&cutoff]).await?;
                info!(deleted, keep_count, %cutoff, "Cleaned up old events");
                Ok(deleted)
            }
            None => {
                debug!(keep_count, "No old events to clean up");
                Ok(0)
            }
        }
    }

    fn recent_order(&self) -> RecentOrder {
        RecentOrder::TimestampDescending
    }
}
