#![allow(clippy::expect_used)]
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, str::FromStr};

/// Which event store the service writes to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Single JSON document guarded by an advisory file lock.
    #[default]
    File,
    /// PostgreSQL table behind a connection pool.
    Postgres,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub debug: bool,
    pub address: SocketAddr,
    pub backend: Backend,
    pub events_file: Utf8PathBuf,
    pub max_events: usize,
    pub lock_timeout_ms: u64,
    pub keep_count: usize,
    pub webhook_secret_file: Option<Utf8PathBuf>,
    pub slack_webhook_url_file: Option<Utf8PathBuf>,
    pub database_url: Option<String>,
    pub db_pool_size: usize,
    pub db_wait_timeout_secs: u64,
    pub otlp_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            address: SocketAddr::from_str("127.0.0.1:8080")
                .expect("Default value for config should never panic!"),
            backend: Backend::File,
            events_file: "data/github_events.json".into(),
            max_events: 100,
            lock_timeout_ms: 5_000,
            keep_count: 1_000,
            webhook_secret_file: None,
            slack_webhook_url_file: None,
            database_url: None,
            db_pool_size: 10,
            db_wait_timeout_secs: 30,
            otlp_endpoint: None,
        }
    }
}
