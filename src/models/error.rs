use camino::Utf8PathBuf;
use hmac::digest::InvalidLength;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("GitHub webhook secret is not configured")]
    EmptySecret,
    #[error("missing X-Hub-Signature-256 header")]
    MissingHeader,
    #[error("invalid signature format (expected: {expected}, got: {got})")]
    InvalidFormat { expected: String, got: String },
    #[error("error passing in secret")]
    InvalidLength {
        #[from]
        source: InvalidLength,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("event is not a JSON object")]
    NotAnObject,
    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },
    #[error("field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("could not acquire lock on {path} within {timeout:?}")]
    LockTimeout { path: Utf8PathBuf, timeout: Duration },
    #[error("error accessing the events file: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
    #[error("error (de)serializing events: {source}")]
    SerdeJson {
        #[from]
        source: serde_json::Error,
    },
    #[error("database error: {source}")]
    Postgres {
        #[from]
        source: tokio_postgres::Error,
    },
    #[error("connection pool error: {source}")]
    Pool {
        #[from]
        source: deadpool_postgres::PoolError,
    },
    #[error("failed to create connection pool: {0}")]
    PoolBuild(String),
    #[error("invalid event: {source}")]
    Validation {
        #[from]
        source: ValidationError,
    },
    #[error("blocking store task failed: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
    #[error("store misconfigured: {0}")]
    Config(String),
}

#[derive(Error, Debug)]
pub enum SlackError {
    #[error("Error: Slack webhook URL is not configured")]
    NotConfigured,
    #[error("❌ Failed to send message. Status: {status}, Response: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("❌ Request timed out. Check your internet connection and try again.")]
    Timeout,
    #[error("❌ Connection error. Check your internet connection and webhook URL.")]
    Connection,
    #[error("❌ Error sending message: {source}")]
    Reqwest {
        #[from]
        source: reqwest::Error,
    },
}

#[derive(Error, Debug)]
pub enum GitError {
    #[error("Git error: {stderr}")]
    Command { stderr: String },
    #[error("could not run git: {source}")]
    Spawn {
        #[from]
        source: io::Error,
    },
}
