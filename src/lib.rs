pub mod config;
pub mod store;

pub mod handlers {
    mod post_webhook;
    pub use post_webhook::webhook_handler;
    mod ping;
    pub use ping::ping_handler;
    mod tools;
    pub use tools::{call_tool_handler, list_tools_handler};
}

pub mod models {
    pub mod error;
    pub use error::{GitError, SignatureError, StoreError, ValidationError};

    pub mod event;
    pub use event::Event;

    pub mod message;
    pub use message::SlackMessage;

    pub mod report;

    pub mod workflow;
    pub use workflow::{WorkflowRun, WorkflowStatus};
}

pub mod services {
    pub mod git;
    pub mod post_webhook;
    pub mod signature;
    pub mod slack;
    pub mod tools;
}

use axum::http::StatusCode;
use axum::routing::{get, post, Router};
use color_eyre::eyre::Result;
use ghwatch_cfg::Config;
use handlers::{call_tool_handler, list_tools_handler, ping_handler, webhook_handler};
use models::report::{ApiError, ErrorCode};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace, Resource};
use secrecy::SecretString;
use std::sync::Arc;
use store::EventStore;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_error::ErrorLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};
use tracing_tree::HierarchicalLayer;

/// Resolves on Ctrl-C, or on SIGTERM where there is one.
#[tracing::instrument]
#[allow(clippy::expect_used)]
pub async fn shutdown_signal() {
    #[cfg(unix)]
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("SIGTERM handler must install");

    #[cfg(unix)]
    let reason = tokio::select! {
        result = signal::ctrl_c() => result.map(|()| "ctrl-c"),
        _ = sigterm.recv() => Ok("sigterm"),
    };
    #[cfg(not(unix))]
    let reason = signal::ctrl_c().await.map(|()| "ctrl-c");

    match reason {
        Ok(reason) => info!(reason, "Shutdown requested, draining connections"),
        Err(err) => warn!(%err, "Could not listen for Ctrl-C, shutting down"),
    }
}

#[tracing::instrument]
async fn fallback(uri: axum::http::Uri) -> ApiError {
    warn!(%uri, "No route for request");
    ApiError::new(StatusCode::NOT_FOUND, ErrorCode::NotFound, format!("No route {uri}"))
}

/// Everything a request handler needs, built once at startup.
#[derive(Clone, Debug)]
pub struct State {
    /// `None` disables signature verification.
    pub webhook_secret: Option<SecretString>,
    pub slack_webhook_url: Option<SecretString>,
    pub store: Arc<dyn EventStore>,
    pub reqwest_client: reqwest::Client,
}

#[allow(clippy::missing_errors_doc)]
pub fn setup_tracing(settings: &Config) -> Result<()> {
    let default_filter = if settings.debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .map_or_else(|_| EnvFilter::new(default_filter), |env_filter| env_filter);

    // OpenTelemetry export only when a collector is configured
    let telemetry_layer = match &settings.otlp_endpoint {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(
                    trace::config().with_resource(Resource::new(vec![KeyValue::new(
                        "service.name",
                        "ghwatch",
                    )])),
                )
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    Registry::default()
        .with(env_filter)
        .with(
            HierarchicalLayer::new(2)
                .with_targets(true)
                .with_bracketed_fields(true),
        )
        .with(ErrorLayer::default())
        .with(telemetry_layer)
        .try_init()?;

    info!(
        otlp = settings.otlp_endpoint.is_some(),
        "Initialized tracing and logging systems"
    );

    Ok(())
}

/// Builds the store and the shared [`State`], initializing the store.
#[tracing::instrument(skip(app))]
pub async fn setup_state(app: &config::Application) -> Result<State> {
    let store = store::from_config(&app.base)?;
    store.init().await?;

    if app.webhook_secret.is_none() {
        warn!("Webhook signature verification is disabled, set webhook_secret_file to enable it");
    }

    let reqwest_client = reqwest::Client::new();
    info!("Created reqwest client");

    Ok(State {
        webhook_secret: app.webhook_secret.clone(),
        slack_webhook_url: app.slack_webhook_url.clone(),
        store,
        reqwest_client,
    })
}

pub fn router(state: State) -> Router {
    Router::new()
        .fallback(fallback)
        .route("/webhook/github", post(webhook_handler))
        .route("/ping", get(ping_handler))
        .route("/tools", get(list_tools_handler))
        .route("/tools/call", post(call_tool_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[allow(clippy::missing_errors_doc)]
pub async fn setup_app(app: &config::Application) -> Result<Router> {
    Ok(router(setup_state(app).await?))
}
