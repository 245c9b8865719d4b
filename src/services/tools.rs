//! Read-side tools for an external agent runtime.
//!
//! Each tool takes JSON arguments and produces text. Tool failures are part of
//! the output (`is_error`), never transport errors.

use crate::models::error::StoreError;
use crate::models::workflow::latest_workflow_statuses;
use crate::services::git::{self, DEFAULT_BASE_BRANCH, DEFAULT_MAX_DIFF_LINES};
use crate::services::slack;
use crate::store::EventStore;
use crate::State;
use camino::Utf8PathBuf;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tap::Tap;
use tracing::{debug, info, warn};

pub const NO_EVENTS_MESSAGE: &str = "No GitHub Actions events received yet";
pub const DEFAULT_RECENT_LIMIT: usize = 10;

#[derive(Serialize, Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub static TOOLS: Lazy<Vec<ToolSpec>> = Lazy::new(|| {
    vec![
        ToolSpec {
            name: "get_recent_actions_events",
            description: "Get recent GitHub Actions events received via webhook.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "integer",
                        "minimum": 0,
                        "default": DEFAULT_RECENT_LIMIT,
                        "description": "Maximum number of events to return"
                    }
                }
            }),
        },
        ToolSpec {
            name: "get_workflow_status",
            description: "Get the current status of GitHub Actions workflows.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "workflow_name": {
                        "type": "string",
                        "description": "Only report this workflow"
                    }
                }
            }),
        },
        ToolSpec {
            name: "analyze_file_changes",
            description: "Get the full diff and list of changed files in the current git repository.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "base_branch": {
                        "type": "string",
                        "default": DEFAULT_BASE_BRANCH,
                        "description": "Base branch to compare against"
                    },
                    "include_diff": {
                        "type": "boolean",
                        "default": true,
                        "description": "Include the full diff content"
                    },
                    "max_diff_lines": {
                        "type": "integer",
                        "minimum": 0,
                        "default": DEFAULT_MAX_DIFF_LINES,
                        "description": "Maximum number of diff lines to include"
                    },
                    "working_directory": {
                        "type": "string",
                        "description": "Directory to run git commands in (default: server's current directory)"
                    }
                }
            }),
        },
        ToolSpec {
            name: "send_slack_notification",
            description: "Send a formatted notification to the team Slack channel (supports Slack markdown).",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "The message to send"
                    }
                },
                "required": ["message"]
            }),
        },
    ]
});

/// A tool invocation as sent over the wire.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct RecentEventsArgs {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_RECENT_LIMIT
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct WorkflowStatusArgs {
    #[serde(default)]
    workflow_name: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct FileChangesArgs {
    #[serde(default = "default_base_branch")]
    base_branch: String,
    #[serde(default = "default_include_diff")]
    include_diff: bool,
    #[serde(default = "default_max_diff_lines")]
    max_diff_lines: usize,
    #[serde(default)]
    working_directory: Option<Utf8PathBuf>,
}

fn default_base_branch() -> String {
    DEFAULT_BASE_BRANCH.to_owned()
}

fn default_include_diff() -> bool {
    true
}

fn default_max_diff_lines() -> usize {
    DEFAULT_MAX_DIFF_LINES
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct SlackArgs {
    message: String,
}

/// Most recent events as a pretty JSON array, in the store's
/// [`crate::store::RecentOrder`].
///
/// # Errors
///
/// Whatever the store fails with.
#[tracing::instrument(skip(store))]
pub async fn get_recent_actions_events(
    store: &dyn EventStore,
    limit: usize,
) -> Result<String, StoreError> {
    let events = store.query_recent(limit).await?;
    debug!(count = events.len(), "Fetched recent events");
    Ok(serde_json::to_string_pretty(&events)?)
}

/// Latest run per workflow as a pretty JSON array, or a message object when the
/// store holds no events at all.
///
/// # Errors
///
/// Whatever the store fails with.
#[tracing::instrument(skip(store))]
pub async fn get_workflow_status(
    store: &dyn EventStore,
    workflow_name: Option<&str>,
) -> Result<String, StoreError> {
    let events = store.query_workflow_events(workflow_name).await?;
    if events.is_empty() && store.query_recent(1).await?.is_empty() {
        return Ok(serde_json::to_string_pretty(&json!({ "message": NO_EVENTS_MESSAGE }))?);
    }
    let statuses = latest_workflow_statuses(&events, workflow_name)
        .tap(|statuses| debug!(workflows = statuses.len(), "Aggregated workflow status"));
    Ok(serde_json::to_string_pretty(&statuses)?)
}

/// Runs the tool named in `request`.
#[tracing::instrument(skip(state), fields(tool = %request.name))]
pub async fn call(state: &State, request: ToolRequest) -> ToolOutput {
    let output = match request.name.as_str() {
        "get_recent_actions_events" => match arguments::<RecentEventsArgs>(request.arguments) {
            Ok(args) => from_store(get_recent_actions_events(state.store.as_ref(), args.limit).await),
            Err(output) => output,
        },
        "get_workflow_status" => match arguments::<WorkflowStatusArgs>(request.arguments) {
            Ok(args) => from_store(
                get_workflow_status(state.store.as_ref(), args.workflow_name.as_deref()).await,
            ),
            Err(output) => output,
        },
        "analyze_file_changes" => match arguments::<FileChangesArgs>(request.arguments) {
            Ok(args) => match git::analyze_file_changes(
                &args.base_branch,
                args.include_diff,
                args.max_diff_lines,
                args.working_directory.as_deref(),
            )
            .await
            {
                Ok(changes) => match serde_json::to_string_pretty(&changes) {
                    Ok(content) => ToolOutput::ok(content),
                    Err(err) => ToolOutput::error(err.to_string()),
                },
                Err(err) => ToolOutput::error(err.to_string()),
            },
            Err(output) => output,
        },
        "send_slack_notification" => match arguments::<SlackArgs>(request.arguments) {
            Ok(args) => match slack::post(
                &state.reqwest_client,
                state.slack_webhook_url.as_ref(),
                &args.message,
            )
            .await
            {
                Ok(outcome) => ToolOutput::ok(outcome),
                Err(err) => ToolOutput::error(err.to_string()),
            },
            Err(output) => output,
        },
        unknown => ToolOutput::error(format!("Unknown tool: {unknown}")),
    };
    info!(is_error = output.is_error, "Tool call finished");
    output
}

fn arguments<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolOutput> {
    let arguments = match arguments {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    };
    serde_json::from_value(arguments)
        .map_err(|err| ToolOutput::error(format!("Invalid arguments: {err}")))
}

fn from_store(result: Result<String, StoreError>) -> ToolOutput {
    match result {
        Ok(content) => ToolOutput::ok(content),
        Err(err) => {
            warn!(%err, "Tool could not read events");
            ToolOutput::error(format!("Error reading events: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{Event, TimestampPolicy};
    use crate::store::FileEventStore;
    use camino::Utf8PathBuf;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use test_case::test_case;

    fn state(dir: &tempfile::TempDir) -> State {
        let path = Utf8PathBuf::from_path_buf(dir.path().join("events.json")).unwrap();
        State {
            webhook_secret: None,
            slack_webhook_url: None,
            store: Arc::new(FileEventStore::with_defaults(path)),
            reqwest_client: reqwest::Client::new(),
        }
    }

    fn workflow_event(name: &str, run_number: i64, updated_at: &str, conclusion: &str) -> Event {
        Event::from_value(
            json!({
                "timestamp": updated_at,
                "event_type": "workflow_run",
                "workflow_run": {
                    "name": name,
                    "status": "completed",
                    "conclusion": conclusion,
                    "run_number": run_number,
                    "html_url": format!("https://github.com/octo/repo/actions/runs/{run_number}"),
                    "updated_at": updated_at,
                }
            }),
            TimestampPolicy::Preserve,
        )
        .unwrap()
    }

    async fn call_json(state: &State, request: Value) -> (Value, bool) {
        let output = call(state, serde_json::from_value(request).unwrap()).await;
        let content = serde_json::from_str(&output.content).unwrap_or(Value::String(output.content));
        (content, output.is_error)
    }

    #[test]
    fn catalog_lists_every_tool() {
        let names: Vec<_> = TOOLS.iter().map(|tool| tool.name).collect();

        assert_eq!(
            names,
            [
                "get_recent_actions_events",
                "get_workflow_status",
                "analyze_file_changes",
                "send_slack_notification"
            ]
        );
    }

    #[tokio::test]
    async fn recent_events_default_limit() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        for run in 0..15 {
            let at = format!("2024-01-15T10:{run:02}:00Z");
            state.store.append(&workflow_event("CI", run, &at, "success")).await.unwrap();
        }

        let (content, is_error) = call_json(&state, json!({"name": "get_recent_actions_events"})).await;

        assert!(!is_error);
        let events = content.as_array().unwrap();
        assert_eq!(events.len(), DEFAULT_RECENT_LIMIT);
        assert_eq!(events[0]["workflow_run"]["run_number"], 5);
    }

    #[tokio::test]
    async fn recent_events_on_empty_store() {
        let dir = tempfile::tempdir().unwrap();

        let (content, is_error) = call_json(
            &state(&dir),
            json!({"name": "get_recent_actions_events", "arguments": {"limit": 3}}),
        )
        .await;

        assert!(!is_error);
        assert_eq!(content, json!([]));
    }

    #[tokio::test]
    async fn workflow_status_without_events() {
        let dir = tempfile::tempdir().unwrap();

        let (content, is_error) = call_json(&state(&dir), json!({"name": "get_workflow_status"})).await;

        assert!(!is_error);
        assert_eq!(content, json!({"message": NO_EVENTS_MESSAGE}));
    }

    #[tokio::test]
    async fn workflow_status_with_only_other_events_is_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let push = Event::from_value(
            json!({"timestamp": "2024-01-15T10:00:00Z", "event_type": "push"}),
            TimestampPolicy::Preserve,
        )
        .unwrap();
        state.store.append(&push).await.unwrap();

        let all = get_workflow_status(state.store.as_ref(), None).await.unwrap();

        assert_eq!(serde_json::from_str::<Value>(&all).unwrap(), json!([]));
    }

    #[tokio::test]
    async fn workflow_status_for_unknown_workflow_is_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        state
            .store
            .append(&workflow_event("CI", 1, "2024-01-15T10:00:00Z", "success"))
            .await
            .unwrap();

        let (content, is_error) = call_json(
            &state,
            json!({"name": "get_workflow_status", "arguments": {"workflow_name": "Deploy"}}),
        )
        .await;

        assert!(!is_error);
        assert_eq!(content, json!([]));
    }

    #[tokio::test]
    async fn workflow_status_reports_latest_run() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let store = state.store.as_ref();
        store.append(&workflow_event("CI", 1, "2024-01-15T10:00:00Z", "failure")).await.unwrap();
        store.append(&workflow_event("Deploy", 7, "2024-01-15T10:01:00Z", "success")).await.unwrap();
        store.append(&workflow_event("CI", 2, "2024-01-15T10:05:00Z", "success")).await.unwrap();

        let (content, _) = call_json(
            &state,
            json!({"name": "get_workflow_status", "arguments": {"workflow_name": "CI"}}),
        )
        .await;

        assert_eq!(
            content,
            json!([{
                "name": "CI",
                "status": "completed",
                "conclusion": "success",
                "run_number": 2,
                "updated_at": "2024-01-15T10:05:00Z",
                "html_url": "https://github.com/octo/repo/actions/runs/2",
            }])
        );
    }

    #[tokio::test]
    async fn slack_without_url_is_a_tool_error() {
        let dir = tempfile::tempdir().unwrap();

        let (content, is_error) = call_json(
            &state(&dir),
            json!({"name": "send_slack_notification", "arguments": {"message": "hi"}}),
        )
        .await;

        assert!(is_error);
        assert_eq!(content, json!("Error: Slack webhook URL is not configured"));
    }

    #[tokio::test]
    async fn file_changes_of_a_feature_branch() {
        let dir = tempfile::tempdir().unwrap();
        let (_repo_dir, repo) = crate::services::git::tests::feature_branch_repo();

        let (content, is_error) = call_json(
            &state(&dir),
            json!({
                "name": "analyze_file_changes",
                "arguments": {"working_directory": repo, "max_diff_lines": 3}
            }),
        )
        .await;

        assert!(!is_error);
        assert_eq!(content["base_branch"], "main");
        assert_eq!(content["files_changed"], "A\tnotes.txt\n");
        assert_eq!(content["truncated"], true);
    }

    #[tokio::test]
    async fn file_changes_outside_a_repository_is_a_tool_error() {
        let dir = tempfile::tempdir().unwrap();

        let (content, is_error) = call_json(
            &state(&dir),
            json!({
                "name": "analyze_file_changes",
                "arguments": {"working_directory": dir.path().to_str().unwrap()}
            }),
        )
        .await;

        assert!(is_error);
        assert!(content.as_str().unwrap().starts_with("Git error: "));
    }

    #[test_case(json!({"name": "delete_everything"}) ; "unknown tool")]
    #[test_case(json!({"name": "send_slack_notification", "arguments": {}}) ; "missing required argument")]
    #[test_case(json!({"name": "get_recent_actions_events", "arguments": {"limit": -1}}) ; "negative limit")]
    #[test_case(json!({"name": "get_workflow_status", "arguments": {"workflow": "CI"}}) ; "unknown argument")]
    #[test_case(json!({"name": "analyze_file_changes", "arguments": {"include_diff": "yes"}}) ; "mistyped flag")]
    #[tokio::test]
    async fn bad_requests_are_tool_errors(request: Value) {
        let dir = tempfile::tempdir().unwrap();

        let (_, is_error) = call_json(&state(&dir), request).await;

        assert!(is_error);
    }
}
