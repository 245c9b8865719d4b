use super::event::Event;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A GitHub Actions workflow run as delivered in `workflow_run` webhooks.
///
/// Only the fields the query tools need are typed; everything else GitHub
/// sends is kept in `extra`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowRun {
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    pub run_number: i64,
    pub html_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_sha: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CheckRun {
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Latest known state of one workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStatus {
    pub name: String,
    pub status: String,
    pub conclusion: Option<String>,
    pub run_number: i64,
    pub updated_at: String,
    pub html_url: String,
}

impl WorkflowStatus {
    fn from_run(run: &WorkflowRun, received_at: &str) -> Self {
        Self {
            name: run.name.clone(),
            status: run.status.clone(),
            conclusion: run.conclusion.clone(),
            run_number: run.run_number,
            updated_at: run
                .updated_at
                .clone()
                .unwrap_or_else(|| received_at.to_owned()),
            html_url: run.html_url.clone(),
        }
    }
}

/// Collapses workflow events into one status per workflow name, keeping the
/// run with the greatest `updated_at`.
///
/// `updated_at` values are compared as strings, which matches chronological
/// order for ISO-8601 timestamps sharing a precision and zone convention. On a
/// tie the first event seen wins. The result is ordered by workflow name.
pub fn latest_workflow_statuses<'a>(
    events: impl IntoIterator<Item = &'a Event>,
    workflow_name: Option<&str>,
) -> Vec<WorkflowStatus> {
    let mut latest: BTreeMap<String, WorkflowStatus> = BTreeMap::new();

    let runs = events.into_iter().filter_map(|event| {
        event
            .workflow_run
            .as_ref()
            .map(|run| (run, event.timestamp.as_str()))
    });

    for (run, received_at) in runs {
        if workflow_name.is_some_and(|name| name != run.name) {
            continue;
        }
        let candidate = WorkflowStatus::from_run(run, received_at);
        match latest.get(&candidate.name) {
            Some(current) if candidate.updated_at <= current.updated_at => {}
            _ => {
                latest.insert(candidate.name.clone(), candidate);
            }
        }
    }

    latest.into_values().collect()
}
