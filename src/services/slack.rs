use crate::models::{error::SlackError, message::SlackMessage};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SLACK_TIMEOUT: Duration = Duration::from_secs(10);
pub const SENT_MESSAGE: &str = "✅ Message sent successfully to Slack";

/// Posts `text` to the Slack incoming webhook at `webhook_url`.
///
/// Returns the outcome line shown to the caller. Every failure is an
/// [`SlackError`] whose display text is meant for the same audience.
///
/// # Errors
///
/// [`SlackError::NotConfigured`] without a URL, otherwise whatever went wrong
/// talking to Slack.
#[tracing::instrument(skip(client, webhook_url, text), fields(text_length = text.len()))]
pub async fn post(
    client: &reqwest::Client,
    webhook_url: Option<&SecretString>,
    text: &str,
) -> Result<&'static str, SlackError> {
    let webhook_url = webhook_url.ok_or(SlackError::NotConfigured)?;
    let message = SlackMessage::markdown(text);

    debug!("Sending message");
    let response = client
        .post(webhook_url.expose_secret())
        .timeout(SLACK_TIMEOUT)
        .json(&message)
        .send()
        .await
        .map_err(classify)?;

    let status = response.status();
    if status == StatusCode::OK {
        info!("Sent message");
        Ok(SENT_MESSAGE)
    } else {
        let body = response.text().await.unwrap_or_default();
        warn!(%status, body, "Slack rejected message");
        Err(SlackError::Rejected { status, body })
    }
}

fn classify(err: reqwest::Error) -> SlackError {
    warn!(%err, "Failed to reach Slack");
    if err.is_timeout() {
        SlackError::Timeout
    } else if err.is_connect() {
        SlackError::Connection
    } else {
        SlackError::from(err)
    }
}
