use serde::{Deserialize, Serialize};

/// Body of a Slack incoming-webhook post.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SlackMessage {
    pub text: String,
    pub mrkdwn: bool,
}

impl SlackMessage {
    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mrkdwn: true,
        }
    }
}
