use crate::models::event::{Event, UNKNOWN_EVENT_TYPE};
use crate::models::report::{ApiError, ErrorCode};
use crate::services::signature::verify_signature;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde_json::Value;
use tracing::{debug, error, info, warn};

pub const EVENT_HEADER: &str = "X-GitHub-Event";

/// Authenticates and parses one GitHub delivery into the event to store.
///
/// Without a `secret` the signature is not checked at all. The signature is
/// always checked against the raw `body` before anything is parsed.
///
/// # Errors
///
/// 401 [`ErrorCode::SignatureVerificationFailed`] for a missing or malformed
/// header, 401 [`ErrorCode::InvalidSignature`] for a digest mismatch, and 400
/// [`ErrorCode::InvalidJson`] when the body is not a JSON object.
#[tracing::instrument(skip(body, secret), fields(body_length = body.len()))]
pub fn post_webhook(
    event_type: Option<&str>,
    signature_header: Option<&str>,
    body: &[u8],
    received_at: DateTime<Utc>,
    secret: Option<&SecretString>,
) -> Result<Event, ApiError> {
    let event_type = event_type.unwrap_or(UNKNOWN_EVENT_TYPE);

    if let Some(secret) = secret {
        match verify_signature(body, signature_header, secret) {
            Ok(true) => debug!(event_type, "Webhook signature verified"),
            Ok(false) => {
                warn!(event_type, "Invalid webhook signature");
                return Err(ApiError::unauthorized(
                    ErrorCode::InvalidSignature,
                    "Invalid webhook signature",
                ));
            }
            Err(err) => {
                error!(event_type, %err, "Signature verification failed");
                return Err(ApiError::unauthorized(
                    ErrorCode::SignatureVerificationFailed,
                    format!("Signature verification failed: {err}"),
                ));
            }
        }
    }

    let payload = match serde_json::from_slice::<Value>(body) {
        Ok(payload @ Value::Object(_)) => payload,
        _ => {
            error!(event_type, "Invalid JSON payload");
            return Err(ApiError::bad_request(
                ErrorCode::InvalidJson,
                "Invalid JSON payload",
            ));
        }
    };

    let event = Event::from_webhook(event_type, &payload, received_at);
    info!(
        event_type,
        action = event.action.as_deref(),
        repository = event.repository.as_deref(),
        sender = event.sender.as_deref(),
        "Processing webhook event"
    );
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::signature::sign;
    use axum::http::StatusCode;
    use chrono::TimeZone;
    use std::str::FromStr;
    use test_case::test_case;

    const BODY: &[u8] = br#"{
        "action": "completed",
        "repository": {"full_name": "octo/repo"},
        "sender": {"login": "octocat"},
        "workflow_run": {
            "name": "CI",
            "status": "completed",
            "conclusion": "success",
            "run_number": 42,
            "html_url": "https://github.com/octo/repo/actions/runs/42",
            "updated_at": "2024-01-15T10:00:00Z"
        }
    }"#;

    fn secret() -> SecretString {
        SecretString::from_str("123").unwrap()
    }

    fn received_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 5).unwrap()
    }

    #[test]
    fn signed_delivery_is_parsed() {
        use pretty_assertions::assert_eq;
        let header = sign(BODY, &secret()).unwrap();

        let event = post_webhook(
            Some("workflow_run"),
            Some(&header),
            BODY,
            received_at(),
            Some(&secret()),
        )
        .unwrap();

        assert_eq!(event.event_type, "workflow_run");
        assert_eq!(event.action.as_deref(), Some("completed"));
        assert_eq!(event.repository.as_deref(), Some("octo/repo"));
        assert_eq!(event.sender.as_deref(), Some("octocat"));
        assert_eq!(event.workflow_name(), Some("CI"));
        assert_eq!(event.received_at(), Some(received_at()));
        assert!(event.raw_payload.is_some());
    }

    #[test]
    fn open_mode_skips_signature() {
        use pretty_assertions::assert_eq;
        let event = post_webhook(None, None, BODY, received_at(), None).unwrap();

        assert_eq!(event.event_type, UNKNOWN_EVENT_TYPE);
    }

    #[test_case(None => (StatusCode::UNAUTHORIZED, ErrorCode::SignatureVerificationFailed); "when header missing")]
    #[test_case(Some("sha1=abc") => (StatusCode::UNAUTHORIZED, ErrorCode::SignatureVerificationFailed); "when header malformed")]
    #[test_case(Some("sha256=0000") => (StatusCode::UNAUTHORIZED, ErrorCode::InvalidSignature); "when digest wrong")]
    fn rejected_signatures(header: Option<&str>) -> (StatusCode, ErrorCode) {
        let err = post_webhook(Some("push"), header, BODY, received_at(), Some(&secret())).unwrap_err();
        (err.status, err.code)
    }

    #[test_case(b"not json" ; "when not json")]
    #[test_case(b"[1, 2, 3]" ; "when array")]
    #[test_case(b"\"completed\"" ; "when string")]
    fn rejected_bodies(body: &[u8]) {
        use pretty_assertions::assert_eq;
        let header = sign(body, &secret()).unwrap();

        let err = post_webhook(Some("push"), Some(&header), body, received_at(), Some(&secret()))
            .unwrap_err();

        assert_eq!((err.status, err.code), (StatusCode::BAD_REQUEST, ErrorCode::InvalidJson));
    }

    #[test]
    fn signature_is_checked_before_json() {
        use pretty_assertions::assert_eq;
        let err = post_webhook(Some("push"), Some("sha256=00"), b"not json", received_at(), Some(&secret()))
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::InvalidSignature);
    }

    #[test]
    fn malformed_workflow_run_is_dropped() {
        use pretty_assertions::assert_eq;
        let body = br#"{"action": "requested", "workflow_run": {"name": "CI"}}"#;

        let event = post_webhook(Some("workflow_run"), None, body, received_at(), None).unwrap();

        assert_eq!(event.workflow_run, None);
        assert_eq!(event.action.as_deref(), Some("requested"));
    }
}
