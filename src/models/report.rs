use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use color_eyre::Report as EyreReport;
use derive_more::Display;
use serde::Serialize;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    #[display(fmt = "INVALID_SIGNATURE")]
    InvalidSignature,
    #[display(fmt = "SIGNATURE_VERIFICATION_FAILED")]
    SignatureVerificationFailed,
    #[display(fmt = "INVALID_JSON")]
    InvalidJson,
    #[display(fmt = "NOT_FOUND")]
    NotFound,
    #[display(fmt = "INTERNAL_ERROR")]
    InternalError,
}

#[derive(Serialize, Debug)]
struct ErrorBody<'a> {
    error: &'a str,
    error_code: ErrorCode,
}

/// A client-facing failure with a stable error code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code, message)
    }

    pub fn bad_request(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: &self.message,
            error_code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Anything else that goes wrong in a handler: logged in full, answered with a
/// generic 500.
pub struct Report(EyreReport);

impl From<EyreReport> for Report {
    fn from(err: EyreReport) -> Self {
        Self(err)
    }
}

impl IntoResponse for Report {
    fn into_response(self) -> Response {
        error!("{:?}", self.0);
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InternalError,
            "Internal server error",
        )
        .into_response()
    }
}

pub type Result<T, E = Report> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;
    use test_case::test_case;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test_case(ErrorCode::InvalidSignature => "INVALID_SIGNATURE")]
    #[test_case(ErrorCode::SignatureVerificationFailed => "SIGNATURE_VERIFICATION_FAILED")]
    #[test_case(ErrorCode::InvalidJson => "INVALID_JSON")]
    #[test_case(ErrorCode::NotFound => "NOT_FOUND")]
    #[test_case(ErrorCode::InternalError => "INTERNAL_ERROR")]
    fn error_code_wire_name(code: ErrorCode) -> String {
        use pretty_assertions::assert_eq;
        let serialized = serde_json::to_value(code).unwrap();
        assert_eq!(serialized.as_str().unwrap(), code.to_string());
        code.to_string()
    }

    #[tokio::test]
    async fn api_error_body() {
        use pretty_assertions::assert_eq;
        let response =
            ApiError::unauthorized(ErrorCode::InvalidSignature, "Invalid signature").into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "Invalid signature", "error_code": "INVALID_SIGNATURE"})
        );
    }

    #[tokio::test]
    async fn report_hides_details() {
        use pretty_assertions::assert_eq;
        let response = Report::from(eyre!("database password is hunter2")).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error_code"], "INTERNAL_ERROR");
        assert!(!body.to_string().contains("hunter2"));
    }
}
