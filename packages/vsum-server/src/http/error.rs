use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use vsum_core::CoreError;

/// The one JSON shape every error response takes. `detail`/`errors` are
/// left out of the body when empty rather than serialized as `null`.
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    request_id: String,
    detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>, request_id: &str) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            request_id: request_id.to_string(),
            detail: None,
        }
    }

    pub fn from_core(err: CoreError, request_id: &str) -> Self {
        let (status, code) = classify(&err);
        Self::new(status, code, err.to_string(), request_id)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Maps the core error taxonomy onto the minimal HTTP codes the surface
/// promises. Anything not explicitly called out here is an internal
/// error: the core never leaks an error variant the envelope can't name.
fn classify(err: &CoreError) -> (StatusCode, &'static str) {
    match err {
        CoreError::InvalidSource(_) | CoreError::InvalidInput(_) | CoreError::DagCycle(_) => {
            (StatusCode::BAD_REQUEST, "BAD_REQUEST")
        }
        CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        CoreError::UnsupportedType(_) => {
            (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_MEDIA_TYPE")
        }
        CoreError::TooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
        CoreError::TimedOut(_) => (StatusCode::REQUEST_TIMEOUT, "REQUEST_TIMEOUT"),
        CoreError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "TOO_MANY_REQUESTS"),
        CoreError::PipelineExecutionError { .. }
        | CoreError::PipelineStageUnavailable(_)
        | CoreError::BundleFinalizeFailed(_)
        | CoreError::SummaryInvalid(_)
        | CoreError::SummaryJsonInvalid(_)
        | CoreError::ProfileVersionMismatch { .. }
        | CoreError::SummaryTextMismatch
        | CoreError::CacheInvalid(_)
        | CoreError::GcError(_)
        | CoreError::Database(_)
        | CoreError::Io(_)
        | CoreError::Serialization(_)
        | CoreError::Other(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "message": self.message,
            "code": self.code,
            "status": self.status.as_u16(),
            "request_id": self.request_id,
            "detail": self.detail,
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let (status, code) = classify(&CoreError::NotFound("x".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, "NOT_FOUND");
    }

    #[test]
    fn rate_limited_maps_to_429() {
        let (status, _) = classify(&CoreError::RateLimited);
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn unsupported_type_maps_to_415() {
        let (status, _) = classify(&CoreError::UnsupportedType("x".to_string()));
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
