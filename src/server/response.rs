//! JSON error responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::admission::CapacityError;
use crate::error::ProcessingError;

/// Seconds a rate-limited client is told to wait.
const RETRY_AFTER_SECS: &str = "60";

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    code: &'static str,
}

/// A [`ProcessingError`] rendered as `{"success": false, "error", "code"}`.
#[derive(Debug)]
pub struct ApiError(pub ProcessingError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ProcessingError::BadRequest(_)
            | ProcessingError::Validation(_)
            | ProcessingError::Download(_) => StatusCode::BAD_REQUEST,
            ProcessingError::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProcessingError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProcessingError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ProcessingError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProcessingError::Source(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ProcessingError::Ocr(_) => StatusCode::BAD_GATEWAY,
            ProcessingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ProcessingError> for ApiError {
    fn from(err: ProcessingError) -> Self {
        ApiError(err)
    }
}

impl From<CapacityError> for ApiError {
    fn from(err: CapacityError) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ProcessingError::Internal(detail) = &self.0 {
            tracing::error!("Internal error: {}", detail);
        }

        let status = self.status();
        let body = ErrorBody {
            success: false,
            error: self.0.public_message(),
            code: self.0.code(),
        };

        let mut response = (status, Json(body)).into_response();
        if matches!(self.0, ProcessingError::RateLimited) {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(RETRY_AFTER_SECS),
            );
        }
        response
    }
}

/// Parse a request body holding exactly one JSON value.
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProcessingError> {
    let mut de = serde_json::Deserializer::from_slice(body);
    let value = T::deserialize(&mut de).map_err(|e| ProcessingError::BadRequest(e.to_string()))?;
    de.end()
        .map_err(|_| ProcessingError::BadRequest("unexpected trailing data".to_string()))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Probe {
        name: String,
    }

    #[test]
    fn test_parse_json_single_value() {
        let probe: Probe = parse_json(br#" {"name": "a"} "#).unwrap();
        assert_eq!(probe.name, "a");
    }

    #[test]
    fn test_parse_json_rejects_trailing_data() {
        let err = parse_json::<Probe>(br#"{"name": "a"} {"name": "b"}"#).unwrap_err();
        assert_eq!(err.to_string(), "unexpected trailing data");
        assert_eq!(err.code(), "bad_request");
    }

    #[test]
    fn test_parse_json_rejects_unknown_fields() {
        assert!(parse_json::<Probe>(br#"{"name": "a", "extra": 1}"#).is_err());
        assert!(parse_json::<Probe>(b"").is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(CapacityError::Ocr).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(ProcessingError::validation("x")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(ProcessingError::Unauthorized).status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError(ProcessingError::RateLimited).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");
    }
}
