use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{
    aborted, already_exists, deadline_exceeded, failed_precondition, internal_error,
    invalid_argument, not_found, permission_denied, resource_exhausted, unauthenticated,
    unavailable, unknown_error, DocstoreError,
};

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Maps an HTTP error response to a canonical error code, preferring the
/// status string embedded in the response body over the raw HTTP status.
pub fn map_http_error(status: StatusCode, body: &str) -> DocstoreError {
    let payload = extract_error_payload(body);
    let message = payload
        .as_ref()
        .and_then(|payload| payload.message.clone())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("HTTP error")
                .to_string()
        });

    if let Some(status_string) = payload.as_ref().and_then(|payload| payload.status.as_deref()) {
        return map_status_string(status_string, &message);
    }

    match status {
        StatusCode::BAD_REQUEST => invalid_argument(message),
        StatusCode::UNAUTHORIZED => unauthenticated(message),
        StatusCode::FORBIDDEN => permission_denied(message),
        StatusCode::NOT_FOUND => not_found(message),
        StatusCode::CONFLICT => aborted(message),
        StatusCode::TOO_MANY_REQUESTS => resource_exhausted(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => deadline_exceeded(message),
        StatusCode::PRECONDITION_FAILED => failed_precondition(message),
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => unavailable(message),
        StatusCode::INTERNAL_SERVER_ERROR => internal_error(message),
        status if status.is_client_error() => invalid_argument(message),
        status if status.is_server_error() => internal_error(message),
        _ => unknown_error(message),
    }
}

/// Maps a canonical status string (as carried in error bodies and in
/// streamed target-change causes) to an error.
pub fn map_status_string(status: &str, message: &str) -> DocstoreError {
    let message = message.to_string();
    match status {
        "INVALID_ARGUMENT" | "OUT_OF_RANGE" => invalid_argument(message),
        "FAILED_PRECONDITION" => failed_precondition(message),
        "UNAUTHENTICATED" => unauthenticated(message),
        "PERMISSION_DENIED" => permission_denied(message),
        "NOT_FOUND" => not_found(message),
        "ALREADY_EXISTS" => already_exists(message),
        "ABORTED" => aborted(message),
        "RESOURCE_EXHAUSTED" => resource_exhausted(message),
        "CANCELLED" => crate::error::cancelled(message),
        "DATA_LOSS" | "INTERNAL" => internal_error(message),
        "UNKNOWN" => unknown_error(message),
        "UNAVAILABLE" => unavailable(message),
        "DEADLINE_EXCEEDED" => deadline_exceeded(message),
        other => internal_error(format!("Unhandled backend error status: {other}")),
    }
}

fn extract_error_payload(body: &str) -> Option<RpcError> {
    serde_json::from_str::<RpcErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocstoreErrorCode;

    #[test]
    fn prefers_status_from_body() {
        let body = r#"{"error":{"message":"transaction expired","status":"ABORTED"}}"#;
        let err = map_http_error(StatusCode::CONFLICT, body);
        assert_eq!(err.code, DocstoreErrorCode::Aborted);
        assert!(err.message().contains("transaction expired"));
    }

    #[test]
    fn falls_back_to_http_status() {
        let err = map_http_error(StatusCode::SERVICE_UNAVAILABLE, "not json");
        assert_eq!(err.code, DocstoreErrorCode::Unavailable);
        assert!(err.is_retryable());
    }

    #[test]
    fn maps_unknown_status_strings_to_internal() {
        let err = map_status_string("SOMETHING_NEW", "?");
        assert_eq!(err.code, DocstoreErrorCode::Internal);
    }
}
