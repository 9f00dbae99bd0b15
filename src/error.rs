//! Error types for the CRM client

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub(crate) const NETWORK_FALLBACK: &str = "Network error. Please check your connection.";
pub(crate) const TIMEOUT_FALLBACK: &str = "Request timed out. Please try again.";
pub(crate) const GENERIC_FALLBACK: &str = "An unexpected error occurred";

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server answered with a non-success status.
    #[error("{0}")]
    Api(ApiError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    /// Terminal authentication failure. Credentials have already been cleared.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// The refresh this request was waiting on was abandoned. Credentials are untouched.
    #[error("Token refresh was interrupted")]
    RefreshInterrupted,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// HTTP status carried by the error, 0 when no response was received.
    pub fn status_code(&self) -> u16 {
        match self {
            ClientError::Api(api) => api.status_code,
            ClientError::SessionExpired(_) => 401,
            _ => 0,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status_code() == 401
    }

    /// Normalize any failure into the uniform [`ApiError`] shape pages display.
    pub fn to_api_error(&self, path: Option<&str>) -> ApiError {
        match self {
            ClientError::Api(api) => api.clone(),
            ClientError::Network(_) => ApiError::fallback(NETWORK_FALLBACK, 0, path),
            ClientError::Timeout => ApiError::fallback(TIMEOUT_FALLBACK, 0, path),
            ClientError::SessionExpired(reason) => ApiError::fallback(reason, 401, path),
            other => ApiError::fallback(&other.to_string(), 0, path),
        }
    }
}

/// Uniform error payload produced for every failed call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub status_code: u16,
}

/// Subset of the response envelope that failed responses carry
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    message: Option<String>,
    errors: Option<Vec<String>>,
    error_code: Option<String>,
    timestamp: Option<String>,
    path: Option<String>,
}

impl ApiError {
    /// Build the normalized error for a failed HTTP response.
    ///
    /// Message precedence: server `message`, then the `errors` list joined,
    /// then a generic fallback. Bodies that are not JSON are tolerated.
    pub fn from_response(status_code: u16, body: &str, request_path: &str) -> Self {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();

        let errors = parsed.errors.filter(|errors| !errors.is_empty());
        let message = parsed
            .message
            .filter(|m| !m.trim().is_empty())
            .or_else(|| errors.as_ref().map(|errors| errors.join(", ")))
            .unwrap_or_else(|| GENERIC_FALLBACK.to_string());

        Self {
            message,
            error_code: parsed.error_code,
            details: errors,
            timestamp: parsed.timestamp.unwrap_or_else(now_rfc3339),
            path: parsed.path.or_else(|| Some(request_path.to_string())),
            status_code,
        }
    }

    fn fallback(message: &str, status_code: u16, path: Option<&str>) -> Self {
        Self {
            message: message.to_string(),
            error_code: None,
            details: None,
            timestamp: now_rfc3339(),
            path: path.map(str::to_string),
            status_code,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_server_message_wins() {
        let body = r#"{"success":false,"message":"Phone number already exists","errors":["phone: duplicate"],"errorCode":"CONTACT_EXISTS","timestamp":"2026-01-01T00:00:00Z","path":"/contacts"}"#;
        let err = ApiError::from_response(409, body, "/contacts");

        assert_eq!(
            err,
            ApiError {
                message: "Phone number already exists".to_string(),
                error_code: Some("CONTACT_EXISTS".to_string()),
                details: Some(vec!["phone: duplicate".to_string()]),
                timestamp: "2026-01-01T00:00:00Z".to_string(),
                path: Some("/contacts".to_string()),
                status_code: 409,
            }
        );
    }

    #[test]
    fn test_validation_errors_joined() {
        let body = r#"{"success":false,"message":"","errors":["name is required","phone is invalid"]}"#;
        let err = ApiError::from_response(400, body, "/contacts");

        assert_eq!(err.message, "name is required, phone is invalid");
        assert_eq!(err.path.as_deref(), Some("/contacts"));
        assert_eq!(err.status_code, 400);
    }

    #[test]
    fn test_non_json_body_falls_back() {
        let err = ApiError::from_response(502, "<html>Bad Gateway</html>", "/templates");

        assert_eq!(err.message, GENERIC_FALLBACK);
        assert!(err.details.is_none());
        assert!(!err.timestamp.is_empty());
    }

    #[test]
    fn test_transport_errors_normalize_to_generic_messages() {
        let network = ClientError::Network("connection refused".to_string()).to_api_error(Some("/x"));
        assert_eq!(network.message, NETWORK_FALLBACK);
        assert_eq!(network.status_code, 0);

        let timeout = ClientError::Timeout.to_api_error(None);
        assert_eq!(timeout.message, TIMEOUT_FALLBACK);
        assert!(timeout.path.is_none());
    }
}
