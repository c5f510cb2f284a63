//! Error types for the Memory Lane client

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

pub(crate) const NETWORK_ERROR: &str =
    "Network connection error. Please check your internet connection.";
pub(crate) const UNAUTHORIZED: &str = "You are not authorized to perform this action.";
pub(crate) const SESSION_EXPIRED: &str = "Session expired. Please log in again.";
pub(crate) const SERVER_ERROR: &str = "Server error. Please try again later.";

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    /// The reachability probe reported no connectivity; nothing was sent.
    #[error("{0}")]
    Network(String),

    #[error("Request timeout after {0:?}. Please try again.")]
    Timeout(Duration),

    /// The server answered with something other than JSON.
    #[error("Unexpected response from server (status {status}, content type {content_type:?})")]
    Protocol {
        status: StatusCode,
        content_type: Option<String>,
    },

    /// The session cannot be used (or created); the caller should send the user to login.
    #[error("{0}")]
    Authentication(String),

    #[error("{message}")]
    Api { status: StatusCode, message: String },

    #[error("{message}")]
    Server { status: StatusCode, message: String },

    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Token storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Build the error for a non-2xx status other than a recoverable 401.
    ///
    /// `server_message` is the envelope's `error` (or `message`) field. It wins
    /// over the default text for 4xx responses; 5xx responses always carry the
    /// generic retry-later text.
    pub fn from_status(status: StatusCode, server_message: Option<String>) -> Self {
        if status.is_server_error() {
            return ClientError::Server {
                status,
                message: SERVER_ERROR.to_string(),
            };
        }

        let message = server_message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| default_message(status));

        if status == StatusCode::UNAUTHORIZED {
            ClientError::Authentication(message)
        } else {
            ClientError::Api { status, message }
        }
    }

    /// Whether the generic retry loop may try the request again.
    ///
    /// Only transient failures qualify: timeouts, 5xx and transport errors.
    /// Offline, auth and 4xx failures are surfaced right away.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout(_) | ClientError::Server { .. } | ClientError::HttpRequest(_)
        )
    }

    /// HTTP status attached to the error, when the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Protocol { status, .. }
            | ClientError::Api { status, .. }
            | ClientError::Server { status, .. } => Some(*status),
            ClientError::Authentication(_) => Some(StatusCode::UNAUTHORIZED),
            ClientError::HttpRequest(e) => e.status(),
            _ => None,
        }
    }

    /// 422 responses: the request itself is wrong and must be fixed by the user.
    pub fn is_validation(&self) -> bool {
        matches!(self, ClientError::Api { status, .. } if *status == StatusCode::UNPROCESSABLE_ENTITY)
    }

    pub(crate) fn offline() -> Self {
        ClientError::Network(NETWORK_ERROR.to_string())
    }
}

fn default_message(status: StatusCode) -> String {
    match status.as_u16() {
        400 | 422 => "Please check your input and try again.".to_string(),
        401 => UNAUTHORIZED.to_string(),
        403 => "Access denied.".to_string(),
        404 => "Resource not found.".to_string(),
        409 => "This resource already exists.".to_string(),
        429 => "Too many requests. Please wait a moment and try again.".to_string(),
        _ => format!("HTTP {}", status.as_u16()),
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_overrides_default_for_client_errors() {
        let err = ClientError::from_status(StatusCode::NOT_FOUND, Some("Resource not found".into()));
        assert_eq!(err.to_string(), "Resource not found");
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));

        let err = ClientError::from_status(StatusCode::NOT_FOUND, None);
        assert_eq!(err.to_string(), "Resource not found.");

        let err = ClientError::from_status(StatusCode::CONFLICT, Some("  ".into()));
        assert_eq!(err.to_string(), "This resource already exists.");
    }

    #[test]
    fn server_errors_use_generic_text() {
        let err = ClientError::from_status(StatusCode::BAD_GATEWAY, Some("upstream exploded".into()));
        assert!(matches!(err, ClientError::Server { .. }));
        assert_eq!(err.to_string(), SERVER_ERROR);
    }

    #[test]
    fn unauthorized_maps_to_authentication() {
        let err = ClientError::from_status(StatusCode::UNAUTHORIZED, Some("Invalid credentials".into()));
        assert!(matches!(err, ClientError::Authentication(ref m) if m == "Invalid credentials"));
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(ClientError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(ClientError::from_status(StatusCode::SERVICE_UNAVAILABLE, None).is_retryable());

        assert!(!ClientError::offline().is_retryable());
        assert!(!ClientError::Authentication(UNAUTHORIZED.into()).is_retryable());
        assert!(!ClientError::from_status(StatusCode::UNPROCESSABLE_ENTITY, None).is_retryable());
        assert!(!ClientError::from_status(StatusCode::TOO_MANY_REQUESTS, None).is_retryable());
        assert!(!ClientError::Protocol {
            status: StatusCode::OK,
            content_type: Some("text/html".into()),
        }
        .is_retryable());
    }

    #[test]
    fn validation_errors_are_flagged() {
        let err = ClientError::from_status(StatusCode::UNPROCESSABLE_ENTITY, Some("Username taken".into()));
        assert!(err.is_validation());
        assert!(!ClientError::from_status(StatusCode::BAD_REQUEST, None).is_validation());
    }
}
