//! Error types for the Dynatrace API client.

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Base error type for dtq operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Http(#[from] HttpError),

    /// The query job reached the terminal `FAILED` state.
    #[error("Query failed: {message}")]
    QueryFailed { message: String },

    /// The poll budget ran out while the job was still running.
    #[error("Query polling timed out after {attempts} attempts")]
    QueryTimedOut { attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP status associated with the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http(e) => Some(e.status),
            Error::Auth(e) => e.status_code,
            Error::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Remediation hint for display next to the error message.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::Auth(_) => Some(
                "Check OAUTH_CLIENT_ID, OAUTH_CLIENT_SECRET and OAUTH_RESOURCE_URN, \
                 and that the client is allowed the requested scopes.",
            ),
            Error::QueryTimedOut { .. } => Some(
                "The query is still running. Narrow the timeframe or raise MAX_RETRIES / POLL_INTERVAL_MS.",
            ),
            Error::Config(_) => Some("Check the environment file (env/.env.<environment>)."),
            _ => match self.status() {
                Some(401) => Some("Check your API token or OAuth credentials."),
                Some(403) => Some("The token is missing a required scope or permission."),
                Some(404) => Some("Check DT_ENVIRONMENT and the endpoint path."),
                Some(429) => Some("Rate limited. Wait a moment and retry."),
                Some(s) if s >= 500 => Some("Upstream service issue. Retry later."),
                _ => None,
            },
        }
    }
}

/// Raised when the OAuth token exchange fails or returns a malformed body.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct AuthError {
    pub message: String,
    pub status_code: Option<u16>,
    pub body: Option<String>,
}

impl AuthError {
    pub fn new(message: impl Into<String>, status_code: Option<u16>, body: Option<String>) -> Self {
        Self {
            message: message.into(),
            status_code,
            body,
        }
    }
}

/// Raised when the API answers with a status of 400 or above.
#[derive(Error, Debug)]
#[error("HTTP {status}: {message}")]
pub struct HttpError {
    pub status: u16,
    pub message: String,
    pub response_data: Option<serde_json::Value>,
}

impl HttpError {
    pub fn new(
        status: u16,
        message: impl Into<String>,
        response_data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            response_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_display_includes_status() {
        let err = Error::from(HttpError::new(404, "Not Found", None));
        assert_eq!(err.to_string(), "HTTP 404: Not Found");
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn query_errors_are_distinct() {
        let failed = Error::QueryFailed {
            message: "syntax error".to_string(),
        };
        let timed_out = Error::QueryTimedOut { attempts: 10 };
        assert!(failed.to_string().contains("syntax error"));
        assert!(timed_out.to_string().contains("10 attempts"));
        assert!(failed.hint().is_none());
        assert!(timed_out.hint().is_some());
    }

    #[test]
    fn hints_follow_status() {
        let unauthorized = Error::from(HttpError::new(401, "Unauthorized", None));
        assert!(unauthorized.hint().unwrap().contains("credentials"));
        let limited = Error::from(HttpError::new(429, "Rate Limited", None));
        assert!(limited.hint().unwrap().contains("Wait"));
        let teapot = Error::from(HttpError::new(418, "teapot", None));
        assert!(teapot.hint().is_none());
    }

    #[test]
    fn auth_error_keeps_status() {
        let err = Error::from(AuthError::new("OAuth failed", Some(400), Some("{}".into())));
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().starts_with("Authentication failed"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
