use thiserror::Error;

use crate::config::ConfigError;

/// Errors returned by harness operations.
///
/// Transport and protocol problems are always returned to the immediate caller;
/// turning them into test failures is the job of the test scope.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Request to test service failed: {0}")]
    Transport(String),

    #[error("Unexpected response status {status} from test service{message}")]
    UnexpectedStatus { status: u16, message: String },

    #[error("Test service did not return a Location header with a resource URL")]
    MissingLocation,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Malformed response from test service: {0}")]
    MalformedResponse(String),

    #[error("Timed out {0}")]
    Timeout(String),

    #[error("{0} was already closed")]
    EndpointClosed(String),

    #[error("{0}")]
    Protocol(String),

    #[error("Could not detect own listener at {0}")]
    ListenerNotReady(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl HarnessError {
    /// Returns true if this error came from a bounded wait running out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::Timeout(_))
    }

    /// Builds an `UnexpectedStatus` error, appending the response body if there is one.
    pub(crate) fn status(status: u16, body: &str) -> Self {
        let message = if body.is_empty() {
            String::new()
        } else {
            format!(": {}", body)
        };
        HarnessError::UnexpectedStatus { status, message }
    }
}

impl From<reqwest::Error> for HarnessError {
    fn from(err: reqwest::Error) -> Self {
        HarnessError::Transport(err.to_string())
    }
}

impl From<url::ParseError> for HarnessError {
    fn from(err: url::ParseError) -> Self {
        HarnessError::InvalidUrl(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_distinguishable() {
        let err = HarnessError::Timeout("waiting for an incoming request".to_string());
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Timed out waiting for an incoming request");
        assert!(!HarnessError::MissingLocation.is_timeout());
    }

    #[test]
    fn test_status_message_includes_body() {
        let err = HarnessError::status(500, "boom");
        assert_eq!(
            err.to_string(),
            "Unexpected response status 500 from test service: boom"
        );
        let err = HarnessError::status(404, "");
        assert_eq!(err.to_string(), "Unexpected response status 404 from test service");
    }
}
