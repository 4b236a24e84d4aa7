//! Error types for the SEP gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Error types that can occur while resolving and serving content
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("Malformed identifier: {0}")]
    BadIdentifier(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not a regular file: {0}")]
    InvalidTarget(String),

    #[error("Invalid sub-path: {0}")]
    InvalidSubPath(String),

    #[error("Not a standard record: {0}")]
    ParseFailure(String),

    #[error("Deadline exceeded: {0}")]
    Timeout(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::ParseFailure(err.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else {
            GatewayError::Backend(err.to_string())
        }
    }
}

impl GatewayError {
    /// Convert error to the HTTP status code returned by the content and
    /// metadata endpoints
    ///
    /// Every resolution or lookup failure collapses to 404 so that clients
    /// cannot tell a malformed identifier from absent content or from a
    /// directory node. Only deadline expiry and local faults are surfaced.
    pub fn to_http_status(&self) -> u16 {
        match self {
            GatewayError::Timeout(_) => 504,

            GatewayError::ConfigError(_) => 500,
            GatewayError::IoError(_) => 500,
            GatewayError::InternalError(_) => 500,

            GatewayError::BadIdentifier(_)
            | GatewayError::NotFound(_)
            | GatewayError::InvalidTarget(_)
            | GatewayError::InvalidSubPath(_)
            | GatewayError::ParseFailure(_)
            | GatewayError::Backend(_)
            | GatewayError::HttpError(_) => 404,
        }
    }

    /// Whether the resolver may treat this failure as "the identifier is not
    /// a descriptor" and continue with the direct-file interpretation
    pub fn allows_direct_fallback(&self) -> bool {
        matches!(
            self,
            GatewayError::NotFound(_)
                | GatewayError::InvalidTarget(_)
                | GatewayError::ParseFailure(_)
        )
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::BadIdentifier(_) => "bad_identifier",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::InvalidTarget(_) => "invalid_target",
            GatewayError::InvalidSubPath(_) => "invalid_sub_path",
            GatewayError::ParseFailure(_) => "parse_failure",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::Backend(_) => "backend",
            GatewayError::ConfigError(_) => "config",
            GatewayError::IoError(_) => "io",
            GatewayError::HttpError(_) => "http",
            GatewayError::InternalError(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_failures_collapse_to_404() {
        assert_eq!(GatewayError::BadIdentifier("x".into()).to_http_status(), 404);
        assert_eq!(GatewayError::NotFound("x".into()).to_http_status(), 404);
        assert_eq!(GatewayError::InvalidTarget("x".into()).to_http_status(), 404);
        assert_eq!(GatewayError::InvalidSubPath("..".into()).to_http_status(), 404);
        assert_eq!(GatewayError::Backend("refused".into()).to_http_status(), 404);
    }

    #[test]
    fn test_timeout_is_gateway_timeout() {
        assert_eq!(GatewayError::Timeout("10s".into()).to_http_status(), 504);
    }

    #[test]
    fn test_direct_fallback() {
        assert!(GatewayError::NotFound("x".into()).allows_direct_fallback());
        assert!(GatewayError::InvalidTarget("x".into()).allows_direct_fallback());
        assert!(GatewayError::ParseFailure("x".into()).allows_direct_fallback());
        assert!(!GatewayError::Timeout("x".into()).allows_direct_fallback());
        assert!(!GatewayError::Backend("x".into()).allows_direct_fallback());
    }

    #[test]
    fn test_io_error_conversion() {
        let err: GatewayError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, GatewayError::IoError(_)));
        assert_eq!(err.kind(), "io");
    }
}
