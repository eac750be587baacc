//! Error taxonomy shared by every Gmail client backend

use chrono::{DateTime, Utc};

/// Errors returned by [`GmailClient`](crate::gmail::GmailClient) operations
///
/// Read operations turn [`GmailError::NotFound`] into an empty result before
/// it reaches callers; every other variant is a real failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GmailError {
    /// The requested resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Network hiccup or other retryable failure
    #[error("transient error: {0}")]
    Transient(String),

    /// The provider answered with a 5xx
    #[error("server error: {0}")]
    Server(String),

    /// The call did not finish in time and was abandoned
    #[error("timed out after {0}s")]
    Timeout(u64),

    /// 401/403/invalid grant/429 and friends
    #[error("auth or rate limit error: {0}")]
    AuthOrRateLimit(String),

    /// The provider payload could not be understood
    #[error("parse error: {0}")]
    Parse(String),

    /// Required tooling or credentials are absent
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    /// The circuit breaker is open; no call was attempted
    #[error("circuit open until {until}")]
    CircuitOpen { until: DateTime<Utc> },

    /// The caller asked for something the client cannot do
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GmailError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether this failure counts toward opening the circuit
    pub fn trips_circuit(&self) -> bool {
        matches!(
            self,
            Self::AuthOrRateLimit(_) | Self::Server(_) | Self::Timeout(_)
        )
    }

    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Server(_) | Self::Timeout(_) | Self::AuthOrRateLimit(_)
        )
    }

    /// Classify an error message by well-known substrings
    ///
    /// Used for CLI stderr, where only text is available.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["not found", "404", "requested entity was not found"]) {
            Self::NotFound(message.trim().to_string())
        } else if has(&[
            "401",
            "403",
            "invalid_grant",
            "unauthorized",
            "insufficient permission",
            "429",
            "rate limit",
            "ratelimit",
            "quota",
        ]) {
            Self::AuthOrRateLimit(message.trim().to_string())
        } else if has(&[
            "500",
            "502",
            "503",
            "backend error",
            "internal error",
            "unavailable",
        ]) {
            Self::Server(message.trim().to_string())
        } else if has(&["timed out", "timeout", "deadline exceeded"]) {
            Self::Timeout(0)
        } else {
            Self::Transient(message.trim().to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_found() {
        assert!(GmailError::classify("Error 404: Requested entity was not found.").is_not_found());
    }

    #[test]
    fn test_classify_auth_and_rate_limit() {
        for msg in ["invalid_grant: token revoked", "HTTP 429 Too Many Requests", "User-rate limit exceeded"] {
            let err = GmailError::classify(msg);
            assert!(matches!(err, GmailError::AuthOrRateLimit(_)), "{msg}");
            assert!(err.trips_circuit());
        }
    }

    #[test]
    fn test_classify_server_and_timeout() {
        assert!(matches!(GmailError::classify("503 Service Unavailable"), GmailError::Server(_)));
        assert!(matches!(GmailError::classify("request timed out"), GmailError::Timeout(_)));
    }

    #[test]
    fn test_classify_other_is_transient() {
        let err = GmailError::classify("connection reset by peer");
        assert!(matches!(err, GmailError::Transient(_)));
        assert!(!err.trips_circuit());
    }
}
