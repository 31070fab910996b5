use thiserror::Error;

/// Application-wide error types for Vigil.
#[derive(Error, Debug)]
pub enum AppError {
    /// Page fetch failed in a way worth retrying (DNS, TLS, reset, 5xx).
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    /// Page fetch failed permanently (HTTP 4xx except 408/429).
    #[error("Permanent fetch error (HTTP {status}): {message}")]
    PermanentFetch { status: u16, message: String },

    /// Page render/navigation failed inside the browser.
    #[error("Render error: {0}")]
    RenderError(String),

    /// HTML parsing or content extraction failed.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// Embedding the content failed; the classifier proceeds without vectors.
    #[error("Vectorization error: {0}")]
    VectorizationError(String),

    /// A sub-classifier failed; it abstains from the ensemble.
    #[error("Classifier error: {0}")]
    ClassifierError(String),

    /// LLM API call failed.
    #[error("LLM error (HTTP {status_code}): {message}")]
    LlmError {
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Database operation failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Malformed interval or cron expression, rejected at registration.
    #[error("Schedule error: {0}")]
    ScheduleError(String),

    /// Configuration is missing or invalid.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// A core invariant was violated; the process must not silently continue.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::TransientFetch(_)
            | AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded => true,
            AppError::LlmError { retryable, .. } => *retryable,
            AppError::StorageError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if this error should count against the circuit breaker.
    pub fn should_trip_circuit(&self) -> bool {
        match self {
            AppError::TransientFetch(_)
            | AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::RenderError(_) => true,
            AppError::LlmError {
                status_code,
                retryable,
                ..
            } => *status_code == 429 || *status_code >= 500 || *retryable,
            _ => false,
        }
    }

    /// Classify an HTTP status into the fetch error taxonomy.
    pub fn from_http_status(status: u16, url: &str) -> Self {
        match status {
            408 | 429 => AppError::TransientFetch(format!("HTTP {status} for {url}")),
            s if s >= 500 => AppError::TransientFetch(format!("HTTP {s} for {url}")),
            s => AppError::PermanentFetch {
                status: s,
                message: format!("HTTP {s} for {url}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::TransientFetch("reset".into()).is_retryable());
        assert!(AppError::Timeout(30).is_retryable());
        assert!(AppError::RateLimitExceeded.is_retryable());
        assert!(
            AppError::LlmError {
                message: "server error".into(),
                status_code: 500,
                retryable: true,
            }
            .is_retryable()
        );
        assert!(
            !AppError::PermanentFetch {
                status: 404,
                message: "not found".into()
            }
            .is_retryable()
        );
        assert!(!AppError::ExtractionError("bad html".into()).is_retryable());
    }

    #[test]
    fn test_circuit_tripping() {
        assert!(AppError::RateLimitExceeded.should_trip_circuit());
        assert!(AppError::Timeout(30).should_trip_circuit());
        assert!(AppError::RenderError("no body".into()).should_trip_circuit());
        assert!(!AppError::ExtractionError("bad".into()).should_trip_circuit());
        assert!(
            !AppError::PermanentFetch {
                status: 404,
                message: "gone".into()
            }
            .should_trip_circuit()
        );
    }

    #[test]
    fn test_http_status_taxonomy() {
        assert!(matches!(
            AppError::from_http_status(503, "http://a"),
            AppError::TransientFetch(_)
        ));
        assert!(matches!(
            AppError::from_http_status(429, "http://a"),
            AppError::TransientFetch(_)
        ));
        assert!(matches!(
            AppError::from_http_status(404, "http://a"),
            AppError::PermanentFetch { status: 404, .. }
        ));
    }
}
