use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("snapshot serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("subscription list error: {0}")]
    Opml(#[from] opml::Error),

    #[error("template error: {0}")]
    Template(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("enrichment failed: {0}")]
    Enrichment(String),

    #[error("run exceeded its time budget of {}s", .limit.as_secs())]
    DeadlineExceeded { limit: Duration },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Errors that must abort the run before any source is touched.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Config(_) | AppError::Toml(_) | AppError::Opml(_) | AppError::Template(_)
        )
    }

    pub fn is_deadline(&self) -> bool {
        matches!(self, AppError::DeadlineExceeded { .. })
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_is_distinct_from_fatal() {
        let err = AppError::DeadlineExceeded {
            limit: Duration::from_secs(90),
        };
        assert!(err.is_deadline());
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "run exceeded its time budget of 90s");
    }

    #[test]
    fn test_config_errors_are_fatal() {
        let err = AppError::Config("worker_pool_size must be positive".to_string());
        assert!(err.is_fatal());
        assert!(!err.is_deadline());
        assert_eq!(
            err.to_string(),
            "configuration error: worker_pool_size must be positive"
        );
    }

    #[test]
    fn test_delivery_error_is_recoverable() {
        let err = AppError::Delivery("outbox closed".to_string());
        assert!(!err.is_fatal());
        assert!(!err.is_deadline());
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: AppError = anyhow::anyhow!("Failed to fetch feed: HTTP 503").into();
        assert!(matches!(err, AppError::Other(_)));
        assert_eq!(err.to_string(), "Failed to fetch feed: HTTP 503");
    }
}
