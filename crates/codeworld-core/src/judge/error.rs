//! Error types for the judge module.

/// Errors produced while scoring or ranking.
#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("metric `{name}` is outside [0, 1]: {value}")]
    MetricOutOfRange { name: String, value: f64 },

    #[error("unknown ranking mode: {0} (expected `weighted` or `lexicographic`)")]
    UnknownMode(String),

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for judge operations.
pub type JudgeResult<T> = std::result::Result<T, JudgeError>;
