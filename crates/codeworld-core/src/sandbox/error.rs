//! Error types for the sandbox module.

use serde::{Deserialize, Serialize};

/// Stage of a runner invocation at which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    Load,
    Invocation,
    Encoding,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Validation => "validation",
            Stage::Load => "load",
            Stage::Invocation => "invocation",
            Stage::Encoding => "encoding",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the sandbox layer.
///
/// Messages that originate in candidate code are already truncated when they
/// reach these variants.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("{0}")]
    ValidationRejected(String),

    #[error("invalid payload: {0}")]
    PayloadInvalid(String),

    #[error("{0}")]
    LoadFailed(String),

    #[error("no entry point: define `{}`", .expected.join("` or `"))]
    EntryPointMissing { expected: Vec<&'static str> },

    #[error("{0}")]
    InvocationFailed(String),

    #[error("{0}")]
    EncodingFailed(String),

    #[error("runner exceeded wall-clock budget after {elapsed_ms}ms (limit {limit_ms}ms)")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    #[error("failed to launch runner: {0}")]
    Spawn(String),

    #[error("runner protocol violation: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Stage reported on the wire, for failures that happen inside a runner.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            SandboxError::ValidationRejected(_) => Some(Stage::Validation),
            SandboxError::LoadFailed(_) => Some(Stage::Load),
            SandboxError::EntryPointMissing { .. } | SandboxError::InvocationFailed(_) => {
                Some(Stage::Invocation)
            }
            SandboxError::EncodingFailed(_) => Some(Stage::Encoding),
            _ => None,
        }
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_mapping() {
        assert_eq!(
            SandboxError::ValidationRejected("node_forbidden:Import".into()).stage(),
            Some(Stage::Validation)
        );
        assert_eq!(
            SandboxError::EntryPointMissing {
                expected: vec!["solve", "main"]
            }
            .stage(),
            Some(Stage::Invocation)
        );
        assert_eq!(SandboxError::PayloadInvalid("x".into()).stage(), None);
    }

    #[test]
    fn test_entry_point_message_lists_names() {
        let err = SandboxError::EntryPointMissing {
            expected: vec!["solve", "main"],
        };
        assert_eq!(err.to_string(), "no entry point: define `solve` or `main`");
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::Invocation).unwrap();
        assert_eq!(json, "\"invocation\"");
    }
}
