//! Wire protocol between the orchestrator and runner processes.
//!
//! A runner reads exactly one JSON object from stdin and writes exactly one
//! JSON line to stdout:
//!
//! ```text
//! strategy-runner  stdin  {"context": {...}}
//!                  stdout {"result": <json>, "loc": <int>}
//!                       | {"error": "<stage>_failed: <message>"}
//!                       | {"error": "invalid_payload: <message>"}
//! scoring-runner   stdin  {"task": ..., "context": {...}, "outputs": {...}, "timings": {...}}
//!                  stdout {"<metric>": <float>, ...} | {"error": "..."}
//! ```
//!
//! Exit status is 0 on success, 1 on a stage failure and 2 when the payload
//! (or the command line) is unusable.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};

use super::error::{SandboxError, SandboxResult, Stage};

/// Longest message, in bytes, that crosses the process boundary.
pub const MAX_MESSAGE_BYTES: usize = 512;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

/// Outcome of one runner invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success { value: Json, loc: usize },
    Failure { stage: Stage, message: String },
}

impl ExecutionResult {
    pub fn failure(stage: Stage, message: impl AsRef<str>) -> Self {
        ExecutionResult::Failure {
            stage,
            message: truncate_message(message.as_ref()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    /// Map a sandbox error onto a failure, if it belongs to a runner stage.
    pub fn from_error(err: &SandboxError) -> Option<Self> {
        err.stage().map(|stage| Self::failure(stage, err.to_string()))
    }
}

/// Which runner speaks on the wire. The two differ only in how results and
/// invocation failures are spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    Strategy,
    Scoring,
}

impl RunnerKind {
    pub fn binary_name(self) -> &'static str {
        match self {
            RunnerKind::Strategy => "strategy-runner",
            RunnerKind::Scoring => "scoring-runner",
        }
    }

    pub fn error_prefix(self, stage: Stage) -> &'static str {
        match (self, stage) {
            (RunnerKind::Scoring, Stage::Invocation) => "scoring_failed",
            (_, Stage::Validation) => "validation_failed",
            (_, Stage::Load) => "load_failed",
            (_, Stage::Invocation) => "invocation_failed",
            (_, Stage::Encoding) => "encoding_failed",
        }
    }

    fn stage_for_prefix(self, prefix: &str) -> Option<Stage> {
        [Stage::Validation, Stage::Load, Stage::Invocation, Stage::Encoding]
            .into_iter()
            .find(|s| self.error_prefix(*s) == prefix)
    }

    /// Render a result as the single stdout line (without newline) and the
    /// exit status that goes with it.
    pub fn encode(self, result: &ExecutionResult) -> (String, i32) {
        match result {
            ExecutionResult::Success { value, loc } => {
                let doc = match self {
                    RunnerKind::Strategy => json!({ "result": value, "loc": loc }),
                    RunnerKind::Scoring => value.clone(),
                };
                (doc.to_string(), EXIT_OK)
            }
            ExecutionResult::Failure { stage, message } => (
                error_line(&format!("{}: {}", self.error_prefix(*stage), message)),
                EXIT_FAILED,
            ),
        }
    }

    /// Decode a runner's stdout line given its exit status.
    pub fn decode(self, line: &str, exit_code: i32) -> SandboxResult<ExecutionResult> {
        let doc: Json = serde_json::from_str(line.trim()).map_err(|e| {
            SandboxError::Protocol(format!("unparseable output line: {e}"))
        })?;
        let Json::Object(obj) = doc else {
            return Err(SandboxError::Protocol("output is not a JSON object".into()));
        };

        if let Some(Json::String(error)) = obj.get("error") {
            if exit_code == EXIT_USAGE {
                let msg = error.strip_prefix("invalid_payload: ").unwrap_or(error);
                return Err(SandboxError::PayloadInvalid(msg.to_string()));
            }
            let (prefix, message) = error.split_once(": ").unwrap_or((error.as_str(), ""));
            let stage = self.stage_for_prefix(prefix).ok_or_else(|| {
                SandboxError::Protocol(format!("unknown error prefix `{prefix}`"))
            })?;
            return Ok(ExecutionResult::failure(stage, message));
        }

        if exit_code != EXIT_OK {
            return Err(SandboxError::Protocol(format!(
                "exit status {exit_code} without an error line"
            )));
        }

        match self {
            RunnerKind::Strategy => {
                let value = obj.get("result").cloned().unwrap_or(Json::Null);
                let loc = obj
                    .get("loc")
                    .and_then(Json::as_u64)
                    .ok_or_else(|| SandboxError::Protocol("missing integer `loc`".into()))?;
                Ok(ExecutionResult::Success {
                    value,
                    loc: loc as usize,
                })
            }
            RunnerKind::Scoring => Ok(ExecutionResult::Success {
                value: Json::Object(obj),
                loc: 0,
            }),
        }
    }
}

/// `{"error": message}` as a single line.
pub fn error_line(message: &str) -> String {
    json!({ "error": message }).to_string()
}

/// Line written when the payload cannot be used.
pub fn invalid_payload_line(message: &str) -> String {
    error_line(&format!("invalid_payload: {}", truncate_message(message)))
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// stdin document for the strategy runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyPayload {
    #[serde(default)]
    pub context: Json,
}

/// stdin document for the scoring runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPayload {
    #[serde(default)]
    pub task: Json,
    #[serde(default)]
    pub context: Json,
    #[serde(default)]
    pub outputs: Json,
    #[serde(default)]
    pub timings: Json,
}

fn object_or_empty(value: Json) -> Json {
    match value {
        Json::Null => Json::Object(Map::new()),
        other => other,
    }
}

fn parse_object(text: &str) -> SandboxResult<Json> {
    let doc: Json =
        serde_json::from_str(text).map_err(|e| SandboxError::PayloadInvalid(e.to_string()))?;
    if !doc.is_object() {
        return Err(SandboxError::PayloadInvalid(
            "payload must be a JSON object".into(),
        ));
    }
    Ok(doc)
}

impl StrategyPayload {
    /// Parse stdin text. A missing or null `context` becomes `{}`.
    pub fn parse(text: &str) -> SandboxResult<Self> {
        let mut payload: Self = serde_json::from_value(parse_object(text)?)
            .map_err(|e| SandboxError::PayloadInvalid(e.to_string()))?;
        payload.context = object_or_empty(payload.context);
        Ok(payload)
    }
}

impl ScoringPayload {
    /// Parse stdin text. Missing `context`, `outputs` and `timings` become
    /// `{}`; a missing `task` stays null.
    pub fn parse(text: &str) -> SandboxResult<Self> {
        let mut payload: Self = serde_json::from_value(parse_object(text)?)
            .map_err(|e| SandboxError::PayloadInvalid(e.to_string()))?;
        payload.context = object_or_empty(payload.context);
        payload.outputs = object_or_empty(payload.outputs);
        payload.timings = object_or_empty(payload.timings);
        Ok(payload)
    }
}

/// The argument passed to a strategy's entry function: `context.input` if
/// the key is present, else `context.xs` if present, else the whole context.
pub fn resolve_argument(context: &Json) -> Json {
    if let Json::Object(map) = context {
        for key in ["input", "xs"] {
            if let Some(v) = map.get(key) {
                return v.clone();
            }
        }
    }
    context.clone()
}

/// Number of source lines, as reported in `loc`.
pub fn count_lines(source: &str) -> usize {
    source.lines().count()
}

/// Cut `message` to at most [`MAX_MESSAGE_BYTES`] bytes on a char boundary.
pub fn truncate_message(message: &str) -> String {
    if message.len() <= MAX_MESSAGE_BYTES {
        return message.to_string();
    }
    let mut end = MAX_MESSAGE_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}
