//! In-process side of a runner: validate, load, invoke, encode.
//!
//! [`run_strategy`] and [`run_scoring`] are pure functions of their inputs
//! and never panic on candidate behaviour. [`serve`] wraps them with the
//! process concerns (limits, stdin, program file) and yields the single
//! output line plus exit status. Binaries call [`serve`] through
//! [`spawn_worker`] so interpretation gets a large stack.

use std::io::Read;
use std::path::Path;

use serde_json::{Map, Number, Value as Json};
use tracing::debug;

use super::error::{SandboxError, SandboxResult, Stage};
use super::limits::{install_cpu_limit_handler, ResourceLimits};
use super::namespace::build_namespace;
use super::protocol::{
    count_lines, invalid_payload_line, resolve_argument, ExecutionResult, RunnerKind,
    ScoringPayload, StrategyPayload, EXIT_USAGE,
};
use super::validator::validate;
use crate::lang::{from_json, heap, to_json, Interpreter, RuntimeError, Value};

/// Stack size of the interpreter thread.
pub const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Entry functions of a strategy, in resolution order.
pub const STRATEGY_ENTRY_POINTS: &[&str] = &["solve", "main"];

/// Entry function of a scoring program.
pub const SCORING_ENTRY_POINT: &str = "score";

const STRATEGY_CPU_LINE: &[u8] = b"{\"error\":\"invocation_failed: cpu time limit exceeded\"}\n";
const SCORING_CPU_LINE: &[u8] = b"{\"error\":\"scoring_failed: cpu time limit exceeded\"}\n";

fn describe(err: &RuntimeError) -> String {
    match err.line {
        Some(line) => format!("{err} (line {line})"),
        None => err.to_string(),
    }
}

fn is_callable(value: &Value) -> bool {
    matches!(
        value,
        Value::Function(_) | Value::Builtin(_) | Value::Method(_)
    )
}

fn into_failure(err: SandboxError) -> ExecutionResult {
    ExecutionResult::from_error(&err)
        .unwrap_or_else(|| ExecutionResult::failure(Stage::Invocation, err.to_string()))
}

/// Validate `source` and execute its module body in a fresh namespace.
fn load(source: &str) -> SandboxResult<Interpreter> {
    let module = validate(source)?;
    let mut interp = Interpreter::new(build_namespace());
    interp
        .exec_module(&module)
        .map_err(|e| SandboxError::LoadFailed(describe(&e)))?;
    Ok(interp)
}

fn entry_point(interp: &Interpreter, names: &[&'static str]) -> SandboxResult<Value> {
    names
        .iter()
        .find_map(|name| interp.global(name).filter(is_callable))
        .ok_or_else(|| SandboxError::EntryPointMissing {
            expected: names.to_vec(),
        })
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Run a strategy program against `context`.
pub fn run_strategy(source: &str, context: &Json) -> ExecutionResult {
    try_run_strategy(source, context).unwrap_or_else(into_failure)
}

fn try_run_strategy(source: &str, context: &Json) -> SandboxResult<ExecutionResult> {
    let mut interp = load(source)?;
    let entry = entry_point(&interp, STRATEGY_ENTRY_POINTS)?;

    let arg = from_json(&resolve_argument(context));
    let value = match interp.call_value(&entry, vec![arg], Vec::new()) {
        Err(err) if err.is_type_error() => {
            debug!(error = %err, "one-argument call raised TypeError, retrying without arguments");
            interp.call_value(&entry, Vec::new(), Vec::new())
        }
        other => other,
    }
    .map_err(|e| SandboxError::InvocationFailed(describe(&e)))?;

    let value = to_json(&value).map_err(|e| SandboxError::EncodingFailed(e.to_string()))?;
    Ok(ExecutionResult::Success {
        value,
        loc: count_lines(source),
    })
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Run a scoring program's `score(task, context, outputs, timings)`.
///
/// On success the value is a flat JSON object of metric name to a float in
/// `[0, 1]`.
pub fn run_scoring(source: &str, payload: &ScoringPayload) -> ExecutionResult {
    try_run_scoring(source, payload).unwrap_or_else(into_failure)
}

fn try_run_scoring(source: &str, payload: &ScoringPayload) -> SandboxResult<ExecutionResult> {
    let mut interp = load(source)?;
    let entry = entry_point(&interp, &[SCORING_ENTRY_POINT])?;

    let args = [
        &payload.task,
        &payload.context,
        &payload.outputs,
        &payload.timings,
    ]
    .into_iter()
    .map(from_json)
    .collect();
    let value = interp
        .call_value(&entry, args, Vec::new())
        .map_err(|e| SandboxError::InvocationFailed(describe(&e)))?;

    let metrics = metrics_from_value(&value).map_err(SandboxError::EncodingFailed)?;
    Ok(ExecutionResult::Success {
        value: Json::Object(metrics),
        loc: count_lines(source),
    })
}

/// Check that a scoring result is a mapping of string to number in `[0, 1]`.
fn metrics_from_value(value: &Value) -> Result<Map<String, Json>, String> {
    let Value::Dict(map) = value else {
        return Err(format!(
            "score must return a dict, not {}",
            value.type_name()
        ));
    };
    let mut out = Map::new();
    for (key, metric) in map.borrow().items() {
        let Value::Str(name) = key else {
            return Err(format!(
                "metric names must be str, not {}",
                key.type_name()
            ));
        };
        let number = match metric {
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            other => {
                return Err(format!(
                    "metric '{name}' must be a number, not {}",
                    other.type_name()
                ))
            }
        };
        if !(0.0..=1.0).contains(&number) {
            return Err(format!("metric '{name}' is outside [0, 1]: {}", metric.repr()));
        }
        let number = Number::from_f64(number)
            .ok_or_else(|| format!("metric '{name}' is not a finite number"))?;
        out.insert(name.to_string(), Json::Number(number));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Process entry
// ---------------------------------------------------------------------------

fn read_program(path: &Path) -> SandboxResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| SandboxError::LoadFailed(format!("cannot read {}: {e}", path.display())))
}

fn payload_error(err: SandboxError) -> (String, i32) {
    let message = match err {
        SandboxError::PayloadInvalid(m) => m,
        other => other.to_string(),
    };
    (invalid_payload_line(&message), EXIT_USAGE)
}

/// Everything a runner process does after argument parsing: apply limits,
/// read the payload from `input`, load the program at `path` and run it.
///
/// Returns the stdout line (without newline) and the exit status.
pub fn serve<R: Read>(
    kind: RunnerKind,
    path: &Path,
    mut input: R,
    limits: &ResourceLimits,
) -> (String, i32) {
    install_cpu_limit_handler(match kind {
        RunnerKind::Strategy => STRATEGY_CPU_LINE,
        RunnerKind::Scoring => SCORING_CPU_LINE,
    });
    let failed = limits.apply();
    heap::set_budget(usize::try_from(limits.heap_bytes).unwrap_or(usize::MAX));
    debug!(
        runner = kind.binary_name(),
        failed = failed.len(),
        heap_budget = limits.heap_bytes,
        "resource limits in place"
    );

    let mut text = String::new();
    if let Err(e) = input.read_to_string(&mut text) {
        return payload_error(SandboxError::PayloadInvalid(e.to_string()));
    }

    let result = match kind {
        RunnerKind::Strategy => {
            let payload = match StrategyPayload::parse(&text) {
                Ok(p) => p,
                Err(e) => return payload_error(e),
            };
            match read_program(path) {
                Ok(source) => run_strategy(&source, &payload.context),
                Err(e) => into_failure(e),
            }
        }
        RunnerKind::Scoring => {
            let payload = match ScoringPayload::parse(&text) {
                Ok(p) => p,
                Err(e) => return payload_error(e),
            };
            match read_program(path) {
                Ok(source) => run_scoring(&source, &payload),
                Err(e) => into_failure(e),
            }
        }
    };
    kind.encode(&result)
}

/// Run `f` on a dedicated thread with [`WORKER_STACK_SIZE`] of stack and
/// wait for it.
pub fn spawn_worker<F, T>(f: F) -> std::io::Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = std::thread::Builder::new()
        .name("codeworld-worker".into())
        .stack_size(WORKER_STACK_SIZE)
        .spawn(f)?;
    handle
        .join()
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "worker thread panicked"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn failure(result: ExecutionResult) -> (Stage, String) {
        match result {
            ExecutionResult::Failure { stage, message } => (stage, message),
            ok => panic!("expected failure, got {ok:?}"),
        }
    }

    #[test]
    fn test_strategy_with_input() {
        let src = "def solve(xs):\n    return [x * 2 for x in xs]\n";
        let result = run_strategy(src, &json!({"input": [1, 2, 3]}));
        assert_eq!(
            result,
            ExecutionResult::Success {
                value: json!([2, 4, 6]),
                loc: 2
            }
        );
    }

    #[test]
    fn test_main_entry_with_xs() {
        let src = "def main(xs):\n    return sum(xs)\n";
        let result = run_strategy(src, &json!({"xs": [3, 1, 2]}));
        assert!(matches!(result, ExecutionResult::Success { ref value, .. } if *value == json!(6)));
    }

    #[test]
    fn test_whole_context_when_no_known_key() {
        let src = "def solve(ctx):\n    return ctx['n'] + 1\n";
        let result = run_strategy(src, &json!({"n": 41}));
        assert!(matches!(result, ExecutionResult::Success { ref value, .. } if *value == json!(42)));
    }

    #[test]
    fn test_zero_argument_retry() {
        let src = "def solve():\n    return 42\n";
        let result = run_strategy(src, &json!({"input": 1}));
        assert!(matches!(result, ExecutionResult::Success { ref value, .. } if *value == json!(42)));
    }

    #[test]
    fn test_missing_entry_point() {
        let (stage, message) = failure(run_strategy("X = 1\n", &json!({})));
        assert_eq!(stage, Stage::Invocation);
        assert!(message.contains("`solve` or `main`"), "{message}");
    }

    #[test]
    fn test_module_body_error_is_load_stage() {
        let (stage, message) = failure(run_strategy("X = 1 // 0\n", &json!({})));
        assert_eq!(stage, Stage::Load);
        assert!(message.starts_with("ZeroDivisionError"), "{message}");
    }

    #[test]
    fn test_candidate_error_is_invocation_stage() {
        let src = "def solve(xs):\n    return xs[10]\n";
        let (stage, message) = failure(run_strategy(src, &json!({"input": [1]})));
        assert_eq!(stage, Stage::Invocation);
        assert!(message.contains("IndexError"), "{message}");
        assert!(message.ends_with("(line 2)"), "{message}");
    }

    #[test]
    fn test_unrepresentable_results_are_encoding_stage() {
        for body in ["abs", "{1, 2}", "range(3)", "float('nan')", "map(abs, [1])"] {
            let src = format!("def solve():\n    return {body}\n");
            let (stage, _) = failure(run_strategy(&src, &json!({})));
            assert_eq!(stage, Stage::Encoding, "{body}");
        }
    }

    #[test]
    fn test_validation_rejection_before_execution() {
        let (stage, message) = failure(run_strategy("import os\n", &json!({})));
        assert_eq!(stage, Stage::Validation);
        assert_eq!(message, "node_forbidden:Import");
    }

    #[test]
    fn test_long_messages_truncated() {
        let src = format!("def solve():\n    assert False, '{}'\n", "x".repeat(2000));
        let (_, message) = failure(run_strategy(&src, &json!({})));
        assert!(message.len() <= 512);
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let src = "STATE = [0]\n\ndef solve(n):\n    STATE[0] += n\n    return STATE[0]\n";
        let a = run_strategy(src, &json!({"input": 5}));
        let b = run_strategy(src, &json!({"input": 5}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_scoring_returns_metrics() {
        let src = "def score(task, context, outputs, timings):\n    ok = 1.0 if outputs['result'] == context['expected'] else 0.0\n    return {'correctness': ok, 'speed': 1}\n";
        let payload = ScoringPayload::parse(
            r#"{"task": "sum", "context": {"expected": 6}, "outputs": {"result": 6}}"#,
        )
        .unwrap();
        let result = run_scoring(src, &payload);
        assert_eq!(
            result,
            ExecutionResult::Success {
                value: json!({"correctness": 1.0, "speed": 1.0}),
                loc: 3
            }
        );
    }

    #[test]
    fn test_scoring_result_shape_enforced() {
        let payload = ScoringPayload::parse("{}").unwrap();
        for ret in ["[1]", "{'a': 1.5}", "{'a': True}", "{1: 0.5}"] {
            let src = format!("def score(task, context, outputs, timings):\n    return {ret}\n");
            let (stage, _) = failure(run_scoring(&src, &payload));
            assert_eq!(stage, Stage::Encoding, "{ret}");
        }
    }

    #[test]
    fn test_scoring_arity_error_is_invocation_stage() {
        let payload = ScoringPayload::parse("{}").unwrap();
        let (stage, message) = failure(run_scoring("def score(task):\n    return {}\n", &payload));
        assert_eq!(stage, Stage::Invocation);
        assert!(message.contains("TypeError"), "{message}");
    }

    #[test]
    fn test_spawn_worker_returns_value() {
        let out = spawn_worker(|| run_strategy("def solve(n):\n    return n\n", &json!({"input": 7})))
            .unwrap();
        assert!(out.is_success());
    }
}
