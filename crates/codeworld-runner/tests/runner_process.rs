//! End-to-end tests driving the runner binaries as child processes.

use std::io::Write;
use std::process::{Command, Stdio};

use serde_json::{json, Value};

struct Run {
    doc: Value,
    code: i32,
}

fn run_binary(bin: &str, source: &str, stdin: &str) -> Run {
    let mut program = tempfile::Builder::new()
        .suffix(".cw")
        .tempfile()
        .expect("temp program");
    program.write_all(source.as_bytes()).expect("write program");

    let mut child = Command::new(bin)
        .arg(program.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn runner");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(stdin.as_bytes())
        .ok();
    let output = child.wait_with_output().expect("wait runner");

    let stdout = String::from_utf8(output.stdout).expect("utf8 stdout");
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 1, "expected exactly one line, got {stdout:?}");
    Run {
        doc: serde_json::from_str(lines[0]).expect("json line"),
        code: output.status.code().expect("exit code"),
    }
}

fn strategy(source: &str, payload: Value) -> Run {
    run_binary(
        env!("CARGO_BIN_EXE_strategy-runner"),
        source,
        &payload.to_string(),
    )
}

fn scoring(source: &str, payload: Value) -> Run {
    run_binary(
        env!("CARGO_BIN_EXE_scoring-runner"),
        source,
        &payload.to_string(),
    )
}

#[test]
fn test_import_is_rejected_before_execution() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("touched");
    let source = format!(
        "import os\nopen({:?}, 'w')\ndef solve(x):\n    return x\n",
        marker.display().to_string()
    );
    let run = strategy(&source, json!({"context": {"input": 1}}));
    assert_eq!(run.code, 1);
    assert_eq!(run.doc["error"], "validation_failed: node_forbidden:Import");
    assert!(!marker.exists());
}

#[test]
fn test_pure_program_reports_result_and_loc() {
    let source = "def solve(xs):\n    xs.sort()\n    return xs\n# trailing comment\n";
    let run = strategy(source, json!({"context": {"input": [3, 1, 2]}}));
    assert_eq!(run.code, 0);
    assert_eq!(run.doc, json!({"result": [1, 2, 3], "loc": 4}));
}

#[test]
fn test_identical_runs_are_identical() {
    let source = "def solve(ctx):\n    return {'n': len(ctx), 's': sum(ctx)}\n";
    let payload = json!({"context": {"xs": [1, 2, 3, 4]}});
    let first = strategy(source, payload.clone());
    let second = strategy(source, payload);
    assert_eq!(first.doc, second.doc);
    assert_eq!(first.code, second.code);
    assert_eq!(first.doc["result"], json!({"n": 4, "s": 10}));
}

#[test]
fn test_zero_argument_entry_point() {
    let run = strategy("def main():\n    return 42\n", json!({"context": {}}));
    assert_eq!(run.code, 0);
    assert_eq!(run.doc["result"], 42);
}

#[test]
fn test_non_object_payload_is_usage_error() {
    let run = strategy("def solve(x):\n    return x\n", json!([1, 2]));
    assert_eq!(run.code, 2);
    let error = run.doc["error"].as_str().unwrap();
    assert!(error.starts_with("invalid_payload"), "{error}");
}

#[test]
fn test_deep_expression_is_rejected_without_crashing() {
    let source = format!("def solve(x):\n    return {}x\n", "-".repeat(100_000));
    let run = strategy(&source, json!({"context": {"input": 1}}));
    assert_eq!(run.code, 1);
    assert_eq!(
        run.doc["error"],
        "validation_failed: syntax_error: line 2: too many nested expressions"
    );

    let tower = format!(
        "def score(task, context, outputs, timings):\n    return 2{}\n",
        "**2".repeat(100_000)
    );
    let run = scoring(&tower, json!({}));
    assert_eq!(run.code, 1);
    let error = run.doc["error"].as_str().unwrap();
    assert!(error.contains("too many nested expressions"), "{error}");
}

#[test]
fn test_heap_exhaustion_is_memory_error() {
    let sources = [
        "def solve(k):\n    a = [k] * 4000000\n    b = [k] * 4000000\n    c = [k] * 4000000\n    d = [k] * 4000000\n    return len(a) + len(b) + len(c) + len(d)\n",
        "def solve(k):\n    xs = [k]\n    while True:\n        xs += xs\n",
        "def solve(k):\n    s = 'ab'\n    while True:\n        s = s + s\n",
        "def solve(k):\n    xs = []\n    while True:\n        xs.append([k] * 1000)\n",
    ];
    for source in sources {
        let run = strategy(source, json!({"context": {"input": 7}}));
        assert_eq!(run.code, 1, "{source}");
        let error = run.doc["error"].as_str().unwrap();
        assert!(
            error.starts_with("invocation_failed: MemoryError"),
            "{source}: {error}"
        );
    }
}

#[test]
fn test_large_allocation_within_budget_succeeds() {
    let run = strategy(
        "def solve(k):\n    xs = [k] * 1000000\n    return len(xs)\n",
        json!({"context": {"input": 7}}),
    );
    assert_eq!(run.code, 0);
    assert_eq!(run.doc["result"], 1000000);
}

#[test]
fn test_runaway_loop_hits_cpu_limit() {
    let run = strategy(
        "def solve(x):\n    while True:\n        x = x + 1\n",
        json!({"context": {"input": 0}}),
    );
    assert_eq!(run.code, 1);
    assert_eq!(run.doc["error"], "invocation_failed: cpu time limit exceeded");
}

#[test]
fn test_scoring_runner_validates_like_strategy_runner() {
    let body = "def score(task, context, outputs, timings):\n    return {'correctness': 1.0, 'speed': 0.5}\n";
    let payload = json!({"task": "t", "context": {}, "outputs": {}, "timings": {}});

    let rejected = scoring(&format!("import os\n{body}"), payload.clone());
    assert_eq!(rejected.code, 1);
    assert_eq!(rejected.doc["error"], "validation_failed: node_forbidden:Import");

    let accepted = scoring(body, payload);
    assert_eq!(accepted.code, 0);
    assert_eq!(accepted.doc, json!({"correctness": 1.0, "speed": 0.5}));
}

#[test]
fn test_scoring_invocation_error_prefix() {
    let run = scoring(
        "def score(task, context, outputs, timings):\n    return 1 // 0\n",
        json!({}),
    );
    assert_eq!(run.code, 1);
    let error = run.doc["error"].as_str().unwrap();
    assert!(error.starts_with("scoring_failed: ZeroDivisionError"), "{error}");
}
