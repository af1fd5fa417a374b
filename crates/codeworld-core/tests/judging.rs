//! Judge and sandbox properties checked through the public API.

use serde_json::json;

use codeworld_core::judge::{LexicographicRanking, RankingStrategy, WeightedRanking};
use codeworld_core::{
    aggregate_judge, judge_score, rank, run_strategy, validate, ExecutionResult, MetricSet,
    ScoredCandidate,
};

fn set(pairs: &[(&str, f64)]) -> MetricSet {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[test]
fn test_rubric_reference_scores() {
    let metrics = judge_score(
        &json!("double"),
        &json!({"expected": 10}),
        &json!({"result": 10, "loc": 12}),
        &json!({"duration_ms": 120}),
    );
    assert_eq!(metrics["correctness"], 1.0);
    assert!((metrics["speed"] - 0.88).abs() < 1e-9);
    assert!((metrics["brevity"] - 0.88).abs() < 1e-9);
    assert!((aggregate_judge(&metrics) - 0.964).abs() < 1e-9);
}

#[test]
fn test_weighted_aggregate_renormalizes_without_correctness() {
    let metrics = set(&[("speed", 0.9), ("brevity", 0.9)]);
    assert!((aggregate_judge(&metrics) - 0.9).abs() < 1e-9);
}

#[test]
fn test_lexicographic_speed_breaks_correctness_tie() {
    let first = set(&[("correctness", 1.0), ("speed", 0.9), ("brevity", 0.5)]);
    let second = set(&[("correctness", 1.0), ("speed", 0.8), ("brevity", 0.9)]);
    assert!(LexicographicRanking.compare(&first, &second).is_gt());

    let board = rank(
        vec![
            ScoredCandidate::new("second", second),
            ScoredCandidate::new("first", first),
        ],
        &LexicographicRanking,
    )
    .unwrap();
    assert_eq!(board[0].candidate_name, "first");
    assert_eq!(board[1].rank, 2);
}

#[test]
fn test_weighted_and_lexicographic_can_disagree() {
    let steady = set(&[("correctness", 0.4), ("speed", 1.0), ("brevity", 1.0)]);
    let precise = set(&[("correctness", 0.5), ("speed", 0.0), ("brevity", 0.0)]);
    assert!(WeightedRanking.compare(&steady, &precise).is_gt());
    assert!(LexicographicRanking.compare(&steady, &precise).is_lt());
}

#[test]
fn test_validator_rejects_each_category() {
    let cases = [
        ("import os\n", "node_forbidden:"),
        ("from math import sqrt\n", "node_forbidden:"),
        ("def solve(x):\n    return eval('1')\n", "call_forbidden:"),
        ("def solve(x):\n    return compile('1', 'f', 'eval')\n", "call_forbidden:"),
        ("def solve(x):\n    return open('/etc/passwd')\n", "call_forbidden:"),
        ("def solve(x):\n    return x.__class__\n", "dunder_attribute_forbidden"),
    ];
    for (source, prefix) in cases {
        let reason = validate(source).unwrap_err().to_string();
        assert!(reason.starts_with(prefix), "{source:?} -> {reason}");

        // The entry point is never reached.
        match run_strategy(source, &json!({"input": 1})) {
            ExecutionResult::Failure { stage, .. } => {
                assert_eq!(stage, codeworld_core::sandbox::Stage::Validation)
            }
            other => panic!("{source:?} ran: {other:?}"),
        }
    }
}

#[test]
fn test_pure_programs_succeed_with_newline_count() {
    let programs = [
        "def solve(x):\n    return x * 2\n",
        "def solve(xs):\n    total = 0\n    for x in xs:\n        total += x\n    return total\n",
        "LIMIT = 3\n\ndef main():\n    return [i * i for i in range(LIMIT)]\n",
    ];
    for source in programs {
        assert!(validate(source).is_ok(), "{source:?}");
        match run_strategy(source, &json!({"input": [1, 2]})) {
            ExecutionResult::Success { loc, .. } => {
                assert_eq!(loc, source.matches('\n').count(), "{source:?}")
            }
            other => panic!("{source:?} failed: {other:?}"),
        }
    }
}

#[test]
fn test_repeated_runs_are_identical() {
    let source = "def solve(ctx):\n    seen = {}\n    for k in ctx:\n        seen[k] = len(k)\n    return seen\n";
    let context = json!({"alpha": 1, "be": 2});
    let first = run_strategy(source, &context);
    let second = run_strategy(source, &context);
    assert!(first.is_success());
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}
