//! Evaluation pipeline driven end to end with shell stand-ins for the runners.
//!
//! Kept to a single test so no other thread forks while the stand-in scripts
//! are being written.
#![cfg(unix)]

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde_json::json;

use codeworld_core::{
    evaluate, EvalOptions, RankingMode, RunnerBinary, RunnerKind, SupervisorConfig, TaskSpec,
    VariantStatus, METRICS,
};

const STRATEGY: &str = r#"#!/bin/sh
payload=$(cat)
case "$payload" in
  *expected*) echo '{"error":"invocation_failed: saw expected"}'; exit 1 ;;
esac
if grep -q wrong "$1"; then
  echo '{"result": [3, 2, 1], "loc": 3}'
else
  echo '{"result": [1, 2, 3], "loc": 3}'
fi
"#;

const SCORING: &str = r#"#!/bin/sh
cat >/dev/null
echo '{"custom": 0.5, "label": "fast"}'
"#;

const SCORING_BROKEN: &str = r#"#!/bin/sh
cat >/dev/null
echo '{"error":"scoring_failed: ZeroDivisionError: division by zero"}'
exit 1
"#;

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn task(scoring: Option<&str>) -> TaskSpec {
    let mut variants = BTreeMap::new();
    variants.insert(
        "good".to_string(),
        "def solve(xs):\n    xs.sort()\n    return xs\n".to_string(),
    );
    variants.insert(
        "reversed".to_string(),
        "def solve(xs):\n    # wrong\n    return xs\n".to_string(),
    );
    variants.insert(
        "escape".to_string(),
        "import os\ndef solve(xs):\n    return xs\n".to_string(),
    );
    TaskSpec {
        task: "sort".into(),
        context: json!({"input": [3, 1, 2], "expected": [1, 2, 3]}),
        variants,
        scoring: scoring.map(str::to_string),
        metrics: None,
        mode: RankingMode::Weighted,
    }
}

#[tokio::test]
async fn test_evaluate_ranks_by_judge_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let strategy = script(dir.path(), "strategy-runner", STRATEGY);
    let scoring = script(dir.path(), "scoring-runner", SCORING);
    let broken = script(dir.path(), "scoring-broken", SCORING_BROKEN);

    let opts = EvalOptions {
        strategy_runner: RunnerBinary::new(RunnerKind::Strategy, &strategy),
        scoring_runner: RunnerBinary::new(RunnerKind::Scoring, &scoring),
        supervisor: SupervisorConfig { timeout_ms: 10_000 },
    };
    let scoring_src = "def score(task, context, outputs, timings):\n    return {'custom': 0.5}\n";

    let report = evaluate(&task(Some(scoring_src)), &opts).await.unwrap();
    let order: Vec<&str> = report
        .leaderboard
        .iter()
        .map(|e| e.candidate_name.as_str())
        .collect();
    assert_eq!(order, ["good", "reversed", "escape"]);

    let good = report.variants.iter().find(|v| v.name == "good").unwrap();
    assert_eq!(good.status, VariantStatus::Ok);
    assert_eq!(good.scores_judge["correctness"], 1.0);
    assert!((good.scores_judge["brevity"] - 0.97).abs() < 1e-9);
    assert_eq!(good.scores["custom"], 0.5);
    assert!(!good.scores.contains_key("label"));
    assert_eq!(good.outputs, Some(json!({"result": [1, 2, 3], "loc": 3})));
    assert_eq!(
        report.leaderboard[0].source_digest.as_deref(),
        Some(good.source_digest.as_str())
    );

    let reversed = report.variants.iter().find(|v| v.name == "reversed").unwrap();
    assert_eq!(reversed.scores_judge["correctness"], 0.0);

    let escape = report.variants.iter().find(|v| v.name == "escape").unwrap();
    assert_eq!(
        escape.status,
        VariantStatus::Failed("validation_failed: node_forbidden:Import".into())
    );
    assert!(escape.scores_judge.is_empty());
    assert_eq!(report.leaderboard[2].failure, Some("validation_failed: node_forbidden:Import".into()));

    // Broken contestant scoring falls back to the rubric.
    let fallbacks = METRICS.scoring_fallbacks();
    let opts = EvalOptions {
        scoring_runner: RunnerBinary::new(RunnerKind::Scoring, &broken),
        ..opts
    };
    let mut spec = task(Some(scoring_src));
    spec.mode = RankingMode::Lexicographic;
    spec.metrics = Some(vec!["correctness".into(), "brevity".into()]);
    let report = evaluate(&spec, &opts).await.unwrap();
    assert_eq!(METRICS.scoring_fallbacks(), fallbacks + 2);

    let good = report.variants.iter().find(|v| v.name == "good").unwrap();
    assert!(!good.scores_judge.contains_key("speed"));
    assert_eq!(good.scores["correctness"], 1.0);
    assert_eq!(good.scores["aggregate"], 0.996);
    assert_eq!(report.leaderboard[0].candidate_name, "good");
}
