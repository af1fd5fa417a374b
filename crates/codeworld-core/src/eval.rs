//! End-to-end evaluation of a task's variants.
//!
//! For every variant, concurrently: validate, run in a strategy runner,
//! optionally score with the contestant's scoring program (falling back to
//! the rubric), and always score with the canonical judge. The judge metrics
//! alone decide the leaderboard.

use std::collections::BTreeMap;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use tracing::{debug, Instrument};

use crate::judge::rubric::retain_metrics;
use crate::judge::{
    aggregate_judge, judge_score, metrics_from_json, rank, source_digest, JudgeError,
    LeaderboardEntry, MetricSet, RankingMode, ScoredCandidate,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::sandbox::{
    launch, validate, ExecutionResult, RunnerBinary, RunnerKind, SandboxError, SupervisorConfig,
};

/// Key of the weighted aggregate added to contestant scores.
pub const AGGREGATE_KEY: &str = "aggregate";

/// Context key never forwarded to candidates.
pub const EXPECTED_KEY: &str = "expected";

/// Errors that abort a whole evaluation (per-variant failures do not).
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("task has no variants")]
    NoVariants,

    #[error("judge error: {0}")]
    Judge(#[from] JudgeError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
}

/// Result type for evaluations.
pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// A task file: the context plus the competing variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSpec {
    pub task: String,
    #[serde(default)]
    pub context: Json,
    /// Variant name to source text.
    pub variants: BTreeMap<String, String>,
    /// Contestant scoring program defining `score(...)`.
    #[serde(default)]
    pub scoring: Option<String>,
    /// Canonical metrics to keep; all of them when absent.
    #[serde(default)]
    pub metrics: Option<Vec<String>>,
    #[serde(default)]
    pub mode: RankingMode,
}

/// Where the runners live and how long they may take.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    pub strategy_runner: RunnerBinary,
    pub scoring_runner: RunnerBinary,
    pub supervisor: SupervisorConfig,
}

impl EvalOptions {
    /// Runners installed next to the current executable.
    pub fn from_current_exe(supervisor: SupervisorConfig) -> EvalResult<Self> {
        Ok(Self {
            strategy_runner: RunnerBinary::sibling(RunnerKind::Strategy)?,
            scoring_runner: RunnerBinary::sibling(RunnerKind::Scoring)?,
            supervisor,
        })
    }
}

/// Per-variant record of what happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantReport {
    pub name: String,
    pub source_digest: String,
    pub status: VariantStatus,
    /// `{"result": ..., "loc": ...}` when the run succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Json>,
    #[serde(default)]
    pub timings: Json,
    /// Contestant scores (or the rubric fallback) with a rounded `aggregate`.
    #[serde(default)]
    pub scores: MetricSet,
    /// Canonical judge metrics.
    #[serde(default)]
    pub scores_judge: MetricSet,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum VariantStatus {
    Ok,
    Failed(String),
}

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalReport {
    pub task: String,
    pub mode: RankingMode,
    pub variants: Vec<VariantReport>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// The context as candidates see it: everything but the expected answer.
fn candidate_context(context: &Json) -> Json {
    match context {
        Json::Object(map) => {
            let mut map = map.clone();
            map.remove(EXPECTED_KEY);
            Json::Object(map)
        }
        Json::Null => json!({}),
        other => other.clone(),
    }
}

fn failure_text(kind: RunnerKind, result: &ExecutionResult) -> Option<String> {
    match result {
        ExecutionResult::Failure { stage, message } => {
            Some(format!("{}: {message}", kind.error_prefix(*stage)))
        }
        ExecutionResult::Success { .. } => None,
    }
}

/// Evaluate every variant of `spec` and rank them.
pub async fn evaluate(spec: &TaskSpec, opts: &EvalOptions) -> EvalResult<EvalReport> {
    if spec.variants.is_empty() {
        return Err(EvalError::NoVariants);
    }
    if let Some(keep) = &spec.metrics {
        retain_metrics(&mut MetricSet::new(), keep)?;
    }
    let span = obs::eval_span(&spec.task);

    let reports = join_all(
        spec.variants
            .iter()
            .map(|(name, source)| evaluate_variant(spec, opts, name, source)),
    )
    .instrument(span.clone())
    .await
    .into_iter()
    .collect::<EvalResult<Vec<_>>>()?;

    let candidates = reports
        .iter()
        .map(|r| ScoredCandidate {
            name: r.name.clone(),
            metrics: r.scores_judge.clone(),
            source_digest: Some(r.source_digest.clone()),
            failure: match &r.status {
                VariantStatus::Ok => None,
                VariantStatus::Failed(e) => Some(e.clone()),
            },
        })
        .collect();
    let strategy = spec.mode.strategy();
    let leaderboard = span.in_scope(|| rank(candidates, strategy.as_ref()))?;

    Ok(EvalReport {
        task: spec.task.clone(),
        mode: spec.mode,
        variants: reports,
        leaderboard,
    })
}

async fn evaluate_variant(
    spec: &TaskSpec,
    opts: &EvalOptions,
    name: &str,
    source: &str,
) -> EvalResult<VariantReport> {
    let mut report = VariantReport {
        name: name.to_string(),
        source_digest: source_digest(source),
        status: VariantStatus::Ok,
        outputs: None,
        timings: json!({}),
        scores: MetricSet::new(),
        scores_judge: MetricSet::new(),
    };

    // Rejected programs never reach a runner process.
    if let Err(err) = validate(source) {
        METRICS.inc_candidates_rejected();
        obs::emit_candidate_validated(name, false, Some(&err.to_string()));
        report.status = VariantStatus::Failed(format!("validation_failed: {err}"));
        return Ok(report);
    }
    obs::emit_candidate_validated(name, true, None);

    let payload = json!({ "context": candidate_context(&spec.context) });
    let outcome = match launch(&opts.strategy_runner, source, &payload, &opts.supervisor).await {
        Ok(outcome) => outcome,
        Err(err) => {
            report.status = VariantStatus::Failed(err.to_string());
            return Ok(report);
        }
    };
    report.timings = json!({ "duration_ms": outcome.duration_ms });
    if let Some(failure) = failure_text(RunnerKind::Strategy, &outcome.result) {
        report.status = VariantStatus::Failed(failure);
        return Ok(report);
    }
    if let ExecutionResult::Success { value, loc } = outcome.result {
        report.outputs = Some(json!({ "result": value, "loc": loc }));
    }
    let outputs = report.outputs.clone().unwrap_or_else(|| json!({}));
    let task = Json::String(spec.task.clone());

    let mut judge = judge_score(&task, &spec.context, &outputs, &report.timings);
    if let Some(keep) = &spec.metrics {
        retain_metrics(&mut judge, keep)?;
    }
    obs::emit_judge_scored(name, judge.len(), aggregate_judge(&judge));

    let mut scores = match &spec.scoring {
        Some(program) => {
            contestant_scores(spec, opts, name, program, &outputs, &report.timings).await
        }
        None => MetricSet::new(),
    };
    if scores.is_empty() {
        scores = judge.clone();
    }
    if !scores.contains_key(AGGREGATE_KEY) && !scores.is_empty() {
        let aggregate = round3(aggregate_judge(&scores));
        scores.insert(AGGREGATE_KEY.to_string(), aggregate);
    }

    report.scores = scores;
    report.scores_judge = judge;
    Ok(report)
}

/// Numeric scores from the contestant's program, or empty on any failure.
async fn contestant_scores(
    spec: &TaskSpec,
    opts: &EvalOptions,
    name: &str,
    program: &str,
    outputs: &Json,
    timings: &Json,
) -> MetricSet {
    let payload = json!({
        "task": spec.task,
        "context": spec.context,
        "outputs": outputs,
        "timings": timings,
    });
    match launch(&opts.scoring_runner, program, &payload, &opts.supervisor).await {
        Ok(outcome) => match outcome.result {
            ExecutionResult::Success { value, .. } => {
                debug!(candidate = %name, "contestant scoring succeeded");
                metrics_from_json(&value)
            }
            failed => {
                let reason = failure_text(RunnerKind::Scoring, &failed).unwrap_or_default();
                METRICS.inc_scoring_fallbacks();
                obs::emit_scoring_fallback(name, &reason);
                MetricSet::new()
            }
        },
        Err(err) => {
            METRICS.inc_scoring_fallbacks();
            obs::emit_scoring_fallback(name, &err);
            MetricSet::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_spec_defaults() {
        let spec: TaskSpec = serde_json::from_str(
            r#"{"task": "double", "variants": {"a": "def solve(x):\n    return x\n"}}"#,
        )
        .unwrap();
        assert_eq!(spec.mode, RankingMode::Weighted);
        assert!(spec.scoring.is_none());
        assert!(spec.metrics.is_none());
        assert_eq!(spec.context, Json::Null);
    }

    #[test]
    fn test_expected_is_hidden_from_candidates() {
        let ctx = json!({"input": [1], "expected": [2]});
        assert_eq!(candidate_context(&ctx), json!({"input": [1]}));
        assert_eq!(candidate_context(&Json::Null), json!({}));
    }

    #[test]
    fn test_variant_status_serialization() {
        let s = serde_json::to_value(VariantStatus::Failed("load_failed: x".into())).unwrap();
        assert_eq!(s, json!({"status": "failed", "error": "load_failed: x"}));
        let s = serde_json::to_value(VariantStatus::Ok).unwrap();
        assert_eq!(s, json!({"status": "ok"}));
    }

    #[test]
    fn test_round3() {
        assert_eq!(round3(0.96449), 0.964);
        assert_eq!(round3(0.9), 0.9);
    }

    #[tokio::test]
    async fn test_empty_task_rejected() {
        let spec = TaskSpec {
            task: "t".into(),
            context: json!({}),
            variants: BTreeMap::new(),
            scoring: None,
            metrics: None,
            mode: RankingMode::Weighted,
        };
        let opts = EvalOptions {
            strategy_runner: RunnerBinary::new(RunnerKind::Strategy, "/nonexistent"),
            scoring_runner: RunnerBinary::new(RunnerKind::Scoring, "/nonexistent"),
            supervisor: SupervisorConfig::default(),
        };
        assert!(matches!(
            evaluate(&spec, &opts).await,
            Err(EvalError::NoVariants)
        ));
    }

    #[tokio::test]
    async fn test_rejected_and_unlaunchable_variants_rank_last() {
        let mut variants = BTreeMap::new();
        variants.insert("bad".to_string(), "import os\n".to_string());
        variants.insert("lost".to_string(), "def solve(x):\n    return x\n".to_string());
        let spec = TaskSpec {
            task: "t".into(),
            context: json!({"input": 1, "expected": 1}),
            variants,
            scoring: None,
            metrics: None,
            mode: RankingMode::Weighted,
        };
        let opts = EvalOptions {
            strategy_runner: RunnerBinary::new(RunnerKind::Strategy, "/nonexistent/runner"),
            scoring_runner: RunnerBinary::new(RunnerKind::Scoring, "/nonexistent/runner"),
            supervisor: SupervisorConfig::default(),
        };
        let report = evaluate(&spec, &opts).await.unwrap();
        assert_eq!(report.leaderboard.len(), 2);
        let bad = report.variants.iter().find(|v| v.name == "bad").unwrap();
        assert_eq!(
            bad.status,
            VariantStatus::Failed("validation_failed: node_forbidden:Import".into())
        );
        let lost = report.variants.iter().find(|v| v.name == "lost").unwrap();
        assert!(matches!(&lost.status, VariantStatus::Failed(e) if e.starts_with("failed to launch runner")));
        // Both failed: ties broken by name.
        assert_eq!(report.leaderboard[0].candidate_name, "bad");
    }
}
