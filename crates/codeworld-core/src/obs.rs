//! Structured observability hooks for evaluation lifecycle events.
//!
//! Events are emitted at `info!` (failures at `warn!`) with an `event`
//! field naming the lifecycle step, so they can be filtered in JSON logs.

use tracing::{info, warn};

/// Span covering one task evaluation.
///
/// ```ignore
/// let span = eval_span("sort-small");
/// // every event inside carries task = "sort-small"
/// run_variants().instrument(span).await;
/// ```
pub fn eval_span(task: &str) -> tracing::Span {
    tracing::info_span!("codeworld.eval", task = %task)
}

/// Emit event: a candidate passed or failed static validation.
pub fn emit_candidate_validated(candidate: &str, accepted: bool, reason: Option<&str>) {
    info!(
        event = "candidate.validated",
        candidate = %candidate,
        accepted = accepted,
        reason = reason.unwrap_or(""),
    );
}

/// Emit event: a runner process exited.
pub fn emit_runner_finished(runner: &str, duration_ms: u64, exit_code: Option<i32>, success: bool) {
    info!(
        event = "runner.finished",
        runner = %runner,
        duration_ms = duration_ms,
        exit_code = exit_code.unwrap_or(-1),
        success = success,
    );
}

/// Emit event: a runner was killed for exceeding its wall-clock budget.
pub fn emit_runner_timed_out(runner: &str, elapsed_ms: u64, limit_ms: u64) {
    warn!(
        event = "runner.timed_out",
        runner = %runner,
        elapsed_ms = elapsed_ms,
        limit_ms = limit_ms,
    );
}

/// Emit event: the canonical rubric scored a candidate.
pub fn emit_judge_scored(candidate: &str, metrics: usize, aggregate: f64) {
    info!(
        event = "judge.scored",
        candidate = %candidate,
        metrics = metrics,
        aggregate = aggregate,
    );
}

/// Emit event: contestant scoring failed and the rubric was used instead.
pub fn emit_scoring_fallback(candidate: &str, error: &dyn std::fmt::Display) {
    warn!(event = "scoring.fallback", candidate = %candidate, error = %error);
}

/// Emit event: a leaderboard was produced.
pub fn emit_leaderboard_ranked(mode: &str, entries: usize, leader: Option<&str>) {
    info!(
        event = "leaderboard.ranked",
        mode = %mode,
        entries = entries,
        leader = leader.unwrap_or(""),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_span_create() {
        let span = eval_span("test-task");
        let _guard = span.enter();
        emit_candidate_validated("v1", false, Some("node_forbidden:Import"));
        emit_leaderboard_ranked("weighted", 0, None);
    }
}
