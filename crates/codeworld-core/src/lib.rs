//! CodeWorld Core Library
//!
//! Sandboxed execution of untrusted candidate programs and the deterministic
//! judge that ranks them.

pub mod eval;
pub mod judge;
pub mod lang;
pub mod metrics;
pub mod obs;
pub mod sandbox;
pub mod telemetry;

pub use eval::{
    evaluate, EvalError, EvalOptions, EvalReport, EvalResult, TaskSpec, VariantReport,
    VariantStatus,
};

pub use judge::{
    aggregate_judge, judge_score, lexicographic_aggregate, rank, source_digest, AggregateScore,
    JudgeError, JudgeResult, LeaderboardEntry, MetricSet, RankingMode, RankingStrategy,
    ScoredCandidate,
};

pub use lang::{parse_module, Interpreter, ParseError, RuntimeError, Value};

pub use sandbox::{
    launch, run_scoring, run_strategy, serve, spawn_worker, validate, ExecutionResult,
    ResourceLimits, RunnerBinary, RunnerKind, RunnerOutcome, SandboxError, SandboxResult,
    SupervisorConfig,
};

pub use metrics::METRICS;
pub use obs::{
    emit_candidate_validated, emit_judge_scored, emit_leaderboard_ranked, emit_runner_finished,
    emit_runner_timed_out, emit_scoring_fallback, eval_span,
};
pub use telemetry::init_tracing;

/// CodeWorld version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
