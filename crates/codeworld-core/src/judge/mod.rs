//! Judge: canonical metrics, aggregation and ranking.
//!
//! The rubric is the only source of truth for ranking. Contestant scoring
//! programs run in the sandbox and may inform search, but leaderboards are
//! built from [`rubric::judge_score`] under a [`aggregate::RankingStrategy`].
//!
//! # Modules
//!
//! - [`rubric`]      — `judge_score()`, `MetricSet`, `clamp01()`
//! - [`aggregate`]   — `aggregate_judge()`, `lexicographic_aggregate()`, `RankingStrategy`
//! - [`leaderboard`] — `rank()`, `LeaderboardEntry`, `source_digest()`
//! - [`error`]       — `JudgeError` / `JudgeResult`

pub mod aggregate;
pub mod error;
pub mod leaderboard;
pub mod rubric;

pub use aggregate::{
    aggregate_judge, lexicographic_aggregate, AggregateScore, LexicographicRanking, RankingMode,
    RankingStrategy, WeightedRanking,
};
pub use error::{JudgeError, JudgeResult};
pub use leaderboard::{rank, source_digest, LeaderboardEntry, ScoredCandidate};
pub use rubric::{clamp01, judge_score, metrics_from_json, MetricSet};
