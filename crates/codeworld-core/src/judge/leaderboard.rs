//! Ranked leaderboard of scored candidates.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::aggregate::{AggregateScore, RankingStrategy};
use super::error::JudgeResult;
use super::rubric::{check_metrics, MetricSet};
use crate::obs;

/// Decimal places kept in the presented aggregate.
pub const AGGREGATE_PLACES: i32 = 3;

/// A candidate ready to be ranked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub name: String,
    #[serde(default)]
    pub metrics: MetricSet,
    /// SHA-256 of the exact source text that was judged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_digest: Option<String>,
    /// Why the candidate produced no result, if it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ScoredCandidate {
    pub fn new(name: impl Into<String>, metrics: MetricSet) -> Self {
        Self {
            name: name.into(),
            metrics,
            source_digest: None,
            failure: None,
        }
    }

    /// A candidate that failed to run; it ranks with an empty metric set.
    pub fn failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::new(name, MetricSet::new())
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source_digest = Some(source_digest(source));
        self
    }
}

/// One row of the leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// One-based position.
    pub rank: usize,
    pub candidate_name: String,
    pub metrics: MetricSet,
    pub aggregate_score: AggregateScore,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Hex SHA-256 of a program's source text.
pub fn source_digest(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

/// Sort candidates best-first under `strategy`. Ties are broken by name
/// ascending so the order is total and reproducible.
///
/// Fails if any candidate carries a metric outside `[0, 1]`.
pub fn rank(
    candidates: Vec<ScoredCandidate>,
    strategy: &dyn RankingStrategy,
) -> JudgeResult<Vec<LeaderboardEntry>> {
    for c in &candidates {
        check_metrics(&c.metrics)?;
    }

    let mut sorted = candidates;
    sorted.sort_by(|a, b| {
        strategy
            .compare(&b.metrics, &a.metrics)
            .then_with(|| a.name.cmp(&b.name))
    });

    let entries: Vec<LeaderboardEntry> = sorted
        .into_iter()
        .enumerate()
        .map(|(i, c)| LeaderboardEntry {
            rank: i + 1,
            aggregate_score: strategy.aggregate(&c.metrics).rounded(AGGREGATE_PLACES),
            candidate_name: c.name,
            metrics: c.metrics,
            source_digest: c.source_digest,
            failure: c.failure,
        })
        .collect();

    obs::emit_leaderboard_ranked(
        strategy.name(),
        entries.len(),
        entries.first().map(|e| e.candidate_name.as_str()),
    );
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::aggregate::{LexicographicRanking, WeightedRanking};
    use crate::judge::error::JudgeError;

    fn cand(name: &str, pairs: &[(&str, f64)]) -> ScoredCandidate {
        ScoredCandidate::new(
            name,
            pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        )
    }

    fn names(entries: &[LeaderboardEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.candidate_name.as_str()).collect()
    }

    #[test]
    fn test_rank_weighted_best_first() {
        let entries = rank(
            vec![
                cand("slow", &[("correctness", 1.0), ("speed", 0.1)]),
                cand("fast", &[("correctness", 1.0), ("speed", 0.9)]),
                ScoredCandidate::failed("broken", "invocation_failed: boom"),
            ],
            &WeightedRanking,
        )
        .unwrap();
        assert_eq!(names(&entries), vec!["fast", "slow", "broken"]);
        assert_eq!(entries[0].rank, 1);
        assert_eq!(entries[2].aggregate_score, AggregateScore::Weighted(0.0));
        assert_eq!(entries[2].failure.as_deref(), Some("invocation_failed: boom"));
    }

    #[test]
    fn test_ties_broken_by_name() {
        let entries = rank(
            vec![
                cand("zeta", &[("speed", 0.5)]),
                cand("alpha", &[("speed", 0.5)]),
                cand("mid", &[("speed", 0.5)]),
            ],
            &LexicographicRanking,
        )
        .unwrap();
        assert_eq!(names(&entries), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_failed_candidate_lexicographic_key() {
        let entries = rank(
            vec![ScoredCandidate::failed("x", "load_failed: nope")],
            &LexicographicRanking,
        )
        .unwrap();
        assert_eq!(
            entries[0].aggregate_score,
            AggregateScore::Lexicographic([0.0, 0.0, 0.0])
        );
    }

    #[test]
    fn test_out_of_range_metric_rejected() {
        let err = rank(vec![cand("bad", &[("speed", 2.0)])], &WeightedRanking).unwrap_err();
        assert!(matches!(err, JudgeError::MetricOutOfRange { .. }));
    }

    #[test]
    fn test_source_digest_is_stable_sha256() {
        let d = source_digest("");
        assert_eq!(
            d,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        let c = cand("a", &[]).with_source("def solve():\n    return 1\n");
        assert_eq!(c.source_digest.as_deref().map(str::len), Some(64));
    }

    #[test]
    fn test_candidate_deserializes_with_defaults() {
        let c: ScoredCandidate = serde_json::from_str(r#"{"name": "a"}"#).unwrap();
        assert!(c.metrics.is_empty());
        assert!(c.source_digest.is_none());
    }
}
