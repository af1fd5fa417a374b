//! Aggregation of metric sets into rankable scores.
//!
//! Two independent total orders are offered as [`RankingStrategy`]
//! implementations:
//!
//! - [`WeightedRanking`] — convex combination with canonical weights,
//!   renormalised over the metrics actually present.
//! - [`LexicographicRanking`] — `[correctness, speed, brevity]` compared
//!   element-wise, highest priority first.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::JudgeError;
use super::rubric::{MetricSet, BREVITY, CANONICAL_METRICS, CORRECTNESS, SPEED};

/// Canonical weights of the weighted aggregate.
pub const DEFAULT_WEIGHTS: [(&str, f64); 3] = [(CORRECTNESS, 0.7), (SPEED, 0.2), (BREVITY, 0.1)];

/// Weighted aggregate over the canonical metrics present in `metrics`.
/// Non-canonical metrics are ignored; an empty overlap yields `0.0`.
pub fn aggregate_judge(metrics: &MetricSet) -> f64 {
    let present: Vec<(f64, f64)> = DEFAULT_WEIGHTS
        .iter()
        .filter_map(|(name, w)| metrics.get(*name).map(|v| (*w, *v)))
        .collect();
    let total: f64 = present.iter().map(|(w, _)| w).sum();
    if present.is_empty() || total <= 0.0 {
        return 0.0;
    }
    present.iter().map(|(w, v)| (w / total) * v).sum()
}

/// `[correctness, speed, brevity]`, missing metrics as `0.0`.
pub fn lexicographic_aggregate(metrics: &MetricSet) -> [f64; 3] {
    CANONICAL_METRICS.map(|name| metrics.get(name).copied().unwrap_or(0.0))
}

/// A computed aggregate: a scalar or a fixed-length key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AggregateScore {
    Weighted(f64),
    Lexicographic([f64; 3]),
}

fn round_to(x: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (x * factor).round() / factor
}

impl AggregateScore {
    /// The same score rounded for presentation. Ranking never uses the
    /// rounded form.
    pub fn rounded(self, places: i32) -> Self {
        match self {
            AggregateScore::Weighted(x) => AggregateScore::Weighted(round_to(x, places)),
            AggregateScore::Lexicographic(key) => {
                AggregateScore::Lexicographic(key.map(|x| round_to(x, places)))
            }
        }
    }
}

/// A total order over metric sets.
pub trait RankingStrategy: Send + Sync {
    /// Stable identifier (`weighted`, `lexicographic`).
    fn name(&self) -> &'static str;

    fn aggregate(&self, metrics: &MetricSet) -> AggregateScore;

    /// `Greater` when `a` ranks above `b`.
    fn compare(&self, a: &MetricSet, b: &MetricSet) -> Ordering;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedRanking;

impl RankingStrategy for WeightedRanking {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn aggregate(&self, metrics: &MetricSet) -> AggregateScore {
        AggregateScore::Weighted(aggregate_judge(metrics))
    }

    fn compare(&self, a: &MetricSet, b: &MetricSet) -> Ordering {
        aggregate_judge(a).total_cmp(&aggregate_judge(b))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LexicographicRanking;

impl RankingStrategy for LexicographicRanking {
    fn name(&self) -> &'static str {
        "lexicographic"
    }

    fn aggregate(&self, metrics: &MetricSet) -> AggregateScore {
        AggregateScore::Lexicographic(lexicographic_aggregate(metrics))
    }

    fn compare(&self, a: &MetricSet, b: &MetricSet) -> Ordering {
        let (ka, kb) = (lexicographic_aggregate(a), lexicographic_aggregate(b));
        ka.iter()
            .zip(kb.iter())
            .map(|(x, y)| x.total_cmp(y))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

/// Ranking mode as selected by configuration or on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMode {
    #[default]
    Weighted,
    Lexicographic,
}

impl RankingMode {
    pub fn strategy(self) -> Box<dyn RankingStrategy> {
        match self {
            RankingMode::Weighted => Box::new(WeightedRanking),
            RankingMode::Lexicographic => Box::new(LexicographicRanking),
        }
    }
}

impl FromStr for RankingMode {
    type Err = JudgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weighted" => Ok(RankingMode::Weighted),
            "lexicographic" | "lex" => Ok(RankingMode::Lexicographic),
            other => Err(JudgeError::UnknownMode(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, f64)]) -> MetricSet {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_weighted_full_set() {
        let m = set(&[("correctness", 1.0), ("speed", 0.88), ("brevity", 0.88)]);
        assert!((aggregate_judge(&m) - 0.964).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_renormalises_over_present() {
        let m = set(&[("speed", 0.9), ("brevity", 0.9)]);
        assert!((aggregate_judge(&m) - 0.9).abs() < 1e-9);
        let m = set(&[("correctness", 1.0), ("speed", 0.0)]);
        assert!((aggregate_judge(&m) - 0.7 / 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_empty_and_foreign_metrics() {
        assert_eq!(aggregate_judge(&MetricSet::new()), 0.0);
        assert_eq!(aggregate_judge(&set(&[("style", 1.0)])), 0.0);
    }

    #[test]
    fn test_weighted_stays_within_inputs() {
        let m = set(&[("correctness", 0.3), ("speed", 0.6), ("brevity", 0.5)]);
        let agg = aggregate_judge(&m);
        assert!((0.3..=0.6).contains(&agg));
    }

    #[test]
    fn test_lexicographic_key_fills_missing() {
        assert_eq!(
            lexicographic_aggregate(&set(&[("speed", 0.4)])),
            [0.0, 0.4, 0.0]
        );
    }

    #[test]
    fn test_lexicographic_ignores_later_positions_once_decided() {
        let a = set(&[("correctness", 1.0), ("speed", 0.9), ("brevity", 0.5)]);
        let b = set(&[("correctness", 1.0), ("speed", 0.8), ("brevity", 0.9)]);
        assert_eq!(LexicographicRanking.compare(&a, &b), Ordering::Greater);
        assert_eq!(LexicographicRanking.compare(&b, &a), Ordering::Less);
        assert_eq!(LexicographicRanking.compare(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_strategies_can_disagree() {
        let a = set(&[("correctness", 1.0), ("speed", 0.0), ("brevity", 0.0)]);
        let b = set(&[("correctness", 0.9), ("speed", 1.0), ("brevity", 1.0)]);
        assert_eq!(WeightedRanking.compare(&a, &b), Ordering::Less);
        assert_eq!(LexicographicRanking.compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn test_mode_parsing_and_serde() {
        assert_eq!("weighted".parse::<RankingMode>().unwrap(), RankingMode::Weighted);
        assert_eq!(
            "lexicographic".parse::<RankingMode>().unwrap(),
            RankingMode::Lexicographic
        );
        assert!("best".parse::<RankingMode>().is_err());
        assert_eq!(
            serde_json::to_string(&RankingMode::Lexicographic).unwrap(),
            "\"lexicographic\""
        );
        assert_eq!(RankingMode::default().strategy().name(), "weighted");
    }

    #[test]
    fn test_aggregate_score_serializes_untagged() {
        let s = serde_json::to_value(AggregateScore::Weighted(0.5)).unwrap();
        assert_eq!(s, serde_json::json!(0.5));
        let s = serde_json::to_value(AggregateScore::Lexicographic([1.0, 0.5, 0.0])).unwrap();
        assert_eq!(s, serde_json::json!([1.0, 0.5, 0.0]));
        assert_eq!(
            AggregateScore::Weighted(0.96449).rounded(3),
            AggregateScore::Weighted(0.964)
        );
    }
}
