//! Canonical judge rubric.
//!
//! The rubric is deterministic and never runs candidate code: it looks only
//! at the context, the collected outputs and the measured timings. Contestant
//! scoring programs may guide search, but ranking uses these metrics.

use std::collections::BTreeMap;

use serde_json::Value as Json;

use super::error::{JudgeError, JudgeResult};
use crate::lang::json_values_equal;

/// Metric name to score in `[0, 1]`, ordered by name.
pub type MetricSet = BTreeMap<String, f64>;

pub const CORRECTNESS: &str = "correctness";
pub const SPEED: &str = "speed";
pub const BREVITY: &str = "brevity";

/// Canonical metrics, highest priority first.
pub const CANONICAL_METRICS: [&str; 3] = [CORRECTNESS, SPEED, BREVITY];

/// Duration at which `speed` reaches zero.
pub const SPEED_BUDGET_MS: f64 = 1000.0;

/// Line count at which `brevity` reaches zero.
pub const BREVITY_BUDGET_LOC: f64 = 100.0;

/// Clamp to `[0, 1]`; NaN maps to 0.
pub fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Compute the canonical metrics for one candidate.
///
/// * `correctness` — present only when `context.expected` is non-null;
///   1.0 iff `outputs.result` equals it by value (`10 == 10.0`).
/// * `speed` — `1 - timings.duration_ms / 1000`, missing duration is 0 ms.
/// * `brevity` — `1 - outputs.loc / 100`, present only when `loc` is a number.
///
/// `task` does not influence the canonical metrics.
pub fn judge_score(_task: &Json, context: &Json, outputs: &Json, timings: &Json) -> MetricSet {
    let mut metrics = MetricSet::new();

    match context.get("expected") {
        Some(Json::Null) | None => {}
        Some(expected) => {
            let result = outputs.get("result").unwrap_or(&Json::Null);
            let score = if json_values_equal(result, expected) {
                1.0
            } else {
                0.0
            };
            metrics.insert(CORRECTNESS.to_string(), score);
        }
    }

    let duration_ms = timings
        .get("duration_ms")
        .and_then(Json::as_f64)
        .unwrap_or(0.0);
    metrics.insert(
        SPEED.to_string(),
        clamp01(1.0 - duration_ms / SPEED_BUDGET_MS),
    );

    if let Some(loc) = outputs.get("loc").and_then(Json::as_f64) {
        metrics.insert(
            BREVITY.to_string(),
            clamp01(1.0 - loc / BREVITY_BUDGET_LOC),
        );
    }

    metrics
}

/// Keep only the numeric entries of a JSON object, clamped to `[0, 1]`.
/// Anything that is not an object yields an empty set.
pub fn metrics_from_json(value: &Json) -> MetricSet {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_f64().map(|x| (k.clone(), clamp01(x))))
                .collect()
        })
        .unwrap_or_default()
}

/// Reject any metric outside `[0, 1]`.
pub fn check_metrics(metrics: &MetricSet) -> JudgeResult<()> {
    for (name, value) in metrics {
        if !(0.0..=1.0).contains(value) {
            return Err(JudgeError::MetricOutOfRange {
                name: name.clone(),
                value: *value,
            });
        }
    }
    Ok(())
}

/// Restrict `metrics` to the canonical names in `keep`.
pub fn retain_metrics(metrics: &mut MetricSet, keep: &[String]) -> JudgeResult<()> {
    if let Some(unknown) = keep
        .iter()
        .find(|k| !CANONICAL_METRICS.contains(&k.as_str()))
    {
        return Err(JudgeError::UnknownMetric(unknown.clone()));
    }
    metrics.retain(|name, _| keep.iter().any(|k| k == name));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_metrics() {
        let m = judge_score(
            &json!("sum"),
            &json!({"expected": 10}),
            &json!({"result": 10.0, "loc": 10}),
            &json!({"duration_ms": 100}),
        );
        assert_eq!(m[CORRECTNESS], 1.0);
        assert!((m[SPEED] - 0.9).abs() < 1e-12);
        assert!((m[BREVITY] - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_correctness_absent_without_expected() {
        let m = judge_score(
            &Json::Null,
            &json!({"expected": null}),
            &json!({"result": 1}),
            &json!({}),
        );
        assert!(!m.contains_key(CORRECTNESS));
        assert_eq!(m[SPEED], 1.0, "missing duration counts as 0 ms");
        assert!(!m.contains_key(BREVITY));
    }

    #[test]
    fn test_wrong_result_scores_zero() {
        let m = judge_score(
            &Json::Null,
            &json!({"expected": [1, 2]}),
            &json!({"result": [2, 1]}),
            &json!({}),
        );
        assert_eq!(m[CORRECTNESS], 0.0);
        let m = judge_score(&Json::Null, &json!({"expected": 0}), &json!({}), &json!({}));
        assert_eq!(m[CORRECTNESS], 0.0, "missing result compares as null");
    }

    #[test]
    fn test_clamping() {
        let m = judge_score(
            &Json::Null,
            &json!({}),
            &json!({"loc": 250}),
            &json!({"duration_ms": 5000}),
        );
        assert_eq!(m[SPEED], 0.0);
        assert_eq!(m[BREVITY], 0.0);
        let m = judge_score(&Json::Null, &json!({}), &json!({"loc": true}), &json!({"duration_ms": -5}));
        assert_eq!(m[SPEED], 1.0);
        assert!(!m.contains_key(BREVITY), "boolean loc is not a number");
        assert_eq!(clamp01(f64::NAN), 0.0);
    }

    #[test]
    fn test_metrics_from_json_keeps_numbers_only() {
        let m = metrics_from_json(&json!({"a": 0.5, "b": "x", "c": 3, "d": null}));
        assert_eq!(m.len(), 2);
        assert_eq!(m["a"], 0.5);
        assert_eq!(m["c"], 1.0);
        assert!(metrics_from_json(&json!([1])).is_empty());
    }

    #[test]
    fn test_retain_metrics() {
        let mut m: MetricSet = [(CORRECTNESS, 1.0), (SPEED, 0.5), (BREVITY, 0.2)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        retain_metrics(&mut m, &["speed".to_string()]).unwrap();
        assert_eq!(m.keys().collect::<Vec<_>>(), vec!["speed"]);
        assert!(matches!(
            retain_metrics(&mut m, &["style".to_string()]),
            Err(JudgeError::UnknownMetric(_))
        ));
    }

    #[test]
    fn test_check_metrics() {
        let mut m = MetricSet::new();
        m.insert("x".into(), 1.0);
        assert!(check_metrics(&m).is_ok());
        m.insert("y".into(), 1.5);
        assert!(matches!(
            check_metrics(&m),
            Err(JudgeError::MetricOutOfRange { .. })
        ));
    }
}
