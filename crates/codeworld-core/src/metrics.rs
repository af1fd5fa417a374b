//! Global atomic counters for CodeWorld observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of an evaluation).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    runner_launches: AtomicU64,
    runner_timeouts: AtomicU64,
    candidates_rejected: AtomicU64,
    scoring_fallbacks: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runner_launches: AtomicU64::new(0),
            runner_timeouts: AtomicU64::new(0),
            candidates_rejected: AtomicU64::new(0),
            scoring_fallbacks: AtomicU64::new(0),
        }
    }

    /// A runner process was spawned.
    pub fn inc_runner_launches(&self) {
        self.runner_launches.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runner_launches", "counter incremented");
    }

    /// A runner process was killed for exceeding its wall-clock budget.
    pub fn inc_runner_timeouts(&self) {
        self.runner_timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runner_timeouts", "counter incremented");
    }

    /// A candidate was rejected by the validator.
    pub fn inc_candidates_rejected(&self) {
        self.candidates_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "candidates_rejected", "counter incremented");
    }

    /// Contestant scoring failed and the canonical rubric was used instead.
    pub fn inc_scoring_fallbacks(&self) {
        self.scoring_fallbacks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "scoring_fallbacks", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runner_launches = self.runner_launches(),
            runner_timeouts = self.runner_timeouts(),
            candidates_rejected = self.candidates_rejected(),
            scoring_fallbacks = self.scoring_fallbacks(),
        );
    }

    pub fn runner_launches(&self) -> u64 {
        self.runner_launches.load(Ordering::Relaxed)
    }

    pub fn runner_timeouts(&self) -> u64 {
        self.runner_timeouts.load(Ordering::Relaxed)
    }

    pub fn candidates_rejected(&self) -> u64 {
        self.candidates_rejected.load(Ordering::Relaxed)
    }

    pub fn scoring_fallbacks(&self) -> u64 {
        self.scoring_fallbacks.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_runner_launches();
        m.inc_runner_launches();
        assert_eq!(m.runner_launches(), 2);

        m.inc_runner_timeouts();
        assert_eq!(m.runner_timeouts(), 1);

        m.inc_candidates_rejected();
        m.inc_scoring_fallbacks();
        m.inc_scoring_fallbacks();
        assert_eq!(m.candidates_rejected(), 1);
        assert_eq!(m.scoring_fallbacks(), 2);
    }
}
