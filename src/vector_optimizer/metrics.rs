//! Per-call timing history for the optimizer pass.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const HISTORY_LIMIT: usize = 100;
pub const STATS_WINDOW: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct CallMetrics {
    pub at: DateTime<Utc>,
    pub elapsed_ms: f64,
    pub vectors_found: usize,
    pub vectors_transformed: usize,
    pub sql_len_before: usize,
    pub sql_len_after: usize,
    pub params_before: usize,
    pub params_after: usize,
    pub within_budget: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct OptimizerStats {
    pub total_calls: u64,
    pub total_violations: u64,
    pub sample_size: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// Percentage of sampled calls within budget.
    pub compliance_rate: f64,
    pub budget_ms: f64,
}

#[derive(Debug, Default)]
pub(crate) struct MetricsHistory {
    calls: VecDeque<CallMetrics>,
    total_calls: u64,
    total_violations: u64,
}

impl MetricsHistory {
    pub fn record(&mut self, m: CallMetrics) {
        self.total_calls += 1;
        if !m.within_budget { self.total_violations += 1; }
        if self.calls.len() == HISTORY_LIMIT { self.calls.pop_front(); }
        self.calls.push_back(m);
    }

    pub fn recent(&self) -> Vec<CallMetrics> { self.calls.iter().cloned().collect() }

    pub fn stats(&self, budget_ms: f64) -> OptimizerStats {
        let window: Vec<&CallMetrics> = self.calls.iter().rev().take(STATS_WINDOW).collect();
        if window.is_empty() {
            return OptimizerStats { budget_ms, compliance_rate: 100.0, ..Default::default() };
        }
        let times: Vec<f64> = window.iter().map(|m| m.elapsed_ms).collect();
        let within = window.iter().filter(|m| m.within_budget).count();
        OptimizerStats {
            total_calls: self.total_calls,
            total_violations: self.total_violations,
            sample_size: window.len(),
            avg_ms: times.iter().sum::<f64>() / times.len() as f64,
            min_ms: times.iter().cloned().fold(f64::INFINITY, f64::min),
            max_ms: times.iter().cloned().fold(0.0, f64::max),
            compliance_rate: within as f64 * 100.0 / window.len() as f64,
            budget_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(ms: f64, ok: bool) -> CallMetrics {
        CallMetrics {
            at: Utc::now(),
            elapsed_ms: ms,
            vectors_found: 1,
            vectors_transformed: 1,
            sql_len_before: 10,
            sql_len_after: 20,
            params_before: 1,
            params_after: 0,
            within_budget: ok,
        }
    }

    #[test]
    fn history_is_bounded_and_stats_use_recent_window() {
        let mut h = MetricsHistory::default();
        for _ in 0..120 { h.record(call(10.0, false)); }
        for _ in 0..50 { h.record(call(1.0, true)); }
        assert_eq!(h.recent().len(), HISTORY_LIMIT);
        let s = h.stats(5.0);
        assert_eq!(s.total_calls, 170);
        assert_eq!(s.total_violations, 120);
        assert_eq!(s.sample_size, STATS_WINDOW);
        assert_eq!(s.compliance_rate, 100.0);
        assert_eq!(s.max_ms, 1.0);
    }

    #[test]
    fn empty_history() {
        let s = MetricsHistory::default().stats(5.0);
        assert_eq!(s.total_calls, 0);
        assert_eq!(s.compliance_rate, 100.0);
    }
}
