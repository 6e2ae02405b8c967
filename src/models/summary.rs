//! Run totals accumulated from outcomes

use serde::{Deserialize, Serialize};
use std::fmt;

use super::message::Outcome;

/// Running totals for a suite run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub total_duration_ms: u64,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &Outcome) {
        self.total += 1;
        if outcome.passed() {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.total_duration_ms += outcome.duration_ms;
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} jobs, {} passed, {} failed ({:.1}%) in {}ms",
            self.total,
            self.passed,
            self.failed,
            self.pass_rate(),
            self.total_duration_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Job, JobId};

    fn outcome(id: u64, passed: bool, duration_ms: u64) -> Outcome {
        let mut job = Job::new(JobId(id), vec![]);
        job.record(passed);
        Outcome {
            job,
            output: String::new(),
            exit_code: Some(if passed { 0 } else { 1 }),
            duration_ms,
        }
    }

    #[test]
    fn test_summary_totals() {
        let mut summary = RunSummary::default();
        summary.record(&outcome(0, true, 100));
        summary.record(&outcome(1, false, 50));
        summary.record(&outcome(2, true, 10));

        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_duration_ms, 160);
        assert!(!summary.is_all_passed());
    }

    #[test]
    fn test_empty_summary() {
        let summary = RunSummary::default();
        assert_eq!(summary.pass_rate(), 0.0);
        assert!(summary.is_all_passed());
    }
}
