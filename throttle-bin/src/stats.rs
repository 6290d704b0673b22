use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use throttle_lib::TallySnapshot;

/// Latency of every finished request, successful or not.
///
/// Cloning yields a handle to the same samples.
#[derive(Debug, Clone, Default)]
pub(crate) struct Latencies {
    samples: Arc<Mutex<Vec<Duration>>>,
}

impl Latencies {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, elapsed: Duration) {
        self.samples.lock().push(elapsed);
    }

    /// All samples in milliseconds, sorted ascending
    fn sorted_millis(&self) -> Vec<f64> {
        let mut millis: Vec<f64> = self
            .samples
            .lock()
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        millis.sort_by(f64::total_cmp);
        millis
    }
}

/// Value at `percentile` (0 to 100) of an ascending slice.
///
/// Interpolates linearly between the two closest ranks. An empty slice
/// yields 0.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub(crate) fn percentile(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = percentile / 100.0 * (sorted.len() - 1) as f64;
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    if low == high {
        return sorted[low];
    }
    let weight = rank - low as f64;
    sorted[low] * (1.0 - weight) + sorted[high] * weight
}

/// Everything printed at the end of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct RunSummary {
    /// `true` if the run was cut short by Ctrl+C or the global timeout
    pub(crate) canceled: bool,
    pub(crate) succeeded: u64,
    pub(crate) failed: u64,
    pub(crate) max_concurrent: usize,
    pub(crate) avg_latency_ms: f64,
    pub(crate) p95_latency_ms: f64,
    #[serde(with = "humantime_serde")]
    pub(crate) total_time: Duration,
}

impl RunSummary {
    pub(crate) fn new(
        tally: TallySnapshot,
        latencies: &Latencies,
        total_time: Duration,
        canceled: bool,
    ) -> Self {
        let millis = latencies.sorted_millis();
        #[allow(clippy::cast_precision_loss)]
        let avg_latency_ms = if millis.is_empty() {
            0.0
        } else {
            millis.iter().sum::<f64>() / millis.len() as f64
        };

        Self {
            canceled,
            succeeded: tally.succeeded,
            failed: tally.failed,
            max_concurrent: tally.max_in_flight,
            avg_latency_ms,
            p95_latency_ms: percentile(&millis, 95.0),
            total_time,
        }
    }

    #[inline]
    pub(crate) const fn is_success(&self) -> bool {
        !self.canceled && self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use throttle_lib::TallySnapshot;

    use super::{Latencies, RunSummary, percentile};

    #[rstest]
    #[case(&[], 95.0, 0.0)]
    #[case(&[7.0], 95.0, 7.0)]
    #[case(&[1.0, 2.0, 3.0, 4.0, 5.0], 50.0, 3.0)]
    #[case(&[1.0, 2.0, 3.0, 4.0, 5.0], 95.0, 4.8)]
    #[case(&[10.0, 20.0], 0.0, 10.0)]
    #[case(&[10.0, 20.0], 100.0, 20.0)]
    fn test_percentile(#[case] sorted: &[f64], #[case] p: f64, #[case] expected: f64) {
        let value = percentile(sorted, p);
        assert!((value - expected).abs() < 1e-9, "{value} != {expected}");
    }

    #[test]
    fn test_summary_from_samples() {
        let latencies = Latencies::new();
        for ms in [40, 10, 30, 20] {
            latencies.record(Duration::from_millis(ms));
        }
        let tally = TallySnapshot {
            in_flight: 0,
            max_in_flight: 3,
            succeeded: 3,
            failed: 1,
        };

        let summary = RunSummary::new(tally, &latencies, Duration::from_secs(2), false);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.max_concurrent, 3);
        assert!((summary.avg_latency_ms - 25.0).abs() < 1e-9);
        // rank 0.95 * 3 = 2.85 between 30 and 40
        assert!((summary.p95_latency_ms - 38.5).abs() < 1e-9);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_empty_summary() {
        let summary = RunSummary::new(
            TallySnapshot::default(),
            &Latencies::new(),
            Duration::ZERO,
            true,
        );
        assert_eq!(summary.avg_latency_ms, 0.0);
        assert_eq!(summary.p95_latency_ms, 0.0);
        assert!(!summary.is_success());
    }
}
