use std::fmt::{self, Display};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::stats::RunSummary;

pub(crate) trait StatsFormatter {
    /// Format the summary of a run for stdout
    fn format(&self, summary: &RunSummary) -> Result<String>;
}

struct CompactRunSummary<'a>(&'a RunSummary);

impl Display for CompactRunSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.0;

        if summary.canceled {
            writeln!(f, "Canceled by user or timeout.")?;
            return write!(
                f,
                "Partial progress. Success={}, Failed={}, Max concurrent observed={}",
                summary.succeeded, summary.failed, summary.max_concurrent
            );
        }

        // Sub-millisecond precision is noise for a wall clock time
        let total_time = Duration::from_millis(
            u64::try_from(summary.total_time.as_millis()).unwrap_or(u64::MAX),
        );

        writeln!(f, "Run summary")?;
        writeln!(f, "  Success: {}", summary.succeeded)?;
        writeln!(f, "  Failed : {}", summary.failed)?;
        writeln!(f, "  Max concurrent observed: {}", summary.max_concurrent)?;
        writeln!(f, "  Avg latency: {:.1} ms", summary.avg_latency_ms)?;
        writeln!(f, "  P95 latency: {:.1} ms", summary.p95_latency_ms)?;
        write!(f, "  Total time: {}", humantime::format_duration(total_time))
    }
}

pub(crate) struct Compact;

impl Compact {
    pub(crate) const fn new() -> Self {
        Self {}
    }
}

impl StatsFormatter for Compact {
    fn format(&self, summary: &RunSummary) -> Result<String> {
        Ok(CompactRunSummary(summary).to_string())
    }
}

pub(crate) struct Json;

impl Json {
    pub(crate) const fn new() -> Self {
        Self {}
    }
}

impl StatsFormatter for Json {
    /// Format the summary as JSON object
    fn format(&self, summary: &RunSummary) -> Result<String> {
        serde_json::to_string_pretty(summary).context("Cannot format summary as JSON")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::{Compact, Json, StatsFormatter};
    use crate::stats::RunSummary;

    fn summary(canceled: bool) -> RunSummary {
        RunSummary {
            canceled,
            succeeded: 9,
            failed: 1,
            max_concurrent: 4,
            avg_latency_ms: 1012.34,
            p95_latency_ms: 1050.0,
            total_time: Duration::from_micros(2_531_777),
        }
    }

    #[test]
    fn test_compact_summary() {
        let output = Compact::new().format(&summary(false)).unwrap();
        assert_eq!(
            output,
            "Run summary
  Success: 9
  Failed : 1
  Max concurrent observed: 4
  Avg latency: 1012.3 ms
  P95 latency: 1050.0 ms
  Total time: 2s 531ms"
        );
    }

    #[test]
    fn test_compact_partial_summary() {
        let output = Compact::new().format(&summary(true)).unwrap();
        assert_eq!(
            output,
            "Canceled by user or timeout.
Partial progress. Success=9, Failed=1, Max concurrent observed=4"
        );
    }

    #[test]
    fn test_json_summary() {
        let output = Json::new().format(&summary(false)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "canceled": false,
                "succeeded": 9,
                "failed": 1,
                "max_concurrent": 4,
                "avg_latency_ms": 1012.34,
                "p95_latency_ms": 1050.0,
                "total_time": "2s 531ms 777us",
            })
        );
    }
}
