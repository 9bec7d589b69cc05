//! Combined test reports and output handling.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cli::TestKind;
use crate::error::{Error, Result};
use crate::stats::SummaryStat;

/// The controller's combined result for one completed test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub test: TestKind,
    /// Latency aggregate in milliseconds, merged from every reporter.
    pub latency_ms: SummaryStat,
    /// Per-worker throughput values combined as independent samples.
    pub throughput: SummaryStat,
    /// Number of minions averaged over.
    pub reporters: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl TestReport {
    pub fn new(
        test: TestKind,
        latency_ms: SummaryStat,
        throughput: SummaryStat,
        reporters: usize,
    ) -> Self {
        Self {
            test,
            latency_ms,
            throughput,
            reporters,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Latency (millisecs):    {}", self.latency_ms)?;
        writeln!(f, "Throughput (calls/sec): {}", self.throughput)?;
        write!(f, "  Averaged over {} client(s)", self.reporters)
    }
}

/// Write the report as pretty JSON for downstream tooling.
pub fn write_report(path: &Path, report: &TestReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).map_err(|e| Error::Report(e.to_string()))?;
    fs::write(path, json).map_err(|e| Error::Report(format!("{:?}: {}", path, e)))?;
    info!("report written to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> TestReport {
        let mut latency = SummaryStat::new();
        latency.update(1.0);
        latency.update(3.0);
        let mut throughput = SummaryStat::new();
        throughput.update(250.0);
        TestReport::new(TestKind::RpcCall, latency, throughput, 1)
    }

    #[test]
    fn display_names_reporter_count() {
        let rendered = sample_report().to_string();
        assert!(rendered.contains("Latency (millisecs)"));
        assert!(rendered.contains("Throughput (calls/sec)"));
        assert!(rendered.contains("Averaged over 1 client(s)"));
    }

    #[test]
    fn report_writes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_report(&path, &sample_report()).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let parsed: TestReport = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.reporters, 1);
        assert_eq!(parsed.latency_ms.count(), 2);
    }
}
