use super::MetricsSnapshot;
use anyhow::Result;
use csv::{Reader, Writer};
use std::fs::File;
use std::path::Path;

/// Writes per-turn snapshots as CSV rows.
pub struct MetricsLogger {
    writer: Writer<File>,
}

impl MetricsLogger {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let writer = Writer::from_path(path)?;
        Ok(Self { writer })
    }

    pub fn log_batch(&mut self, snapshots: &[MetricsSnapshot]) -> Result<()> {
        for snapshot in snapshots {
            self.writer.serialize(snapshot)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Reads back a file written by [`MetricsLogger`].
pub fn load_snapshots(path: impl AsRef<Path>) -> Result<Vec<MetricsSnapshot>> {
    let mut reader = Reader::from_path(path)?;
    let mut snapshots = Vec::new();
    for row in reader.deserialize() {
        snapshots.push(row?);
    }
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;

    #[test]
    fn test_log_batch_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");

        let metrics = MetricsCollector::new();
        metrics.save_snapshot(1);
        metrics.packet_sent();
        metrics.save_snapshot(2);

        let mut logger = MetricsLogger::new(&path).unwrap();
        logger.log_batch(&metrics.get_snapshots()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("turn,elapsed_s,packets_sent"));
    }

    #[test]
    fn test_saved_run_can_be_analyzed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");

        let metrics = MetricsCollector::new();
        metrics.save_snapshot(1);
        metrics.record_connections(2);
        metrics.save_snapshot(2);
        MetricsLogger::new(&path).unwrap().log_batch(&metrics.get_snapshots()).unwrap();

        let snapshots = load_snapshots(&path).unwrap();
        assert_eq!(snapshots.len(), 2);
        let report = crate::metrics::analyzer::analyze(&snapshots, "run", 2);
        assert_eq!(report.converged_at, Some(2));
        assert_eq!(report.final_connections, 2);
    }

    #[test]
    fn test_loading_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_snapshots(dir.path().join("absent.csv")).is_err());
    }
}
