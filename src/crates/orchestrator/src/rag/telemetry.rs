//! One record per gate decision.

use super::index::ScoreType;
use super::GatingResult;
use crate::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateLatencies {
    pub search_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateTelemetry {
    pub timestamp: DateTime<Utc>,
    /// Stable hash of the normalized query; the query itself is never logged
    pub query_hash: String,
    pub owner: String,
    pub scope: String,
    pub gating_result: GatingResult,
    pub best_score: Option<f64>,
    pub second_score: Option<f64>,
    pub best_score_type: Option<ScoreType>,
    pub marker_written: bool,
    pub bypass_used: bool,
    /// `None` when the check was not reached
    pub lexical_sanity_pass: Option<bool>,
    pub candidates: usize,
    pub evidence_items: usize,
    pub latencies: GateLatencies,
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, record: &GateTelemetry);
}

/// Logs each record at info level
#[derive(Debug, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn record(&self, record: &GateTelemetry) {
        info!(
            query_hash = %record.query_hash,
            gating_result = ?record.gating_result,
            best_score = ?record.best_score,
            second_score = ?record.second_score,
            bypass = record.bypass_used,
            total_ms = record.latencies.total_ms,
            "RAG gate decision"
        );
    }
}

/// Append-only JSON lines file
#[derive(Debug)]
pub struct JsonlTelemetrySink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlTelemetrySink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TelemetrySink for JsonlTelemetrySink {
    fn record(&self, record: &GateTelemetry) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize gate telemetry");
                return;
            }
        };
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{}", line) {
            warn!(path = %self.path.display(), error = %e, "Failed to write gate telemetry");
        }
    }
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemoryTelemetrySink {
    records: Mutex<Vec<GateTelemetry>>,
}

impl MemoryTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<GateTelemetry> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetrySink for MemoryTelemetrySink {
    fn record(&self, record: &GateTelemetry) {
        self.records.lock().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    fn record(result: GatingResult) -> GateTelemetry {
        GateTelemetry {
            timestamp: Utc::now(),
            query_hash: "abc".to_string(),
            owner: "u1".to_string(),
            scope: "default".to_string(),
            gating_result: result,
            best_score: Some(0.2),
            second_score: None,
            best_score_type: Some(ScoreType::Dense),
            marker_written: false,
            bypass_used: false,
            lexical_sanity_pass: Some(true),
            candidates: 1,
            evidence_items: 1,
            latencies: GateLatencies::default(),
        }
    }

    #[test]
    fn test_jsonl_appends_one_line_per_record() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let sink = JsonlTelemetrySink::open(file.path()).unwrap();
        sink.record(&record(GatingResult::Pass));
        sink.record(&record(GatingResult::Threshold));

        let lines: Vec<String> = BufReader::new(File::open(file.path()).unwrap())
            .lines()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        let second: GateTelemetry = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(second.gating_result, GatingResult::Threshold);
        assert!(lines[0].contains("\"gating_result\":\"pass\""));
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemoryTelemetrySink::new();
        sink.record(&record(GatingResult::Empty));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.records()[0].gating_result, GatingResult::Empty);
    }
}
