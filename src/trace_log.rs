// SPDX-License-Identifier: MIT
//! Synthetic per-request usage records and the sink they are written to.
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Model label reported on every record.
pub const MODEL_LABEL: &str = "gpt-4.1-mini";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TraceAction {
    Cluster,
    Outline,
}

/// Latency and token usage of one handled request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    pub trace_id: String,
    pub action: TraceAction,
    pub latency_ms: u64,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

impl TraceRecord {
    /// A record with a fresh trace id.
    pub fn new(action: TraceAction, elapsed: Duration, tokens_in: u64, tokens_out: u64) -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().simple().to_string(),
            action,
            latency_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            model: MODEL_LABEL.to_string(),
            tokens_in,
            tokens_out,
        }
    }
}

/// Destination for trace records.
pub trait TraceLogger: Send + Sync {
    /// Write `record` together with the request that produced it.
    ///
    /// Must not panic; failures are reported through `tracing` only.
    fn emit(&self, endpoint: &str, record: &TraceRecord, request: &Value);
}

#[derive(Serialize)]
struct TraceEntry<'a> {
    endpoint: &'a str,
    trace: &'a TraceRecord,
    request: &'a Value,
}

/// Writes one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesLogger<W> {
    writer: Mutex<W>,
}

impl JsonLinesLogger<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> JsonLinesLogger<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn write_entry(&self, entry: &TraceEntry<'_>) -> io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        serde_json::to_writer(&mut *writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

impl<W: Write + Send> TraceLogger for JsonLinesLogger<W> {
    fn emit(&self, endpoint: &str, record: &TraceRecord, request: &Value) {
        let entry = TraceEntry {
            endpoint,
            trace: record,
            request,
        };
        if let Err(e) = self.write_entry(&entry) {
            tracing::warn!(endpoint, trace_id = %record.trace_id, error = %e, "failed to write trace record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_serializes_with_camel_case_keys() {
        let record = TraceRecord::new(TraceAction::Cluster, Duration::from_millis(12), 544, 128);
        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["action"], "CLUSTER");
        assert_eq!(value["latencyMs"], 12);
        assert_eq!(value["model"], MODEL_LABEL);
        assert_eq!(value["tokensIn"], 544);
        assert_eq!(value["tokensOut"], 128);
        assert_eq!(value["traceId"].as_str().map(str::len), Some(32));
    }

    #[test]
    fn trace_ids_are_unique() {
        let a = TraceRecord::new(TraceAction::Outline, Duration::ZERO, 420, 256);
        let b = TraceRecord::new(TraceAction::Outline, Duration::ZERO, 420, 256);
        assert_ne!(a.trace_id, b.trace_id);
    }

    #[test]
    fn emits_one_json_line_per_record() {
        let logger = JsonLinesLogger::new(Vec::new());
        let record = TraceRecord::new(TraceAction::Outline, Duration::from_millis(3), 420, 256);
        let request = json!({"boardId": "b1", "clusterId": "cluster-1"});
        logger.emit("/outline", &record, &request);
        logger.emit("/outline", &record, &request);

        let output = String::from_utf8(logger.into_inner()).expect("utf8");
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        let entry: Value = serde_json::from_str(lines[0]).expect("json line");
        assert_eq!(entry["endpoint"], "/outline");
        assert_eq!(entry["trace"]["action"], "OUTLINE");
        assert_eq!(entry["request"]["clusterId"], "cluster-1");
        let parsed: TraceRecord = serde_json::from_value(entry["trace"].clone()).expect("record");
        assert_eq!(parsed, record);
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failures_are_swallowed() {
        let logger = JsonLinesLogger::new(BrokenPipe);
        let record = TraceRecord::new(TraceAction::Cluster, Duration::ZERO, 512, 128);
        logger.emit("/cluster", &record, &Value::Null);
    }
}
