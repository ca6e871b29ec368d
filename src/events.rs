// events.rs - Run event stream
// Purpose: The ordered events a run produces, serialized one JSON object per line
//
// Order: one `info`, then per batch one `batch_info` followed by its `result`
// events in completion order, then one terminal `complete`.

use crate::types::{AttemptResult, AttemptStatus, RunProgress};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Info {
        total_expected_attempts: usize,
        batch_size: usize,
        message: String,
    },
    BatchInfo {
        /// 1-based batch number
        batch: usize,
        /// 1-based index of the first pair in the batch
        start: usize,
        /// 1-based index of the last pair in the batch
        end: usize,
        total: usize,
        message: String,
    },
    Result {
        #[serde(flatten)]
        result: AttemptResult,
        progress: RunProgress,
    },
    Complete {
        total_processed: usize,
        message: String,
    },
}

impl RunEvent {
    pub fn info(total: usize, batch_size: usize) -> Self {
        RunEvent::Info {
            total_expected_attempts: total,
            batch_size,
            message: format!(
                "Test run initiated. Processing {} credentials in batches of {}.",
                total, batch_size
            ),
        }
    }

    pub fn batch_info(batch: usize, start: usize, end: usize, total: usize) -> Self {
        RunEvent::BatchInfo {
            batch,
            start,
            end,
            total,
            message: format!("Processing batch {}-{} of {} credentials...", start, end, total),
        }
    }

    pub fn complete(total_processed: usize) -> Self {
        RunEvent::Complete {
            total_processed,
            message: format!("All {} credential tests finished.", total_processed),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Complete { .. })
    }

    /// Serialize as one NDJSON line, newline included
    pub fn to_ndjson_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Per-status tally of the result events of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub counts: BTreeMap<String, usize>,
    pub processed: usize,
    /// Successful identifier/secret pairs in arrival order
    pub hits: Vec<(String, String)>,
}

impl RunSummary {
    pub fn record(&mut self, event: &RunEvent) {
        if let RunEvent::Result { result, progress } = event {
            *self.counts.entry(result.status.as_str().to_string()).or_insert(0) += 1;
            self.processed = progress.processed;
            if result.status == AttemptStatus::Success {
                self.hits.push((result.identifier.clone(), result.secret.clone()));
            }
        }
    }

    pub fn count(&self, status: AttemptStatus) -> usize {
        self.counts.get(status.as_str()).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CredentialPair;
    use serde_json::{Value, json};

    #[test]
    fn test_result_event_is_flat() {
        let pair = CredentialPair::new("alice", "pw");
        let event = RunEvent::Result {
            result: AttemptResult::errored(&pair, "Request timed out after 10s"),
            progress: RunProgress::new(1, 4),
        };

        let line = event.to_ndjson_line().unwrap();
        assert!(line.ends_with('\n'));

        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "result");
        assert_eq!(value["identifier"], "alice");
        assert_eq!(value["status"], "error");
        assert_eq!(value["progress"], json!({"processed": 1, "total": 4, "percentage": 25.0}));
        assert!(value.get("http_status").is_none());
    }

    #[test]
    fn test_info_and_complete_shapes() {
        let info: Value = serde_json::to_value(RunEvent::info(3, 3)).unwrap();
        assert_eq!(info["type"], "info");
        assert_eq!(info["total_expected_attempts"], 3);

        let batch: Value = serde_json::to_value(RunEvent::batch_info(2, 51, 100, 120)).unwrap();
        assert_eq!(batch["type"], "batch_info");
        assert_eq!(batch["message"], "Processing batch 51-100 of 120 credentials...");

        let complete = RunEvent::complete(3);
        assert!(complete.is_terminal());
        let complete: Value = serde_json::to_value(complete).unwrap();
        assert_eq!(complete["type"], "complete");
        assert_eq!(complete["total_processed"], 3);
    }

    #[test]
    fn test_summary_counts_results() {
        let mut summary = RunSummary::default();
        let ok = CredentialPair::new("alice", "right");
        let bad = CredentialPair::new("bob", "wrong");

        summary.record(&RunEvent::info(2, 2));
        summary.record(&RunEvent::Result {
            result: AttemptResult::classified(&ok, AttemptStatus::Success, 302, "u".to_string(), 0, Vec::new()),
            progress: RunProgress::new(1, 2),
        });
        summary.record(&RunEvent::Result {
            result: AttemptResult::errored(&bad, "boom"),
            progress: RunProgress::new(2, 2),
        });

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.count(AttemptStatus::Success), 1);
        assert_eq!(summary.count(AttemptStatus::Error), 1);
        assert_eq!(summary.count(AttemptStatus::Failure), 0);
        assert_eq!(summary.hits, vec![("alice".to_string(), "right".to_string())]);
    }
}
