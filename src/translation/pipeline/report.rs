/*!
 * Per-document results of a pipeline run.
 */

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::translation::batch::{BatchOutcome, BatchState};
use crate::translation::core::TokenUsageStats;

/// How far a document got
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Every value and line has an entry, possibly a failure marker
    Completed,
    /// Stopped early; the output ends with the partial marker
    Partial,
    /// A previous output already covered the whole document
    Skipped,
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Result of processing one document
#[derive(Debug, Clone)]
pub struct DocumentReport {
    pub source: PathBuf,
    pub output: PathBuf,
    pub status: DocumentStatus,
    /// Front-matter batches first, then body batches
    pub batches: Vec<BatchOutcome>,
    /// Entries with a real translation, recovered ones included
    pub translated_lines: usize,
    /// Entries holding the failure marker
    pub failed_lines: usize,
    /// Entries taken from an earlier output
    pub recovered_lines: usize,
    pub elapsed: Duration,
    /// Service usage caused by this document alone
    pub usage: TokenUsageStats,
    /// Why a partial document stopped
    pub stop_reason: Option<String>,
}

impl DocumentReport {
    pub fn is_complete(&self) -> bool {
        self.status != DocumentStatus::Partial
    }

    pub fn accepted_batches(&self) -> usize {
        self.batches.iter().filter(|b| b.state == BatchState::Accepted).count()
    }

    /// Batches that were split after a failure
    pub fn degraded_batches(&self) -> usize {
        self.batches.iter().filter(|b| b.state == BatchState::Degrading).count()
    }

    /// One-line summary for the log
    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("{}", self.status),
            format!("{} translated", self.translated_lines),
            format!("{} failed", self.failed_lines),
        ];
        if self.recovered_lines > 0 {
            parts.push(format!("{} resumed", self.recovered_lines));
        }
        if !self.batches.is_empty() {
            parts.push(format!(
                "{} batches ({} degraded)",
                self.accepted_batches(),
                self.degraded_batches()
            ));
        }
        parts.push(format!("{} requests", self.usage.requests));
        parts.push(format!("{:.1}s", self.elapsed.as_secs_f64()));
        if let Some(reason) = &self.stop_reason {
            parts.push(format!("stopped: {}", reason));
        }
        parts.join(" | ")
    }
}
