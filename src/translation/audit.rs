/*!
 * JSON-lines audit log.
 *
 * Every request/response pair is appended to `<log_dir>/<document>_<run id>.jsonl`
 * for offline review. Audit failures are logged and never interrupt a run.
 */

use anyhow::{Context, Result};
use chrono::Local;
use log::warn;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::providers::ChatMessage;
use crate::translation::stream::TerminationReason;

/// One request/response pair
#[derive(Debug, Serialize)]
pub struct AuditEntry<'a> {
    pub document: &'a str,
    pub label: &'a str,
    pub profile: &'a str,
    pub start_line: usize,
    pub messages: &'a [ChatMessage],
    pub reply: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination: Option<TerminationReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub elapsed_ms: u64,
}

#[derive(Serialize)]
struct AuditLine<'a> {
    timestamp: String,
    run_id: &'a str,
    #[serde(flatten)]
    entry: &'a AuditEntry<'a>,
}

/// Append-only audit sink shared by every request of one run
#[derive(Debug)]
pub struct AuditLog {
    dir: PathBuf,
    run_id: String,
    write_lock: Mutex<()>,
}

impl AuditLog {
    /// Create the log directory. An empty path disables auditing.
    pub fn open(dir: &str) -> Result<Option<Self>> {
        if dir.trim().is_empty() {
            return Ok(None);
        }
        let dir = PathBuf::from(dir);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create audit log directory: {:?}", dir))?;
        Ok(Some(Self {
            dir,
            run_id: Uuid::new_v4().to_string(),
            write_lock: Mutex::new(()),
        }))
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File the entries of `document` go to
    pub fn path_for(&self, document: &str) -> PathBuf {
        let short_id = self.run_id.split('-').next().unwrap_or(&self.run_id);
        self.dir.join(format!("{}_{}.jsonl", document, short_id))
    }

    pub fn record(&self, entry: &AuditEntry<'_>) {
        if let Err(e) = self.append(entry) {
            warn!("Failed to write audit record for {}: {}", entry.document, e);
        }
    }

    fn append(&self, entry: &AuditEntry<'_>) -> Result<()> {
        let line = AuditLine {
            timestamp: Local::now().to_rfc3339(),
            run_id: &self.run_id,
            entry,
        };
        let mut json = serde_json::to_string(&line)?;
        json.push('\n');

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(entry.document))?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
