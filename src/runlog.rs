use chrono::Utc;
use fs2::FileExt;
use serde::Serialize;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::error::{DiagError, DiagResult};
use crate::paths::ensure_parent_dir;

pub fn append_jsonl(path: &Path, value: &Value) -> Result<(), String> {
    append_jsonl_diag(path, value).map_err(|e| e.to_string())
}

fn append_jsonl_diag(path: &Path, value: &Value) -> DiagResult<()> {
    ensure_parent_dir(path).map_err(DiagError::invalid)?;
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| DiagError::io(format!("failed opening {}", path.display()), e))?;
    f.lock_exclusive()
        .map_err(|e| DiagError::io(format!("failed locking {}", path.display()), e))?;
    let mut line =
        serde_json::to_string(value).map_err(|e| DiagError::json("run log serialize", e))?;
    line.push('\n');
    let write_res = f
        .write_all(line.as_bytes())
        .map_err(|e| DiagError::io(format!("failed writing {}", path.display()), e));
    let _ = f.unlock();
    write_res?;
    Ok(())
}

pub fn make_execution_id(command: &str) -> String {
    format!(
        "{}_{}_{}",
        Utc::now().format("%Y%m%dT%H%M%SZ"),
        command.replace(
            |c: char| !c.is_ascii_alphanumeric() && c != '_' && c != '-',
            "_"
        ),
        std::process::id()
    )
}

pub fn utc_now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct StageLog {
    pub stage: String,
    pub status: String,
    pub duration_ms: u64,
}

/// One row per command invocation in the run log.
#[derive(Debug, Clone, Serialize)]
pub struct RunLogRow {
    pub execution_id: String,
    pub timestamp: String,
    pub command: String,
    pub status: String,
    pub duration_ms: u64,
    pub stages: Vec<StageLog>,
    pub next_action: Option<String>,
    pub stop_reason: Option<String>,
}

impl RunLogRow {
    pub fn new(command: &str, status: &str, duration_ms: u64) -> Self {
        Self {
            execution_id: make_execution_id(command),
            timestamp: utc_now_iso(),
            command: command.to_string(),
            status: status.to_string(),
            duration_ms,
            stages: Vec::new(),
            next_action: None,
            stop_reason: None,
        }
    }
}

/// Appends `row`; a failing run log only warns, it never changes the verdict.
pub fn log_run(path: &Path, row: &RunLogRow) {
    let value = match serde_json::to_value(row) {
        Ok(v) => v,
        Err(e) => {
            crate::diag_eprintln!("warning: run log serialize failed: {e}");
            return;
        }
    };
    if let Err(e) = append_jsonl(path, &value) {
        crate::diag_eprintln!("warning: run log append failed: {e}");
    }
}
