#[path = "triage_baseline.rs"]
pub(crate) mod triage_baseline;
#[path = "triage_fingerprint.rs"]
pub(crate) mod triage_fingerprint;
#[path = "triage_read.rs"]
mod triage_read;
#[path = "triage_report.rs"]
mod triage_report;
#[path = "triage_severity.rs"]
mod triage_severity;

use chrono::{DateTime, Utc};

use crate::config::DiagConfig;
use crate::error::DiagResult;
use crate::types::{Severity, Verdict};

pub use triage_baseline::{Baseline, BaselineState, FingerprintStatus};
pub use triage_report::{TriageReport, print_triage, render_markdown};

use triage_read::ReadOptions;
use triage_report::{MAX_HIGH_HIGHLIGHTS, compute_totals, rank};

/// Lower bound of the scan window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Since {
    /// Baseline `lastRunAt`, or unbounded when there is none.
    #[default]
    LastRun,
    All,
    At(DateTime<Utc>),
}

impl Since {
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.eq_ignore_ascii_case("all") {
            return Ok(Since::All);
        }
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| Since::At(dt.with_timezone(&Utc)))
            .map_err(|e| format!("invalid --since '{raw}': {e}"))
    }

    fn resolve(self, baseline: &Baseline) -> Option<DateTime<Utc>> {
        match self {
            Since::LastRun => baseline.last_run_at,
            Since::All => None,
            Since::At(t) => Some(t),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TriageOptions {
    pub since: Since,
    pub update_baseline: bool,
    pub max_lines: usize,
    pub top_n: usize,
}

impl TriageOptions {
    pub fn from_config(cfg: &DiagConfig) -> Self {
        Self {
            since: Since::LastRun,
            update_baseline: cfg.triage.update_baseline,
            max_lines: cfg.triage.max_lines,
            top_n: cfg.triage.top_n,
        }
    }
}

/// Reads, fingerprints, classifies and ranks recent log errors against the
/// stored baseline, then persists the advanced baseline.
pub fn run_triage(
    cfg: &DiagConfig,
    opts: &TriageOptions,
    now: DateTime<Utc>,
) -> DiagResult<TriageReport> {
    let state = triage_baseline::load(&cfg.baseline_path);
    let since = opts.since.resolve(&state.baseline);
    let read_opts = ReadOptions {
        max_lines: opts.max_lines.max(1),
        since,
        max_file_size_bytes: cfg.triage.max_file_size_bytes,
        max_read_bytes: cfg.triage.max_read_bytes,
    };
    let read = triage_read::read_sources(&cfg.triage.sources, &read_opts, now)?;
    let (summaries, error_entries) = triage_fingerprint::aggregate(&read.entries);
    let outcome =
        triage_baseline::mark_new_errors(summaries, &state.baseline, opts.update_baseline, now);
    if let Err(e) = triage_baseline::save(&outcome.baseline, &state.path) {
        crate::diag_eprintln!("warning: baseline not saved: {e}");
    }

    let ranked = rank(outcome.marked);
    let totals = compute_totals(&read.sources, &ranked, read.entries.len(), error_entries);
    let high: Vec<_> = ranked
        .iter()
        .filter(|f| f.severity == Severity::High)
        .take(MAX_HIGH_HIGHLIGHTS)
        .cloned()
        .collect();
    let top: Vec<_> = ranked.into_iter().take(opts.top_n.max(1)).collect();
    let any_new = top.iter().any(|f| f.status == FingerprintStatus::New);
    Ok(TriageReport {
        status: Verdict::from_ok(!any_new),
        generated_at: now.to_rfc3339(),
        window_since: since.map(|t| t.to_rfc3339()),
        cold_start: outcome.cold_start,
        baseline_updated: outcome.updated,
        sources: read.sources,
        top,
        high,
        totals,
    })
}

/// Deletes the baseline so the next triage starts cold. Returns whether a
/// file was removed.
pub fn reset_baseline(cfg: &DiagConfig) -> DiagResult<bool> {
    match std::fs::remove_file(&cfg.baseline_path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(crate::error::DiagError::io(
            format!("cannot remove {}", cfg.baseline_path.display()),
            e,
        )),
    }
}

pub fn load_baseline(cfg: &DiagConfig) -> BaselineState {
    triage_baseline::load(&cfg.baseline_path)
}
