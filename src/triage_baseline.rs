use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::triage_fingerprint::FingerprintSummary;
use crate::artifacts::write_json_atomic;
use crate::error::{DiagError, DiagResult};

pub const BASELINE_VERSION: u32 = 1;

/// Persisted set of fingerprint ids already accepted as known noise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Baseline {
    pub version: u32,
    pub initialized: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub fingerprint_ids: BTreeSet<String>,
}

impl Default for Baseline {
    fn default() -> Self {
        Self {
            version: BASELINE_VERSION,
            initialized: false,
            created_at: None,
            updated_at: None,
            last_run_at: None,
            fingerprint_ids: BTreeSet::new(),
        }
    }
}

/// A loaded baseline plus where it came from. Only `save` touches disk again.
#[derive(Debug, Clone)]
pub struct BaselineState {
    pub path: PathBuf,
    pub baseline: Baseline,
    pub existed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FingerprintStatus {
    New,
    Known,
}

impl FingerprintStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FingerprintStatus::New => "NEW",
            FingerprintStatus::Known => "KNOWN",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarkedFingerprint {
    pub summary: FingerprintSummary,
    pub status: FingerprintStatus,
}

#[derive(Debug, Clone)]
pub struct MarkOutcome {
    pub marked: Vec<MarkedFingerprint>,
    pub baseline: Baseline,
    pub cold_start: bool,
    pub updated: bool,
}

/// Missing or unreadable baselines fall back to an empty one; a corrupt file
/// is treated as a cold start rather than a hard failure.
pub fn load(path: &Path) -> BaselineState {
    let state = |baseline: Baseline, existed: bool| BaselineState {
        path: path.to_path_buf(),
        baseline,
        existed,
    };
    let raw = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return state(Baseline::default(), false);
        }
        Err(e) => {
            crate::diag_eprintln!("warning: cannot read baseline {}: {e}", path.display());
            return state(Baseline::default(), true);
        }
    };
    match serde_json::from_str::<Baseline>(&raw) {
        Ok(b) => state(b, true),
        Err(e) => {
            crate::diag_eprintln!(
                "warning: baseline {} is corrupt ({e}); starting cold",
                path.display()
            );
            state(Baseline::default(), true)
        }
    }
}

pub fn save(baseline: &Baseline, path: &Path) -> DiagResult<()> {
    let value = serde_json::to_value(baseline).map_err(|e| DiagError::json("baseline", e))?;
    write_json_atomic(path, &value).map_err(DiagError::invalid)
}

/// Tags each fingerprint NEW or KNOWN against `baseline`. A cold start
/// absorbs everything seen as KNOWN; afterwards NEW ids are only absorbed
/// when `update` is set. `last_run_at` always advances to `now`.
pub fn mark_new_errors(
    summaries: Vec<FingerprintSummary>,
    baseline: &Baseline,
    update: bool,
    now: DateTime<Utc>,
) -> MarkOutcome {
    let cold_start = !baseline.initialized;
    let mut next = baseline.clone();
    let mut marked = Vec::with_capacity(summaries.len());
    let mut absorbed = false;
    for summary in summaries {
        let id = &summary.fingerprint.id;
        let status = if cold_start || baseline.fingerprint_ids.contains(id) {
            FingerprintStatus::Known
        } else {
            FingerprintStatus::New
        };
        if (cold_start || (update && status == FingerprintStatus::New))
            && next.fingerprint_ids.insert(id.clone())
        {
            absorbed = true;
        }
        marked.push(MarkedFingerprint { summary, status });
    }
    if cold_start {
        next.initialized = true;
        next.created_at = Some(now);
    }
    if absorbed || cold_start {
        next.updated_at = Some(now);
    }
    next.version = BASELINE_VERSION;
    next.last_run_at = Some(now);
    MarkOutcome {
        marked,
        baseline: next,
        cold_start,
        updated: absorbed,
    }
}
