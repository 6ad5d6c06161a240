use serde::Serialize;
use std::fmt::Write as _;

use super::triage_baseline::{FingerprintStatus, MarkedFingerprint};
use super::triage_fingerprint::EntryExample;
use super::triage_read::{FileStatus, SourceScan};
use super::triage_severity::classify;
use crate::types::{Severity, Verdict};
use crate::util::preview;

pub const MAX_HIGH_HIGHLIGHTS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct RankedFingerprint {
    pub rank: usize,
    pub id: String,
    pub error_name: String,
    pub count: usize,
    pub severity: Severity,
    pub status: FingerprintStatus,
    pub endpoint: Option<String>,
    pub signature: String,
    pub sources: Vec<String>,
    pub example: EntryExample,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TriageTotals {
    pub entries_scanned: usize,
    pub error_entries: usize,
    pub fingerprints: usize,
    pub new: usize,
    pub known: usize,
    pub high: usize,
    pub med: usize,
    pub low: usize,
    pub files_ok: usize,
    pub files_missing: usize,
    pub files_skipped: usize,
    pub files_error: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TriageReport {
    pub status: Verdict,
    pub generated_at: String,
    pub window_since: Option<String>,
    pub cold_start: bool,
    pub baseline_updated: bool,
    pub sources: Vec<SourceScan>,
    pub top: Vec<RankedFingerprint>,
    pub high: Vec<RankedFingerprint>,
    pub totals: TriageTotals,
}

impl TriageReport {
    /// Highest-ranked NEW fingerprint, the one worth naming in a next action.
    pub fn top_new(&self) -> Option<&RankedFingerprint> {
        self.top
            .iter()
            .find(|f| f.status == FingerprintStatus::New)
    }
}

/// Orders by count (desc), then severity, then first-seen, and assigns
/// 1-based ranks across the whole list.
pub fn rank(marked: Vec<MarkedFingerprint>) -> Vec<RankedFingerprint> {
    let mut scored: Vec<(Severity, MarkedFingerprint)> =
        marked.into_iter().map(|m| (classify(&m.summary), m)).collect();
    scored.sort_by(|(sa, a), (sb, b)| {
        b.summary
            .count
            .cmp(&a.summary.count)
            .then(sa.rank().cmp(&sb.rank()))
            .then(a.summary.first_seen.cmp(&b.summary.first_seen))
    });
    scored
        .into_iter()
        .enumerate()
        .map(|(i, (severity, m))| {
            let s = m.summary;
            RankedFingerprint {
                rank: i + 1,
                id: s.fingerprint.id,
                error_name: s.fingerprint.error_name,
                count: s.count,
                severity,
                status: m.status,
                endpoint: s.fingerprint.endpoint,
                signature: s.fingerprint.signature,
                sources: s.sources.into_iter().collect(),
                example: s.example,
            }
        })
        .collect()
}

pub fn compute_totals(
    sources: &[SourceScan],
    ranked: &[RankedFingerprint],
    entries_scanned: usize,
    error_entries: usize,
) -> TriageTotals {
    let mut t = TriageTotals {
        entries_scanned,
        error_entries,
        fingerprints: ranked.len(),
        ..TriageTotals::default()
    };
    for f in ranked {
        match f.status {
            FingerprintStatus::New => t.new += 1,
            FingerprintStatus::Known => t.known += 1,
        }
        match f.severity {
            Severity::High => t.high += 1,
            Severity::Med => t.med += 1,
            Severity::Low => t.low += 1,
        }
    }
    for file in sources.iter().flat_map(|s| s.files.iter()) {
        match file.status {
            FileStatus::Ok => t.files_ok += 1,
            FileStatus::Missing => t.files_missing += 1,
            FileStatus::Skipped => t.files_skipped += 1,
            FileStatus::Error => t.files_error += 1,
        }
    }
    t
}

fn md_cell(s: &str) -> String {
    preview(&s.replace('|', "\\|").replace('\n', " "), 120)
}

pub fn render_markdown(report: &TriageReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Log Triage Report");
    let _ = writeln!(out);
    let _ = writeln!(out, "- Status: **{}**", report.status);
    let _ = writeln!(out, "- Generated: {}", report.generated_at);
    let _ = writeln!(
        out,
        "- Window since: {}",
        report.window_since.as_deref().unwrap_or("(no lower bound)")
    );
    if report.cold_start {
        let _ = writeln!(out, "- Cold start: baseline initialized from this run");
    }
    if report.baseline_updated {
        let _ = writeln!(out, "- Baseline updated with new fingerprints");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Sources");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Source | File | Status | Lines | Entries |");
    let _ = writeln!(out, "|---|---|---|---|---|");
    for source in &report.sources {
        for f in &source.files {
            let status = match &f.detail {
                Some(d) => format!("{} ({})", f.status.as_str(), md_cell(d)),
                None => f.status.as_str().to_string(),
            };
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                source.source,
                md_cell(&f.path.display().to_string()),
                status,
                f.lines_read,
                f.entries
            );
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Top Error Signatures");
    let _ = writeln!(out);
    if report.top.is_empty() {
        let _ = writeln!(out, "No error-like entries in the scanned window.");
    } else {
        let _ = writeln!(
            out,
            "| Rank | Error | Count | Severity | Status | Endpoint | Signature |"
        );
        let _ = writeln!(out, "|---|---|---|---|---|---|---|");
        for f in &report.top {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} | `{}` |",
                f.rank,
                f.error_name,
                f.count,
                f.severity,
                f.status.as_str(),
                f.endpoint.as_deref().unwrap_or("-"),
                md_cell(&f.signature)
            );
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## HIGH Severity");
    let _ = writeln!(out);
    if report.high.is_empty() {
        let _ = writeln!(out, "None.");
    }
    for f in &report.high {
        let _ = writeln!(
            out,
            "### #{} {} ({}x, {})",
            f.rank,
            f.error_name,
            f.count,
            f.status.as_str()
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "Sources: {}", f.sources.join(", "));
        let _ = writeln!(out);
        let _ = writeln!(out, "```");
        for line in &f.example.lines {
            let _ = writeln!(out, "{line}");
        }
        let _ = writeln!(out, "```");
        let _ = writeln!(out);
    }

    let t = &report.totals;
    let _ = writeln!(out, "## Totals");
    let _ = writeln!(out);
    let _ = writeln!(out, "- Entries scanned: {}", t.entries_scanned);
    let _ = writeln!(out, "- Error entries: {}", t.error_entries);
    let _ = writeln!(
        out,
        "- Fingerprints: {} (NEW {}, KNOWN {})",
        t.fingerprints, t.new, t.known
    );
    let _ = writeln!(out, "- Severity: HIGH {}, MED {}, LOW {}", t.high, t.med, t.low);
    let _ = writeln!(
        out,
        "- Files: OK {}, MISSING {}, SKIPPED {}, ERROR {}",
        t.files_ok, t.files_missing, t.files_skipped, t.files_error
    );
    out
}

pub fn print_triage(report: &TriageReport) {
    println!("== diagrs triage ==");
    println!("status: {}", report.status);
    println!(
        "window_since: {}",
        report.window_since.as_deref().unwrap_or("<none>")
    );
    println!("cold_start: {}", report.cold_start);
    println!("sources:");
    for source in &report.sources {
        for f in &source.files {
            println!("- {}: {} {}", source.source, f.status.as_str(), f.path.display());
        }
    }
    println!("top:");
    if report.top.is_empty() {
        println!("- none");
    }
    for f in &report.top {
        println!(
            "- #{} {} x{} {} {} {}",
            f.rank,
            f.error_name,
            f.count,
            f.severity,
            f.status.as_str(),
            f.endpoint.as_deref().unwrap_or("-")
        );
    }
    let t = &report.totals;
    println!(
        "totals: entries={} errors={} fingerprints={} new={} high={}",
        t.entries_scanned, t.error_entries, t.fingerprints, t.new, t.high
    );
}
