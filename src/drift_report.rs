use serde::Serialize;
use std::fmt::Write as _;

use super::drift_diff::{DriftFinding, DriftSummary};
use crate::types::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvStatus {
    Clean,
    Drift,
    IntrospectionFailed,
}

impl EnvStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvStatus::Clean => "CLEAN",
            EnvStatus::Drift => "DRIFT",
            EnvStatus::IntrospectionFailed => "INTROSPECTION_FAILED",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvDrift {
    pub name: String,
    pub masked_identity: String,
    pub status: EnvStatus,
    pub findings: Vec<DriftFinding>,
    pub summary: DriftSummary,
    pub detail: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DriftReport {
    pub status: Verdict,
    pub generated_at: String,
    pub declared_path: String,
    pub environments: Vec<EnvDrift>,
    pub summary: DriftSummary,
}

impl DriftReport {
    /// First environment that explains a NO_GO, with the reason.
    pub fn first_blocker(&self) -> Option<(&EnvDrift, Option<&DriftFinding>)> {
        self.environments.iter().find_map(|env| match env.status {
            EnvStatus::IntrospectionFailed => Some((env, None)),
            _ => env
                .findings
                .iter()
                .find(|f| f.severity == crate::types::Severity::High)
                .map(|f| (env, Some(f))),
        })
    }
}

const LEGEND: &str = "| Severity | Meaning |
|---|---|
| HIGH | Declared model or column missing in the database; code depending on it will fail |
| MED | Column type/optionality or enum values differ from the declaration |
| LOW | Column exists in the database but is not declared; informational |
";

pub fn render_markdown(report: &DriftReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Schema Drift Report");
    let _ = writeln!(out);
    let _ = writeln!(out, "- Status: **{}**", report.status);
    let _ = writeln!(out, "- Generated: {}", report.generated_at);
    let _ = writeln!(out, "- Declared schema: `{}`", report.declared_path);
    let _ = writeln!(
        out,
        "- Findings: HIGH {}, MED {}, LOW {} (total {})",
        report.summary.high, report.summary.med, report.summary.low, report.summary.total
    );
    let _ = writeln!(out);
    for env in &report.environments {
        let _ = writeln!(out, "## {} ({})", env.name, env.status.as_str());
        let _ = writeln!(out);
        let _ = writeln!(out, "- Database: `{}`", env.masked_identity);
        let _ = writeln!(out, "- Duration: {} ms", env.duration_ms);
        if let Some(detail) = &env.detail {
            let _ = writeln!(out, "- Detail: {detail}");
        }
        let _ = writeln!(out);
        if env.findings.is_empty() {
            if env.status == EnvStatus::Clean {
                let _ = writeln!(out, "No drift detected.");
                let _ = writeln!(out);
            }
            continue;
        }
        let _ = writeln!(out, "| Severity | Kind | Location | Message |");
        let _ = writeln!(out, "|---|---|---|---|");
        for f in &env.findings {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                f.severity,
                f.kind.as_str(),
                f.location(),
                f.message.replace('|', "\\|")
            );
        }
        let _ = writeln!(out);
    }
    let _ = writeln!(out, "## Severity Legend");
    let _ = writeln!(out);
    out.push_str(LEGEND);
    out
}

pub fn print_drift(report: &DriftReport) {
    println!("== diagrs drift ==");
    println!("status: {}", report.status);
    println!("declared: {}", report.declared_path);
    for env in &report.environments {
        println!(
            "- {} [{}] {} high={} med={} low={}",
            env.name,
            env.masked_identity,
            env.status.as_str(),
            env.summary.high,
            env.summary.med,
            env.summary.low
        );
        if let Some(detail) = &env.detail {
            println!("  detail: {detail}");
        }
        for f in env.findings.iter().filter(|f| f.severity != crate::types::Severity::Low) {
            println!("  {} {} {}", f.severity, f.kind.as_str(), f.location());
        }
    }
    println!(
        "summary: high={} med={} low={} total={}",
        report.summary.high, report.summary.med, report.summary.low, report.summary.total
    );
}
