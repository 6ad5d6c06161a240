use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

use crate::artifacts::{write_json_atomic, write_text_atomic};
use crate::config::DiagConfig;
use crate::drift::{self, DriftReport, Introspector};
use crate::error::DiagError;
use crate::paths::{AGGREGATE_REPORT_NAME, DRIFT_REPORT_NAME, TRIAGE_REPORT_NAME};
use crate::report_schema::validate_aggregate;
use crate::runlog::StageLog;
use crate::sentinel::{self, HttpTransport, SentinelReport};
use crate::triage::{self, TriageOptions, TriageReport};
use crate::types::Verdict;

pub const ALL_CLEAR: &str = "All checks passed; ready to ship.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Sentinel,
    Drift,
    Triage,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Sentinel => "sentinel",
            Stage::Drift => "drift",
            Stage::Triage => "triage",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub status: Verdict,
    pub generated_at: String,
    pub duration_ms: u64,
    pub sentinel: SentinelReport,
    pub drift: DriftReport,
    pub triage: TriageReport,
    pub next_action: String,
    pub stopped_stage: Option<Stage>,
    pub stop_reason: Option<String>,
    #[serde(skip)]
    pub stages: Vec<StageLog>,
}

pub fn write_drift_report(cfg: &DiagConfig, report: &DriftReport) -> Option<PathBuf> {
    let path = cfg.report_path(DRIFT_REPORT_NAME);
    match write_text_atomic(&path, &drift::render_markdown(report)) {
        Ok(()) => Some(path),
        Err(e) => {
            crate::diag_eprintln!("warning: {e}");
            None
        }
    }
}

pub fn write_triage_report(cfg: &DiagConfig, report: &TriageReport) -> Option<PathBuf> {
    let path = cfg.report_path(TRIAGE_REPORT_NAME);
    match write_text_atomic(&path, &triage::render_markdown(report)) {
        Ok(()) => Some(path),
        Err(e) => {
            crate::diag_eprintln!("warning: {e}");
            None
        }
    }
}

fn drift_next_action(report: &DriftReport, md: Option<&PathBuf>) -> String {
    let see = md
        .map(|p| format!(" See {}.", p.display()))
        .unwrap_or_default();
    match report.first_blocker() {
        Some((env, Some(finding))) => format!(
            "Resolve schema drift in {}: {} {} ({}); apply the pending migration or update the declared schema.{see}",
            env.name,
            finding.kind.as_str(),
            finding.location(),
            finding.severity
        ),
        Some((env, None)) => format!(
            "Schema introspection failed for {}: {}.{see}",
            env.name,
            env.detail.as_deref().unwrap_or("unknown error")
        ),
        None => format!("Review the schema drift report.{see}"),
    }
}

fn triage_next_action(report: &TriageReport, md: Option<&PathBuf>) -> String {
    let see = md
        .map(|p| format!(" See {}.", p.display()))
        .unwrap_or_default();
    match report.top_new() {
        Some(f) => format!(
            "Investigate new {} error #{} {} ({}x in {}): {}.{see}",
            f.severity,
            f.rank,
            f.error_name,
            f.count,
            f.sources.join(", "),
            f.signature
        ),
        None => format!("Review the log triage report.{see}"),
    }
}

/// Runs sentinel, drift and triage in order, stopping at the first NO_GO,
/// and always leaves a `diagnostics.json` behind.
pub struct Conductor<'a> {
    cfg: &'a DiagConfig,
    transport: &'a dyn HttpTransport,
    introspector: &'a dyn Introspector,
    triage_opts: TriageOptions,
}

impl<'a> Conductor<'a> {
    pub fn new(
        cfg: &'a DiagConfig,
        transport: &'a dyn HttpTransport,
        introspector: &'a dyn Introspector,
        triage_opts: TriageOptions,
    ) -> Self {
        Self {
            cfg,
            transport,
            introspector,
            triage_opts,
        }
    }

    pub fn run(&self) -> DiagnosticsReport {
        let started = Instant::now();
        let now = Utc::now();
        let mut report = DiagnosticsReport {
            status: Verdict::NoGo,
            generated_at: now.to_rfc3339(),
            duration_ms: 0,
            sentinel: SentinelReport::default(),
            drift: DriftReport::default(),
            triage: TriageReport::default(),
            next_action: String::new(),
            stopped_stage: None,
            stop_reason: None,
            stages: Vec::new(),
        };
        self.run_stages(&mut report, now);
        report.duration_ms = started.elapsed().as_millis() as u64;
        self.write_aggregate(&report);
        report
    }

    fn stop(report: &mut DiagnosticsReport, stage: Stage, err: DiagError) {
        report.status = Verdict::NoGo;
        report.stopped_stage = Some(stage);
        let reason = err.to_string();
        report.next_action = format!(
            "Fix configuration: {}",
            reason.strip_prefix("STOP: ").unwrap_or(&reason)
        );
        report.stop_reason = Some(reason);
    }

    fn timed(report: &mut DiagnosticsReport, stage: Stage, status: Verdict, started: Instant) {
        report.stages.push(StageLog {
            stage: stage.as_str().to_string(),
            status: status.as_str().to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }

    fn run_stages(&self, report: &mut DiagnosticsReport, now: chrono::DateTime<Utc>) {
        let t = Instant::now();
        report.sentinel = sentinel::run_sentinel(&self.cfg.sentinel, self.transport, now);
        let status = report.sentinel.status;
        Self::timed(report, Stage::Sentinel, status, t);
        if report.sentinel.status.is_no_go() {
            report.stopped_stage = Some(Stage::Sentinel);
            report.next_action = report
                .sentinel
                .failures
                .first()
                .map(|f| f.next_step.clone())
                .unwrap_or_else(|| sentinel::next_step_for("").to_string());
            return;
        }

        let t = Instant::now();
        match drift::run_drift(self.cfg, self.introspector, now) {
            Ok(d) => {
                report.drift = d;
                let status = report.drift.status;
                Self::timed(report, Stage::Drift, status, t);
                let md = write_drift_report(self.cfg, &report.drift);
                if report.drift.status.is_no_go() {
                    report.stopped_stage = Some(Stage::Drift);
                    report.next_action = drift_next_action(&report.drift, md.as_ref());
                    return;
                }
            }
            Err(e) => {
                Self::timed(report, Stage::Drift, Verdict::NoGo, t);
                Self::stop(report, Stage::Drift, e);
                return;
            }
        }

        let t = Instant::now();
        match triage::run_triage(self.cfg, &self.triage_opts, now) {
            Ok(tr) => {
                report.triage = tr;
                let status = report.triage.status;
                Self::timed(report, Stage::Triage, status, t);
                let md = write_triage_report(self.cfg, &report.triage);
                if report.triage.status.is_no_go() {
                    report.stopped_stage = Some(Stage::Triage);
                    report.next_action = triage_next_action(&report.triage, md.as_ref());
                    return;
                }
            }
            Err(e) => {
                Self::timed(report, Stage::Triage, Verdict::NoGo, t);
                Self::stop(report, Stage::Triage, e);
                return;
            }
        }

        report.status = Verdict::Go;
        report.next_action = ALL_CLEAR.to_string();
    }

    fn write_aggregate(&self, report: &DiagnosticsReport) {
        let value = match serde_json::to_value(report) {
            Ok(v) => v,
            Err(e) => {
                crate::diag_eprintln!("warning: cannot serialize diagnostics report: {e}");
                return;
            }
        };
        if let Err(e) = validate_aggregate(&value) {
            crate::diag_eprintln!("warning: diagnostics report {e}");
        }
        let path = self.cfg.report_path(AGGREGATE_REPORT_NAME);
        if let Err(e) = write_json_atomic(&path, &value) {
            crate::diag_eprintln!("warning: {e}");
        }
    }
}

pub fn print_run(report: &DiagnosticsReport, cfg: &DiagConfig) {
    println!("== diagrs run ==");
    println!("status: {}", report.status);
    println!("duration_ms: {}", report.duration_ms);
    for stage in &report.stages {
        println!("- {}: {} ({}ms)", stage.stage, stage.status, stage.duration_ms);
    }
    if let Some(stage) = report.stopped_stage {
        println!("stopped_stage: {}", stage.as_str());
    }
    if let Some(reason) = &report.stop_reason {
        println!("stop_reason: {reason}");
    }
    println!("report: {}", cfg.report_path(AGGREGATE_REPORT_NAME).display());
    println!("next_action: {}", report.next_action);
}
