use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::conductor::{Conductor, print_run, write_drift_report, write_triage_report};
use crate::config::{APP_DESC, APP_NAME, APP_VERSION, DiagConfig};
use crate::drift::{self, CommandIntrospector};
use crate::error::{
    DiagError, EXIT_NO_GO, EXIT_OK, EXIT_STOP, EXIT_USAGE, exit_code_for, print_usage_error,
};
use crate::paths::workspace_root;
use crate::runlog::{RunLogRow, StageLog, log_run};
use crate::sentinel::{self, CurlTransport};
use crate::triage::{self, Since, TriageOptions};
use crate::types::Verdict;

const RUN_USAGE: &str = "diagrs run [--update-baseline] [--since <RFC3339|all>] [--json]";
const SENTINEL_USAGE: &str = "diagrs sentinel [--json]";
const DRIFT_USAGE: &str = "diagrs drift [--json]";
const TRIAGE_USAGE: &str =
    "diagrs triage [--update-baseline] [--since <RFC3339|all>] [--max-lines N] [--top N] [--json]";
const BASELINE_USAGE: &str = "diagrs baseline <show|reset>";
const CONFIG_USAGE: &str = "diagrs config [--json]";

fn print_help() {
    println!("{APP_NAME} - {APP_DESC}");
    println!();
    println!("Usage:");
    println!("  {APP_NAME} [--config PATH] <command> [args]");
    println!();
    println!("Commands:");
    println!("  version            Print tool version");
    println!("  run                Sentinel, schema drift, then log triage; GO/NO_GO verdict");
    println!("  sentinel           Probe frontend, backend readiness and the auth flow");
    println!("  drift              Diff the declared schema against every environment");
    println!("  triage             Fingerprint recent log errors against the baseline");
    println!("  baseline show      Print the stored triage baseline");
    println!("  baseline reset     Delete the baseline; the next triage starts cold");
    println!("  config             Print the resolved configuration (secrets masked)");
    println!();
    println!("Flags:");
    println!("  --config PATH      Config file (default: .diag/config.json, or DIAG_CONFIG)");
    println!("  --json             Machine-readable output where supported");
    println!("  --update-baseline  Fold NEW fingerprints into the baseline (run, triage)");
    println!("  --since VALUE      RFC3339 instant or 'all' (run, triage)");
    println!("  --max-lines N      Tail size per log file (triage)");
    println!("  --top N            Ranked fingerprints to report (triage)");
    println!();
    println!("Exit codes: 0 GO, 1 NO_GO, 2 usage error, 3 STOP (standalone stages)");
}

fn print_version() {
    let root = workspace_root();
    println!("name: {APP_NAME}");
    println!("version: {APP_VERSION}");
    println!("root: {}", root.display());
    println!(
        "config: {}",
        crate::paths::resolve_config_file(&root, None).display()
    );
}

/// Pulls the global `--config PATH` out of the argument list; it may sit on
/// either side of the subcommand.
fn split_global_flags(raw: &[String]) -> Result<(Option<PathBuf>, Vec<String>), i32> {
    let mut config = None;
    let mut rest = Vec::with_capacity(raw.len());
    let mut i = 0usize;
    while i < raw.len() {
        let arg = &raw[i];
        if arg == "--config" {
            let Some(v) = raw.get(i + 1) else {
                crate::diag_eprintln!("--config requires a path");
                return Err(EXIT_USAGE);
            };
            config = Some(PathBuf::from(v));
            i += 2;
            continue;
        }
        if let Some(v) = arg.strip_prefix("--config=") {
            config = Some(PathBuf::from(v));
        } else {
            rest.push(arg.clone());
        }
        i += 1;
    }
    Ok((config, rest))
}

fn load_config(explicit: Option<&Path>) -> Result<DiagConfig, DiagError> {
    DiagConfig::load(&workspace_root(), explicit)
}

#[derive(Debug, Default)]
struct StageArgs {
    json: bool,
    update_baseline: bool,
    since: Option<Since>,
    max_lines: Option<usize>,
    top: Option<usize>,
}

#[derive(Clone, Copy)]
struct Allowed {
    baseline: bool,
    limits: bool,
}

const JSON_ONLY: Allowed = Allowed {
    baseline: false,
    limits: false,
};

fn parse_positive(raw: Option<&String>, flag: &str) -> Result<usize, String> {
    let raw = raw.ok_or_else(|| format!("{flag} requires a value"))?;
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("{flag} must be a positive integer, got '{raw}'")),
    }
}

fn parse_stage_args(args: &[String], allowed: Allowed) -> Result<StageArgs, String> {
    let mut out = StageArgs::default();
    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--json" => out.json = true,
            "--update-baseline" if allowed.baseline => out.update_baseline = true,
            "--since" if allowed.baseline => {
                let raw = args
                    .get(i + 1)
                    .ok_or_else(|| "--since requires a value".to_string())?;
                out.since = Some(Since::parse(raw)?);
                i += 1;
            }
            "--max-lines" if allowed.limits => {
                out.max_lines = Some(parse_positive(args.get(i + 1), "--max-lines")?);
                i += 1;
            }
            "--top" if allowed.limits => {
                out.top = Some(parse_positive(args.get(i + 1), "--top")?);
                i += 1;
            }
            other => return Err(format!("unknown argument '{other}'")),
        }
        i += 1;
    }
    Ok(out)
}

fn triage_options(cfg: &DiagConfig, parsed: &StageArgs) -> TriageOptions {
    let mut opts = TriageOptions::from_config(cfg);
    if parsed.update_baseline {
        opts.update_baseline = true;
    }
    if let Some(since) = parsed.since {
        opts.since = since;
    }
    if let Some(n) = parsed.max_lines {
        opts.max_lines = n;
    }
    if let Some(n) = parsed.top {
        opts.top_n = n;
    }
    opts
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => crate::diag_eprintln!("cannot serialize output: {e}"),
    }
}

fn exit_for(verdict: Verdict) -> i32 {
    if verdict.is_no_go() { EXIT_NO_GO } else { EXIT_OK }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn log_stage_error(cfg: &DiagConfig, command: &str, started: Instant, err: &DiagError) {
    let status = if err.is_stop() { "STOP" } else { "ERROR" };
    let mut row = RunLogRow::new(command, status, elapsed_ms(started));
    row.stop_reason = Some(err.to_string());
    log_run(&cfg.run_log_path, &row);
}

fn cmd_run(cfg: Result<DiagConfig, DiagError>, args: &[String]) -> i32 {
    let parsed = match parse_stage_args(
        args,
        Allowed {
            baseline: true,
            limits: false,
        },
    ) {
        Ok(v) => v,
        Err(e) => {
            crate::diag_eprintln!("{e}");
            return print_usage_error("run", RUN_USAGE);
        }
    };
    let cfg = match cfg {
        Ok(c) => c,
        Err(e) => {
            crate::diag_eprintln!("{e}");
            println!("status: {}", Verdict::NoGo);
            println!("next_action: Fix configuration: {e}");
            return EXIT_NO_GO;
        }
    };
    let started = Instant::now();
    let transport = CurlTransport;
    let introspector = CommandIntrospector::from_config(&cfg);
    let report = Conductor::new(
        &cfg,
        &transport,
        &introspector,
        triage_options(&cfg, &parsed),
    )
    .run();

    if parsed.json {
        print_json(&report);
    } else {
        print_run(&report, &cfg);
    }

    let mut row = RunLogRow::new("run", report.status.as_str(), elapsed_ms(started));
    row.stages = report.stages.clone();
    row.next_action = Some(report.next_action.clone());
    row.stop_reason = report.stop_reason.clone();
    log_run(&cfg.run_log_path, &row);
    exit_for(report.status)
}

fn cmd_sentinel(cfg: &DiagConfig, args: &[String]) -> i32 {
    let parsed = match parse_stage_args(args, JSON_ONLY) {
        Ok(v) => v,
        Err(e) => {
            crate::diag_eprintln!("{e}");
            return print_usage_error("sentinel", SENTINEL_USAGE);
        }
    };
    let started = Instant::now();
    let report = sentinel::run_sentinel(&cfg.sentinel, &CurlTransport, Utc::now());
    if parsed.json {
        print_json(&report);
    } else {
        sentinel::print_sentinel(&report);
    }
    let mut row = RunLogRow::new("sentinel", report.status.as_str(), elapsed_ms(started));
    row.stages.push(StageLog {
        stage: "sentinel".to_string(),
        status: report.status.as_str().to_string(),
        duration_ms: elapsed_ms(started),
    });
    row.next_action = report.failures.first().map(|f| f.next_step.clone());
    log_run(&cfg.run_log_path, &row);
    exit_for(report.status)
}

fn cmd_drift(cfg: &DiagConfig, args: &[String]) -> i32 {
    let parsed = match parse_stage_args(args, JSON_ONLY) {
        Ok(v) => v,
        Err(e) => {
            crate::diag_eprintln!("{e}");
            return print_usage_error("drift", DRIFT_USAGE);
        }
    };
    let started = Instant::now();
    let introspector = CommandIntrospector::from_config(cfg);
    let report = match drift::run_drift(cfg, &introspector, Utc::now()) {
        Ok(r) => r,
        Err(e) => {
            crate::diag_eprintln!("drift: {e}");
            log_stage_error(cfg, "drift", started, &e);
            return exit_code_for(&e);
        }
    };
    let md = write_drift_report(cfg, &report);
    if parsed.json {
        print_json(&report);
    } else {
        drift::print_drift(&report);
        if let Some(p) = &md {
            println!("report: {}", p.display());
        }
    }
    let row = RunLogRow::new("drift", report.status.as_str(), elapsed_ms(started));
    log_run(&cfg.run_log_path, &row);
    exit_for(report.status)
}

fn cmd_triage(cfg: &DiagConfig, args: &[String]) -> i32 {
    let parsed = match parse_stage_args(
        args,
        Allowed {
            baseline: true,
            limits: true,
        },
    ) {
        Ok(v) => v,
        Err(e) => {
            crate::diag_eprintln!("{e}");
            return print_usage_error("triage", TRIAGE_USAGE);
        }
    };
    let started = Instant::now();
    let opts = triage_options(cfg, &parsed);
    let report = match triage::run_triage(cfg, &opts, Utc::now()) {
        Ok(r) => r,
        Err(e) => {
            crate::diag_eprintln!("triage: {e}");
            log_stage_error(cfg, "triage", started, &e);
            return exit_code_for(&e);
        }
    };
    let md = write_triage_report(cfg, &report);
    if parsed.json {
        print_json(&report);
    } else {
        triage::print_triage(&report);
        if let Some(p) = &md {
            println!("report: {}", p.display());
        }
    }
    let row = RunLogRow::new("triage", report.status.as_str(), elapsed_ms(started));
    log_run(&cfg.run_log_path, &row);
    exit_for(report.status)
}

fn cmd_baseline(cfg: &DiagConfig, args: &[String]) -> i32 {
    match args.first().map(String::as_str).unwrap_or("show") {
        "show" if args.len() <= 1 => {
            let state = triage::load_baseline(cfg);
            println!("== diagrs baseline ==");
            println!("path: {}", state.path.display());
            println!("exists: {}", state.existed);
            println!("initialized: {}", state.baseline.initialized);
            let fmt = |t: Option<chrono::DateTime<Utc>>| {
                t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "n/a".to_string())
            };
            println!("created_at: {}", fmt(state.baseline.created_at));
            println!("updated_at: {}", fmt(state.baseline.updated_at));
            println!("last_run_at: {}", fmt(state.baseline.last_run_at));
            println!("fingerprints: {}", state.baseline.fingerprint_ids.len());
            for id in &state.baseline.fingerprint_ids {
                println!("- {id}");
            }
            EXIT_OK
        }
        "reset" if args.len() == 1 => match triage::reset_baseline(cfg) {
            Ok(true) => {
                println!("baseline reset: {}", cfg.baseline_path.display());
                log_run(&cfg.run_log_path, &RunLogRow::new("baseline reset", "OK", 0));
                EXIT_OK
            }
            Ok(false) => {
                println!("baseline already absent: {}", cfg.baseline_path.display());
                EXIT_OK
            }
            Err(e) => {
                crate::diag_eprintln!("baseline reset: {e}");
                EXIT_NO_GO
            }
        },
        _ => print_usage_error("baseline", BASELINE_USAGE),
    }
}

fn cmd_config(cfg: &DiagConfig, args: &[String]) -> i32 {
    let parsed = match parse_stage_args(args, JSON_ONLY) {
        Ok(v) => v,
        Err(_) => return print_usage_error("config", CONFIG_USAGE),
    };
    let value = cfg.redacted();
    if parsed.json {
        print_json(&value);
        return EXIT_OK;
    }
    println!("== diagrs config ==");
    let source = cfg
        .config_file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<defaults>".to_string());
    println!("config_file: {source}");
    print_flat("", &value);
    EXIT_OK
}

fn print_flat(prefix: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if prefix.is_empty() && k == "config_file" {
                    continue;
                }
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                print_flat(&key, v);
            }
        }
        Value::String(s) => println!("{prefix}: {s}"),
        other => println!("{prefix}: {other}"),
    }
}

/// Commands past this point need a loaded configuration; a broken config is
/// an operational fault for them.
fn with_config(explicit: Option<&Path>, f: impl FnOnce(&DiagConfig) -> i32) -> i32 {
    match load_config(explicit) {
        Ok(cfg) => f(&cfg),
        Err(e) => {
            crate::diag_eprintln!("{e}");
            if e.is_stop() { EXIT_STOP } else { EXIT_NO_GO }
        }
    }
}

pub fn run() -> i32 {
    let raw: Vec<String> = env::args().skip(1).collect();
    let (config, args) = match split_global_flags(&raw) {
        Ok(v) => v,
        Err(code) => return code,
    };
    let explicit = config.as_deref();
    let cmd = args.first().map(String::as_str).unwrap_or("help");
    let rest = args.get(1..).unwrap_or(&[]);
    match cmd {
        "help" | "-h" | "--help" => {
            print_help();
            EXIT_OK
        }
        "version" | "-V" | "--version" => {
            print_version();
            EXIT_OK
        }
        "run" => cmd_run(load_config(explicit), rest),
        "sentinel" => with_config(explicit, |cfg| cmd_sentinel(cfg, rest)),
        "drift" => with_config(explicit, |cfg| cmd_drift(cfg, rest)),
        "triage" => with_config(explicit, |cfg| cmd_triage(cfg, rest)),
        "baseline" => with_config(explicit, |cfg| cmd_baseline(cfg, rest)),
        "config" => with_config(explicit, |cfg| cmd_config(cfg, rest)),
        other => {
            crate::diag_eprintln!("unknown command '{other}'");
            eprintln!("Run '{APP_NAME} help' for usage.");
            EXIT_USAGE
        }
    }
}
