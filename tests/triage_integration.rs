mod common;

use common::{TempWorkspace, read_json, stderr_str, stdout_str};
use serde_json::Value;

const NEW_ERROR: &str = "2099-01-01T00:00:00Z ERROR TypeError: Cannot read properties of undefined (reading 'id')\n    at OrderService.load (src/orders/service.ts:42:17)\n";

#[test]
fn cold_start_then_new_error_then_absorbed() {
    let ws = TempWorkspace::seeded("diagrs-triage-cycle");

    let out = ws.run(&["triage"]);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr_str(&out));
    assert!(stdout_str(&out).contains("cold_start: true"));
    let baseline = read_json(&ws.baseline_file());
    assert_eq!(baseline["initialized"], true);
    assert!(baseline["lastRunAt"].is_string());
    assert!(ws.report("log-triage.md").is_file());

    ws.append_file("logs/backend/app.log", NEW_ERROR);
    let out = ws.run(&["triage"]);
    assert_eq!(out.status.code(), Some(1), "stderr: {}", stderr_str(&out));
    let stdout = stdout_str(&out);
    assert!(stdout.contains("TypeError"), "{stdout}");
    assert!(stdout.contains("NEW"), "{stdout}");

    let out = ws.run(&["triage", "--since", "all", "--update-baseline", "--json"]);
    assert_eq!(out.status.code(), Some(1));
    let report: Value = serde_json::from_str(&stdout_str(&out)).expect("json stdout");
    assert_eq!(report["baseline_updated"], true);

    let out = ws.run(&["triage", "--since", "all"]);
    assert_eq!(out.status.code(), Some(0), "{}", stdout_str(&out));
}

#[test]
fn baseline_show_and_reset() {
    let ws = TempWorkspace::seeded("diagrs-triage-baseline");
    assert_eq!(ws.run(&["triage"]).status.code(), Some(0));

    let out = ws.run(&["baseline", "show"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(stdout_str(&out).contains("exists: true"));

    let out = ws.run(&["baseline", "reset"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(!ws.baseline_file().exists());
    assert!(stdout_str(&ws.run(&["baseline", "show"])).contains("exists: false"));
    assert_eq!(ws.run(&["baseline", "wipe"]).status.code(), Some(2));
}

#[test]
fn unreadable_sources_stop() {
    let ws = TempWorkspace::seeded("diagrs-triage-stop");
    std::fs::remove_dir_all(ws.root.join("logs")).expect("remove logs");
    let out = ws.run(&["triage"]);
    assert_eq!(out.status.code(), Some(3));
    assert!(stderr_str(&out).contains("STOP"));
}

#[test]
fn usage_errors_exit_two() {
    let ws = TempWorkspace::seeded("diagrs-triage-usage");
    assert_eq!(ws.run(&["triage", "--since", "yesterday"]).status.code(), Some(2));
    assert_eq!(ws.run(&["triage", "--top", "0"]).status.code(), Some(2));
    assert_eq!(ws.run(&["sentinel", "--update-baseline"]).status.code(), Some(2));
    assert_eq!(ws.run(&["frobnicate"]).status.code(), Some(2));
    assert_eq!(ws.run(&["--config"]).status.code(), Some(2));
}

#[test]
fn config_command_masks_the_demo_secret() {
    let ws = TempWorkspace::seeded("diagrs-config");
    let out = ws.run(&["config", "--json"]);
    assert_eq!(out.status.code(), Some(0));
    let cfg: Value = serde_json::from_str(&stdout_str(&out)).expect("json");
    assert_eq!(cfg["sentinel"]["secret"], "***");
    assert_eq!(cfg["sentinel"]["identifier"], "demo@example.com");

    let out = ws.run(&["--config", "missing.json", "config"]);
    assert_eq!(out.status.code(), Some(3));
}
