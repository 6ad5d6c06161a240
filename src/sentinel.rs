#[path = "sentinel_http.rs"]
mod sentinel_http;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Instant;

use crate::config::SentinelConfig;
use crate::types::Verdict;
use crate::util::preview;

pub use sentinel_http::{CurlTransport, HttpRequest, HttpResponse, HttpTransport};
use sentinel_http::{extract_access_token, is_list_payload, join_url};

pub const CHECK_FRONTEND: &str = "frontend-reachable";
pub const CHECK_BACKEND: &str = "backend-ready";
pub const CHECK_LOGIN: &str = "auth-login";
pub const CHECK_READ: &str = "auth-read";

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub ok: bool,
    pub elapsed_ms: u64,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub name: String,
    pub detail: String,
    pub next_step: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SentinelReport {
    pub status: Verdict,
    pub generated_at: String,
    pub base_url: String,
    pub backend_url: String,
    pub checks: Vec<CheckResult>,
    pub failures: Vec<Failure>,
}

pub fn next_step_for(check: &str) -> &'static str {
    match check {
        CHECK_FRONTEND => "Start the frontend (or fix DIAG_BASE_URL) and confirm it answers HTTP requests.",
        CHECK_BACKEND => "Start the backend and make sure one of the health endpoints returns 2xx.",
        CHECK_LOGIN => "Check the demo credentials (DIAG_DEMO_IDENTIFIER / DIAG_DEMO_SECRET) and the login route.",
        CHECK_READ => "Verify the frontend proxy forwards the bearer token and the read endpoint returns a list.",
        _ => "Inspect the failing check's detail.",
    }
}

fn exchange_detail(resp: &HttpResponse) -> String {
    let body = preview(resp.body.trim(), 120);
    if body.is_empty() {
        format!("HTTP {}", resp.status)
    } else {
        format!("HTTP {}: {body}", resp.status)
    }
}

struct Probe<'a> {
    cfg: &'a SentinelConfig,
    transport: &'a dyn HttpTransport,
    checks: Vec<CheckResult>,
}

impl Probe<'_> {
    fn record(&mut self, name: &str, started: Instant, ok: bool, detail: String) -> bool {
        self.checks.push(CheckResult {
            name: name.to_string(),
            ok,
            elapsed_ms: started.elapsed().as_millis() as u64,
            detail,
        });
        ok
    }

    fn frontend(&mut self) -> bool {
        let started = Instant::now();
        let req = HttpRequest::get(self.cfg.base_url.clone(), self.cfg.timeout_secs);
        match self.transport.send(&req) {
            Ok(resp) => self.record(CHECK_FRONTEND, started, true, format!("HTTP {}", resp.status)),
            Err(e) => self.record(CHECK_FRONTEND, started, false, e),
        }
    }

    fn backend(&mut self) -> bool {
        let cfg = self.cfg;
        let started = Instant::now();
        let mut tried = Vec::new();
        for path in &cfg.health_paths {
            let url = join_url(&cfg.backend_url, path);
            match self.transport.send(&HttpRequest::get(url, cfg.timeout_secs)) {
                Ok(resp) if resp.is_success() => {
                    return self.record(CHECK_BACKEND, started, true, format!("{path} -> HTTP {}", resp.status));
                }
                Ok(resp) => tried.push(format!("{path} -> HTTP {}", resp.status)),
                Err(e) => tried.push(format!("{path} -> {e}")),
            }
        }
        let detail = if tried.is_empty() {
            "no health paths configured".to_string()
        } else {
            tried.join("; ")
        };
        self.record(CHECK_BACKEND, started, false, detail)
    }

    fn login(&mut self) -> Option<String> {
        let cfg = self.cfg;
        let started = Instant::now();
        let (Some(identifier), Some(secret)) = (&cfg.identifier, &cfg.secret) else {
            self.record(
                CHECK_LOGIN,
                started,
                false,
                "demo credentials not configured".to_string(),
            );
            return None;
        };
        let mut body = Map::new();
        body.insert(cfg.identifier_field.clone(), Value::String(identifier.clone()));
        body.insert(cfg.secret_field.clone(), Value::String(secret.clone()));
        let url = join_url(&cfg.backend_url, &cfg.login_path);
        let req = HttpRequest::post_json(url, &Value::Object(body), cfg.timeout_secs);
        let resp = match self.transport.send(&req) {
            Ok(r) => r,
            Err(e) => {
                self.record(CHECK_LOGIN, started, false, e);
                return None;
            }
        };
        if !resp.is_success() {
            self.record(CHECK_LOGIN, started, false, format!("HTTP {}", resp.status));
            return None;
        }
        match resp.json().as_ref().and_then(extract_access_token) {
            Some(token) => {
                self.record(CHECK_LOGIN, started, true, format!("HTTP {}, token issued", resp.status));
                Some(token)
            }
            None => {
                self.record(
                    CHECK_LOGIN,
                    started,
                    false,
                    format!("HTTP {} without an access token", resp.status),
                );
                None
            }
        }
    }

    fn read(&mut self, token: Option<&str>) -> bool {
        let started = Instant::now();
        let Some(token) = token else {
            return self.record(CHECK_READ, started, false, "no access token from login".to_string());
        };
        let url = join_url(&self.cfg.base_url, &self.cfg.read_path);
        let req = HttpRequest::get(url, self.cfg.timeout_secs).bearer(token);
        match self.transport.send(&req) {
            Ok(resp) if resp.is_success() => {
                if resp.json().is_some_and(|v| is_list_payload(&v)) {
                    self.record(CHECK_READ, started, true, format!("HTTP {}, list payload", resp.status))
                } else {
                    self.record(
                        CHECK_READ,
                        started,
                        false,
                        format!("HTTP {} but payload is not a list", resp.status),
                    )
                }
            }
            Ok(resp) => self.record(CHECK_READ, started, false, exchange_detail(&resp)),
            Err(e) => self.record(CHECK_READ, started, false, e),
        }
    }

    fn skip(&mut self, name: &str, reason: &str) {
        self.checks.push(CheckResult {
            name: name.to_string(),
            ok: false,
            elapsed_ms: 0,
            detail: format!("skipped: {reason}"),
        });
    }
}

/// Runs the four probes in order. Login and read are skipped (and fail)
/// when the backend is not ready, so no stale credential can pass them.
pub fn run_sentinel(
    cfg: &SentinelConfig,
    transport: &dyn HttpTransport,
    now: DateTime<Utc>,
) -> SentinelReport {
    let mut probe = Probe {
        cfg,
        transport,
        checks: Vec::new(),
    };
    probe.frontend();
    if probe.backend() {
        let token = probe.login();
        probe.read(token.as_deref());
    } else {
        probe.skip(CHECK_LOGIN, "backend not ready");
        probe.skip(CHECK_READ, "backend not ready");
    }
    let failures: Vec<Failure> = probe
        .checks
        .iter()
        .filter(|c| !c.ok)
        .map(|c| Failure {
            name: c.name.clone(),
            detail: c.detail.clone(),
            next_step: next_step_for(&c.name).to_string(),
        })
        .collect();
    SentinelReport {
        status: Verdict::from_ok(failures.is_empty()),
        generated_at: now.to_rfc3339(),
        base_url: cfg.base_url.clone(),
        backend_url: cfg.backend_url.clone(),
        checks: probe.checks,
        failures,
    }
}

pub fn print_sentinel(report: &SentinelReport) {
    println!("== diagrs sentinel ==");
    println!("status: {}", report.status);
    println!("base_url: {}", report.base_url);
    println!("backend_url: {}", report.backend_url);
    for c in &report.checks {
        println!(
            "- {} {} ({}ms) {}",
            if c.ok { "PASS" } else { "FAIL" },
            c.name,
            c.elapsed_ms,
            c.detail
        );
    }
    if let Some(f) = report.failures.first() {
        println!("next_step: {}", f.next_step);
    }
}
