use serde_json::Value;
use std::process::Command;

use crate::process::{run_command_with_stdin_output_with_timeout, stderr_tail};

const STATUS_MARKER: &str = "__DIAGRS_STATUS__:";

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout_secs: u64,
}

impl HttpRequest {
    pub fn get(url: String, timeout_secs: u64) -> Self {
        Self {
            method: "GET",
            url,
            headers: Vec::new(),
            body: None,
            timeout_secs,
        }
    }

    pub fn post_json(url: String, body: &Value, timeout_secs: u64) -> Self {
        Self {
            method: "POST",
            url,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(body.to_string()),
            timeout_secs,
        }
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.headers
            .push(("Authorization".to_string(), format!("Bearer {token}")));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// A completed exchange is `Ok` whatever its status code; `Err` means no
/// response at all (refused, DNS, timeout).
pub trait HttpTransport {
    fn send(&self, req: &HttpRequest) -> Result<HttpResponse, String>;
}

/// Shells out to `curl`. Headers and body travel in a config block on
/// stdin so tokens never show up in the process list; the status code is
/// appended to stdout after a marker line.
#[derive(Debug, Clone, Default)]
pub struct CurlTransport;

impl HttpTransport for CurlTransport {
    fn send(&self, req: &HttpRequest) -> Result<HttpResponse, String> {
        let (args, config) = curl_invocation(req);
        let mut cmd = Command::new("curl");
        cmd.args(&args);
        let label = format!("curl {} {}", req.method, req.url);
        let out = run_command_with_stdin_output_with_timeout(
            cmd,
            config.as_deref(),
            &label,
            req.timeout_secs + 5,
        )
        .map_err(|e| e.to_string())?;
        if !out.status.success() {
            let tail = stderr_tail(&out);
            return Err(if tail.is_empty() {
                format!("curl exited with {}", out.status)
            } else {
                tail
            });
        }
        parse_curl_output(&String::from_utf8_lossy(&out.stdout))
    }
}

/// Command-line arguments plus the stdin config block, if any. The URL is
/// always the last argument.
fn curl_invocation(req: &HttpRequest) -> (Vec<String>, Option<String>) {
    let mut args: Vec<String> = vec![
        "-sS".to_string(),
        "-X".to_string(),
        req.method.to_string(),
        "--max-time".to_string(),
        req.timeout_secs.to_string(),
        "-w".to_string(),
        format!("\n{STATUS_MARKER}%{{http_code}}"),
    ];
    let mut config = String::new();
    for (k, v) in &req.headers {
        let header = config_quote(&format!("{k}: {v}"));
        config.push_str(&format!("header = \"{header}\"\n"));
    }
    if let Some(body) = &req.body {
        config.push_str(&format!("data-raw = \"{}\"\n", config_quote(body)));
    }
    let config = if config.is_empty() {
        None
    } else {
        args.extend(["-K".to_string(), "-".to_string()]);
        Some(config)
    };
    args.push(req.url.clone());
    (args, config)
}

fn config_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

pub fn parse_curl_output(stdout: &str) -> Result<HttpResponse, String> {
    let Some(idx) = stdout.rfind(STATUS_MARKER) else {
        return Err("curl output missing status marker".to_string());
    };
    let code = stdout[idx + STATUS_MARKER.len()..].trim();
    let status: u16 = code
        .parse()
        .map_err(|_| format!("unparseable HTTP status '{code}'"))?;
    if status == 0 {
        return Err("no HTTP response".to_string());
    }
    let body = stdout[..idx].strip_suffix('\n').unwrap_or(&stdout[..idx]);
    Ok(HttpResponse {
        status,
        body: body.to_string(),
    })
}

fn token_in(obj: &Value) -> Option<String> {
    ["accessToken", "access_token", "token"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .filter(|t| !t.trim().is_empty())
        .map(str::to_string)
}

pub fn extract_access_token(body: &Value) -> Option<String> {
    token_in(body).or_else(|| body.get("data").and_then(token_in))
}

pub fn is_list_payload(body: &Value) -> bool {
    body.is_array()
        || ["data", "items", "results"]
            .iter()
            .any(|k| body.get(*k).is_some_and(Value::is_array))
}

pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn curl_output_splits_body_and_status() {
        let ok = parse_curl_output("{\"ok\":true}\n__DIAGRS_STATUS__:200").expect("ok");
        assert_eq!(ok.status, 200);
        assert_eq!(ok.body, "{\"ok\":true}");
        assert!(ok.is_success());
        let empty = parse_curl_output("\n__DIAGRS_STATUS__:204").expect("empty");
        assert_eq!(empty.body, "");
        assert!(parse_curl_output("\n__DIAGRS_STATUS__:000").is_err());
        assert!(parse_curl_output("garbage").is_err());
    }

    #[test]
    fn credentials_stay_out_of_the_argument_list() {
        let login = HttpRequest::post_json(
            "http://localhost:4000/login".to_string(),
            &json!({"identifier": "demo@example.com", "secret": "pa\"ss\\word"}),
            10,
        );
        let read = HttpRequest::get("http://localhost:4000/api/orders".to_string(), 10)
            .bearer("tok-secret-1");

        let (args, config) = curl_invocation(&read);
        assert!(args.iter().all(|a| !a.contains("tok-secret-1")));
        assert_eq!(args.last().map(String::as_str), Some("http://localhost:4000/api/orders"));
        assert!(args.windows(2).any(|w| w[0] == "-K" && w[1] == "-"));
        assert_eq!(
            config.as_deref(),
            Some("header = \"Authorization: Bearer tok-secret-1\"\n")
        );

        let (args, config) = curl_invocation(&login);
        assert!(args.iter().all(|a| !a.contains("demo@example.com")));
        let config = config.expect("login sends a config block");
        assert!(config.contains("header = \"Content-Type: application/json\"\n"));
        assert!(config.contains(r#"\"secret\":\"pa\\\"ss\\\\word\""#));

        let (args, config) = curl_invocation(&HttpRequest::get("http://h/health".to_string(), 5));
        assert_eq!(config, None);
        assert!(!args.iter().any(|a| a == "-K"));
    }

    #[test]
    fn tokens_and_list_payloads() {
        assert_eq!(
            extract_access_token(&json!({"accessToken": "abc"})).as_deref(),
            Some("abc")
        );
        assert_eq!(
            extract_access_token(&json!({"data": {"access_token": "xyz"}})).as_deref(),
            Some("xyz")
        );
        assert_eq!(extract_access_token(&json!({"token": ""})), None);
        assert!(is_list_payload(&json!([])));
        assert!(is_list_payload(&json!({"items": [1, 2]})));
        assert!(!is_list_payload(&json!({"data": {"id": 1}})));
    }

    #[test]
    fn url_joining_tolerates_slashes() {
        assert_eq!(join_url("http://h:4000/", "/health"), "http://h:4000/health");
        assert_eq!(join_url("http://h", "api/orders"), "http://h/api/orders");
    }
}
