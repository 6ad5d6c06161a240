use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DiagError, DiagResult};
use crate::paths::{resolve_config_file, resolve_under};

pub const APP_NAME: &str = "diagrs";
pub const APP_DESC: &str = "Release-readiness diagnostics pipeline";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_MAX_LINES: usize = 2_000;
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_READ_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_TOP_N: usize = 5;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CMD_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_CONNECTION_KEY: &str = "DATABASE_URL";
pub const DEFAULT_INTROSPECT_CMD: &str = "npx prisma db pull --force --schema {schema}";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub base_url: String,
    pub backend_url: String,
    pub health_paths: Vec<String>,
    pub login_path: String,
    pub read_path: String,
    pub identifier: Option<String>,
    pub secret: Option<String>,
    pub identifier_field: String,
    pub secret_field: String,
    pub timeout_secs: u64,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            backend_url: "http://localhost:4000".to_string(),
            health_paths: ["/health", "/healthz", "/api/health", "/ready"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            login_path: "/api/auth/login".to_string(),
            read_path: "/api/orders".to_string(),
            identifier: None,
            secret: None,
            identifier_field: "identifier".to_string(),
            secret_field: "secret".to_string(),
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvFileConfig {
    pub name: String,
    pub file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub declared_path: PathBuf,
    pub environments: Vec<EnvFileConfig>,
    pub connection_key: String,
    pub connection_env: String,
    pub introspect_command: String,
    pub timeout_secs: u64,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            declared_path: PathBuf::from("prisma/schema.prisma"),
            environments: vec![
                EnvFileConfig {
                    name: "local".to_string(),
                    file: PathBuf::from(".env"),
                },
                EnvFileConfig {
                    name: "production".to_string(),
                    file: PathBuf::from(".env.production"),
                },
            ],
            connection_key: DEFAULT_CONNECTION_KEY.to_string(),
            connection_env: DEFAULT_CONNECTION_KEY.to_string(),
            introspect_command: DEFAULT_INTROSPECT_CMD.to_string(),
            timeout_secs: DEFAULT_CMD_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogSourceConfig {
    pub name: String,
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    pub sources: Vec<LogSourceConfig>,
    pub max_lines: usize,
    pub max_file_size_bytes: u64,
    pub max_read_bytes: u64,
    pub top_n: usize,
    pub update_baseline: bool,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                LogSourceConfig {
                    name: "backend".to_string(),
                    paths: vec![PathBuf::from("logs/backend")],
                },
                LogSourceConfig {
                    name: "frontend".to_string(),
                    paths: vec![PathBuf::from("logs/frontend")],
                },
            ],
            max_lines: DEFAULT_MAX_LINES,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            top_n: DEFAULT_TOP_N,
            update_baseline: false,
        }
    }
}

/// Resolved configuration for one run. Built once, passed explicitly to
/// every stage, discarded when the run ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagConfig {
    #[serde(skip)]
    pub root: PathBuf,
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
    pub report_dir: PathBuf,
    pub baseline_path: PathBuf,
    pub run_log_path: PathBuf,
    pub sentinel: SentinelConfig,
    pub schema: SchemaConfig,
    pub triage: TriageConfig,
}

impl Default for DiagConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            config_file: None,
            report_dir: PathBuf::from(".diag/reports"),
            baseline_path: PathBuf::from(".diag/triage-baseline.json"),
            run_log_path: PathBuf::from(".diag/logs/runs.jsonl"),
            sentinel: SentinelConfig::default(),
            schema: SchemaConfig::default(),
            triage: TriageConfig::default(),
        }
    }
}

fn env_str(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    env_str(name)
        .and_then(|v| v.parse::<u64>().ok())
        .map(|v| v.max(1))
}

fn env_bool(name: &str) -> Option<bool> {
    env_str(name)
        .and_then(|v| v.parse::<u8>().ok())
        .map(|v| v == 1)
}

impl DiagConfig {
    /// Loads `<root>/.diag/config.json` (or the explicit/`DIAG_CONFIG` file),
    /// applies env overrides and anchors relative paths at `root`.
    pub fn load(root: &Path, explicit: Option<&Path>) -> DiagResult<Self> {
        let file = resolve_config_file(root, explicit);
        let mut cfg = if file.is_file() {
            let raw = fs::read_to_string(&file)
                .map_err(|e| DiagError::io(format!("cannot read {}", file.display()), e))?;
            serde_json::from_str::<DiagConfig>(&raw).map_err(|e| {
                DiagError::stop(format!("invalid config {}: {e}", file.display()))
            })?
        } else if explicit.is_some() {
            return Err(DiagError::stop(format!(
                "config file not found: {}",
                file.display()
            )));
        } else {
            DiagConfig::default()
        };
        cfg.config_file = file.is_file().then_some(file);
        cfg.apply_env_overrides();
        cfg.anchor(root);
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_str("DIAG_BASE_URL") {
            self.sentinel.base_url = v;
        }
        if let Some(v) = env_str("DIAG_BACKEND_URL") {
            self.sentinel.backend_url = v;
        }
        if let Some(v) = env_str("DIAG_DEMO_IDENTIFIER") {
            self.sentinel.identifier = Some(v);
        }
        if let Some(v) = env_str("DIAG_DEMO_SECRET") {
            self.sentinel.secret = Some(v);
        }
        if let Some(v) = env_u64("DIAG_HTTP_TIMEOUT_SECS") {
            self.sentinel.timeout_secs = v;
        }
        if let Some(v) = env_u64("DIAG_CMD_TIMEOUT_SECS") {
            self.schema.timeout_secs = v;
        }
        if let Some(v) = env_str("DIAG_INTROSPECT_CMD") {
            self.schema.introspect_command = v;
        }
        if let Some(v) = env_bool("DIAG_UPDATE_BASELINE") {
            self.triage.update_baseline = v;
        }
    }

    fn anchor(&mut self, root: &Path) {
        self.root = root.to_path_buf();
        self.report_dir = resolve_under(root, &self.report_dir);
        self.baseline_path = resolve_under(root, &self.baseline_path);
        self.run_log_path = resolve_under(root, &self.run_log_path);
        self.schema.declared_path = resolve_under(root, &self.schema.declared_path);
        for env_file in &mut self.schema.environments {
            env_file.file = resolve_under(root, &env_file.file);
        }
        for source in &mut self.triage.sources {
            for p in &mut source.paths {
                *p = resolve_under(root, p);
            }
        }
        self.triage.max_lines = self.triage.max_lines.max(1);
        self.triage.top_n = self.triage.top_n.max(1);
        self.sentinel.timeout_secs = self.sentinel.timeout_secs.max(1);
        self.schema.timeout_secs = self.schema.timeout_secs.max(1);
    }

    pub fn report_path(&self, name: &str) -> PathBuf {
        self.report_dir.join(name)
    }

    /// JSON view with the demo secret blanked, for `diagrs config`.
    pub fn redacted(&self) -> Value {
        let mut v = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(s) = v.get_mut("sentinel").and_then(Value::as_object_mut)
            && s.get("secret").is_some_and(|x| !x.is_null())
        {
            s.insert("secret".to_string(), Value::String("***".to_string()));
        }
        if let Some(obj) = v.as_object_mut() {
            obj.insert(
                "root".to_string(),
                Value::String(self.root.display().to_string()),
            );
            obj.insert(
                "config_file".to_string(),
                self.config_file
                    .as_ref()
                    .map(|p| Value::String(p.display().to_string()))
                    .unwrap_or(Value::Null),
            );
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_config_file_yields_anchored_defaults() {
        let dir = tempdir().expect("tempdir");
        let cfg = DiagConfig::load(dir.path(), None).expect("load");
        assert_eq!(cfg.report_dir, dir.path().join(".diag/reports"));
        assert_eq!(cfg.schema.environments.len(), 2);
        assert_eq!(
            cfg.schema.environments[0].file,
            dir.path().join(".env")
        );
        assert_eq!(cfg.triage.top_n, DEFAULT_TOP_N);
        assert!(cfg.config_file.is_none());
    }

    #[test]
    fn partial_config_merges_with_defaults() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join(".diag").join("config.json");
        fs::create_dir_all(file.parent().expect("parent")).expect("mkdir");
        fs::write(
            &file,
            r#"{"triage":{"sources":[{"name":"api","paths":["var/api.log"]}],"top_n":3},
                "sentinel":{"secret":"hunter2"}}"#,
        )
        .expect("write config");
        let cfg = DiagConfig::load(dir.path(), None).expect("load");
        assert_eq!(cfg.triage.top_n, 3);
        assert_eq!(cfg.triage.max_lines, DEFAULT_MAX_LINES);
        assert_eq!(
            cfg.triage.sources[0].paths[0],
            dir.path().join("var/api.log")
        );
        assert_eq!(cfg.sentinel.login_path, "/api/auth/login");
        let redacted = cfg.redacted();
        assert_eq!(
            redacted["sentinel"]["secret"].as_str(),
            Some("***"),
            "secret must be masked: {redacted}"
        );
    }

    #[test]
    fn unparseable_config_is_a_stop() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("bad.json");
        fs::write(&file, "{ not json").expect("write");
        let err = DiagConfig::load(dir.path(), Some(&file)).expect_err("must fail");
        assert!(err.is_stop(), "{err}");
    }
}
