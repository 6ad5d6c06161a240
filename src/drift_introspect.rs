use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use super::drift_env::EnvTarget;
use super::drift_parse::{SchemaDoc, parse_schema};
use crate::config::DiagConfig;
use crate::error::{DiagError, DiagResult};
use crate::process::{run_command_output_with_timeout, stderr_tail};
use crate::util::scrub_connection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrospectionError {
    pub message: String,
    pub timed_out: bool,
}

impl IntrospectionError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }
}

impl fmt::Display for IntrospectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Produces the live schema for one environment.
pub trait Introspector: Sync {
    /// Configuration check run once before any environment is touched.
    fn preflight(&self) -> DiagResult<()> {
        Ok(())
    }

    fn introspect(&self, target: &EnvTarget, declared: &Path)
    -> Result<SchemaDoc, IntrospectionError>;
}

/// Runs an external tool that rewrites a scratch copy of the declared
/// schema in place, e.g. `npx prisma db pull --force --schema {schema}`.
#[derive(Debug, Clone)]
pub struct CommandIntrospector {
    pub command: String,
    pub connection_env: String,
    pub timeout_secs: u64,
    pub scratch_root: PathBuf,
    pub workdir: PathBuf,
}

impl CommandIntrospector {
    pub fn from_config(cfg: &DiagConfig) -> Self {
        Self {
            command: cfg.schema.introspect_command.clone(),
            connection_env: cfg.schema.connection_env.clone(),
            timeout_secs: cfg.schema.timeout_secs,
            scratch_root: cfg.report_dir.join(".introspect"),
            workdir: cfg.root.clone(),
        }
    }

    fn argv(&self) -> Result<Vec<String>, String> {
        let argv = shell_words::split(&self.command)
            .map_err(|e| format!("invalid schema.introspect_command '{}': {e}", self.command))?;
        if argv.first().is_none_or(|bin| bin.trim().is_empty()) {
            return Err("schema.introspect_command is empty".to_string());
        }
        Ok(argv)
    }

    fn scrub(&self, text: &str, target: &EnvTarget) -> String {
        scrub_connection(text, &target.connection, &target.masked)
    }

    fn run_in(
        &self,
        argv: &[String],
        scratch: &Path,
        target: &EnvTarget,
        declared: &Path,
    ) -> Result<SchemaDoc, IntrospectionError> {
        let copy = scratch.join(
            declared
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("schema.prisma")),
        );
        fs::copy(declared, &copy).map_err(|e| {
            IntrospectionError::new(format!("cannot copy {}: {e}", declared.display()))
        })?;
        let copy_str = copy.display().to_string();
        let args: Vec<String> = argv[1..]
            .iter()
            .map(|a| a.replace("{schema}", &copy_str))
            .collect();
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&args)
            .current_dir(&self.workdir)
            .env(&self.connection_env, &target.connection);
        let label = format!("introspect {}", target.name);
        let out = run_command_output_with_timeout(cmd, &label, self.timeout_secs).map_err(|e| {
            IntrospectionError {
                message: self.scrub(&e.to_string(), target),
                timed_out: e.timeout_info().is_some(),
            }
        })?;
        if !out.status.success() {
            let tail = stderr_tail(&out);
            let detail = if tail.is_empty() {
                format!("{label} exited with {}", out.status)
            } else {
                format!("{label} exited with {}: {}", out.status, self.scrub(&tail, target))
            };
            return Err(IntrospectionError::new(detail));
        }
        let text = fs::read_to_string(&copy)
            .map_err(|e| IntrospectionError::new(format!("cannot read introspected schema: {e}")))?;
        Ok(parse_schema(&text))
    }
}

impl Introspector for CommandIntrospector {
    fn preflight(&self) -> DiagResult<()> {
        self.argv().map(|_| ()).map_err(DiagError::stop)
    }

    fn introspect(&self, target: &EnvTarget, declared: &Path) -> Result<SchemaDoc, IntrospectionError> {
        let argv = self.argv().map_err(IntrospectionError::new)?;
        let scratch = self
            .scratch_root
            .join(format!("{}-{}", target.name, std::process::id()));
        fs::create_dir_all(&scratch).map_err(|e| {
            IntrospectionError::new(format!("cannot create {}: {e}", scratch.display()))
        })?;
        let result = self.run_in(&argv, &scratch, target, declared);
        let _ = fs::remove_dir_all(&scratch);
        result
    }
}

#[derive(Debug)]
pub struct EnvIntrospection {
    pub target: EnvTarget,
    pub result: Result<SchemaDoc, IntrospectionError>,
    pub duration_ms: u64,
}

/// Introspects every environment concurrently; results keep input order.
pub fn introspect_all(
    introspector: &dyn Introspector,
    targets: Vec<EnvTarget>,
    declared: &Path,
) -> Vec<EnvIntrospection> {
    let borrowed = &targets;
    let joined: Vec<(Result<SchemaDoc, IntrospectionError>, u64)> = std::thread::scope(|scope| {
        let handles: Vec<_> = borrowed
            .iter()
            .map(|target| {
                scope.spawn(move || {
                    let started = Instant::now();
                    let result = introspector.introspect(target, declared);
                    (result, started.elapsed().as_millis() as u64)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| {
                    (Err(IntrospectionError::new("introspection thread panicked")), 0)
                })
            })
            .collect()
    });
    targets
        .into_iter()
        .zip(joined)
        .map(|(target, (result, duration_ms))| EnvIntrospection {
            target,
            result,
            duration_ms,
        })
        .collect()
}
