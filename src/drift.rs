#[path = "drift_diff.rs"]
mod drift_diff;
#[path = "drift_env.rs"]
mod drift_env;
#[path = "drift_introspect.rs"]
mod drift_introspect;
#[path = "drift_parse.rs"]
mod drift_parse;
#[path = "drift_report.rs"]
mod drift_report;

use chrono::{DateTime, Utc};
use std::fs;

use crate::config::DiagConfig;
use crate::error::{DiagError, DiagResult};
use crate::types::Verdict;

pub use drift_diff::{DriftSummary, diff_schemas};
pub use drift_introspect::{CommandIntrospector, Introspector};
pub use drift_parse::parse_schema;
pub use drift_report::{DriftReport, EnvDrift, EnvStatus, print_drift, render_markdown};

#[cfg(test)]
pub use drift_env::EnvTarget;
#[cfg(test)]
pub use drift_introspect::IntrospectionError;
#[cfg(test)]
pub use drift_parse::SchemaDoc;

/// Parses the declared schema, resolves every environment (all must
/// resolve), introspects them concurrently and diffs each one.
pub fn run_drift(
    cfg: &DiagConfig,
    introspector: &dyn Introspector,
    now: DateTime<Utc>,
) -> DiagResult<DriftReport> {
    let declared_path = &cfg.schema.declared_path;
    let declared_src = fs::read_to_string(declared_path).map_err(|e| {
        DiagError::stop(format!(
            "cannot read declared schema {}: {e}",
            declared_path.display()
        ))
    })?;
    let declared = parse_schema(&declared_src);
    if declared.models.is_empty() && declared.enums.is_empty() {
        return Err(DiagError::stop(format!(
            "declared schema {} has no model, type or enum blocks",
            declared_path.display()
        )));
    }
    let targets = drift_env::resolve_environments(&cfg.schema).require_all()?;
    introspector.preflight()?;

    let mut environments = Vec::with_capacity(targets.len());
    let mut summary = DriftSummary::default();
    for run in drift_introspect::introspect_all(introspector, targets, declared_path) {
        let env = match run.result {
            Ok(reflected) => {
                let result = diff_schemas(&declared, &reflected);
                EnvDrift {
                    name: run.target.name.clone(),
                    masked_identity: run.target.masked.clone(),
                    status: if result.findings.is_empty() {
                        EnvStatus::Clean
                    } else {
                        EnvStatus::Drift
                    },
                    summary: result.summary,
                    findings: result.findings,
                    detail: None,
                    duration_ms: run.duration_ms,
                }
            }
            Err(e) => EnvDrift {
                name: run.target.name.clone(),
                masked_identity: run.target.masked.clone(),
                status: EnvStatus::IntrospectionFailed,
                findings: Vec::new(),
                summary: DriftSummary::default(),
                detail: Some(if e.timed_out {
                    format!("timed out: {e}")
                } else {
                    e.to_string()
                }),
                duration_ms: run.duration_ms,
            },
        };
        summary.add(&env.summary);
        environments.push(env);
    }
    let failed = environments
        .iter()
        .any(|e| e.status == EnvStatus::IntrospectionFailed);
    Ok(DriftReport {
        status: Verdict::from_ok(summary.high == 0 && !failed),
        generated_at: now.to_rfc3339(),
        declared_path: declared_path.display().to_string(),
        environments,
        summary,
    })
}
