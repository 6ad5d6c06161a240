use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const DEFAULT_CONFIG_REL: &str = ".diag/config.json";
pub const AGGREGATE_REPORT_NAME: &str = "diagnostics.json";
pub const DRIFT_REPORT_NAME: &str = "schema-drift.md";
pub const TRIAGE_REPORT_NAME: &str = "log-triage.md";

/// Workspace root: `DIAG_ROOT`, else the git top-level, else the cwd.
pub fn workspace_root() -> PathBuf {
    if let Ok(v) = env::var("DIAG_ROOT") {
        let p = PathBuf::from(v.trim());
        if p.is_dir() {
            return p;
        }
    }
    git_toplevel()
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn git_toplevel() -> Option<PathBuf> {
    let out = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if s.is_empty() {
        None
    } else {
        Some(PathBuf::from(s))
    }
}

pub fn resolve_config_file(root: &Path, explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return resolve_under(root, p);
    }
    if let Ok(v) = env::var("DIAG_CONFIG")
        && !v.trim().is_empty()
    {
        return resolve_under(root, Path::new(v.trim()));
    }
    root.join(DEFAULT_CONFIG_REL)
}

/// Absolute paths pass through; relative ones hang off `root`.
pub fn resolve_under(root: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

pub fn ensure_parent_dir(path: &Path) -> Result<(), String> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    std::fs::create_dir_all(parent)
        .map_err(|e| format!("failed to create {}: {e}", parent.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_under_keeps_absolute_paths() {
        let root = Path::new("/srv/app");
        assert_eq!(
            resolve_under(root, Path::new("/var/log/app.log")),
            PathBuf::from("/var/log/app.log")
        );
        assert_eq!(
            resolve_under(root, Path::new("logs/app.log")),
            PathBuf::from("/srv/app/logs/app.log")
        );
    }

    #[test]
    fn explicit_config_wins() {
        let root = Path::new("/srv/app");
        assert_eq!(
            resolve_config_file(root, Some(Path::new("ci/diag.json"))),
            PathBuf::from("/srv/app/ci/diag.json")
        );
    }
}
