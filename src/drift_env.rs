use std::fmt;
use std::fs;
use std::path::PathBuf;

use crate::config::SchemaConfig;
use crate::error::{DiagError, DiagResult};
use crate::util::mask_connection;

/// One deployment environment with its resolved connection string.
#[derive(Clone)]
pub struct EnvTarget {
    pub name: String,
    pub file: PathBuf,
    pub connection: String,
    pub masked: String,
}

impl fmt::Debug for EnvTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvTarget")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("masked", &self.masked)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingEnv {
    pub name: String,
    pub file: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct EnvDiscovery {
    pub targets: Vec<EnvTarget>,
    pub missing: Vec<MissingEnv>,
}

fn unquote(v: &str) -> &str {
    for q in ['"', '\''] {
        if v.len() >= 2 && v.starts_with(q) && v.ends_with(q) {
            return &v[1..v.len() - 1];
        }
    }
    v
}

/// Value of `key` in dotenv-style `text`. Comments, blank lines, an
/// `export ` prefix, surrounding quotes and trailing ` # ...` are handled.
pub fn extract_connection(text: &str, key: &str) -> Option<String> {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        if k.trim() != key {
            continue;
        }
        let v = v.trim();
        let v = if v.starts_with('"') || v.starts_with('\'') {
            let q = &v[..1];
            match v[1..].find(q) {
                Some(end) => &v[..end + 2],
                None => v,
            }
        } else {
            v.split(" #").next().unwrap_or(v).trim()
        };
        let v = unquote(v).trim();
        if v.is_empty() {
            return None;
        }
        return Some(v.to_string());
    }
    None
}

/// Resolves every configured environment; unresolved ones are collected
/// rather than returned as errors so the caller sees all of them at once.
pub fn resolve_environments(schema: &SchemaConfig) -> EnvDiscovery {
    let mut out = EnvDiscovery::default();
    for env in &schema.environments {
        let text = match fs::read_to_string(&env.file) {
            Ok(t) => t,
            Err(e) => {
                out.missing.push(MissingEnv {
                    name: env.name.clone(),
                    file: env.file.clone(),
                    reason: format!("cannot read file ({})", e.kind()),
                });
                continue;
            }
        };
        match extract_connection(&text, &schema.connection_key) {
            Some(connection) => out.targets.push(EnvTarget {
                name: env.name.clone(),
                file: env.file.clone(),
                masked: mask_connection(&connection),
                connection,
            }),
            None => out.missing.push(MissingEnv {
                name: env.name.clone(),
                file: env.file.clone(),
                reason: format!("{} not set", schema.connection_key),
            }),
        }
    }
    out
}

impl EnvDiscovery {
    /// Any unresolved environment stops the stage before introspection.
    pub fn require_all(self) -> DiagResult<Vec<EnvTarget>> {
        if self.missing.is_empty() {
            if self.targets.is_empty() {
                return Err(DiagError::stop("no schema environments configured"));
            }
            return Ok(self.targets);
        }
        let detail = self
            .missing
            .iter()
            .map(|m| format!("{} ({}: {})", m.name, m.file.display(), m.reason))
            .collect::<Vec<_>>()
            .join("; ");
        Err(DiagError::stop(format!(
            "missing database connection for environment(s): {detail}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvFileConfig;
    use tempfile::tempdir;

    #[test]
    fn extracts_quoted_exported_and_commented_values() {
        let text = "# DATABASE_URL=commented\n\nOTHER=1\nexport DATABASE_URL=\"postgresql://u:p@h/app?x=1#frag\" # prod\n";
        assert_eq!(
            extract_connection(text, "DATABASE_URL").as_deref(),
            Some("postgresql://u:p@h/app?x=1#frag")
        );
        assert_eq!(
            extract_connection("DATABASE_URL=mysql://a/b # inline", "DATABASE_URL").as_deref(),
            Some("mysql://a/b")
        );
        assert_eq!(
            extract_connection("DATABASE_URL='file:dev.db'", "DATABASE_URL").as_deref(),
            Some("file:dev.db")
        );
        assert_eq!(extract_connection("DATABASE_URL=", "DATABASE_URL"), None);
        assert_eq!(extract_connection("DATABASE_URL_2=x", "DATABASE_URL"), None);
    }

    #[test]
    fn one_missing_environment_fails_the_whole_discovery() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join(".env"), "DATABASE_URL=postgresql://u:p@local/app\n")
            .expect("write");
        fs::write(dir.path().join(".env.production"), "# nothing here\n").expect("write");
        let schema = SchemaConfig {
            environments: vec![
                EnvFileConfig {
                    name: "local".to_string(),
                    file: dir.path().join(".env"),
                },
                EnvFileConfig {
                    name: "production".to_string(),
                    file: dir.path().join(".env.production"),
                },
            ],
            ..SchemaConfig::default()
        };
        let found = resolve_environments(&schema);
        assert_eq!(found.targets.len(), 1);
        assert_eq!(found.missing.len(), 1);
        assert!(!format!("{:?}", found.targets[0]).contains("u:p"));
        let err = found.require_all().expect_err("must stop");
        assert!(err.is_stop());
        assert!(err.to_string().contains("production"));
        assert!(!err.to_string().contains("u:p@local"));
    }
}
