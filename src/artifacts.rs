use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::paths::ensure_parent_dir;

pub fn write_json_atomic(path: &Path, value: &Value) -> Result<(), String> {
    let mut serialized = serde_json::to_string_pretty(value)
        .map_err(|e| format!("failed to serialize JSON: {e}"))?;
    serialized.push('\n');
    write_text_atomic(path, &serialized)
}

/// Write-to-temp then rename, so readers never see a half-written report.
pub fn write_text_atomic(path: &Path, text: &str) -> Result<(), String> {
    ensure_parent_dir(path)?;
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    fs::write(&tmp, text).map_err(|e| format!("failed to write {}: {e}", tmp.display()))?;
    fs::rename(&tmp, path).map_err(|e| {
        format!(
            "failed to move {} -> {}: {e}",
            tmp.display(),
            path.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn json_write_overwrites_and_leaves_no_temp_files() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("reports").join("diagnostics.json");
        write_json_atomic(&path, &json!({"status": "GO"})).expect("first write");
        write_json_atomic(&path, &json!({"status": "NO_GO"})).expect("second write");
        let text = fs::read_to_string(&path).expect("read back");
        assert!(text.ends_with('\n'));
        let v: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(v["status"], "NO_GO");
        let entries: Vec<_> = fs::read_dir(path.parent().expect("parent"))
            .expect("list")
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
