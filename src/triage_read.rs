use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::config::LogSourceConfig;
use crate::error::{DiagError, DiagResult};

const CHUNK_SIZE: u64 = 64 * 1024;

/// One reconstructed log event: a header line plus its continuation lines.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub source: String,
    pub file_path: PathBuf,
    pub lines: Vec<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[cfg(test)]
impl LogEntry {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    Ok,
    Missing,
    Skipped,
    Error,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Ok => "OK",
            FileStatus::Missing => "MISSING",
            FileStatus::Skipped => "SKIPPED",
            FileStatus::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileScan {
    pub path: PathBuf,
    pub status: FileStatus,
    pub lines_read: usize,
    pub entries: usize,
    pub detail: Option<String>,
}

impl FileScan {
    fn marker(path: PathBuf, status: FileStatus, detail: Option<String>) -> Self {
        Self {
            path,
            status,
            lines_read: 0,
            entries: 0,
            detail,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceScan {
    pub source: String,
    pub files: Vec<FileScan>,
}

#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub max_lines: usize,
    pub since: Option<DateTime<Utc>>,
    pub max_file_size_bytes: u64,
    pub max_read_bytes: u64,
}

#[derive(Debug, Default)]
pub struct ReadOutcome {
    pub entries: Vec<LogEntry>,
    pub sources: Vec<SourceScan>,
}

enum Candidate {
    Read(PathBuf),
    Skip(PathBuf, &'static str),
    Missing(PathBuf),
}

fn iso_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\[?(\d{4}-\d{2}-\d{2})[T ](\d{2}:\d{2}:\d{2})(\.\d+)?(Z|[+-]\d{2}:?\d{2})?")
            .expect("valid iso timestamp regex")
    })
}

fn slash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\[?(\d{4}/\d{2}/\d{2})[ T](\d{2}:\d{2}:\d{2})")
            .expect("valid slash timestamp regex")
    })
}

fn syslog_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\[?(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+(\d{1,2})\s(\d{2}:\d{2}:\d{2})\b")
            .expect("valid syslog timestamp regex")
    })
}

fn entry_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"^\[?(?:",
            r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}",
            r"|\d{4}/\d{2}/\d{2}[ T]\d{2}:\d{2}",
            r"|(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+\d{1,2}\s\d{2}:\d{2}",
            r"|(?i:trace|debug|info|notice|warn|warning|error|fatal|critical)\]",
            r"|(?:TRACE|DEBUG|INFO|NOTICE|WARN|WARNING|ERROR|FATAL|CRITICAL)\b",
            r")"
        ))
        .expect("valid entry start regex")
    })
}

/// A header line opens a new entry; indented lines and `at ...` frames never do.
pub fn is_entry_start(line: &str) -> bool {
    entry_start_re().is_match(line)
}

/// Leading timestamp of `line` (optionally bracketed). Syslog stamps carry no
/// year, so the current one is assumed unless that lands in the future.
pub fn parse_timestamp(line: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(c) = iso_re().captures(line) {
        let date = c.get(1)?.as_str();
        let time = c.get(2)?.as_str();
        let frac = c.get(3).map(|m| m.as_str()).unwrap_or("");
        if let Some(offset) = c.get(4).map(|m| m.as_str()) {
            let offset = normalize_offset(offset);
            return DateTime::parse_from_rfc3339(&format!("{date}T{time}{frac}{offset}"))
                .ok()
                .map(|dt| dt.with_timezone(&Utc));
        }
        return NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|n| n.and_utc());
    }
    if let Some(c) = slash_re().captures(line) {
        let stamp = format!("{} {}", c.get(1)?.as_str(), c.get(2)?.as_str());
        return NaiveDateTime::parse_from_str(&stamp, "%Y/%m/%d %H:%M:%S")
            .ok()
            .map(|n| n.and_utc());
    }
    if let Some(c) = syslog_re().captures(line) {
        let month = month_number(c.get(1)?.as_str())?;
        let day: u32 = c.get(2)?.as_str().parse().ok()?;
        let time = NaiveTime::parse_from_str(c.get(3)?.as_str(), "%H:%M:%S").ok()?;
        let at_year = |year: i32| {
            NaiveDate::from_ymd_opt(year, month, day)
                .map(|d| Utc.from_utc_datetime(&d.and_time(time)))
        };
        let this_year = at_year(now.year())?;
        if this_year > now + chrono::Duration::days(1) {
            return at_year(now.year() - 1);
        }
        return Some(this_year);
    }
    None
}

fn normalize_offset(offset: &str) -> String {
    if offset == "Z" || offset.contains(':') {
        return offset.to_string();
    }
    let (sign_hours, minutes) = offset.split_at(3);
    format!("{sign_hours}:{minutes}")
}

fn month_number(name: &str) -> Option<u32> {
    let months = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    months
        .iter()
        .position(|m| *m == name)
        .map(|i| i as u32 + 1)
}

fn is_compressed(name: &str) -> bool {
    [".gz", ".zip", ".bz2", ".xz", ".zst"]
        .iter()
        .any(|ext| name.ends_with(ext))
}

fn is_log_like(name: &str) -> bool {
    name.ends_with(".log")
        || name.contains(".log.")
        || name.ends_with(".txt")
        || name.ends_with(".out")
        || name.ends_with(".err")
}

fn permission_stop(path: &Path, e: &io::Error) -> Option<DiagError> {
    (e.kind() == io::ErrorKind::PermissionDenied)
        .then(|| DiagError::stop(format!("permission denied reading {}", path.display())))
}

fn list_dir(dir: &Path) -> DiagResult<Vec<(PathBuf, String)>> {
    let iter = fs::read_dir(dir).map_err(|e| {
        permission_stop(dir, &e)
            .unwrap_or_else(|| DiagError::io(format!("cannot list {}", dir.display()), e))
    })?;
    let mut out = Vec::new();
    for entry in iter {
        let entry = entry.map_err(|e| DiagError::io(format!("cannot list {}", dir.display()), e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        out.push((path, name));
    }
    out.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(out)
}

/// Directories expand to their plain log files; files pick up rotated
/// siblings (`app.log.1`, `app.log.2024-05-01`) but never archives.
fn expand_path(path: &Path) -> DiagResult<Vec<Candidate>> {
    if path.is_dir() {
        let mut out = Vec::new();
        for (p, name) in list_dir(path)? {
            if is_compressed(&name) {
                out.push(Candidate::Skip(p, "compressed archive"));
            } else if is_log_like(&name) {
                out.push(Candidate::Read(p));
            }
        }
        return Ok(out);
    }
    if !path.exists() {
        return Ok(vec![Candidate::Missing(path.to_path_buf())]);
    }
    let mut out = vec![Candidate::Read(path.to_path_buf())];
    let (Some(parent), Some(base)) = (path.parent(), path.file_name().and_then(|n| n.to_str()))
    else {
        return Ok(out);
    };
    let prefix = format!("{base}.");
    for (p, name) in list_dir(parent)? {
        if !name.starts_with(&prefix) {
            continue;
        }
        if is_compressed(&name) {
            out.push(Candidate::Skip(p, "compressed rotation"));
        } else {
            out.push(Candidate::Read(p));
        }
    }
    Ok(out)
}

/// Reads at most `max_read_bytes` from the end of `path` in fixed chunks,
/// stopping as soon as `max_lines` complete lines are buffered, and returns
/// the most recent `max_lines` lines.
pub fn read_tail_lines(path: &Path, max_lines: usize, max_read_bytes: u64) -> io::Result<Vec<String>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let floor = len.saturating_sub(max_read_bytes);
    let mut pos = len;
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut newlines = 0usize;
    while pos > floor {
        let step = CHUNK_SIZE.min(pos - floor);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;
        let mut chunk = vec![0u8; step as usize];
        file.read_exact(&mut chunk)?;
        newlines += chunk.iter().filter(|b| **b == b'\n').count();
        chunks.push(chunk);
        if newlines > max_lines {
            break;
        }
    }
    let starts_mid_line = if pos == 0 {
        false
    } else {
        let mut prev = [0u8; 1];
        file.seek(SeekFrom::Start(pos - 1))?;
        file.read_exact(&mut prev)?;
        prev[0] != b'\n'
    };
    let buf: Vec<u8> = chunks.into_iter().rev().flatten().collect();
    let text = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = text.lines().collect();
    if starts_mid_line && !lines.is_empty() {
        lines.remove(0);
    }
    let start = lines.len().saturating_sub(max_lines);
    Ok(lines[start..].iter().map(|s| s.to_string()).collect())
}

/// Groups raw lines into entries. Lines before the first header still form
/// an entry of their own so nothing read is silently lost.
pub fn reconstruct_entries(
    source: &str,
    file_path: &Path,
    lines: &[String],
    now: DateTime<Utc>,
) -> Vec<LogEntry> {
    let mut out: Vec<LogEntry> = Vec::new();
    let mut current: Option<Vec<String>> = None;
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        if is_entry_start(line) {
            if let Some(done) = current.take() {
                out.push(finish_entry(source, file_path, done, now));
            }
            current = Some(vec![line.clone()]);
        } else {
            current.get_or_insert_with(Vec::new).push(line.clone());
        }
    }
    if let Some(done) = current {
        out.push(finish_entry(source, file_path, done, now));
    }
    out
}

fn finish_entry(source: &str, file_path: &Path, lines: Vec<String>, now: DateTime<Utc>) -> LogEntry {
    let timestamp = lines.first().and_then(|l| parse_timestamp(l, now));
    LogEntry {
        source: source.to_string(),
        file_path: file_path.to_path_buf(),
        lines,
        timestamp,
    }
}

fn read_one(
    source: &str,
    path: &Path,
    opts: &ReadOptions,
    now: DateTime<Utc>,
    entries: &mut Vec<LogEntry>,
) -> DiagResult<FileScan> {
    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            if let Some(stop) = permission_stop(path, &e) {
                return Err(stop);
            }
            return Ok(FileScan::marker(
                path.to_path_buf(),
                FileStatus::Error,
                Some(e.to_string()),
            ));
        }
    };
    if meta.len() > opts.max_file_size_bytes {
        return Err(DiagError::stop(format!(
            "{} is {} bytes, above max_file_size_bytes {}",
            path.display(),
            meta.len(),
            opts.max_file_size_bytes
        )));
    }
    let lines = match read_tail_lines(path, opts.max_lines, opts.max_read_bytes) {
        Ok(v) => v,
        Err(e) => {
            if let Some(stop) = permission_stop(path, &e) {
                return Err(stop);
            }
            return Ok(FileScan::marker(
                path.to_path_buf(),
                FileStatus::Error,
                Some(e.to_string()),
            ));
        }
    };
    let mut kept = 0usize;
    for entry in reconstruct_entries(source, path, &lines, now) {
        let in_window = match (opts.since, entry.timestamp) {
            (Some(since), Some(ts)) => ts >= since,
            _ => true,
        };
        if in_window {
            kept += 1;
            entries.push(entry);
        }
    }
    Ok(FileScan {
        path: path.to_path_buf(),
        status: FileStatus::Ok,
        lines_read: lines.len(),
        entries: kept,
        detail: None,
    })
}

/// Reads every configured source. Permission errors and oversized files
/// abort the run, and so does ending up with zero readable files.
pub fn read_sources(
    sources: &[LogSourceConfig],
    opts: &ReadOptions,
    now: DateTime<Utc>,
) -> DiagResult<ReadOutcome> {
    let mut out = ReadOutcome::default();
    let mut seen: BTreeSet<PathBuf> = BTreeSet::new();
    let mut files_ok = 0usize;
    for source in sources {
        let mut scan = SourceScan {
            source: source.name.clone(),
            files: Vec::new(),
        };
        for path in &source.paths {
            for candidate in expand_path(path)? {
                match candidate {
                    Candidate::Missing(p) => {
                        scan.files.push(FileScan::marker(p, FileStatus::Missing, None));
                    }
                    Candidate::Skip(p, why) => {
                        if seen.insert(p.clone()) {
                            scan.files.push(FileScan::marker(
                                p,
                                FileStatus::Skipped,
                                Some(why.to_string()),
                            ));
                        }
                    }
                    Candidate::Read(p) => {
                        if !seen.insert(p.clone()) {
                            continue;
                        }
                        let file_scan = read_one(&source.name, &p, opts, now, &mut out.entries)?;
                        if file_scan.status == FileStatus::Ok {
                            files_ok += 1;
                        }
                        scan.files.push(file_scan);
                    }
                }
            }
        }
        out.sources.push(scan);
    }
    if files_ok == 0 {
        return Err(DiagError::stop(
            "no log files could be read; check triage.sources in the config",
        ));
    }
    Ok(out)
}
