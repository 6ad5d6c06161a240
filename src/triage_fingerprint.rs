use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use super::triage_read::LogEntry;
use crate::util::sha256_hex;

const MAX_MESSAGE_CHARS: usize = 240;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub id: String,
    pub error_name: String,
    pub message: String,
    pub top_frame: Option<String>,
    pub endpoint: Option<String>,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryExample {
    pub source: String,
    pub file: String,
    pub timestamp: Option<String>,
    pub lines: Vec<String>,
}

/// Occurrences of one fingerprint across every source, in first-seen order.
#[derive(Debug, Clone)]
pub struct FingerprintSummary {
    pub fingerprint: Fingerprint,
    pub count: usize,
    pub sources: BTreeSet<String>,
    pub example: EntryExample,
    pub first_seen: usize,
}

fn error_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Z][A-Za-z0-9]*(?:Error|Exception))\b").expect("valid error name regex")
    })
}

fn status_5xx_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b5\d{2}\b").expect("valid 5xx regex"))
}

fn leading_stamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"^\s*\[?(?:",
            r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
            r"|\d{4}/\d{2}/\d{2}[ T]\d{2}:\d{2}:\d{2}",
            r"|(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+\d{1,2}\s\d{2}:\d{2}:\d{2}",
            r")\]?\s*"
        ))
        .expect("valid leading timestamp regex")
    })
}

fn leading_level_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[?(?i:trace|debug|info|notice|warning|warn|error|fatal|critical)\]?:?\s*")
            .expect("valid leading level regex")
    })
}

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
            .expect("valid uuid regex")
    })
}

fn hex_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:0x[0-9a-f]+|[0-9a-f]{8,})\b").expect("valid hex regex")
    })
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d+\b").expect("valid number regex"))
}

fn frame_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*at\s+(.+)$").expect("valid frame regex"))
}

fn endpoint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(GET|POST|PUT|PATCH|DELETE|HEAD|OPTIONS)\s+(/\S*)")
            .expect("valid endpoint regex")
    })
}

/// Removes a leading timestamp and log level so they never leak into
/// messages or severity keywords.
pub fn strip_prefix(line: &str) -> String {
    let no_stamp = leading_stamp_re().replace(line, "");
    leading_level_re().replace(&no_stamp, "").trim().to_string()
}

/// Entry text with every line's timestamp removed, lowercased.
pub fn searchable_text(lines: &[String]) -> String {
    lines
        .iter()
        .map(|l| leading_stamp_re().replace(l, "").to_lowercase())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn is_error_like(entry: &LogEntry) -> bool {
    let text = searchable_text(&entry.lines);
    ["error", "exception", "fail", "fatal", "warn", "unhandled"]
        .iter()
        .any(|k| text.contains(k))
        || status_5xx_re().is_match(&text)
}

/// Replaces volatile tokens so recurrences of one failure collapse together.
pub fn normalize(text: &str) -> String {
    let s = uuid_re().replace_all(text, "<uuid>");
    let s = hex_re().replace_all(&s, |caps: &regex::Captures| {
        let m = &caps[0];
        let mixed = m.chars().any(|c| c.is_ascii_digit())
            && m.chars().any(|c| c.is_ascii_alphabetic());
        if m.starts_with("0x") || m.starts_with("0X") || mixed {
            "<hex>".to_string()
        } else {
            m.to_string()
        }
    });
    let s = number_re().replace_all(&s, "<num>");
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_MESSAGE_CHARS).collect()
}

fn extract_name_and_message(lines: &[String]) -> (String, String) {
    let first_stripped = lines.first().map(|l| strip_prefix(l)).unwrap_or_default();
    for line in lines {
        if let Some(m) = error_name_re().captures(line).and_then(|c| c.get(1)) {
            let rest = line[m.end()..].trim_start();
            let rest = rest.strip_prefix(':').unwrap_or(rest).trim();
            let message = if rest.is_empty() {
                first_stripped.clone()
            } else {
                rest.to_string()
            };
            return (m.as_str().to_string(), message);
        }
    }
    let lowered = lines.join("\n").to_lowercase();
    let name = if lowered.contains("unhandled rejection") || lowered.contains("unhandledrejection")
    {
        "UnhandledRejection"
    } else {
        "UnknownError"
    };
    (name.to_string(), first_stripped)
}

fn extract_top_frame(lines: &[String]) -> Option<String> {
    lines
        .iter()
        .find_map(|l| frame_re().captures(l).and_then(|c| c.get(1)))
        .map(|m| normalize(m.as_str()))
}

fn extract_endpoint(lines: &[String]) -> Option<String> {
    lines.iter().find_map(|l| {
        let caps = endpoint_re().captures(l)?;
        let method = caps.get(1)?.as_str();
        let path = caps.get(2)?.as_str();
        let path = path.split(['?', '#']).next().unwrap_or(path);
        Some(format!("{method} {}", normalize(path)))
    })
}

pub fn fingerprint_entry(entry: &LogEntry) -> Fingerprint {
    let (error_name, raw_message) = extract_name_and_message(&entry.lines);
    let message = normalize(&raw_message);
    let top_frame = extract_top_frame(&entry.lines);
    let endpoint = extract_endpoint(&entry.lines);
    let signature = format!(
        "{}|{}|{}|{}",
        error_name,
        message,
        top_frame.as_deref().unwrap_or("no-frame"),
        endpoint.as_deref().unwrap_or("no-endpoint"),
    );
    let id = sha256_hex(&signature)[..16].to_string();
    Fingerprint {
        id,
        error_name,
        message,
        top_frame,
        endpoint,
        signature,
    }
}

fn example_of(entry: &LogEntry) -> EntryExample {
    EntryExample {
        source: entry.source.clone(),
        file: entry.file_path.display().to_string(),
        timestamp: entry.timestamp.map(|t| t.to_rfc3339()),
        lines: entry.lines.iter().take(8).cloned().collect(),
    }
}

/// Counts error-like entries per fingerprint. Returns the summaries in
/// first-seen order plus the number of error-like entries.
pub fn aggregate(entries: &[LogEntry]) -> (Vec<FingerprintSummary>, usize) {
    let mut order: Vec<FingerprintSummary> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut error_entries = 0usize;
    for entry in entries.iter().filter(|e| is_error_like(e)) {
        error_entries += 1;
        let fp = fingerprint_entry(entry);
        if let Some(&i) = index.get(&fp.id) {
            let summary = &mut order[i];
            summary.count += 1;
            summary.sources.insert(entry.source.clone());
            continue;
        }
        index.insert(fp.id.clone(), order.len());
        order.push(FingerprintSummary {
            fingerprint: fp,
            count: 1,
            sources: BTreeSet::from([entry.source.clone()]),
            example: example_of(entry),
            first_seen: order.len(),
        });
    }
    (order, error_entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry(source: &str, lines: &[&str]) -> LogEntry {
        LogEntry {
            source: source.to_string(),
            file_path: PathBuf::from("app.log"),
            lines: lines.iter().map(|s| s.to_string()).collect(),
            timestamp: None,
        }
    }

    #[test]
    fn volatile_tokens_collapse() {
        assert_eq!(
            normalize("user 42 not found in   tenant 7"),
            "user <num> not found in tenant <num>"
        );
        assert_eq!(
            normalize("order 3f2a9c1e-1b2c-4d5e-8f90-a1b2c3d4e5f6 failed"),
            "order <uuid> failed"
        );
        assert_eq!(normalize("ptr 0xdeadbeef and 9ab3f0e12c"), "ptr <hex> and <hex>");
        assert_eq!(normalize("deadbeefcafe stays"), "deadbeefcafe stays");
        assert_eq!(normalize("user 123456789 gone"), "user <num> gone");
    }

    #[test]
    fn same_failure_with_different_ids_shares_a_fingerprint() {
        let a = entry(
            "api",
            &[
                "2024-05-01T10:00:00Z ERROR NullPointerException: user 17 not found",
                "    at UserService.load (UserService.java:88)",
            ],
        );
        let b = entry(
            "api",
            &[
                "2024-05-01T10:05:00Z ERROR NullPointerException: user 99 not found",
                "    at UserService.load (UserService.java:88)",
            ],
        );
        let fa = fingerprint_entry(&a);
        let fb = fingerprint_entry(&b);
        assert_eq!(fa.id, fb.id);
        assert_eq!(fa.id.len(), 16);
        assert_eq!(fa.error_name, "NullPointerException");
        assert_eq!(fa.message, "user <num> not found");
        assert_eq!(
            fa.top_frame.as_deref(),
            Some("UserService.load (UserService.java:<num>)")
        );
        assert!(fa.signature.ends_with("|no-endpoint"));
    }

    #[test]
    fn each_signature_field_changes_the_id() {
        let failure = |message: &str, frame: &str, route: &str| {
            entry(
                "api",
                &[
                    format!("2024-05-01T10:00:00Z ERROR TypeError: {message}").as_str(),
                    format!("    at {frame}").as_str(),
                    format!("    request: {route}").as_str(),
                ],
            )
        };
        let base = fingerprint_entry(&failure(
            "cannot read property 'id'",
            "OrderService.load (orders.js:12)",
            "GET /api/orders",
        ));
        assert_eq!(base.endpoint.as_deref(), Some("GET /api/orders"));

        let other_message = fingerprint_entry(&failure(
            "cannot read property 'total'",
            "OrderService.load (orders.js:12)",
            "GET /api/orders",
        ));
        let other_frame = fingerprint_entry(&failure(
            "cannot read property 'id'",
            "CartService.load (cart.js:12)",
            "GET /api/orders",
        ));
        let other_endpoint = fingerprint_entry(&failure(
            "cannot read property 'id'",
            "OrderService.load (orders.js:12)",
            "POST /api/orders",
        ));

        assert_eq!(other_message.error_name, base.error_name);
        assert_ne!(other_message.id, base.id);
        assert_eq!(other_frame.message, base.message);
        assert_ne!(other_frame.id, base.id);
        assert_eq!(other_endpoint.top_frame, base.top_frame);
        assert_ne!(other_endpoint.id, base.id);
    }

    #[test]
    fn fallback_names_and_endpoints() {
        let rejection = entry("web", &["[ERROR] Unhandled rejection at POST /api/orders?id=5"]);
        let fp = fingerprint_entry(&rejection);
        assert_eq!(fp.error_name, "UnhandledRejection");
        assert_eq!(fp.endpoint.as_deref(), Some("POST /api/orders"));
        assert!(fp.message.starts_with("Unhandled rejection"));

        let unknown = entry("web", &["2024-05-01 10:00:00 ERROR upstream returned 502"]);
        let fp = fingerprint_entry(&unknown);
        assert_eq!(fp.error_name, "UnknownError");
        assert_eq!(fp.message, "upstream returned <num>");
        assert!(fp.signature.contains("|no-frame|"));
    }

    #[test]
    fn aggregate_counts_and_skips_noise() {
        let entries = vec![
            entry("api", &["ERROR NullPointerException: user 1 not found"]),
            entry("api", &["INFO request served in 12ms"]),
            entry("api", &["ERROR ValidationError: email is required"]),
            entry("web", &["ERROR NullPointerException: user 2 not found"]),
            entry("api", &["ERROR NullPointerException: user 3 not found"]),
        ];
        let (summaries, error_entries) = aggregate(&entries);
        assert_eq!(error_entries, 4);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].count, 3);
        assert_eq!(summaries[0].first_seen, 0);
        assert_eq!(
            summaries[0].sources.iter().cloned().collect::<Vec<_>>(),
            vec!["api".to_string(), "web".to_string()]
        );
        assert_eq!(summaries[1].fingerprint.error_name, "ValidationError");
        assert_eq!(summaries[1].count, 1);
    }

    #[test]
    fn timestamps_alone_do_not_make_an_entry_error_like() {
        let quiet = entry("api", &["2024-05-01T10:00:00Z INFO listening on 5000"]);
        assert!(!is_error_like(&quiet));
        let stamped = entry("api", &["2024-05-01T10:00:00.500Z INFO cache ready"]);
        assert!(!is_error_like(&stamped));
        let upstream = entry("api", &["INFO upstream answered 503"]);
        assert!(is_error_like(&upstream));
    }
}
