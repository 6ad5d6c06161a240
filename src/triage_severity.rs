use regex::Regex;
use std::sync::OnceLock;

use super::triage_fingerprint::{FingerprintSummary, searchable_text};
use crate::types::Severity;

const CRASH_WORDS: &[&str] = &["unhandled", "uncaught", "panic", "fatal"];
const AUTH_WORDS: &[&str] = &[
    "unauthorized",
    "forbidden",
    "auth",
    "session",
    "token",
    "jwt",
    "credential",
];
const PERSISTENCE_WORDS: &[&str] = &[
    "database",
    "sql",
    "prisma",
    "postgres",
    "mysql",
    "query",
    "connection pool",
    "transaction",
    "deadlock",
];
const FAILURE_WORDS: &[&str] = &[
    "fail", "error", "timeout", "refused", "denied", "lost", "cannot", "unable",
];
const CLIENT_WORDS: &[&str] = &["validation", "invalid", "bad request", "not found", "required"];
const LOW_WORDS: &[&str] = &["warn", "deprecated"];

fn status_5xx_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b5\d{2}\b").expect("valid 5xx regex"))
}

fn status_4xx_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b4\d{2}\b").expect("valid 4xx regex"))
}

fn any_of(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

/// Keyword classification over lowercased text. Crashes, auth failures,
/// persistence failures and server errors are HIGH; client-side faults are
/// MED; warnings and deprecations are LOW; anything else defaults to MED.
pub fn classify_text(text: &str) -> Severity {
    let t = text.to_lowercase();
    let high = any_of(&t, CRASH_WORDS)
        || any_of(&t, AUTH_WORDS)
        || (any_of(&t, PERSISTENCE_WORDS) && any_of(&t, FAILURE_WORDS))
        || status_5xx_re().is_match(&t)
        || t.contains("internal server error");
    if high {
        return Severity::High;
    }
    if any_of(&t, CLIENT_WORDS) || status_4xx_re().is_match(&t) {
        return Severity::Med;
    }
    if any_of(&t, LOW_WORDS) {
        return Severity::Low;
    }
    Severity::Med
}

pub fn classify(summary: &FingerprintSummary) -> Severity {
    let fp = &summary.fingerprint;
    let text = format!(
        "{}\n{}\n{}",
        fp.error_name,
        fp.message,
        searchable_text(&summary.example.lines)
    );
    classify_text(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crash_and_auth_vocabulary_is_high() {
        assert_eq!(classify_text("Unhandled rejection in worker"), Severity::High);
        assert_eq!(classify_text("JWT expired for request"), Severity::High);
        assert_eq!(classify_text("401 Unauthorized"), Severity::High);
        assert_eq!(classify_text("GET /api/orders 500"), Severity::High);
    }

    #[test]
    fn persistence_needs_a_failure_word() {
        assert_eq!(
            classify_text("PrismaClientKnownRequestError: connection refused"),
            Severity::High
        );
        assert_eq!(classify_text("slow query logged"), Severity::Med);
    }

    #[test]
    fn client_faults_warnings_and_default() {
        assert_eq!(classify_text("ValidationError: email is required"), Severity::Med);
        assert_eq!(classify_text("NullPointerException: user <num> not found"), Severity::Med);
        assert_eq!(classify_text("WARN cache nearly full"), Severity::Low);
        assert_eq!(classify_text("feature flag deprecated"), Severity::Low);
        assert_eq!(classify_text("something odd happened"), Severity::Med);
    }
}
