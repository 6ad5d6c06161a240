use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "MED")]
    Med,
    #[serde(rename = "LOW")]
    Low,
}

impl Severity {
    /// Lower sorts first.
    pub fn rank(self) -> u8 {
        match self {
            Severity::High => 0,
            Severity::Med => 1,
            Severity::Low => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::High => "HIGH",
            Severity::Med => "MED",
            Severity::Low => "LOW",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage and aggregate verdict. `Skipped` only appears on stage sections the
/// conductor never reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Verdict {
    #[serde(rename = "GO")]
    Go,
    #[serde(rename = "NO_GO")]
    NoGo,
    #[default]
    #[serde(rename = "SKIPPED")]
    Skipped,
}

impl Verdict {
    pub fn from_ok(ok: bool) -> Self {
        if ok { Verdict::Go } else { Verdict::NoGo }
    }

    pub fn is_no_go(self) -> bool {
        self == Verdict::NoGo
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Go => "GO",
            Verdict::NoGo => "NO_GO",
            Verdict::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
