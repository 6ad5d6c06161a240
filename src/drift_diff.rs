use serde::Serialize;
use std::collections::BTreeSet;

use super::drift_parse::SchemaDoc;
use crate::types::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriftKind {
    MissingTable,
    MissingColumn,
    TypeMismatch,
    EnumMismatch,
    ExtraColumn,
}

impl DriftKind {
    /// Fixed per kind: the declared schema is the contract, extras are debt.
    pub fn severity(self) -> Severity {
        match self {
            DriftKind::MissingTable | DriftKind::MissingColumn => Severity::High,
            DriftKind::TypeMismatch | DriftKind::EnumMismatch => Severity::Med,
            DriftKind::ExtraColumn => Severity::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DriftKind::MissingTable => "missing-table",
            DriftKind::MissingColumn => "missing-column",
            DriftKind::TypeMismatch => "type-mismatch",
            DriftKind::EnumMismatch => "enum-mismatch",
            DriftKind::ExtraColumn => "extra-column",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftFinding {
    pub severity: Severity,
    pub kind: DriftKind,
    pub model: Option<String>,
    pub field: Option<String>,
    pub message: String,
}

impl DriftFinding {
    fn new(kind: DriftKind, model: &str, field: Option<&str>, message: String) -> Self {
        Self {
            severity: kind.severity(),
            kind,
            model: Some(model.to_string()),
            field: field.map(str::to_string),
            message,
        }
    }

    /// `User.email`, `User` or `-` for display.
    pub fn location(&self) -> String {
        match (&self.model, &self.field) {
            (Some(m), Some(f)) => format!("{m}.{f}"),
            (Some(m), None) => m.clone(),
            _ => "-".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriftSummary {
    pub high: usize,
    pub med: usize,
    pub low: usize,
    pub total: usize,
}

impl DriftSummary {
    pub fn of(findings: &[DriftFinding]) -> Self {
        let mut s = DriftSummary::default();
        for f in findings {
            match f.severity {
                Severity::High => s.high += 1,
                Severity::Med => s.med += 1,
                Severity::Low => s.low += 1,
            }
        }
        s.total = findings.len();
        s
    }

    pub fn add(&mut self, other: &DriftSummary) {
        self.high += other.high;
        self.med += other.med;
        self.low += other.low;
        self.total += other.total;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftResult {
    pub findings: Vec<DriftFinding>,
    pub summary: DriftSummary,
}

fn join_or_none(items: &[&String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
    }
}

/// Compares declared (expected) against reflected (observed). Ignored
/// declared models and fields are skipped; a reflected field is only
/// "extra" when the declared model does not mention it at all.
pub fn diff_schemas(declared: &SchemaDoc, reflected: &SchemaDoc) -> DriftResult {
    let mut findings = Vec::new();
    for model in declared.models.iter().filter(|m| !m.ignored) {
        let Some(live) = reflected.model(&model.name) else {
            findings.push(DriftFinding::new(
                DriftKind::MissingTable,
                &model.name,
                None,
                format!("model {} is declared but missing from the database", model.name),
            ));
            continue;
        };
        for field in model.fields.iter().filter(|f| !f.ignored) {
            match live.field(&field.name) {
                None => findings.push(DriftFinding::new(
                    DriftKind::MissingColumn,
                    &model.name,
                    Some(&field.name),
                    format!("{}.{} is declared but missing", model.name, field.name),
                )),
                Some(actual)
                    if (&actual.type_name, actual.is_list, actual.is_optional)
                        != (&field.type_name, field.is_list, field.is_optional) =>
                {
                    findings.push(DriftFinding::new(
                        DriftKind::TypeMismatch,
                        &model.name,
                        Some(&field.name),
                        format!(
                            "{}.{} declared {} but found {}",
                            model.name,
                            field.name,
                            field.shape(),
                            actual.shape()
                        ),
                    ));
                }
                Some(_) => {}
            }
        }
        for actual in &live.fields {
            if model.field(&actual.name).is_none() {
                findings.push(DriftFinding::new(
                    DriftKind::ExtraColumn,
                    &model.name,
                    Some(&actual.name),
                    format!(
                        "{}.{} ({}) exists in the database but is not declared",
                        model.name,
                        actual.name,
                        actual.shape()
                    ),
                ));
            }
        }
    }
    for en in &declared.enums {
        let Some(live) = reflected.enum_named(&en.name) else {
            findings.push(DriftFinding::new(
                DriftKind::EnumMismatch,
                &en.name,
                None,
                format!("enum {} is declared but missing from the database", en.name),
            ));
            continue;
        };
        let want: BTreeSet<&String> = en.values.iter().collect();
        let have: BTreeSet<&String> = live.values.iter().collect();
        if want == have {
            continue;
        }
        let missing: Vec<&String> = en.values.iter().filter(|v| !have.contains(v)).collect();
        let extra: Vec<&String> = live.values.iter().filter(|v| !want.contains(v)).collect();
        findings.push(DriftFinding::new(
            DriftKind::EnumMismatch,
            &en.name,
            None,
            format!(
                "enum {} differs: missing [{}], extra [{}]",
                en.name,
                join_or_none(&missing),
                join_or_none(&extra)
            ),
        ));
    }
    let summary = DriftSummary::of(&findings);
    DriftResult { findings, summary }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::drift_parse::parse_schema as parse;

    #[test]
    fn missing_column_is_the_single_high_finding() {
        let declared = parse("model User {\n  id String\n  email String\n}\n");
        let reflected = parse("model User {\n  id String\n}\n");
        let result = diff_schemas(&declared, &reflected);
        assert_eq!(result.findings.len(), 1);
        let f = &result.findings[0];
        assert_eq!(f.kind, DriftKind::MissingColumn);
        assert_eq!(f.severity, Severity::High);
        assert_eq!(f.location(), "User.email");
        assert_eq!(result.summary, DriftSummary { high: 1, med: 0, low: 0, total: 1 });
    }

    #[test]
    fn each_kind_has_a_fixed_severity() {
        let declared = parse(concat!(
            "model User {\n  id String\n  age Int\n  tags String[]\n  secret String @ignore\n}\n",
            "model Order {\n  id Int\n}\n",
            "model Shadow {\n  id Int\n  @@ignore\n}\n",
            "enum Role {\n  ADMIN\n  MEMBER\n}\n",
            "enum Plan {\n  FREE\n}\n",
        ));
        let reflected = parse(concat!(
            "model User {\n  id String\n  age Int?\n  tags String\n  secret Int\n  created DateTime\n}\n",
            "enum Role {\n  ADMIN\n  GUEST\n}\n",
        ));
        let result = diff_schemas(&declared, &reflected);
        for f in &result.findings {
            let expected = match f.kind {
                DriftKind::MissingTable | DriftKind::MissingColumn => Severity::High,
                DriftKind::TypeMismatch | DriftKind::EnumMismatch => Severity::Med,
                DriftKind::ExtraColumn => Severity::Low,
            };
            assert_eq!(f.severity, expected, "{f:?}");
        }
        let kinds: Vec<(DriftKind, String)> =
            result.findings.iter().map(|f| (f.kind, f.location())).collect();
        assert!(kinds.contains(&(DriftKind::TypeMismatch, "User.age".to_string())));
        assert!(kinds.contains(&(DriftKind::TypeMismatch, "User.tags".to_string())));
        assert!(kinds.contains(&(DriftKind::ExtraColumn, "User.created".to_string())));
        assert!(kinds.contains(&(DriftKind::MissingTable, "Order".to_string())));
        assert!(!kinds.iter().any(|(_, loc)| loc == "Shadow" || loc == "User.secret"));
        let role = result
            .findings
            .iter()
            .find(|f| f.location() == "Role")
            .expect("role finding");
        assert!(role.message.contains("missing [MEMBER]"), "{}", role.message);
        assert!(role.message.contains("extra [GUEST]"), "{}", role.message);
        assert!(kinds.contains(&(DriftKind::EnumMismatch, "Plan".to_string())));
        assert_eq!(result.summary.total, result.findings.len());
    }

    #[test]
    fn identical_schemas_have_no_findings() {
        let src = "model A {\n  id Int\n  b B?\n}\nenum B {\n  X\n}\n";
        assert_eq!(diff_schemas(&parse(src), &parse(src)), DriftResult::default());
    }
}
