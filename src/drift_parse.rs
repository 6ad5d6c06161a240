use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaField {
    pub name: String,
    pub type_name: String,
    pub is_list: bool,
    pub is_optional: bool,
    pub ignored: bool,
}

impl SchemaField {
    /// `String`, `String?`, `Role[]`: the shape compared across schemas.
    pub fn shape(&self) -> String {
        let suffix = if self.is_list {
            "[]"
        } else if self.is_optional {
            "?"
        } else {
            ""
        };
        format!("{}{suffix}", self.type_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Model,
    Type,
}

/// Fields keep declaration order so diffs and reports are stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaModel {
    pub name: String,
    pub kind: BlockKind,
    pub fields: Vec<SchemaField>,
    pub ignored: bool,
}

impl SchemaModel {
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaEnum {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDoc {
    pub models: Vec<SchemaModel>,
    pub enums: Vec<SchemaEnum>,
}

impl SchemaDoc {
    pub fn model(&self, name: &str) -> Option<&SchemaModel> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn enum_named(&self, name: &str) -> Option<&SchemaEnum> {
        self.enums.iter().find(|e| e.name == name)
    }
}

fn block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(model|enum|type)[ \t]+(\w+)[ \t]*\{").expect("valid block regex")
    })
}

fn ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_]\w*$").expect("valid identifier regex"))
}

/// Drops `//` and `/* */` comments, leaving string literals intact.
pub fn strip_comments(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for skip in chars.by_ref() {
                    if skip == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for skip in chars.by_ref() {
                    if skip == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && skip == '/' {
                        break;
                    }
                    prev = skip;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Byte offset of the `}` closing a block whose body starts at `start`.
fn block_end(text: &str, start: usize) -> usize {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '}' => return start + i,
            _ => {}
        }
    }
    text.len()
}

fn parse_field(line: &str) -> Option<SchemaField> {
    let mut tokens = line.split_whitespace();
    let name = tokens.next()?;
    let raw_type = tokens.next()?;
    if !ident_re().is_match(name) {
        return None;
    }
    let (base, is_list, is_optional) = if let Some(b) = raw_type.strip_suffix("[]") {
        (b, true, false)
    } else if let Some(b) = raw_type.strip_suffix('?') {
        (b, false, true)
    } else {
        (raw_type, false, false)
    };
    let ignored = tokens.any(|t| t == "@ignore" || t.starts_with("@ignore("));
    Some(SchemaField {
        name: name.to_string(),
        type_name: base.to_string(),
        is_list,
        is_optional,
        ignored,
    })
}

fn parse_model(name: &str, kind: BlockKind, body: &str) -> SchemaModel {
    let mut model = SchemaModel {
        name: name.to_string(),
        kind,
        fields: Vec::new(),
        ignored: false,
    };
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("@@") {
            if line.starts_with("@@ignore") {
                model.ignored = true;
            }
            continue;
        }
        if line.starts_with('@') {
            continue;
        }
        if let Some(field) = parse_field(line) {
            model.fields.push(field);
        }
    }
    model
}

fn parse_enum(name: &str, body: &str) -> SchemaEnum {
    let values = body
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('@'))
        .filter_map(|l| l.split_whitespace().next())
        .filter(|t| ident_re().is_match(t))
        .map(str::to_string)
        .collect();
    SchemaEnum {
        name: name.to_string(),
        values,
    }
}

/// Parses the block DSL shared by declared and reflected schema files.
/// `datasource`/`generator` blocks and anything outside blocks are ignored.
pub fn parse_schema(src: &str) -> SchemaDoc {
    let text = strip_comments(src);
    let mut doc = SchemaDoc::default();
    let mut cursor = 0usize;
    while let Some(caps) = block_re().captures_at(&text, cursor) {
        let (Some(whole), Some(keyword), Some(name)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            break;
        };
        let body_start = whole.end();
        let end = block_end(&text, body_start);
        let body = &text[body_start..end];
        match keyword.as_str() {
            "enum" => doc.enums.push(parse_enum(name.as_str(), body)),
            "type" => doc.models.push(parse_model(name.as_str(), BlockKind::Type, body)),
            _ => doc.models.push(parse_model(name.as_str(), BlockKind::Model, body)),
        }
        cursor = (end + 1).min(text.len());
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    const DECLARED: &str = r#"
// Application schema
datasource db {
  provider = "postgresql"
  url      = env("DATABASE_URL")
}

/* legacy
model Gone {
  id Int @id
}
*/

model User {
  id        String   @id @default(uuid())
  email     String   @unique // login
  nickname  String?
  roles     Role[]
  note      String   @default("a } brace // not a comment")
  legacy    Int      @ignore

  @@index([email])
}

model AuditTrail {
  id Int @id
  @@ignore
}

type Address {
  street String
}

enum Role {
  ADMIN
  MEMBER @map("member")
}
"#;

    #[test]
    fn parses_models_fields_and_modifiers() {
        let doc = parse_schema(DECLARED);
        assert!(doc.model("Gone").is_none());
        let user = doc.model("User").expect("User");
        let names: Vec<&str> = user.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "email", "nickname", "roles", "note", "legacy"]);
        let nick = user.field("nickname").expect("nickname");
        assert!(nick.is_optional && !nick.is_list);
        assert_eq!(nick.type_name, "String");
        let roles = user.field("roles").expect("roles");
        assert!(roles.is_list);
        assert_eq!(roles.shape(), "Role[]");
        assert!(user.field("legacy").expect("legacy").ignored);
        assert!(!user.ignored);
    }

    #[test]
    fn ignore_markers_types_and_enums() {
        let doc = parse_schema(DECLARED);
        assert!(doc.model("AuditTrail").expect("audit").ignored);
        assert_eq!(doc.model("Address").expect("address").kind, BlockKind::Type);
        assert_eq!(
            doc.enum_named("Role").expect("Role").values,
            vec!["ADMIN".to_string(), "MEMBER".to_string()]
        );
        assert!(doc.model("db").is_none());
    }

    #[test]
    fn comment_stripping_respects_strings() {
        let out = strip_comments("a \"x // y\" b // gone\nc /* z */ d");
        assert_eq!(out, "a \"x // y\" b \nc  d");
    }
}
