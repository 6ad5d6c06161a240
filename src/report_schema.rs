use jsonschema::JSONSchema;
use serde_json::{Value, json};

fn verdict_enum() -> Value {
    json!({"type": "string", "enum": ["GO", "NO_GO", "SKIPPED"]})
}

/// Shape contract for `diagnostics.json`.
pub fn aggregate_schema() -> Value {
    let severity = json!({"type": "string", "enum": ["HIGH", "MED", "LOW"]});
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["status", "generated_at", "duration_ms", "sentinel", "drift", "triage", "next_action"],
        "properties": {
            "status": {"type": "string", "enum": ["GO", "NO_GO"]},
            "generated_at": {"type": "string"},
            "duration_ms": {"type": "integer", "minimum": 0},
            "next_action": {"type": "string", "minLength": 1},
            "stopped_stage": {"type": ["string", "null"]},
            "stop_reason": {"type": ["string", "null"]},
            "sentinel": {
                "type": "object",
                "required": ["status", "checks", "failures"],
                "properties": {
                    "status": verdict_enum(),
                    "checks": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["name", "ok", "elapsed_ms", "detail"],
                            "properties": {
                                "name": {"type": "string"},
                                "ok": {"type": "boolean"},
                                "elapsed_ms": {"type": "integer", "minimum": 0},
                                "detail": {"type": "string"}
                            }
                        }
                    },
                    "failures": {
                        "type": "array",
                        "items": {"type": "object", "required": ["name", "detail", "next_step"]}
                    }
                }
            },
            "drift": {
                "type": "object",
                "required": ["status", "environments", "summary"],
                "properties": {
                    "status": verdict_enum(),
                    "environments": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["name", "masked_identity", "status", "findings"],
                            "properties": {
                                "findings": {
                                    "type": "array",
                                    "items": {
                                        "type": "object",
                                        "required": ["severity", "kind", "message"],
                                        "properties": {
                                            "severity": severity,
                                            "kind": {
                                                "type": "string",
                                                "enum": ["missing-table", "missing-column", "type-mismatch", "enum-mismatch", "extra-column"]
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    },
                    "summary": {"type": "object", "required": ["high", "med", "low", "total"]}
                }
            },
            "triage": {
                "type": "object",
                "required": ["status", "sources", "top", "totals"],
                "properties": {
                    "status": verdict_enum(),
                    "top": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["rank", "id", "error_name", "count", "severity", "status", "signature"],
                            "properties": {
                                "count": {"type": "integer", "minimum": 1},
                                "status": {"type": "string", "enum": ["NEW", "KNOWN"]}
                            }
                        }
                    }
                }
            }
        }
    })
}

/// Validates the aggregate report; returns up to three violations.
pub fn validate_aggregate(instance: &Value) -> Result<(), String> {
    let schema = aggregate_schema();
    let compiled = JSONSchema::compile(&schema)
        .map_err(|e| format!("failed to compile aggregate schema: {e}"))?;
    if let Err(errors) = compiled.validate(instance) {
        let reasons: Vec<String> = errors.take(3).map(|e| e.to_string()).collect();
        return Err(if reasons.is_empty() {
            "schema_validation_failed".to_string()
        } else {
            format!("schema_validation_failed: {}", reasons.join(" | "))
        });
    }
    Ok(())
}
