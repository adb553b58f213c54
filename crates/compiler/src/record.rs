//! Raw policy records as produced by the upstream extraction pipeline.
//!
//! Records arrive as JSONL. Each line is validated against an embedded
//! Draft-7 JSON Schema before deserialisation so malformed input fails with
//! a record index instead of a serde backtrace.

use crate::CompileError;
use jsonschema::{Draft, JSONSchema};
use mandate_core::schema::RuleMetadata;
use mandate_core::value::Value;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

static SCHEMA_JSON: &str = include_str!("../schema/policy_record.schema.json");
static COMPILED: Lazy<JSONSchema> = Lazy::new(|| {
    let schema: JsonValue = serde_json::from_str(SCHEMA_JSON).expect("invalid schema json");
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .expect("compile schema")
});

/// One extracted condition, prior to typing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCondition {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub parameter: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub source_text: Option<String>,
}

/// One extracted action.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAction {
    #[serde(rename = "type", default = "default_action_kind")]
    pub kind: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub requires: Vec<String>,
}

fn default_action_kind() -> String {
    "other".to_string()
}

/// Discovery provenance; unvalidated discovered patterns are dropped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Discovery {
    #[serde(default)]
    pub human_validated: bool,
}

/// A raw policy record from the extraction pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPolicyRecord {
    pub policy_id: String,
    #[serde(default)]
    pub conditions: Vec<RawCondition>,
    #[serde(default)]
    pub actions: Vec<RawAction>,
    #[serde(default)]
    pub metadata: RuleMetadata,
    #[serde(default)]
    pub discovery: Option<Discovery>,
    #[serde(default)]
    pub canonical_actions: Option<Vec<String>>,
}

/// Validate one raw record against the embedded schema.
pub fn validate_record(index: usize, raw: &JsonValue) -> Result<(), CompileError> {
    if let Err(errors) = COMPILED.validate(raw) {
        let reason = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
        return Err(CompileError::InvalidRecord { index, reason });
    }
    Ok(())
}

/// Read and validate a JSONL file of raw policy records. Blank lines are
/// skipped; any invalid line aborts with its index.
pub fn read_records_jsonl<P: AsRef<Path>>(path: P) -> Result<Vec<RawPolicyRecord>, CompileError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: JsonValue = serde_json::from_str(&line).map_err(|e| {
            CompileError::InvalidRecord { index, reason: e.to_string() }
        })?;
        validate_record(index, &raw)?;
        let record: RawPolicyRecord = serde_json::from_value(raw).map_err(|e| {
            CompileError::InvalidRecord { index, reason: e.to_string() }
        })?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn valid_record_passes_schema() {
        let raw = json!({
            "policy_id": "RET-001",
            "conditions": [
                {"type": "boolean_flag", "parameter": "has_receipt", "operator": "==", "value": true}
            ],
            "actions": [{"type": "required", "action": "issue_refund"}],
            "metadata": {"domain": "returns", "priority": "company"}
        });
        assert!(validate_record(0, &raw).is_ok());
    }

    #[test]
    fn missing_policy_id_fails_schema() {
        let raw = json!({"conditions": []});
        let err = validate_record(3, &raw).unwrap_err();
        assert!(matches!(err, CompileError::InvalidRecord { index: 3, .. }));
    }

    #[test]
    fn jsonl_reader_skips_blank_lines() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, r#"{{"policy_id": "P1"}}"#).unwrap();
        writeln!(f).unwrap();
        writeln!(f, r#"{{"policy_id": "P2"}}"#).unwrap();
        let records = read_records_jsonl(f.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].policy_id, "P2");
    }

    #[test]
    fn jsonl_reader_reports_bad_line_index() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, r#"{{"policy_id": "P1"}}"#).unwrap();
        writeln!(f, "not json").unwrap();
        let err = read_records_jsonl(f.path()).unwrap_err();
        assert!(matches!(err, CompileError::InvalidRecord { index: 1, .. }));
    }
}
