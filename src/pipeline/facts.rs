//! Structured fact extraction
//!
//! The facts stage must answer with exactly one JSON object. Anything else is
//! `MalformedFacts`, which is never cached. Keys outside the schema are
//! dropped; schema keys the model left out read as "not specified".

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::errors::{PipelineError, Result};

/// Placeholder for facts the document does not state
pub const NOT_SPECIFIED: &str = "문서에 명시되지 않음";

/// One named fact with a display label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactField {
    pub key: String,
    pub label: String,
}

/// Closed set of fact keys, in display order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactSchema {
    fields: Vec<FactField>,
}

impl FactSchema {
    pub fn new(fields: &[(&str, &str)]) -> Self {
        Self {
            fields: fields
                .iter()
                .map(|(key, label)| FactField {
                    key: key.to_string(),
                    label: label.to_string(),
                })
                .collect(),
        }
    }

    /// Project overview: name, duration, budget, background
    pub fn project_overview() -> Self {
        Self::new(&[
            ("project_name", "사업명"),
            ("project_duration", "사업 기간"),
            ("project_budget", "사업 예산"),
            ("project_background", "사업 배경 및 목적"),
        ])
    }

    pub fn fields(&self) -> &[FactField] {
        &self.fields
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.key.as_str())
    }

    /// `{"key": "...", ...}` skeleton for prompts
    pub fn json_skeleton(&self) -> String {
        let body = self
            .fields
            .iter()
            .map(|f| format!("  \"{}\": \"<{}>\"", f.key, f.label))
            .collect::<Vec<_>>()
            .join(",\n");
        format!("{{\n{}\n}}", body)
    }

    /// Parse a model reply into a fact sheet
    pub fn parse_reply(&self, stage: &str, reply: &str) -> Result<FactSheet> {
        let malformed = |reason: String| PipelineError::MalformedFacts {
            stage: stage.to_string(),
            reason,
        };

        let objects: Vec<serde_json::Map<String, Value>> = json_object_spans(reply)
            .into_iter()
            .filter_map(|span| match serde_json::from_str::<Value>(span) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            })
            .collect();

        let object = match objects.len() {
            0 => return Err(malformed("reply contains no JSON object".to_string())),
            1 => objects.into_iter().next().unwrap_or_default(),
            n => return Err(malformed(format!("expected exactly one JSON object, found {}", n))),
        };

        let mut values = BTreeMap::new();
        for field in &self.fields {
            let value = match object.get(&field.key) {
                None | Some(Value::Null) => NOT_SPECIFIED.to_string(),
                Some(Value::String(s)) if s.trim().is_empty() => NOT_SPECIFIED.to_string(),
                Some(Value::String(s)) => s.trim().to_string(),
                Some(Value::Number(n)) => n.to_string(),
                Some(other) => {
                    return Err(malformed(format!(
                        "field '{}' must be a string, got {}",
                        field.key, other
                    )))
                }
            };
            values.insert(field.key.clone(), value);
        }

        let dropped = object.keys().filter(|k| !values.contains_key(*k)).count();
        if dropped > 0 {
            debug!(stage, dropped, "ignored fact keys outside the schema");
        }

        Ok(FactSheet { values })
    }

    /// Validate hand-edited facts content (canonical JSON)
    pub fn parse_content(&self, stage: &str, content: &str) -> Result<FactSheet> {
        self.parse_reply(stage, content)
    }
}

/// Parsed facts keyed by schema key
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FactSheet {
    values: BTreeMap<String, String>,
}

impl FactSheet {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Canonical stored form: pretty JSON, keys sorted
    pub fn to_content(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.values)?)
    }

    /// Rows of (label, value) in schema order
    pub fn labelled<'a>(&'a self, schema: &'a FactSchema) -> Vec<(&'a str, &'a str)> {
        schema
            .fields()
            .iter()
            .map(|f| (f.label.as_str(), self.get(&f.key).unwrap_or(NOT_SPECIFIED)))
            .collect()
    }
}

/// Balanced top-level `{...}` spans, skipping braces inside JSON strings
fn json_object_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        spans.push(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }

    spans
}
