//! Prompt templates with declared fields
//!
//! Placeholders are written `{field}`. A template is checked when it is
//! built: every placeholder must be declared and every declared field must
//! appear, so a stage whose inputs and prompt disagree fails at definition
//! time rather than producing a prompt with a hole in it. Rendering is a
//! single pass, so braces inside substituted values are left alone.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{PipelineError, Result};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_][a-z0-9_]*)\}").expect("placeholder regex"));

/// Values keyed by field name
pub type PromptValues = BTreeMap<String, String>;

/// A validated template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSpec {
    name: String,
    template: String,
    required_fields: BTreeSet<String>,
}

impl PromptSpec {
    /// Validate `template` against `required_fields`
    pub fn new(name: &str, template: &str, required_fields: &[&str]) -> Result<Self> {
        let required: BTreeSet<String> = required_fields.iter().map(|f| f.to_string()).collect();
        let used = placeholders(template);

        if let Some(undeclared) = used.difference(&required).next() {
            return Err(PipelineError::Prompt {
                template: name.to_string(),
                field: format!("{} is used but not declared", undeclared),
            });
        }
        if let Some(unused) = required.difference(&used).next() {
            return Err(PipelineError::Prompt {
                template: name.to_string(),
                field: format!("{} is declared but never used", unused),
            });
        }

        Ok(Self {
            name: name.to_string(),
            template: template.to_string(),
            required_fields: required,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.required_fields.iter().map(String::as_str)
    }

    /// Substitute every field. Missing values are an error; extra values are ignored.
    pub fn render(&self, values: &PromptValues) -> Result<String> {
        if let Some(missing) = self.required_fields.iter().find(|f| !values.contains_key(*f)) {
            return Err(PipelineError::Prompt {
                template: self.name.clone(),
                field: format!("{} has no value", missing),
            });
        }

        let rendered = PLACEHOLDER.replace_all(&self.template, |caps: &Captures| {
            values.get(&caps[1]).cloned().unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}

/// Distinct placeholder names in a template
pub fn placeholders(template: &str) -> BTreeSet<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}
