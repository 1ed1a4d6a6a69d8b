//! Prompt Templates
//!
//! `{{NAME}}` placeholder substitution for agent system prompts.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern is valid"));

/// Value bound to a placeholder
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateValue {
    Text(String),
    /// Rendered one item per line
    List(Vec<String>),
}

impl From<&str> for TemplateValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<String>> for TemplateValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

pub type TemplateVariables = HashMap<String, TemplateValue>;

/// Replace every `{{NAME}}` whose name is bound in `variables`.
/// Unknown placeholders are left as written.
pub fn render(template: &str, variables: &TemplateVariables) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match variables.get(&caps[1]) {
            Some(TemplateValue::Text(text)) => text.clone(),
            Some(TemplateValue::List(items)) => items.join("\n"),
            None => caps[0].to_string(),
        })
        .into_owned()
}
