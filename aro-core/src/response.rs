//! Feature-set responses and output formatting
//!
//! A [`Response`] is the terminal value of a feature set. How it renders
//! depends on the [`OutputContext`] attached to the runtime context.

use crate::value::TypedValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Formatting mode for responses and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputContext {
    Machine,
    #[default]
    Human,
    Developer,
}

/// The terminal value of a feature set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: String,
    pub reason: Option<String>,
    /// Ordered so rendering is deterministic.
    pub data: BTreeMap<String, TypedValue>,
}

impl Response {
    /// The default success response of a feature set that ran to the end.
    pub fn ok() -> Self {
        Self {
            status: "OK".to_string(),
            reason: None,
            data: BTreeMap::new(),
        }
    }

    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            reason: None,
            data: BTreeMap::new(),
        }
    }

    pub fn error(status: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            reason: Some(reason.into()),
            data: BTreeMap::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_data(mut self, name: impl Into<String>, value: TypedValue) -> Self {
        self.data.insert(name.into(), value);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }

    /// Render for the given output context.
    ///
    /// `machine` emits JSON; `human` emits `[Status] reason` plus
    /// indented key:value pairs; `developer` adds type annotations.
    pub fn render(&self, output: OutputContext) -> String {
        match output {
            OutputContext::Machine => {
                let mut map = Map::new();
                map.insert("status".into(), Value::String(self.status.clone()));
                if let Some(reason) = &self.reason {
                    map.insert("reason".into(), Value::String(reason.clone()));
                }
                let data: Map<String, Value> = self
                    .data
                    .iter()
                    .map(|(k, v)| (k.clone(), v.value.clone()))
                    .collect();
                map.insert("data".into(), Value::Object(data));
                Value::Object(map).to_string()
            }
            OutputContext::Human => self.render_text(false),
            OutputContext::Developer => self.render_text(true),
        }
    }

    fn render_text(&self, annotated: bool) -> String {
        let mut out = format!("[{}]", self.status);
        if let Some(reason) = &self.reason {
            out.push(' ');
            out.push_str(reason);
        }
        for (key, value) in &self.data {
            out.push('\n');
            if annotated {
                out.push_str(&format!("  {}: {}", key, value.to_annotated_string()));
            } else {
                out.push_str(&format!("  {}: {}", key, value.to_display_string()));
            }
        }
        out
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(OutputContext::Human))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn machine_output_is_json() {
        let response = Response::new("OK").with_data("sum", TypedValue::integer(7));
        let rendered = response.render(OutputContext::Machine);
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["status"], json!("OK"));
        assert_eq!(parsed["data"]["sum"], json!(7));
    }

    #[test]
    fn human_output_has_status_line_and_pairs() {
        let response = Response::error("NotFound", "no such order")
            .with_data("id", TypedValue::string("42"));
        let rendered = response.render(OutputContext::Human);
        assert_eq!(rendered, "[NotFound] no such order\n  id: 42");
    }

    #[test]
    fn developer_output_annotates_types() {
        let response = Response::new("OK").with_data("sum", TypedValue::integer(7));
        let rendered = response.render(OutputContext::Developer);
        assert!(rendered.contains("sum: 7: integer"));
    }
}
