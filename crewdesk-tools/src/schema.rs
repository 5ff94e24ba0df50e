//! Shared JSON schema helpers for tool definitions.

use serde_json::{json, Map, Value};

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    pub fn build(self) -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": self.properties,
            "required": self.required,
        })
    }
}

pub fn empty_object_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {},
        "required": [],
    })
}

/// Truncate text to a character budget, appending a marker when cut.
/// Text exactly at the budget passes through untouched.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(14);
    let cut: String = text.chars().take(keep).collect();
    format!("{cut}\n…(truncated)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_shape() {
        let schema = SchemaBuilder::new()
            .property("path", json!({"type": "string"}))
            .property("depth", json!({"type": "integer", "minimum": 0}))
            .required("path")
            .build();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["required"][0], "path");
    }

    #[test]
    fn test_truncate_boundary() {
        let s = "x".repeat(50);
        assert_eq!(truncate_chars(&s, 50), s);
        let cut = truncate_chars(&"x".repeat(51), 50);
        assert!(cut.ends_with("…(truncated)"));
    }
}
