use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Metadata of one tool the agent may invoke. Descriptors are gathered
/// from tool servers at session bootstrap and never change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name:         String,
    pub description:  String,
    /// JSON-schema-like object: { "type": "object", "properties": …,
    /// "required": [...] }.
    pub input_schema: Value,
    /// Id of the server that owns this tool. Sessions are looked up by
    /// this key, never embedded by pointer.
    pub server_id:    String,
}

/// Why a proposed invocation failed argument validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    UnknownTool(String),
    MissingRequired { tool: String, field: String },
    WrongType { tool: String, field: String, expected: String },
    IllegalEnumValue { tool: String, field: String, value: String },
    NotAnObject { tool: String },
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SchemaViolation::UnknownTool(name) =>
                write!(f, "tool '{}' is not in the registry", name),
            SchemaViolation::MissingRequired { tool, field } =>
                write!(f, "{}: required field '{}' is missing", tool, field),
            SchemaViolation::WrongType { tool, field, expected } =>
                write!(f, "{}: field '{}' must be of type {}", tool, field, expected),
            SchemaViolation::IllegalEnumValue { tool, field, value } =>
                write!(f, "{}: '{}' is not a legal value for '{}'", tool, value, field),
            SchemaViolation::NotAnObject { tool } =>
                write!(f, "{}: arguments must be a JSON object", tool),
        }
    }
}

/// Immutable map of tool descriptors, keyed by tool name.
///
/// Iteration order is the sorted name order (BTreeMap), so every
/// rendering of the registry is byte-stable across calls.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: BTreeMap::new() }
    }

    /// Merge a descriptor into the registry. Name conflicts resolve
    /// last-loaded-wins, with a log line naming both servers.
    pub fn merge(&mut self, descriptor: ToolDescriptor) {
        if let Some(existing) = self.tools.get(&descriptor.name) {
            tracing::warn!(
                tool = %descriptor.name,
                previous_server = %existing.server_id,
                new_server = %descriptor.server_id,
                "duplicate tool name — last-loaded server wins"
            );
        }
        self.tools.insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Descriptors in sorted name order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate a proposed argument map against the declared schema:
    /// required fields present, primitive types matching, enum values
    /// legal. Unknown extra fields pass through — the server owns the
    /// final word on those.
    pub fn validate_arguments(&self, tool: &str, args: &Value) -> Result<(), SchemaViolation> {
        let descriptor = self
            .tools
            .get(tool)
            .ok_or_else(|| SchemaViolation::UnknownTool(tool.to_string()))?;

        let args_map = args
            .as_object()
            .ok_or_else(|| SchemaViolation::NotAnObject { tool: tool.to_string() })?;

        let schema = &descriptor.input_schema;
        let properties = schema.get("properties").and_then(Value::as_object);

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for field in required.iter().filter_map(Value::as_str) {
                if !args_map.contains_key(field) || args_map[field].is_null() {
                    return Err(SchemaViolation::MissingRequired {
                        tool:  tool.to_string(),
                        field: field.to_string(),
                    });
                }
            }
        }

        if let Some(properties) = properties {
            for (field, value) in args_map {
                let Some(spec) = properties.get(field) else { continue };
                if value.is_null() {
                    continue;
                }

                if let Some(expected) = spec.get("type").and_then(Value::as_str) {
                    if !type_matches(expected, value) {
                        return Err(SchemaViolation::WrongType {
                            tool:     tool.to_string(),
                            field:    field.clone(),
                            expected: expected.to_string(),
                        });
                    }
                }

                if let Some(options) = spec.get("enum").and_then(Value::as_array) {
                    if !options.contains(value) {
                        return Err(SchemaViolation::IllegalEnumValue {
                            tool:  tool.to_string(),
                            field: field.clone(),
                            value: value.to_string(),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string"  => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number"  => value.is_number(),
        "boolean" => value.is_boolean(),
        "array"   => value.is_array(),
        "object"  => value.is_object(),
        _         => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.merge(ToolDescriptor {
            name:        "search_elog".to_string(),
            description: "Search the operations logbook".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query":       { "type": "string" },
                    "max_results": { "type": "integer" },
                    "category":    { "type": "string", "enum": ["Info", "Problem", "Pikett"] }
                },
                "required": ["query"]
            }),
            server_id: "elog".to_string(),
        });
        registry
    }

    #[test]
    fn accepts_valid_arguments() {
        let registry = sample_registry();
        let args = json!({"query": "beam dump", "max_results": 10, "category": "Problem"});
        assert!(registry.validate_arguments("search_elog", &args).is_ok());
    }

    #[test]
    fn rejects_missing_required_field() {
        let registry = sample_registry();
        let err = registry
            .validate_arguments("search_elog", &json!({"max_results": 10}))
            .unwrap_err();
        assert!(matches!(err, SchemaViolation::MissingRequired { .. }));
    }

    #[test]
    fn rejects_wrong_type_and_illegal_enum() {
        let registry = sample_registry();
        assert!(matches!(
            registry
                .validate_arguments("search_elog", &json!({"query": "x", "max_results": "ten"}))
                .unwrap_err(),
            SchemaViolation::WrongType { .. }
        ));
        assert!(matches!(
            registry
                .validate_arguments("search_elog", &json!({"query": "x", "category": "Gossip"}))
                .unwrap_err(),
            SchemaViolation::IllegalEnumValue { .. }
        ));
    }

    #[test]
    fn rejects_unknown_tool() {
        let registry = sample_registry();
        assert!(matches!(
            registry.validate_arguments("launch_beam", &json!({})).unwrap_err(),
            SchemaViolation::UnknownTool(_)
        ));
    }

    #[test]
    fn last_loaded_descriptor_wins() {
        let mut registry = sample_registry();
        registry.merge(ToolDescriptor {
            name:         "search_elog".to_string(),
            description:  "replacement".to_string(),
            input_schema: json!({"type": "object"}),
            server_id:    "other".to_string(),
        });
        assert_eq!(registry.get("search_elog").unwrap().server_id, "other");
        assert_eq!(registry.len(), 1);
    }
}
