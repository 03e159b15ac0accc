//! Typed parameter schemas for tools
//!
//! Validation is an explicit step that runs before dispatch. It rejects
//! anything that does not match the declared fields and fills in defaults,
//! so tool bodies only ever see well-formed parameter objects.

use crate::error::OrchestrationError;
use crate::Result;
use serde::Serialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    StringArray,
}

impl ParamKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::StringArray => value
                .as_array()
                .map(|items| items.iter().all(Value::is_string))
                .unwrap_or(false),
        }
    }

    fn json_schema(&self) -> Value {
        match self {
            ParamKind::String => json!({ "type": "string" }),
            ParamKind::Integer => json!({ "type": "integer" }),
            ParamKind::Number => json!({ "type": "number" }),
            ParamKind::Boolean => json!({ "type": "boolean" }),
            ParamKind::StringArray => json!({ "type": "array", "items": { "type": "string" } }),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::StringArray => "array of strings",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamField {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<Value>,
    /// Inclusive bounds for integer fields
    pub range: Option<(i64, i64)>,
    pub description: &'static str,
}

impl ParamField {
    pub fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            range: None,
            description,
        }
    }

    pub fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            range: None,
            description,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_range(mut self, min: i64, max: i64) -> Self {
        self.range = Some((min, max));
        self
    }

    fn in_range(&self, value: &Value) -> bool {
        match (self.range, value.as_i64()) {
            (None, _) => true,
            (Some((min, max)), Some(v)) => v >= min && v <= max,
            // u64 beyond i64::MAX
            (Some(_), None) => false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParamSchema {
    pub fields: Vec<ParamField>,
}

impl ParamSchema {
    pub fn new(fields: Vec<ParamField>) -> Self {
        Self { fields }
    }

    /// Validate `params` and return a normalized copy with defaults applied.
    ///
    /// `null` is treated as an empty object so parameterless calls work.
    pub fn validate(&self, tool_name: &str, params: &Value) -> Result<Value> {
        let empty = Map::new();
        let object = match params {
            Value::Null => &empty,
            Value::Object(map) => map,
            _ => {
                return Err(OrchestrationError::Validation(format!(
                    "{}: parameters must be a JSON object",
                    tool_name
                )))
            }
        };

        if let Some(unknown) = object
            .keys()
            .find(|key| !self.fields.iter().any(|f| f.name == key.as_str()))
        {
            return Err(OrchestrationError::Validation(format!(
                "{}: unknown parameter '{}'",
                tool_name, unknown
            )));
        }

        let mut normalized = Map::new();

        for field in &self.fields {
            match object.get(field.name) {
                Some(Value::Null) | None => {
                    if let Some(default) = &field.default {
                        normalized.insert(field.name.to_string(), default.clone());
                    } else if field.required {
                        return Err(OrchestrationError::Validation(format!(
                            "{}: missing required parameter '{}'",
                            tool_name, field.name
                        )));
                    }
                }
                Some(value) if field.kind.accepts(value) && !field.in_range(value) => {
                    let (min, max) = field.range.unwrap_or_default();
                    return Err(OrchestrationError::Validation(format!(
                        "{}: parameter '{}' must be between {} and {}, got {}",
                        tool_name, field.name, min, max, value
                    )));
                }
                Some(value) if field.kind.accepts(value) => {
                    normalized.insert(field.name.to_string(), value.clone());
                }
                Some(value) => {
                    return Err(OrchestrationError::Validation(format!(
                        "{}: parameter '{}' must be {}, got {}",
                        tool_name,
                        field.name,
                        field.kind.label(),
                        value
                    )));
                }
            }
        }

        Ok(Value::Object(normalized))
    }

    /// JSON-schema rendering advertised to the LLM
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = field.kind.json_schema();
            prop["description"] = json!(field.description);
            if let Some(default) = &field.default {
                prop["default"] = default.clone();
            }
            if let Some((min, max)) = field.range {
                prop["minimum"] = json!(min);
                prop["maximum"] = json!(max);
            }
            properties.insert(field.name.to_string(), prop);
        }

        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}
