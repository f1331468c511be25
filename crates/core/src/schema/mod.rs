//! Declared input/output schemas.
//!
//! A schema is a closed set of node kinds (object, array, string, number,
//! boolean) parsed from a JSON-Schema-like document. Anything outside that
//! subset is rejected when the schema is loaded, not when a response is checked.

mod extract;
mod validate;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use extract::extract_structured;
pub use validate::{SchemaValidator, ValidationIssue, ValidationOutcome};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid schema at `{path}`: {message}")]
pub struct SchemaError {
    pub path: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum SchemaNode {
    Object(ObjectSchema),
    Array(ArraySchema),
    String(StringSchema),
    Number(NumberSchema),
    Boolean(BooleanSchema),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectSchema {
    pub properties: BTreeMap<String, SchemaNode>,
    pub required: Vec<String>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArraySchema {
    pub items: Box<SchemaNode>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StringSchema {
    pub allowed_values: Option<Vec<String>>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NumberSchema {
    pub integer: bool,
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BooleanSchema {
    pub description: Option<String>,
}

impl SchemaNode {
    pub fn from_json(value: &Value) -> Result<Self, SchemaError> {
        parse_node(value, "$")
    }

    pub fn to_json(&self) -> Value {
        Value::from(self.clone())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Object(_) => "object",
            Self::Array(_) => "array",
            Self::String(_) => "string",
            Self::Number(NumberSchema { integer: true, .. }) => "integer",
            Self::Number(_) => "number",
            Self::Boolean(_) => "boolean",
        }
    }

    /// Pretty JSON rendering used inside prompts.
    pub fn describe(&self) -> String {
        serde_json::to_string_pretty(&self.to_json()).unwrap_or_else(|_| self.kind().to_string())
    }

    pub fn validator(&self) -> SchemaValidator<'_> {
        SchemaValidator::new(self)
    }
}

impl TryFrom<Value> for SchemaNode {
    type Error = SchemaError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(&value)
    }
}

impl From<SchemaNode> for Value {
    fn from(node: SchemaNode) -> Self {
        let mut map = Map::new();
        let description = match node {
            SchemaNode::Object(object) => {
                map.insert("type".to_string(), Value::from("object"));
                let properties = object
                    .properties
                    .into_iter()
                    .map(|(name, child)| (name, Value::from(child)))
                    .collect::<Map<_, _>>();
                map.insert("properties".to_string(), Value::Object(properties));
                if !object.required.is_empty() {
                    map.insert("required".to_string(), Value::from(object.required));
                }
                object.description
            }
            SchemaNode::Array(array) => {
                map.insert("type".to_string(), Value::from("array"));
                map.insert("items".to_string(), Value::from(*array.items));
                array.description
            }
            SchemaNode::String(string) => {
                map.insert("type".to_string(), Value::from("string"));
                if let Some(allowed) = string.allowed_values {
                    map.insert("enum".to_string(), Value::from(allowed));
                }
                string.description
            }
            SchemaNode::Number(number) => {
                let kind = if number.integer { "integer" } else { "number" };
                map.insert("type".to_string(), Value::from(kind));
                number.description
            }
            SchemaNode::Boolean(boolean) => {
                map.insert("type".to_string(), Value::from("boolean"));
                boolean.description
            }
        };
        if let Some(description) = description {
            map.insert("description".to_string(), Value::from(description));
        }
        Value::Object(map)
    }
}

fn parse_node(value: &Value, path: &str) -> Result<SchemaNode, SchemaError> {
    let Some(map) = value.as_object() else {
        return Err(schema_error(path, "schema node must be an object"));
    };

    let description = map.get("description").and_then(Value::as_str).map(str::to_string);
    let kind = match map.get("type") {
        Some(Value::String(kind)) => kind.as_str(),
        Some(_) => return Err(schema_error(path, "`type` must be a single string")),
        None if map.contains_key("properties") => "object",
        None => return Err(schema_error(path, "missing `type`")),
    };

    match kind {
        "object" => {
            let mut properties = BTreeMap::new();
            if let Some(raw) = map.get("properties") {
                let Some(raw) = raw.as_object() else {
                    return Err(schema_error(path, "`properties` must be an object"));
                };
                for (name, child) in raw {
                    let child_path = format!("{path}.{name}");
                    properties.insert(name.clone(), parse_node(child, &child_path)?);
                }
            }
            let required = match map.get("required") {
                None => Vec::new(),
                Some(Value::Array(names)) => names
                    .iter()
                    .map(|name| {
                        name.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| schema_error(path, "`required` entries must be strings"))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                Some(_) => return Err(schema_error(path, "`required` must be an array")),
            };
            Ok(SchemaNode::Object(ObjectSchema { properties, required, description }))
        }
        "array" => {
            let Some(items) = map.get("items") else {
                return Err(schema_error(path, "array schema requires `items`"));
            };
            let items = parse_node(items, &format!("{path}[]"))?;
            Ok(SchemaNode::Array(ArraySchema { items: Box::new(items), description }))
        }
        "string" => {
            let allowed_values = match map.get("enum") {
                None => None,
                Some(Value::Array(values)) => Some(
                    values
                        .iter()
                        .map(|value| {
                            value.as_str().map(str::to_string).ok_or_else(|| {
                                schema_error(path, "string `enum` entries must be strings")
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                Some(_) => return Err(schema_error(path, "`enum` must be an array")),
            };
            Ok(SchemaNode::String(StringSchema { allowed_values, description }))
        }
        "number" => Ok(SchemaNode::Number(NumberSchema { integer: false, description })),
        "integer" => Ok(SchemaNode::Number(NumberSchema { integer: true, description })),
        "boolean" => Ok(SchemaNode::Boolean(BooleanSchema { description })),
        other => Err(schema_error(path, &format!("unsupported type `{other}`"))),
    }
}

fn schema_error(path: &str, message: &str) -> SchemaError {
    SchemaError { path: path.to_string(), message: message.to_string() }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{SchemaNode, StringSchema};

    #[test]
    fn parses_nested_object_and_array_nodes() {
        let schema = SchemaNode::from_json(&json!({
            "type": "object",
            "properties": {
                "tags": { "type": "array", "items": { "type": "string" } },
                "score": { "type": "integer", "description": "0-100" },
                "tier": { "type": "string", "enum": ["gold", "silver"] }
            },
            "required": ["tags"]
        }))
        .expect("schema should parse");

        let SchemaNode::Object(object) = &schema else {
            panic!("expected object schema");
        };
        assert_eq!(object.required, vec!["tags".to_string()]);
        assert_eq!(object.properties["score"].kind(), "integer");
        assert!(matches!(object.properties["tags"], SchemaNode::Array(_)));
        assert_eq!(
            object.properties["tier"],
            SchemaNode::String(StringSchema {
                allowed_values: Some(vec!["gold".to_string(), "silver".to_string()]),
                description: None,
            })
        );
    }

    #[test]
    fn rejects_unsupported_kinds_with_path() {
        let error = SchemaNode::from_json(&json!({
            "type": "object",
            "properties": { "when": { "type": "date" } }
        }))
        .expect_err("date is not a supported kind");

        assert_eq!(error.path, "$.when");
        assert!(error.message.contains("unsupported type"));
    }

    #[test]
    fn array_without_items_is_rejected() {
        let error = SchemaNode::from_json(&json!({ "type": "array" })).expect_err("needs items");
        assert!(error.message.contains("items"));
    }

    #[test]
    fn serde_round_trip_goes_through_json_schema_shape() {
        let raw = json!({
            "type": "object",
            "properties": { "ok": { "type": "boolean" } },
            "required": ["ok"]
        });
        let schema: SchemaNode = serde_json::from_value(raw.clone()).expect("deserialize");
        assert_eq!(serde_json::to_value(&schema).expect("serialize"), raw);
    }
}
