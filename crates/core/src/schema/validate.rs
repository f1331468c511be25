use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use super::{extract_structured, NumberSchema, ObjectSchema, SchemaNode, StringSchema};

const ROOT_PATH: &str = "(root)";
// Integers above this lose precision as f64.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn root(message: impl Into<String>) -> Self {
        Self { path: ROOT_PATH.to_string(), message: message.into() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValidationOutcome {
    Valid(Value),
    ParseError(String),
    Invalid(Vec<ValidationIssue>),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// Parse errors are reported as a single issue at the root.
    pub fn issues(&self) -> Vec<ValidationIssue> {
        match self {
            Self::Valid(_) => Vec::new(),
            Self::ParseError(message) => vec![ValidationIssue::root(message.clone())],
            Self::Invalid(issues) => issues.clone(),
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Self::Valid(_) => "valid".to_string(),
            Self::ParseError(message) => message.clone(),
            Self::Invalid(issues) => issues
                .iter()
                .map(|issue| format!("{}: {}", issue.path, issue.message))
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

#[derive(Clone, Debug)]
enum Segment {
    Key(String),
    Index(usize),
}

fn render_path(segments: &[Segment]) -> String {
    if segments.is_empty() {
        return ROOT_PATH.to_string();
    }
    let mut rendered = String::new();
    for segment in segments {
        match segment {
            Segment::Key(key) => {
                if !rendered.is_empty() {
                    rendered.push('.');
                }
                rendered.push_str(key);
            }
            Segment::Index(index) => {
                rendered.push('[');
                rendered.push_str(&index.to_string());
                rendered.push(']');
            }
        }
    }
    rendered
}

/// Runtime validator for a declared schema. Stateless; borrow one per check.
#[derive(Clone, Copy, Debug)]
pub struct SchemaValidator<'a> {
    schema: &'a SchemaNode,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(schema: &'a SchemaNode) -> Self {
        Self { schema }
    }

    pub fn validate_text(&self, text: &str) -> ValidationOutcome {
        match extract_structured(text) {
            Ok(value) => self.validate_value(&value),
            Err(message) => ValidationOutcome::ParseError(message),
        }
    }

    pub fn validate_value(&self, value: &Value) -> ValidationOutcome {
        let mut issues = Vec::new();
        let mut path = Vec::new();
        let coerced = check(self.schema, value, &mut path, &mut issues);
        if issues.is_empty() {
            ValidationOutcome::Valid(coerced)
        } else {
            ValidationOutcome::Invalid(issues)
        }
    }
}

fn check(
    schema: &SchemaNode,
    value: &Value,
    path: &mut Vec<Segment>,
    issues: &mut Vec<ValidationIssue>,
) -> Value {
    match schema {
        SchemaNode::Object(object) => check_object(object, value, path, issues),
        SchemaNode::Array(array) => {
            let Value::Array(items) = value else {
                issues.push(type_issue(path, "array", value));
                return value.clone();
            };
            let mut coerced = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                path.push(Segment::Index(index));
                coerced.push(check(&array.items, item, path, issues));
                path.pop();
            }
            Value::Array(coerced)
        }
        SchemaNode::String(string) => check_string(string, value, path, issues),
        SchemaNode::Number(number) => check_number(number, value, path, issues),
        SchemaNode::Boolean(_) => match value {
            Value::Bool(_) => value.clone(),
            Value::String(raw) if raw.trim().eq_ignore_ascii_case("true") => Value::Bool(true),
            Value::String(raw) if raw.trim().eq_ignore_ascii_case("false") => Value::Bool(false),
            _ => {
                issues.push(type_issue(path, "boolean", value));
                value.clone()
            }
        },
    }
}

fn check_object(
    object: &ObjectSchema,
    value: &Value,
    path: &mut Vec<Segment>,
    issues: &mut Vec<ValidationIssue>,
) -> Value {
    let Value::Object(fields) = value else {
        issues.push(type_issue(path, "object", value));
        return value.clone();
    };

    // Unknown keys pass through untouched.
    let mut coerced: Map<String, Value> = fields.clone();

    for name in &object.required {
        let missing = matches!(fields.get(name), None | Some(Value::Null));
        if missing {
            path.push(Segment::Key(name.clone()));
            issues.push(ValidationIssue { path: render_path(path), message: "Required".to_string() });
            path.pop();
        }
    }

    for (name, child) in &object.properties {
        let Some(field) = fields.get(name) else {
            continue;
        };
        if field.is_null() {
            continue;
        }
        path.push(Segment::Key(name.clone()));
        let checked = check(child, field, path, issues);
        path.pop();
        coerced.insert(name.clone(), checked);
    }

    Value::Object(coerced)
}

fn check_string(
    string: &StringSchema,
    value: &Value,
    path: &[Segment],
    issues: &mut Vec<ValidationIssue>,
) -> Value {
    let Value::String(raw) = value else {
        issues.push(type_issue(path, "string", value));
        return value.clone();
    };
    if let Some(allowed) = &string.allowed_values {
        if !allowed.iter().any(|candidate| candidate == raw) {
            let expected =
                allowed.iter().map(|candidate| format!("'{candidate}'")).collect::<Vec<_>>();
            issues.push(ValidationIssue {
                path: render_path(path),
                message: format!(
                    "Invalid enum value. Expected {}, received '{raw}'",
                    expected.join(" | ")
                ),
            });
        }
    }
    value.clone()
}

fn check_number(
    number: &NumberSchema,
    value: &Value,
    path: &[Segment],
    issues: &mut Vec<ValidationIssue>,
) -> Value {
    let expected = if number.integer { "integer" } else { "number" };
    let parsed = match value {
        Value::Number(raw) => raw.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok().filter(|parsed| parsed.is_finite()),
        _ => None,
    };
    let Some(parsed) = parsed else {
        issues.push(type_issue(path, expected, value));
        return value.clone();
    };

    if number.integer && parsed.fract() != 0.0 {
        issues.push(ValidationIssue {
            path: render_path(path),
            message: "Expected integer, received number".to_string(),
        });
        return value.clone();
    }

    match value {
        Value::Number(_) => value.clone(),
        _ => numeric_value(parsed).unwrap_or_else(|| value.clone()),
    }
}

fn numeric_value(parsed: f64) -> Option<Value> {
    if parsed.fract() == 0.0 && parsed.abs() <= MAX_SAFE_INTEGER {
        return Some(Value::Number(Number::from(parsed as i64)));
    }
    Number::from_f64(parsed).map(Value::Number)
}

fn type_issue(path: &[Segment], expected: &str, value: &Value) -> ValidationIssue {
    ValidationIssue {
        path: render_path(path),
        message: format!("Expected {expected}, received {}", received_kind(value)),
    }
}

fn received_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{SchemaValidator, ValidationIssue, ValidationOutcome};
    use crate::schema::SchemaNode;

    fn order_schema() -> SchemaNode {
        SchemaNode::from_json(&json!({
            "type": "object",
            "properties": {
                "customer": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "vip": { "type": "boolean" }
                    },
                    "required": ["name"]
                },
                "lines": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "sku": { "type": "string" },
                            "quantity": { "type": "integer" },
                            "price": { "type": "number" }
                        },
                        "required": ["sku", "quantity"]
                    }
                },
                "channel": { "type": "string", "enum": ["web", "phone"] },
                "note": { "type": "string" }
            },
            "required": ["customer", "lines"]
        }))
        .expect("order schema")
    }

    #[test]
    fn coerces_numeric_and_boolean_strings() {
        let schema = order_schema();
        let outcome = SchemaValidator::new(&schema).validate_value(&json!({
            "customer": { "name": "Ada", "vip": "TRUE" },
            "lines": [{ "sku": "A-1", "quantity": "3", "price": " 9.5 " }],
            "extra": "kept"
        }));

        assert_eq!(
            outcome,
            ValidationOutcome::Valid(json!({
                "customer": { "name": "Ada", "vip": true },
                "lines": [{ "sku": "A-1", "quantity": 3, "price": 9.5 }],
                "extra": "kept"
            }))
        );
    }

    #[test]
    fn reports_nested_paths_in_dot_bracket_notation() {
        let schema = order_schema();
        let outcome = SchemaValidator::new(&schema).validate_value(&json!({
            "customer": { "vip": "maybe" },
            "lines": [
                { "sku": "A-1", "quantity": 1 },
                { "sku": 7, "quantity": 1.5 }
            ],
            "channel": "fax"
        }));

        let issues = outcome.issues();
        let paths = issues.iter().map(|issue| issue.path.as_str()).collect::<Vec<_>>();
        assert!(paths.contains(&"customer.name"), "{paths:?}");
        assert!(paths.contains(&"customer.vip"), "{paths:?}");
        assert!(paths.contains(&"lines[1].sku"), "{paths:?}");
        assert!(paths.contains(&"lines[1].quantity"), "{paths:?}");
        assert!(paths.contains(&"channel"), "{paths:?}");

        let quantity = issues
            .iter()
            .find(|issue| issue.path == "lines[1].quantity")
            .expect("quantity issue");
        assert_eq!(quantity.message, "Expected integer, received number");
        let name = issues.iter().find(|issue| issue.path == "customer.name").expect("name issue");
        assert_eq!(name.message, "Required");
    }

    #[test]
    fn optional_null_is_accepted_and_required_null_is_not() {
        let schema = order_schema();
        let validator = SchemaValidator::new(&schema);

        let ok = validator.validate_value(&json!({
            "customer": { "name": "Ada" },
            "lines": [],
            "note": null
        }));
        assert!(ok.is_valid());

        let missing = validator.validate_value(&json!({ "customer": null, "lines": [] }));
        assert_eq!(
            missing.issues(),
            vec![ValidationIssue { path: "customer".to_string(), message: "Required".to_string() }]
        );
    }

    #[test]
    fn rejects_non_numeric_strings_and_wrong_root_type() {
        let schema = SchemaNode::from_json(&json!({ "type": "number" })).expect("schema");
        let validator = SchemaValidator::new(&schema);

        assert_eq!(validator.validate_value(&json!("12e1")), ValidationOutcome::Valid(json!(120)));
        assert!(!validator.validate_value(&json!("twelve")).is_valid());
        assert!(!validator.validate_value(&json!("NaN")).is_valid());

        let outcome = validator.validate_value(&json!([1]));
        assert_eq!(
            outcome.issues(),
            vec![ValidationIssue::root("Expected number, received array")]
        );
    }

    #[test]
    fn text_validation_surfaces_parse_errors_at_root() {
        let schema = order_schema();
        let outcome = SchemaValidator::new(&schema).validate_text("no json here");
        assert!(matches!(outcome, ValidationOutcome::ParseError(_)));
        assert_eq!(outcome.issues()[0].path, "(root)");
    }
}
