use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Array => "array",
            FieldKind::Object => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchemaIssue {
    NotAnObject,
    MissingField { field: String },
    WrongType { field: String, expected: FieldKind },
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaIssue::NotAnObject => write!(f, "arguments must be a JSON object"),
            SchemaIssue::MissingField { field } => {
                write!(f, "missing required field `{field}`")
            }
            SchemaIssue::WrongType { field, expected } => {
                write!(f, "field `{field}` should be a {}", expected.as_str())
            }
        }
    }
}

/// Structural description of a tool's accepted arguments. Unknown fields are
/// tolerated; missing required fields and type mismatches reject.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSchema {
    pub fields: Vec<FieldSpec>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(self, name: &str, kind: FieldKind, description: &str) -> Self {
        self.field(name, kind, true, description)
    }

    pub fn optional(self, name: &str, kind: FieldKind, description: &str) -> Self {
        self.field(name, kind, false, description)
    }

    fn field(mut self, name: &str, kind: FieldKind, required: bool, description: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required,
            description: description.to_string(),
        });
        self
    }

    pub fn validate(&self, arguments: &Value) -> Result<(), Vec<SchemaIssue>> {
        let object = match arguments {
            Value::Object(object) => object,
            Value::Null if self.fields.iter().all(|field| !field.required) => {
                return Ok(());
            }
            _ => return Err(vec![SchemaIssue::NotAnObject]),
        };

        let mut issues = Vec::new();
        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        issues.push(SchemaIssue::MissingField { field: field.name.clone() });
                    }
                }
                Some(value) => {
                    if !field.kind.matches(value) {
                        issues.push(SchemaIssue::WrongType {
                            field: field.name.clone(),
                            expected: field.kind,
                        });
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    /// JSON-schema-shaped rendering for the model's tool manifest.
    pub fn to_manifest(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for field in &self.fields {
            properties.insert(
                field.name.clone(),
                json!({ "type": field.kind.as_str(), "description": field.description }),
            );
            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }

        json!({ "type": "object", "properties": properties, "required": required })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{FieldKind, InputSchema, SchemaIssue};

    fn schema_fixture() -> InputSchema {
        InputSchema::new()
            .required("address", FieldKind::String, "street address of the property")
            .optional("bedrooms", FieldKind::Integer, "bedroom count")
    }

    #[test]
    fn valid_arguments_pass_and_unknown_fields_are_tolerated() {
        let result = schema_fixture()
            .validate(&json!({"address": "22 Boundary Road", "bedrooms": 3, "extra": true}));
        assert!(result.is_ok());
    }

    #[test]
    fn missing_required_field_is_reported_by_name() {
        let issues =
            schema_fixture().validate(&json!({"bedrooms": 3})).expect_err("address is required");
        assert_eq!(issues, vec![SchemaIssue::MissingField { field: "address".to_string() }]);
        assert_eq!(issues[0].to_string(), "missing required field `address`");
    }

    #[test]
    fn type_mismatch_is_reported_with_the_expected_kind() {
        let issues = schema_fixture()
            .validate(&json!({"address": "22 Boundary Road", "bedrooms": "three"}))
            .expect_err("bedrooms must be an integer");
        assert_eq!(
            issues,
            vec![SchemaIssue::WrongType { field: "bedrooms".to_string(), expected: FieldKind::Integer }]
        );
    }

    #[test]
    fn non_object_arguments_are_rejected_unless_nothing_is_required() {
        let issues = schema_fixture().validate(&json!([1, 2])).expect_err("arrays are not argument objects");
        assert_eq!(issues, vec![SchemaIssue::NotAnObject]);

        let optional_only = InputSchema::new().optional("limit", FieldKind::Integer, "max results");
        assert!(optional_only.validate(&serde_json::Value::Null).is_ok());
    }

    #[test]
    fn explicit_null_counts_as_missing_for_required_fields() {
        let issues = schema_fixture()
            .validate(&json!({"address": null}))
            .expect_err("null address should not satisfy the requirement");
        assert_eq!(issues, vec![SchemaIssue::MissingField { field: "address".to_string() }]);
    }

    #[test]
    fn manifest_rendering_lists_properties_and_required_names() {
        let manifest = schema_fixture().to_manifest();
        assert_eq!(manifest["type"], "object");
        assert_eq!(manifest["properties"]["address"]["type"], "string");
        assert_eq!(manifest["required"], json!(["address"]));
    }
}
