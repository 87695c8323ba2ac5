//! Tool descriptors, input schemas, and the discovery-snapshot registry.
//!
//! Tool input schemas are represented as a closed tagged-field descriptor
//! rather than free-form schema documents: each field has a name, a type
//! tag, and a required flag. Validation is a pure function over this
//! structure and never performs I/O.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of field type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Boolean,
    Object,
    Array,
}

impl FieldKind {
    /// Map a wire-format type tag to a field kind.
    ///
    /// `"number"` collapses to `Integer`; unknown tags fall back to
    /// `String`, matching the lenient handling of loosely-specified
    /// remote schemas.
    pub fn from_wire(tag: &str) -> Self {
        match tag {
            "string" => Self::String,
            "integer" | "number" => Self::Integer,
            "boolean" => Self::Boolean,
            "object" => Self::Object,
            "array" => Self::Array,
            _ => Self::String,
        }
    }

    /// Whether a JSON value is compatible with this kind.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// One declared argument of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The declared input schema of a tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSchema {
    pub fields: Vec<FieldSpec>,
}

impl ToolSchema {
    /// Build a schema from a JSON-Schema-shaped wire payload
    /// (`properties` / `required`). Anything unparseable yields an empty
    /// schema, which validates all inputs.
    pub fn from_wire(schema: &Value) -> Self {
        let required: Vec<&str> = schema["required"]
            .as_array()
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let fields = schema["properties"]
            .as_object()
            .map(|props| {
                props
                    .iter()
                    .map(|(name, spec)| FieldSpec {
                        name: name.clone(),
                        kind: FieldKind::from_wire(spec["type"].as_str().unwrap_or("")),
                        required: required.contains(&name.as_str()),
                        description: spec["description"].as_str().map(String::from),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Names of all required fields.
    pub fn required_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Validate arguments against this schema.
    ///
    /// Returns the list of unknown fields (permitted, but flagged) on
    /// success, or the list of problems on failure. Pure — no I/O.
    pub fn validate(&self, arguments: &Value) -> Result<Vec<String>, Vec<String>> {
        let mut problems = Vec::new();
        let mut unknown = Vec::new();

        let args = match arguments.as_object() {
            Some(map) => map,
            None => {
                if self.fields.is_empty() && arguments.is_null() {
                    return Ok(unknown);
                }
                return Err(vec!["Arguments must be a JSON object".into()]);
            }
        };

        for field in self.fields.iter().filter(|f| f.required) {
            if !args.contains_key(&field.name) {
                problems.push(format!("Missing required field: {}", field.name));
            }
        }

        for (name, value) in args {
            match self.field(name) {
                Some(spec) => {
                    if !spec.kind.matches(value) {
                        problems.push(format!(
                            "Field {} should be of type {}",
                            name,
                            spec.kind.as_str()
                        ));
                    }
                }
                None => unknown.push(name.clone()),
            }
        }

        if problems.is_empty() {
            Ok(unknown)
        } else {
            Err(problems)
        }
    }
}

/// A discovered tool capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique key within a discovery snapshot
    pub name: String,

    /// Natural-language summary, consumed by the planner prompt
    pub description: String,

    /// Declared input schema
    pub schema: ToolSchema,
}

/// An immutable snapshot of discovered tools.
///
/// Re-discovery builds a fresh registry and replaces the previous snapshot
/// atomically — callers never observe a partial overwrite. Tool names are
/// unique within a snapshot; lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a registry from descriptors. The first descriptor wins when
    /// names collide, preserving discovery order.
    pub fn from_descriptors(descriptors: Vec<ToolDescriptor>) -> Self {
        let mut tools: Vec<ToolDescriptor> = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if !tools
                .iter()
                .any(|t| t.name.eq_ignore_ascii_case(&descriptor.name))
            {
                tools.push(descriptor);
            }
        }
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Render the registry for inclusion in a planner prompt.
    pub fn describe(&self) -> String {
        if self.tools.is_empty() {
            return "No tools are currently available.".into();
        }

        self.tools
            .iter()
            .map(|t| {
                let required = t.schema.required_fields();
                if required.is_empty() {
                    format!("- {}: {}", t.name, t.description)
                } else {
                    format!(
                        "- {}: {} (Required: {})",
                        t.name,
                        t.description,
                        required.join(", ")
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
