//! Per-method parameter schemas and validation.
//!
//! Each recognised method carries a declarative [`MethodSchema`] fixing the
//! method string and the required/optional shape of its `params`. Schemas
//! are defined once as constants; validation is a pure function over a
//! parsed request.
//!
//! Violations map to `InvalidRequest` (-32600): the envelope itself was
//! well-formed, only the method-specific shape failed.

use serde_json::Value;

use crate::mcp::protocol::{ErrorCode, JsonRpcRequest, ProtocolError};

/// Expected JSON type of a parameter field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// JSON string.
    String,
    /// JSON object.
    Object,
    /// JSON number.
    Number,
    /// JSON boolean.
    Boolean,
}

impl FieldType {
    /// Checks whether `value` has this JSON type.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Object => value.is_object(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }

    /// Human-readable name for error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Object => "object",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

/// A single field in a method's `params` object.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Field name inside `params`.
    pub name: &'static str,
    /// Expected JSON type.
    pub ty: FieldType,
    /// Whether the field must be present.
    pub required: bool,
}

/// Declarative descriptor for one method's parameters.
///
/// Read-only; one instance per method, defined at compile time.
#[derive(Debug, Clone, Copy)]
pub struct MethodSchema {
    /// The fixed method string this schema belongs to.
    pub method: &'static str,
    /// Required and optional fields of `params`.
    pub fields: &'static [FieldSpec],
}

impl MethodSchema {
    /// Whether any field is required, i.e. `params` itself is mandatory.
    #[must_use]
    pub fn requires_params(&self) -> bool {
        self.fields.iter().any(|f| f.required)
    }
}

/// Schema for the `initialize` request.
pub const INITIALIZE: MethodSchema = MethodSchema {
    method: "initialize",
    fields: &[
        FieldSpec {
            name: "protocolVersion",
            ty: FieldType::String,
            required: true,
        },
        FieldSpec {
            name: "capabilities",
            ty: FieldType::Object,
            required: false,
        },
        FieldSpec {
            name: "clientInfo",
            ty: FieldType::Object,
            required: false,
        },
    ],
};

/// Schema for the `tools/list` request. No fields; `params` is optional.
pub const TOOLS_LIST: MethodSchema = MethodSchema {
    method: "tools/list",
    fields: &[],
};

/// Schema for the `tools/call` request.
pub const TOOLS_CALL: MethodSchema = MethodSchema {
    method: "tools/call",
    fields: &[
        FieldSpec {
            name: "name",
            ty: FieldType::String,
            required: true,
        },
        FieldSpec {
            name: "arguments",
            ty: FieldType::Object,
            required: false,
        },
    ],
};

/// Validates a request's `params` against a method schema.
///
/// Re-checks that the request's method equals the schema's fixed method
/// string, that `params` is present when the schema has required fields,
/// and that every declared field has the declared type. Unknown fields
/// pass through untouched. No side effects.
///
/// # Errors
///
/// Returns an `InvalidRequest` protocol error naming the violated
/// constraint.
pub fn validate(request: &JsonRpcRequest, schema: &MethodSchema) -> Result<(), ProtocolError> {
    let invalid = |detail: String| ProtocolError::new(ErrorCode::InvalidRequest, detail);

    if request.method != schema.method {
        return Err(invalid(format!(
            "unexpected method: got '{}', expected '{}'",
            request.method, schema.method
        )));
    }

    let params = match &request.params {
        Some(p) => p,
        None if schema.requires_params() => {
            return Err(invalid(format!("missing params for {}", schema.method)));
        }
        None => return Ok(()),
    };

    let obj = params
        .as_object()
        .ok_or_else(|| invalid(format!("params for {} must be an object", schema.method)))?;

    for field in schema.fields {
        match obj.get(field.name) {
            Some(value) => {
                if !field.ty.matches(value) {
                    return Err(invalid(format!(
                        "field '{}' must be a {}",
                        field.name,
                        field.ty.name()
                    )));
                }
            }
            None if field.required => {
                return Err(invalid(format!("missing required field '{}'", field.name)));
            }
            None => {}
        }
    }

    Ok(())
}
