use crate::ToolError;
use relay_llm::ToolCall;
use serde_json::{Map, Number, Value};

/// Parse the raw argument payload of a call. An empty payload or `null`
/// stands for "no arguments".
pub fn parse_tool_arguments(tool_call: &ToolCall) -> Result<Value, ToolError> {
    let raw = tool_call.arguments.trim();
    if raw.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let parsed = serde_json::from_str::<Value>(raw).map_err(|error| {
        ToolError::Validation(format!(
            "invalid JSON arguments for tool '{}': {}",
            tool_call.name, error
        ))
    })?;
    Ok(match parsed {
        Value::Null => Value::Object(Map::new()),
        other => other,
    })
}

/// Convert string-encoded scalars to the integer/number/boolean types the
/// schema declares. Values that do not parse are left for validation to
/// reject.
pub fn coerce_tool_arguments(schema: &Value, arguments: Value) -> Value {
    let Value::Object(mut object) = arguments else {
        return arguments;
    };
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Value::Object(object);
    };

    for (key, value) in object.iter_mut() {
        let Some(type_name) = properties
            .get(key)
            .and_then(|property| property.get("type"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        if let Some(coerced) = coerce_value(type_name, value) {
            *value = coerced;
        }
    }
    Value::Object(object)
}

fn coerce_value(type_name: &str, value: &Value) -> Option<Value> {
    match (type_name, value) {
        ("integer", Value::String(text)) => text.trim().parse::<i64>().ok().map(Value::from),
        ("integer", Value::Number(number)) if number.is_f64() => {
            let float = number.as_f64()?;
            (float.fract() == 0.0 && float.abs() < i64::MAX as f64)
                .then(|| Value::from(float as i64))
        }
        ("number", Value::String(text)) => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        ("boolean", Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

pub fn validate_tool_arguments(schema: &Value, arguments: &Value) -> Result<(), ToolError> {
    let object = arguments
        .as_object()
        .ok_or_else(|| ToolError::validation("tool arguments must be a JSON object"))?;

    let schema_object = schema
        .as_object()
        .ok_or_else(|| ToolError::validation("tool schema root must be a JSON object"))?;

    if schema_object
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|schema_type| schema_type != "object")
    {
        return Err(ToolError::validation("tool schema root type must be 'object'"));
    }

    if let Some(required) = schema_object.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(ToolError::Validation(format!(
                    "missing required argument '{key}'"
                )));
            }
        }
    }

    let empty = Map::new();
    let properties = schema_object
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let additional_allowed = schema_object
        .get("additionalProperties")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    for (key, value) in object {
        let Some(property) = properties.get(key) else {
            if additional_allowed {
                continue;
            }
            return Err(ToolError::Validation(format!(
                "unexpected argument '{key}' not allowed by schema"
            )));
        };

        let Some(type_name) = property.get("type").and_then(Value::as_str) else {
            continue;
        };
        let is_valid = match type_name {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            "null" => value.is_null(),
            _ => true,
        };
        if !is_valid {
            return Err(ToolError::Validation(format!(
                "argument '{}' expected type '{}' but received '{}'",
                key,
                type_name,
                json_type_name(value)
            )));
        }
    }

    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
