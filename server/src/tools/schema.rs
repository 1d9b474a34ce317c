//! Input-schema validation for tool arguments.
//!
//! Supports the subset the tool descriptors actually use: an object with
//! typed properties (`string`, `integer`, `boolean`, `array`), `required`,
//! `minimum`/`maximum`, `minLength`/`maxLength`, `enum`, `default`, and a
//! top-level `oneOf` of `required` groups for mutually exclusive selectors.
//! Unknown properties are rejected in strict mode. Defaults are applied
//! before the handler runs, so handlers see fully-populated arguments.

use serde_json::{Map, Value};

use crate::error::ToolError;

/// Validate `arguments` against `schema`, returning the arguments with
/// defaults filled in. All failures are `INVALID_PARAMS`.
pub fn validate(schema: &Value, arguments: &Value, strict: bool) -> Result<Value, ToolError> {
    let args = arguments
        .as_object()
        .ok_or_else(|| ToolError::invalid_params("arguments must be an object"))?;
    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .ok_or_else(|| ToolError::invalid_params("schema has no properties"))?;

    if strict {
        for key in args.keys() {
            if !properties.contains_key(key) {
                return Err(ToolError::invalid_params(format!("unknown property '{key}'")));
            }
        }
    }

    let mut out = Map::new();
    for (name, prop) in properties {
        match args.get(name) {
            Some(value) => {
                check_property(name, prop, value)?;
                out.insert(name.clone(), value.clone());
            }
            None => {
                if let Some(default) = prop.get("default") {
                    out.insert(name.clone(), default.clone());
                }
            }
        }
    }

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for name in required {
            let name = name.as_str().unwrap_or_default();
            if !out.contains_key(name) {
                return Err(ToolError::invalid_params(format!(
                    "missing required property '{name}'"
                )));
            }
        }
    }

    if let Some(one_of) = schema.get("oneOf").and_then(|o| o.as_array()) {
        check_one_of(one_of, args)?;
    }

    Ok(Value::Object(out))
}

/// Exactly one alternative's `required` set may be satisfied by the
/// caller-provided arguments (defaults do not count as "provided").
fn check_one_of(one_of: &[Value], args: &Map<String, Value>) -> Result<(), ToolError> {
    let mut satisfied = 0usize;
    let mut names: Vec<String> = Vec::new();
    for alternative in one_of {
        let required = alternative.get("required").and_then(|r| r.as_array());
        let Some(required) = required else {
            continue;
        };
        let keys: Vec<&str> = required.iter().filter_map(|k| k.as_str()).collect();
        names.push(keys.join("+"));
        if keys.iter().all(|k| args.contains_key(*k)) {
            satisfied += 1;
        }
    }
    match satisfied {
        1 => Ok(()),
        0 => Err(ToolError::invalid_params(format!(
            "exactly one of [{}] is required",
            names.join(", ")
        ))),
        _ => Err(ToolError::invalid_params(format!(
            "properties [{}] are mutually exclusive",
            names.join(", ")
        ))),
    }
}

fn check_property(name: &str, prop: &Value, value: &Value) -> Result<(), ToolError> {
    let expected = prop.get("type").and_then(|t| t.as_str()).unwrap_or("string");
    match expected {
        "string" => {
            let s = value.as_str().ok_or_else(|| type_error(name, "a string"))?;
            let len = s.chars().count();
            if let Some(min) = prop.get("minLength").and_then(|v| v.as_u64()) {
                if (len as u64) < min {
                    return Err(ToolError::invalid_params(format!(
                        "'{name}' must be at least {min} characters"
                    )));
                }
            }
            if let Some(max) = prop.get("maxLength").and_then(|v| v.as_u64()) {
                if (len as u64) > max {
                    return Err(ToolError::invalid_params(format!(
                        "'{name}' must be at most {max} characters"
                    )));
                }
            }
            if let Some(allowed) = prop.get("enum").and_then(|v| v.as_array()) {
                if !allowed.iter().any(|a| a.as_str() == Some(s)) {
                    let options: Vec<&str> =
                        allowed.iter().filter_map(|a| a.as_str()).collect();
                    return Err(ToolError::invalid_params(format!(
                        "'{name}' must be one of [{}]",
                        options.join(", ")
                    )));
                }
            }
        }
        "integer" => {
            if value.is_boolean() || !value.is_i64() && !value.is_u64() {
                return Err(type_error(name, "an integer"));
            }
            let n = value.as_i64().unwrap_or(i64::MAX);
            if let Some(min) = prop.get("minimum").and_then(|v| v.as_i64()) {
                if n < min {
                    return Err(ToolError::invalid_params(format!(
                        "'{name}' must be at least {min}"
                    )));
                }
            }
            if let Some(max) = prop.get("maximum").and_then(|v| v.as_i64()) {
                if n > max {
                    return Err(ToolError::invalid_params(format!(
                        "'{name}' must be at most {max}"
                    )));
                }
            }
        }
        "boolean" => {
            if !value.is_boolean() {
                return Err(type_error(name, "a boolean"));
            }
        }
        "array" => {
            let items = value.as_array().ok_or_else(|| type_error(name, "an array"))?;
            let item_type = prop
                .get("items")
                .and_then(|i| i.get("type"))
                .and_then(|t| t.as_str())
                .unwrap_or("string");
            for item in items {
                let ok = match item_type {
                    "string" => item.is_string(),
                    "integer" => item.is_i64() || item.is_u64(),
                    "boolean" => item.is_boolean(),
                    _ => true,
                };
                if !ok {
                    return Err(ToolError::invalid_params(format!(
                        "'{name}' items must be of type {item_type}"
                    )));
                }
            }
        }
        other => {
            return Err(ToolError::invalid_params(format!(
                "schema type '{other}' for '{name}' is not supported"
            )));
        }
    }
    Ok(())
}

fn type_error(name: &str, expected: &str) -> ToolError {
    ToolError::invalid_params(format!("'{name}' must be {expected}"))
}
