//! Operations on untyped configuration trees.
//!
//! Layers are plain YAML mappings. Merging recurses into nested mappings and
//! replaces everything else, lists included.

use serde_yaml::{Mapping, Value};

use crate::error::{DynaportError, Result};

/// Merges `overlay` into `base`.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                let nested = matches!(
                    (base_map.get(&key), &value),
                    (Some(Value::Mapping(_)), Value::Mapping(_))
                );
                if nested {
                    if let Some(existing) = base_map.get_mut(&key) {
                        deep_merge(existing, value);
                    }
                } else {
                    base_map.insert(key, value);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Looks up a dotted key path such as `port_allocator.port_range`.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(root, |current, segment| current.as_mapping()?.get(segment))
}

/// Sets a dotted key path, creating intermediate mappings as needed.
///
/// Fails when an intermediate segment holds a non-mapping value.
pub fn set_path(root: &mut Value, path: &str, value: Value) -> Result<()> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(DynaportError::invalid_input(format!(
            "Invalid key path '{}'",
            path
        )));
    }
    let Some((last, parents)) = segments.split_last() else {
        return Err(DynaportError::invalid_input("Empty key path"));
    };

    let mut current = root;
    if current.is_null() {
        *current = Value::Mapping(Mapping::new());
    }

    for (depth, segment) in parents.iter().enumerate() {
        let map = current.as_mapping_mut().ok_or_else(|| not_a_mapping(path, &segments, depth))?;
        current = map
            .entry(Value::String((*segment).to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if current.is_null() {
            *current = Value::Mapping(Mapping::new());
        }
    }

    let map = current
        .as_mapping_mut()
        .ok_or_else(|| not_a_mapping(path, &segments, parents.len()))?;
    map.insert(Value::String((*last).to_string()), value);
    Ok(())
}

fn not_a_mapping(path: &str, segments: &[&str], depth: usize) -> DynaportError {
    let prefix = if depth == 0 {
        "<root>".to_string()
    } else {
        segments[..depth].join(".")
    };
    DynaportError::invalid_input(format!(
        "Cannot set '{}': '{}' is not a mapping",
        path, prefix
    ))
}

/// Parses a value typed on the command line.
///
/// With `json` the input must be valid JSON. Otherwise `true`/`false`
/// become booleans, digit strings integers, single-dot decimals floats and
/// anything else stays a string.
pub fn parse_value(raw: &str, json: bool) -> Result<Value> {
    if json {
        let parsed: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
            DynaportError::invalid_input(format!("Invalid JSON value '{}': {}", raw, e))
        })?;
        return Ok(serde_yaml::to_value(parsed)?);
    }

    match raw.to_lowercase().as_str() {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }

    let is_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

    if is_digits(raw) {
        if let Ok(n) = raw.parse::<u64>() {
            return Ok(Value::Number(n.into()));
        }
    }

    if let Some((whole, fraction)) = raw.split_once('.') {
        let digits_only = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if digits_only(whole) && digits_only(fraction) && raw.len() > 1 {
            if let Ok(f) = raw.parse::<f64>() {
                return Ok(Value::Number(f.into()));
            }
        }
    }

    Ok(Value::String(raw.to_string()))
}

/// An empty mapping, the identity for [`deep_merge`].
pub fn empty() -> Value {
    Value::Mapping(Mapping::new())
}
