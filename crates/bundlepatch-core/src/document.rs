//! Field tree to JSON document serializer.
//!
//! Converts a [`FieldNode`] tree into a [`serde_json::Value`]. The mapping
//! carries a few shape heuristics that exported documents depend on:
//!
//! - byte arrays become arrays of unsigned byte numbers
//! - an anonymous `Array` child stands in for its parent
//! - sibling `m_keys` / `m_values` arrays are zipped into one object
//! - at the root, engine bookkeeping fields are dropped and a lone
//!   `references` child replaces the root
//!
//! The serializer performs no I/O and is deterministic: the same tree always
//! yields the same document.

use serde_json::{Map, Number, Value};

use crate::error::SerializeError;
use crate::field::{ArrayItems, FieldKind, FieldNode, ManagedReferenceRegistry, ScalarValue};

/// Root fields that never appear in an exported document.
pub const EXCLUDED_ROOT_FIELDS: &[&str] = &["m_GameObject", "m_Enabled", "m_Script", "m_Name"];

/// Literal emitted for scalar kinds with no document mapping.
pub const INVALID_VALUE: &str = "invalid value";

const REFERENCES_FIELD: &str = "references";
const KEYS_FIELD: &str = "m_keys";
const VALUES_FIELD: &str = "m_values";
const ARRAY_FIELD: &str = "Array";

/// Serialize a field tree into a document.
///
/// `is_root` enables the root-only rules (excluded fields and the
/// `references` collapse). Recursion always proceeds with `is_root = false`.
pub fn serialize(node: &FieldNode, is_root: bool) -> Result<Value, SerializeError> {
    match &node.kind {
        FieldKind::Array { items } => serialize_array(items),
        FieldKind::Object { children } => serialize_object(children, is_root),
        FieldKind::Scalar { value } => serialize_scalar(value),
    }
}

fn serialize_array(items: &ArrayItems) -> Result<Value, SerializeError> {
    match items {
        ArrayItems::Bytes(bytes) => Ok(Value::Array(
            bytes.iter().map(|b| Value::from(*b)).collect(),
        )),
        ArrayItems::Elements(elements) => elements
            .iter()
            .map(|e| serialize(e, false))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
    }
}

fn serialize_object(children: &[FieldNode], is_root: bool) -> Result<Value, SerializeError> {
    let collapse_references = is_root && {
        let mut relevant = children
            .iter()
            .filter(|c| !EXCLUDED_ROOT_FIELDS.contains(&c.name.as_str()));
        matches!(
            (relevant.next(), relevant.next()),
            (Some(only), None) if only.name == REFERENCES_FIELD
        )
    };

    let mut fields = Map::new();
    let mut keys: Vec<Value> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    for child in children {
        if is_root {
            if EXCLUDED_ROOT_FIELDS.contains(&child.name.as_str()) {
                continue;
            }
            if collapse_references && child.name == REFERENCES_FIELD {
                return serialize(child, false);
            }
        }

        match child.name.as_str() {
            KEYS_FIELD => {
                for element in nested_elements(child) {
                    keys.push(element?);
                }
            }
            VALUES_FIELD => {
                for element in nested_elements(child) {
                    values.push(element?);
                }
            }
            ARRAY_FIELD => return serialize(child, false),
            _ => {
                fields.insert(child.name.clone(), serialize(child, false)?);
            }
        }
    }

    if !keys.is_empty() {
        let mut values = values.into_iter();
        let mut dict = Map::new();
        for key in keys {
            dict.insert(document_key(&key), values.next().unwrap_or(Value::Null));
        }
        return Ok(Value::Object(dict));
    }

    Ok(Value::Object(fields))
}

/// Serialized elements of a `m_keys` / `m_values` field.
///
/// The elements live under the field's `Array` child; a field that is
/// itself an array is read directly.
fn nested_elements(field: &FieldNode) -> Vec<Result<Value, SerializeError>> {
    let array = if field.is_array() {
        Some(field)
    } else {
        field.child(ARRAY_FIELD)
    };

    match array.map(|a| &a.kind) {
        Some(FieldKind::Array {
            items: ArrayItems::Bytes(bytes),
        }) => bytes.iter().map(|b| Ok(Value::from(*b))).collect(),
        Some(FieldKind::Array {
            items: ArrayItems::Elements(elements),
        }) => elements.iter().map(|e| serialize(e, false)).collect(),
        _ => Vec::new(),
    }
}

/// String form of a document value used as a dictionary key.
pub fn document_key(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn serialize_scalar(value: &ScalarValue) -> Result<Value, SerializeError> {
    let doc = match value {
        ScalarValue::Bool(v) => Value::from(*v),
        ScalarValue::Int8(v) => Value::from(i32::from(*v)),
        ScalarValue::Int16(v) => Value::from(i32::from(*v)),
        ScalarValue::Int32(v) => Value::from(*v),
        ScalarValue::Int64(v) => Value::from(*v),
        ScalarValue::UInt8(v) => Value::from(u32::from(*v)),
        ScalarValue::UInt16(v) => Value::from(u32::from(*v)),
        ScalarValue::UInt32(v) => Value::from(*v),
        ScalarValue::UInt64(v) => Value::from(*v),
        ScalarValue::Float(v) => single_precision(*v),
        ScalarValue::Double(v) => Value::from(*v),
        ScalarValue::String(v) => Value::from(v.as_str()),
        ScalarValue::ManagedReferences(registry) => return serialize_registry(registry),
        ScalarValue::Blob(_) => Value::from(INVALID_VALUE),
    };
    Ok(doc)
}

/// Number from the shortest decimal form of an `f32`, so `0.1` stays `0.1`
/// instead of its widened `f64` expansion. Non-finite values become `null`.
fn single_precision(v: f32) -> Value {
    v.to_string()
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

fn serialize_registry(registry: &ManagedReferenceRegistry) -> Result<Value, SerializeError> {
    if !matches!(registry.version, 1 | 2) {
        return Err(SerializeError::UnsupportedRegistryVersion {
            version: registry.version,
        });
    }

    let mut out = Vec::with_capacity(registry.references.len());
    for reference in &registry.references {
        let mut data = Map::new();
        for child in reference.data.children() {
            data.insert(child.name.clone(), serialize(child, false)?);
        }
        out.push(Value::Object(data));
    }
    Ok(Value::Array(out))
}
