//! Canonical encoding of flattened items
//!
//! The canonical form is compact JSON with object keys sorted
//! lexicographically at every level. String escaping follows JSON, which is
//! injective, so distinct items never share a canonical string.

use serde_json::{Map, Value};

use crate::error::{HengeError, Result};
use crate::schema::SchemaNode;

/// Encode an item deterministically for hashing
pub fn canonicalize(item: &Value) -> Result<String> {
    let mut out = String::new();
    write_canonical(item, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if n.as_f64().map(|f| !f.is_finite()).unwrap_or(false) {
                return Err(HengeError::Canonicalization(format!("non-finite number {n}")));
            }
            out.push_str(&n.to_string());
        }
        Value::String(s) => out.push_str(&serde_json::to_string(s)?),
        Value::Array(elements) => {
            out.push('[');
            for (i, element) in elements.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(element, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(val, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

/// Inverse of [`canonicalize`]
pub fn decode(payload: &str) -> Result<Value> {
    serde_json::from_str(payload)
        .map_err(|e| HengeError::Canonicalization(format!("undecodable payload: {e}")))
}

/// An item split by identity
#[derive(Debug, Clone, PartialEq)]
pub struct InherentSplit {
    /// The part that is digested
    pub inherent: Value,
    /// Stored next to the digest without affecting it
    pub external: Option<Map<String, Value>>,
}

/// Split `item` into inherent and external properties.
///
/// Only object schemas with a non-empty `inherent` list split anything;
/// every other item is entirely inherent.
pub fn select_inherent(item: &Value, schema: &SchemaNode) -> InherentSplit {
    let inherent_keys = match schema {
        SchemaNode::Object(obj) => obj.inherent.as_deref().filter(|keys| !keys.is_empty()),
        _ => None,
    };

    match (inherent_keys, item.as_object()) {
        (Some(keys), Some(map)) => {
            let mut inherent = Map::new();
            let mut external = map.clone();
            for key in keys {
                if let Some(value) = external.remove(key) {
                    inherent.insert(key.clone(), value);
                }
            }
            InherentSplit {
                inherent: Value::Object(inherent),
                external: Some(external).filter(|m| !m.is_empty()),
            }
        }
        _ => InherentSplit {
            inherent: item.clone(),
            external: None,
        },
    }
}
