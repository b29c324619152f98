//! Validation of flattened items against compiled schemas

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::SchemaNode;

/// The first constraint an item failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// JSON pointer into the item
    pub path: String,
    pub constraint: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.constraint)
        } else {
            write!(f, "{} (at {})", self.constraint, self.path)
        }
    }
}

/// Accepts or rejects an item for a schema
pub trait Validator: Send + Sync {
    fn validate(
        &self,
        item_type: &str,
        schema: &SchemaNode,
        item: &Value,
    ) -> Result<(), Violation>;
}

/// JSON Schema (draft 7) validation, compiled once per item type
#[derive(Default)]
pub struct JsonSchemaValidator {
    compiled: RwLock<HashMap<String, Arc<JSONSchema>>>,
}

impl JsonSchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn compiled(&self, item_type: &str, schema: &SchemaNode) -> Result<Arc<JSONSchema>, Violation> {
        if let Ok(cache) = self.compiled.read() {
            if let Some(hit) = cache.get(item_type) {
                return Ok(Arc::clone(hit));
            }
        }

        let document = schema.to_json();
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&document)
            .map_err(|e| Violation {
                path: String::new(),
                constraint: format!("schema for '{item_type}' does not compile: {e}"),
            })?;
        let compiled = Arc::new(compiled);

        if let Ok(mut cache) = self.compiled.write() {
            cache.insert(item_type.to_string(), Arc::clone(&compiled));
        }
        Ok(compiled)
    }
}

impl Validator for JsonSchemaValidator {
    fn validate(
        &self,
        item_type: &str,
        schema: &SchemaNode,
        item: &Value,
    ) -> Result<(), Violation> {
        let compiled = self.compiled(item_type, schema)?;
        let result = compiled.validate(item);
        if let Err(mut errors) = result {
            if let Some(first) = errors.next() {
                return Err(Violation {
                    path: first.instance_path.to_string(),
                    constraint: first.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for JsonSchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self.compiled.read().map(|c| c.len()).unwrap_or(0);
        f.debug_struct("JsonSchemaValidator")
            .field("cached_schemas", &cached)
            .finish()
    }
}
