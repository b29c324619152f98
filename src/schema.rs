//! Schema node types
//!
//! Schema documents arrive as JSON trees. They are parsed once into
//! [`SchemaNode`], a tagged variant over primitives, objects and arrays that
//! carries the henge annotations (`henge_class`, `recursive`, `inherent`) as
//! typed fields. Any other keywords (`required`, `minimum`, `enum`, ...) are
//! kept verbatim so the validator still sees them.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{HengeError, Result};

/// Keywords that are interpreted rather than passed through
const STRUCTURAL_KEYWORDS: [&str; 6] = [
    "type",
    "properties",
    "items",
    "henge_class",
    "inherent",
    "recursive",
];

/// Type of a leaf value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    String,
    Integer,
    Number,
    Boolean,
    Null,
    /// No `type` keyword, or a union of primitive types
    Any,
}

impl PrimitiveKind {
    /// The JSON Schema type name, if there is a single one
    pub fn type_name(&self) -> Option<&'static str> {
        match self {
            PrimitiveKind::String => Some("string"),
            PrimitiveKind::Integer => Some("integer"),
            PrimitiveKind::Number => Some("number"),
            PrimitiveKind::Boolean => Some("boolean"),
            PrimitiveKind::Null => Some("null"),
            PrimitiveKind::Any => None,
        }
    }

    fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(PrimitiveKind::String),
            "integer" => Some(PrimitiveKind::Integer),
            "number" => Some(PrimitiveKind::Number),
            "boolean" => Some(PrimitiveKind::Boolean),
            "null" => Some(PrimitiveKind::Null),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveSchema {
    pub kind: PrimitiveKind,
    /// When set, values of this primitive are references to (or literals of)
    /// the named stored type
    pub henge_class: Option<String>,
    pub recursive: bool,
    /// The value is a list of references rather than a single one
    pub reference_list: bool,
    pub keywords: Map<String, Value>,
}

impl PrimitiveSchema {
    /// A bare `{"type": "string"}` node standing in for nested structure
    pub fn placeholder(henge_class: Option<String>) -> Self {
        Self {
            kind: PrimitiveKind::String,
            henge_class,
            recursive: false,
            reference_list: false,
            keywords: Map::new(),
        }
    }

    /// A list of `henge_class` digests held inline, standing in for an array
    pub fn reference_list(henge_class: impl Into<String>) -> Self {
        Self {
            reference_list: true,
            ..Self::placeholder(Some(henge_class.into()))
        }
    }

    pub(crate) fn any() -> Self {
        Self {
            kind: PrimitiveKind::Any,
            ..Self::placeholder(None)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    pub properties: BTreeMap<String, SchemaNode>,
    /// Properties whose stored value is the digest of another item
    pub recursive: Vec<String>,
    /// Properties that participate in the digest; `None` means all of them
    pub inherent: Option<Vec<String>>,
    pub henge_class: Option<String>,
    pub keywords: Map<String, Value>,
}

impl ObjectSchema {
    pub fn is_recursive(&self, property: &str) -> bool {
        self.recursive.iter().any(|p| p == property)
    }

    pub(crate) fn mark_recursive(&mut self, property: &str) {
        if !self.is_recursive(property) {
            self.recursive.push(property.to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArraySchema {
    pub items: Box<SchemaNode>,
    pub henge_class: Option<String>,
    pub recursive: bool,
    pub keywords: Map<String, Value>,
}

/// A single schema node
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    Primitive(PrimitiveSchema),
    Object(ObjectSchema),
    Array(ArraySchema),
}

impl SchemaNode {
    /// Parse a JSON schema document
    pub fn from_json(value: &Value) -> Result<Self> {
        let doc = value
            .as_object()
            .ok_or_else(|| HengeError::InvalidSchema(format!("schema must be a mapping, got {value}")))?;

        let henge_class = match doc.get("henge_class") {
            None | Some(Value::Null) => None,
            Some(Value::String(class)) => Some(class.clone()),
            Some(other) => {
                return Err(HengeError::InvalidSchema(format!(
                    "henge_class must be a string, got {other}"
                )))
            }
        };

        let mut keywords: Map<String, Value> = doc
            .iter()
            .filter(|(k, _)| !STRUCTURAL_KEYWORDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let declared = match doc.get("type") {
            Some(Value::String(name)) => Some(name.as_str()),
            Some(Value::Array(_)) => {
                // Type unions are left to the validator
                keywords.insert("type".to_string(), doc["type"].clone());
                None
            }
            Some(other) => {
                return Err(HengeError::InvalidSchema(format!(
                    "type must be a string, got {other}"
                )))
            }
            None if doc.contains_key("properties") => Some("object"),
            None if doc.contains_key("items") => Some("array"),
            None => None,
        };

        match declared {
            Some("object") => {
                let mut properties = BTreeMap::new();
                match doc.get("properties") {
                    None => {}
                    Some(Value::Object(props)) => {
                        for (name, sub) in props {
                            let node = Self::from_json(sub).map_err(|e| {
                                HengeError::InvalidSchema(format!("property '{name}': {e}"))
                            })?;
                            properties.insert(name.clone(), node);
                        }
                    }
                    Some(other) => {
                        return Err(HengeError::InvalidSchema(format!(
                            "properties must be a mapping, got {other}"
                        )))
                    }
                }
                Ok(SchemaNode::Object(ObjectSchema {
                    properties,
                    recursive: string_list(doc.get("recursive"), "recursive")?.unwrap_or_default(),
                    inherent: string_list(doc.get("inherent"), "inherent")?,
                    henge_class,
                    keywords,
                }))
            }
            Some("array") => {
                let items = match doc.get("items") {
                    Some(sub) => Self::from_json(sub)?,
                    None => SchemaNode::Primitive(PrimitiveSchema::any()),
                };
                Ok(SchemaNode::Array(ArraySchema {
                    items: Box::new(items),
                    henge_class,
                    recursive: truthy(doc.get("recursive")),
                    keywords,
                }))
            }
            Some(name) => {
                let kind = PrimitiveKind::from_type_name(name)
                    .ok_or_else(|| HengeError::InvalidSchema(format!("unknown type '{name}'")))?;
                Ok(SchemaNode::Primitive(PrimitiveSchema {
                    kind,
                    henge_class,
                    recursive: truthy(doc.get("recursive")),
                    reference_list: false,
                    keywords,
                }))
            }
            None => Ok(SchemaNode::Primitive(PrimitiveSchema {
                kind: PrimitiveKind::Any,
                henge_class,
                recursive: truthy(doc.get("recursive")),
                reference_list: false,
                keywords,
            })),
        }
    }

    /// Render back to a JSON schema document
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        match self {
            SchemaNode::Primitive(p) => {
                out.extend(p.keywords.clone());
                match p.kind.type_name() {
                    Some(name) if p.reference_list => {
                        out.insert("type".into(), Value::from("array"));
                        let mut items = Map::new();
                        items.insert("type".into(), Value::from(name));
                        out.insert("items".into(), Value::Object(items));
                    }
                    Some(name) => {
                        out.insert("type".into(), Value::from(name));
                    }
                    None => {}
                }
                if let Some(class) = &p.henge_class {
                    out.insert("henge_class".into(), Value::from(class.as_str()));
                }
                if p.recursive {
                    out.insert("recursive".into(), Value::Bool(true));
                }
            }
            SchemaNode::Object(o) => {
                out.extend(o.keywords.clone());
                out.insert("type".into(), Value::from("object"));
                let props: Map<String, Value> = o
                    .properties
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                out.insert("properties".into(), Value::Object(props));
                if let Some(class) = &o.henge_class {
                    out.insert("henge_class".into(), Value::from(class.as_str()));
                }
                if !o.recursive.is_empty() {
                    out.insert("recursive".into(), Value::from(o.recursive.clone()));
                }
                if let Some(inherent) = &o.inherent {
                    out.insert("inherent".into(), Value::from(inherent.clone()));
                }
            }
            SchemaNode::Array(a) => {
                out.extend(a.keywords.clone());
                out.insert("type".into(), Value::from("array"));
                out.insert("items".into(), a.items.to_json());
                if let Some(class) = &a.henge_class {
                    out.insert("henge_class".into(), Value::from(class.as_str()));
                }
                if a.recursive {
                    out.insert("recursive".into(), Value::Bool(true));
                }
            }
        }
        Value::Object(out)
    }

    pub fn henge_class(&self) -> Option<&str> {
        match self {
            SchemaNode::Primitive(p) => p.henge_class.as_deref(),
            SchemaNode::Object(o) => o.henge_class.as_deref(),
            SchemaNode::Array(a) => a.henge_class.as_deref(),
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, SchemaNode::Primitive(_))
    }

    /// Whether this is a placeholder for an inline list of references
    pub fn is_reference_list(&self) -> bool {
        matches!(self, SchemaNode::Primitive(p) if p.reference_list)
    }

    /// Whether any object or array sits directly inside this node
    pub fn is_single_level(&self) -> bool {
        match self {
            SchemaNode::Primitive(_) => true,
            SchemaNode::Object(o) => o.properties.values().all(SchemaNode::is_primitive),
            SchemaNode::Array(a) => a.items.is_primitive(),
        }
    }

    /// Item types this node points at through its placeholders
    pub fn referenced_classes(&self) -> Vec<&str> {
        match self {
            SchemaNode::Primitive(_) => Vec::new(),
            SchemaNode::Object(o) => o
                .properties
                .values()
                .filter_map(SchemaNode::henge_class)
                .collect(),
            SchemaNode::Array(a) => a.items.henge_class().into_iter().collect(),
        }
    }
}

fn string_list(value: Option<&Value>, keyword: &str) -> Result<Option<Vec<String>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(entries)) => entries
            .iter()
            .map(|e| {
                e.as_str().map(str::to_string).ok_or_else(|| {
                    HengeError::InvalidSchema(format!("{keyword} entries must be strings, got {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
        Some(other) => Err(HengeError::InvalidSchema(format!(
            "{keyword} must be a list, got {other}"
        ))),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Array(a)) => !a.is_empty(),
        Some(_) => true,
    }
}
