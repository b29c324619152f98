//! Schema compiler
//!
//! Splits hierarchical schemas into single-level schemas, one per
//! `henge_class`. Nested objects and arrays are replaced by string
//! placeholders that carry the nested type's class, and the property is
//! listed under `recursive` so the insert and retrieve pipelines know to
//! follow it. An array property whose items have a class keeps the element
//! digests inline as a list.

use std::collections::BTreeMap;

use serde_json::Map;

use crate::error::{HengeError, Result};
use crate::schema::{ArraySchema, ObjectSchema, PrimitiveSchema, SchemaNode};

/// Class used for array properties whose array node has no `henge_class`
pub const ARRAY_CLASS: &str = "array";

/// Maximum schema nesting accepted by the compiler
pub const MAX_SCHEMA_DEPTH: usize = 64;

/// Compiled schemas keyed by `henge_class`
pub type Registrations = BTreeMap<String, SchemaNode>;

/// The schema registered under [`ARRAY_CLASS`]: an array of anything
pub fn fallback_array_schema() -> SchemaNode {
    SchemaNode::Array(ArraySchema {
        items: Box::new(SchemaNode::Primitive(PrimitiveSchema::any())),
        henge_class: Some(ARRAY_CLASS.to_string()),
        recursive: false,
        keywords: Map::new(),
    })
}

/// Split one schema tree into its flat registrations.
///
/// `name` registers the top-level node under an explicit type name when it
/// carries no `henge_class` of its own.
pub fn split_schema(schema: &SchemaNode, name: Option<&str>) -> Result<Registrations> {
    let mut found = Registrations::new();
    split_into(schema, name, 0, &mut found)?;
    Ok(found)
}

fn split_into(
    schema: &SchemaNode,
    name: Option<&str>,
    depth: usize,
    found: &mut Registrations,
) -> Result<()> {
    if depth > MAX_SCHEMA_DEPTH {
        return Err(HengeError::InvalidSchema(format!(
            "schema nesting exceeds {MAX_SCHEMA_DEPTH} levels"
        )));
    }

    match schema {
        SchemaNode::Primitive(p) => {
            if let Some(class) = name.or(p.henge_class.as_deref()) {
                tracing::debug!(class, "registering primitive");
                found.insert(class.to_string(), schema.clone());
            }
        }
        SchemaNode::Object(obj) => {
            if let Some(class) = obj.henge_class.as_deref().or(name) {
                tracing::debug!(class, "registering object");
                found.insert(class.to_string(), SchemaNode::Object(flatten_object(obj, class)));
            }
            for sub in obj.properties.values() {
                split_into(sub, None, depth + 1, found)?;
            }
        }
        SchemaNode::Array(arr) => {
            if let Some(class) = arr.henge_class.as_deref().or(name) {
                tracing::debug!(class, "registering array");
                found.insert(class.to_string(), SchemaNode::Array(flatten_array(arr, class)));
            }
            split_into(&arr.items, None, depth + 1, found)?;
        }
    }
    Ok(())
}

fn flatten_object(obj: &ObjectSchema, class: &str) -> ObjectSchema {
    let mut flat = obj.clone();
    flat.henge_class = Some(class.to_string());

    for (prop, sub) in &obj.properties {
        match sub {
            SchemaNode::Object(nested) => {
                let placeholder = PrimitiveSchema::placeholder(nested.henge_class.clone());
                if nested.henge_class.is_some() {
                    flat.mark_recursive(prop);
                }
                flat.properties
                    .insert(prop.clone(), SchemaNode::Primitive(placeholder));
            }
            SchemaNode::Array(nested) => {
                // elements of a classed item type are referenced inline,
                // anything else goes through the fallback array type
                let placeholder = match nested.items.henge_class() {
                    Some(item_class) => PrimitiveSchema::reference_list(item_class),
                    None => PrimitiveSchema::placeholder(Some(ARRAY_CLASS.to_string())),
                };
                flat.properties
                    .insert(prop.clone(), SchemaNode::Primitive(placeholder));
                flat.mark_recursive(prop);
            }
            SchemaNode::Primitive(_) => {}
        }
    }
    flat
}

fn flatten_array(arr: &ArraySchema, class: &str) -> ArraySchema {
    let mut flat = arr.clone();
    flat.henge_class = Some(class.to_string());

    let keep_items = matches!(
        arr.items.as_ref(),
        SchemaNode::Primitive(p) if p.henge_class.is_none()
    );
    if !keep_items {
        let mut placeholder = PrimitiveSchema::placeholder(arr.items.henge_class().map(str::to_string));
        placeholder.recursive = arr.recursive;
        flat.items = Box::new(SchemaNode::Primitive(placeholder));
    }
    flat
}

/// Compile a set of schema trees into flat registrations.
///
/// Later trees overwrite earlier registrations of the same class. The
/// [`ARRAY_CLASS`] fallback is registered first so a caller-supplied
/// `array` type replaces it.
pub fn compile<'a, I>(schemas: I) -> Result<Registrations>
where
    I: IntoIterator<Item = (Option<&'a str>, &'a SchemaNode)>,
{
    let mut registrations = Registrations::new();
    registrations.insert(ARRAY_CLASS.to_string(), fallback_array_schema());
    for (name, schema) in schemas {
        registrations.extend(split_schema(schema, name)?);
    }
    Ok(registrations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PrimitiveKind;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> SchemaNode {
        SchemaNode::from_json(&value).unwrap()
    }

    fn person() -> serde_json::Value {
        json!({
            "type": "object",
            "henge_class": "person",
            "properties": {
                "name": { "type": "string" },
                "age": { "type": "integer" }
            }
        })
    }

    fn family() -> SchemaNode {
        parse(json!({
            "type": "object",
            "henge_class": "family",
            "properties": {
                "domicile": { "type": "string" },
                "parents": { "type": "array", "henge_class": "people", "items": person() },
                "children": { "type": "array", "henge_class": "people", "items": person() }
            }
        }))
    }

    #[test]
    fn test_family_splits_into_three_types() {
        let found = split_schema(&family(), None).unwrap();
        let names: Vec<_> = found.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["family", "people", "person"]);
        assert!(found.values().all(SchemaNode::is_single_level));

        let SchemaNode::Object(fam) = &found["family"] else {
            panic!("family should stay an object");
        };
        assert_eq!(fam.recursive, vec!["children", "parents"]);
        assert_eq!(fam.properties["parents"].henge_class(), Some("person"));
        assert!(fam.properties["parents"].is_reference_list());
        assert_eq!(fam.properties["domicile"].henge_class(), None);

        let SchemaNode::Array(people) = &found["people"] else {
            panic!("people should stay an array");
        };
        assert_eq!(people.items.henge_class(), Some("person"));
        assert!(people.items.is_primitive());
    }

    #[test]
    fn test_array_property_references_item_class() {
        let schema = parse(json!({
            "type": "object",
            "henge_class": "family",
            "properties": {
                "parents": { "type": "array", "items": person() }
            }
        }));
        let found = split_schema(&schema, None).unwrap();
        let names: Vec<_> = found.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["family", "person"]);

        let SchemaNode::Object(fam) = &found["family"] else {
            panic!("expected object");
        };
        assert_eq!(fam.recursive, vec!["parents"]);
        assert_eq!(fam.properties["parents"].henge_class(), Some("person"));
        assert_eq!(
            found["family"].to_json()["properties"]["parents"],
            json!({ "type": "array", "items": { "type": "string" }, "henge_class": "person" })
        );
    }

    #[test]
    fn test_compile_adds_fallback_array() {
        let schema = family();
        let registry = compile([(None, &schema)]).unwrap();
        assert_eq!(registry.len(), 4);
        assert!(registry.contains_key(ARRAY_CLASS));
    }

    #[test]
    fn test_integer_array_is_not_decomposed() {
        let schema = parse(json!({
            "type": "array",
            "henge_class": "counts",
            "items": { "type": "integer" }
        }));
        let found = split_schema(&schema, None).unwrap();
        assert_eq!(found.len(), 1);

        let SchemaNode::Array(counts) = &found["counts"] else {
            panic!("expected array");
        };
        let SchemaNode::Primitive(items) = counts.items.as_ref() else {
            panic!("expected primitive items");
        };
        assert_eq!(items.kind, PrimitiveKind::Integer);
        assert!(items.henge_class.is_none());
    }

    #[test]
    fn test_anonymous_array_registers_only_its_elements() {
        let schema = parse(json!({ "type": "array", "items": person() }));
        let found = split_schema(&schema, None).unwrap();
        let names: Vec<_> = found.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["person"]);
    }

    #[test]
    fn test_untyped_array_property_uses_fallback_class() {
        let schema = parse(json!({
            "type": "object",
            "henge_class": "bag",
            "properties": {
                "tags": { "type": "array", "items": { "type": "string" } }
            }
        }));
        let found = split_schema(&schema, None).unwrap();
        let SchemaNode::Object(bag) = &found["bag"] else {
            panic!("expected object");
        };
        assert_eq!(bag.recursive, vec!["tags"]);
        assert_eq!(bag.properties["tags"].henge_class(), Some(ARRAY_CLASS));
        assert!(!bag.properties["tags"].is_reference_list());
    }

    #[test]
    fn test_discovers_types_behind_anonymous_levels() {
        let schema = parse(json!({
            "type": "object",
            "henge_class": "outer",
            "properties": {
                "wrapper": {
                    "type": "object",
                    "properties": {
                        "inner": {
                            "type": "object",
                            "henge_class": "inner",
                            "properties": { "v": { "type": "string" } }
                        }
                    }
                }
            }
        }));
        let found = split_schema(&schema, None).unwrap();
        assert!(found.contains_key("outer"));
        assert!(found.contains_key("inner"));
        assert_eq!(found.len(), 2);

        // the anonymous middle level is inlined as a plain string
        let SchemaNode::Object(outer) = &found["outer"] else {
            panic!("expected object");
        };
        assert!(outer.recursive.is_empty());
    }

    #[test]
    fn test_named_primitive() {
        let schema = parse(json!({ "type": "string" }));
        let found = split_schema(&schema, Some("mystring")).unwrap();
        assert_eq!(found.len(), 1);
        assert!(split_schema(&schema, None).unwrap().is_empty());
    }

    #[test]
    fn test_last_compiled_wins() {
        let first = parse(json!({ "type": "string", "henge_class": "label" }));
        let second = parse(json!({ "type": "integer", "henge_class": "label" }));
        let registry = compile([(None, &first), (None, &second)]).unwrap();
        let SchemaNode::Primitive(label) = &registry["label"] else {
            panic!("expected primitive");
        };
        assert_eq!(label.kind, PrimitiveKind::Integer);
    }

    #[test]
    fn test_depth_guard() {
        let mut doc = json!({ "type": "string" });
        for _ in 0..(MAX_SCHEMA_DEPTH + 2) {
            doc = json!({ "type": "array", "items": doc });
        }
        assert!(split_schema(&parse(doc), None).is_err());
    }
}
