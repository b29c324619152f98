//! Schema and federation registries
//!
//! [`SchemaRegistry`] maps item types to their compiled, single-level
//! schemas. [`FederationRegistry`] maps item types to the store that owns
//! their records: the local store, or a peer henge's store held through a
//! non-owning handle.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

use serde_json::{Map, Value};

use crate::compiler::{self, Registrations};
use crate::error::{HengeError, Result};
use crate::schema::SchemaNode;
use crate::store::{KeyValueStore, StoreError};

/// Immutable registry of compiled schemas
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaRegistry {
    schemas: Registrations,
}

impl SchemaRegistry {
    /// Compile schema documents, optionally named, into a registry
    pub fn compile<'a, I>(documents: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Option<&'a str>, &'a Value)>,
    {
        let parsed = documents
            .into_iter()
            .map(|(name, doc)| SchemaNode::from_json(doc).map(|node| (name, node)))
            .collect::<Result<Vec<_>>>()?;
        let schemas = compiler::compile(parsed.iter().map(|(name, node)| (*name, node)))?;
        Ok(Self { schemas })
    }

    pub fn get(&self, item_type: &str) -> Option<&SchemaNode> {
        self.schemas.get(item_type)
    }

    /// Look up a type, failing with the list of known types
    pub fn require(&self, item_type: &str) -> Result<&SchemaNode> {
        self.get(item_type).ok_or_else(|| HengeError::UnknownItemType {
            item_type: item_type.to_string(),
            known: self.item_types(),
        })
    }

    pub fn contains(&self, item_type: &str) -> bool {
        self.schemas.contains_key(item_type)
    }

    /// All item types, sorted
    pub fn item_types(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SchemaNode)> {
        self.schemas.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Return a registry holding this one's entries plus `other`'s.
    /// Entries from `other` win on conflict.
    pub fn merge(mut self, other: Registrations) -> Self {
        self.schemas.extend(other);
        self
    }

    /// `item_type` and every type reachable from it through placeholders
    pub fn closure(&self, item_type: &str) -> Registrations {
        let mut out = Registrations::new();
        let mut pending = vec![item_type.to_string()];
        while let Some(next) = pending.pop() {
            if out.contains_key(&next) {
                continue;
            }
            if let Some(node) = self.get(&next) {
                pending.extend(node.referenced_classes().into_iter().map(str::to_string));
                out.insert(next, node.clone());
            }
        }
        out
    }

    /// The whole registry as a JSON mapping
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .schemas
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Value::Object(map)
    }
}

/// Where records of an item type live
#[derive(Debug, Clone)]
pub enum StoreBinding {
    Local,
    Peer(Weak<dyn KeyValueStore>),
}

/// Maps item types to their owning store
#[derive(Debug, Clone, Default)]
pub struct FederationRegistry {
    bindings: BTreeMap<String, StoreBinding>,
}

impl FederationRegistry {
    /// Bind every type of `schemas` to the local store
    pub fn local(schemas: &SchemaRegistry) -> Self {
        let bindings = schemas
            .item_types()
            .into_iter()
            .map(|t| (t, StoreBinding::Local))
            .collect();
        Self { bindings }
    }

    /// Return a registry with `types` bound to a peer store
    pub fn with_peer<I>(mut self, types: I, peer: &Arc<dyn KeyValueStore>) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        for item_type in types {
            self.bindings
                .insert(item_type, StoreBinding::Peer(Arc::downgrade(peer)));
        }
        self
    }

    pub fn binding(&self, item_type: &str) -> Option<&StoreBinding> {
        self.bindings.get(item_type)
    }

    pub fn is_peer(&self, item_type: &str) -> bool {
        matches!(self.binding(item_type), Some(StoreBinding::Peer(_)))
    }

    /// Resolve the owning store for `item_type`
    pub fn resolve(
        &self,
        item_type: &str,
        local: &Arc<dyn KeyValueStore>,
    ) -> Result<Arc<dyn KeyValueStore>> {
        match self.bindings.get(item_type) {
            None | Some(StoreBinding::Local) => Ok(Arc::clone(local)),
            Some(StoreBinding::Peer(peer)) => peer.upgrade().ok_or_else(|| {
                HengeError::BackendFailure(StoreError::Unavailable(format!(
                    "peer store for '{item_type}' has been dropped"
                )))
            }),
        }
    }

    /// Types owned by peers
    pub fn peer_types(&self) -> BTreeSet<&str> {
        self.bindings
            .iter()
            .filter(|(_, b)| matches!(b, StoreBinding::Peer(_)))
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn family_doc() -> Value {
        json!({
            "type": "object",
            "henge_class": "family",
            "properties": {
                "parents": {
                    "type": "array",
                    "henge_class": "people",
                    "items": {
                        "type": "object",
                        "henge_class": "person",
                        "properties": { "name": { "type": "string" } }
                    }
                }
            }
        })
    }

    #[test]
    fn test_compile_and_lookup() {
        let doc = family_doc();
        let registry = SchemaRegistry::compile([(None, &doc)]).unwrap();
        assert_eq!(registry.item_types(), vec!["array", "family", "people", "person"]);
        assert!(registry.require("family").is_ok());

        match registry.require("nope") {
            Err(HengeError::UnknownItemType { item_type, known }) => {
                assert_eq!(item_type, "nope");
                assert_eq!(known.len(), 4);
            }
            other => panic!("expected UnknownItemType, got {other:?}"),
        }
    }

    #[test]
    fn test_closure_follows_placeholders() {
        let doc = family_doc();
        let registry = SchemaRegistry::compile([(None, &doc)]).unwrap();
        let closure = registry.closure("family");
        let names: Vec<_> = closure.keys().map(String::as_str).collect();
        // people is registered but family references person directly
        assert_eq!(names, vec!["family", "person"]);
        assert_eq!(registry.closure("person").len(), 1);
        assert!(registry.closure("missing").is_empty());
    }

    #[test]
    fn test_merge_returns_new_registry() {
        let doc = json!({ "type": "string", "henge_class": "label" });
        let base = SchemaRegistry::compile([(None, &doc)]).unwrap();
        let other = SchemaRegistry::compile([(None, &family_doc())]).unwrap();
        let merged = base.clone().merge(other.closure("person"));
        assert!(!base.contains("person"));
        assert!(merged.contains("person"));
        assert!(merged.contains("label"));
    }

    #[test]
    fn test_dropped_peer_is_a_backend_failure() {
        let doc = family_doc();
        let registry = SchemaRegistry::compile([(None, &doc)]).unwrap();
        let local: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let peer: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        let federation =
            FederationRegistry::local(&registry).with_peer(["person".to_string()], &peer);
        assert!(federation.is_peer("person"));
        assert!(!federation.is_peer("family"));
        assert!(federation.resolve("person", &local).is_ok());

        drop(peer);
        assert!(matches!(
            federation.resolve("person", &local),
            Err(HengeError::BackendFailure(_))
        ));
    }
}
