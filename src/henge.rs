//! Recursive insert and retrieve
//!
//! A [`Henge`] owns a compiled [`SchemaRegistry`], a local key-value store,
//! and a [`FederationRegistry`] naming which store owns each item type.
//! Inserting walks an item against its compiled schema, inserts nested
//! values under their own types, and stores the flattened record under the
//! digest of its canonical inherent part. Retrieving reverses the walk,
//! expanding references until the recursion limit runs out.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::canonical::{canonicalize, decode, select_inherent};
use crate::checksum::{DigestFunction, Druid, Sha256Digest};
use crate::compiler::ARRAY_CLASS;
use crate::config::HengeConfig;
use crate::error::{HengeError, Result};
use crate::loader;
use crate::registry::{FederationRegistry, SchemaRegistry};
use crate::schema::SchemaNode;
use crate::store::{KeyValueStore, Record, StoreAdapter, NULL_MARKER};
use crate::validation::{JsonSchemaValidator, Validator};

/// Default bound on nested insert/retrieve calls
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// How many levels of references to follow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecLimit {
    #[default]
    Unlimited,
    Levels(usize),
}

impl RecLimit {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RecLimit::Levels(0))
    }

    /// The limit handed to a nested call
    pub fn step(&self) -> Self {
        match self {
            RecLimit::Unlimited => RecLimit::Unlimited,
            RecLimit::Levels(n) => RecLimit::Levels(n.saturating_sub(1)),
        }
    }
}

impl From<usize> for RecLimit {
    fn from(levels: usize) -> Self {
        RecLimit::Levels(levels)
    }
}

impl From<Option<usize>> for RecLimit {
    fn from(levels: Option<usize>) -> Self {
        levels.map_or(RecLimit::Unlimited, RecLimit::Levels)
    }
}

/// A record computed during insert, written once the whole item is flat
struct PendingWrite {
    druid: Druid,
    record: Record,
}

/// Content-addressed store of schema-typed items
pub struct Henge {
    store: Arc<dyn KeyValueStore>,
    schemas: SchemaRegistry,
    federation: FederationRegistry,
    digester: Box<dyn DigestFunction>,
    validator: Box<dyn Validator>,
    max_depth: usize,
}

impl Henge {
    pub fn builder(store: Arc<dyn KeyValueStore>) -> HengeBuilder {
        HengeBuilder::new(store)
    }

    /// Build from configuration, loading the configured schema files
    pub fn from_config(config: &HengeConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let documents = loader::load_schema_documents(&config.schemas.paths)?;
        Self::builder(store)
            .schemas(documents.into_iter().map(|(_, doc)| doc))
            .digest_boxed(config.digest.algorithm.digest_function())
            .max_depth(config.limits.max_depth)
            .build()
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn federation(&self) -> &FederationRegistry {
        &self.federation
    }

    /// Item types handled by this henge, sorted
    pub fn item_types(&self) -> Vec<String> {
        self.schemas.item_types()
    }

    pub fn schema(&self, item_type: &str) -> Option<&SchemaNode> {
        self.schemas.get(item_type)
    }

    pub fn digest_version(&self) -> &str {
        self.digester.version()
    }

    /// Every item type whose schema accepts `item` as-is
    pub fn select_item_types(&self, item: &Value) -> Vec<String> {
        self.schemas
            .iter()
            .filter(|(name, schema)| self.validator.validate(name, schema, item).is_ok())
            .map(|(name, _)| name.to_string())
            .collect()
    }

    // ------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------

    /// Insert `item` as `item_type` and return its digest.
    ///
    /// Nothing is written unless every nested item validates.
    pub fn insert(
        &self,
        item: &Value,
        item_type: &str,
        reclimit: impl Into<RecLimit>,
    ) -> Result<Druid> {
        let mut pending = Vec::new();
        let druid = self.flatten(item, item_type, reclimit.into(), 0, &mut pending)?;

        for write in &pending {
            self.write_record(&write.druid, &write.record)?;
        }
        debug!(druid = %druid, item_type, records = pending.len(), "inserted");
        Ok(druid)
    }

    /// Check `item` against `item_type` the way [`Henge::insert`] would,
    /// nested items included. Nothing is written.
    pub fn validate(&self, item: &Value, item_type: &str) -> Result<()> {
        let mut pending = Vec::new();
        self.flatten(item, item_type, RecLimit::Unlimited, 0, &mut pending)?;
        debug!(item_type, records = pending.len(), "validated");
        Ok(())
    }

    fn flatten(
        &self,
        item: &Value,
        item_type: &str,
        reclimit: RecLimit,
        depth: usize,
        pending: &mut Vec<PendingWrite>,
    ) -> Result<Druid> {
        if depth > self.max_depth {
            return Err(HengeError::RecursionLimit { depth });
        }
        let schema = self.schemas.require(item_type)?;

        if depth > 0 && reclimit.is_exhausted() {
            debug!(item_type, depth, "recursion limit reached, storing verbatim");
            return self.stage(item.clone(), item_type, schema, pending);
        }

        let flat = match schema {
            SchemaNode::Object(obj) => match item.as_object() {
                Some(map) => {
                    let mut flat = serde_json::Map::new();
                    for (prop, value) in map {
                        let Some(prop_schema) = obj.properties.get(prop) else {
                            debug!(item_type, prop = prop.as_str(), "dropping undeclared property");
                            continue;
                        };
                        let stored = if obj.is_recursive(prop) {
                            if is_empty_reference(value) {
                                value.clone()
                            } else {
                                let target = prop_schema.henge_class().ok_or_else(|| {
                                    HengeError::InvalidSchema(format!(
                                        "recursive property '{prop}' of '{item_type}' has no henge_class"
                                    ))
                                })?;
                                match value {
                                    Value::Array(elements) if prop_schema.is_reference_list() => {
                                        self.flatten_all(elements, target, reclimit, depth, pending)?
                                    }
                                    _ => self
                                        .flatten(value, target, reclimit.step(), depth + 1, pending)?
                                        .into(),
                                }
                            }
                        } else if matches!(prop_schema, SchemaNode::Array(_)) {
                            self.flatten(value, ARRAY_CLASS, reclimit.step(), depth + 1, pending)?
                                .into()
                        } else {
                            value.clone()
                        };
                        flat.insert(prop.clone(), stored);
                    }
                    Value::Object(flat)
                }
                None => item.clone(),
            },
            SchemaNode::Array(arr) => match (item.as_array(), arr.items.henge_class()) {
                (Some(elements), Some(target)) => {
                    self.flatten_all(elements, target, reclimit, depth, pending)?
                }
                _ => item.clone(),
            },
            SchemaNode::Primitive(_) => item.clone(),
        };

        if let Err(violation) = self.validator.validate(item_type, schema, &flat) {
            if let Value::String(candidate) = &flat {
                if self.is_stored_as(candidate, item_type)? {
                    debug!(druid = candidate.as_str(), item_type, "already stored, reusing reference");
                    return Ok(Druid::from(candidate.as_str()));
                }
            }
            warn!(item_type, %violation, "validation failed");
            return Err(HengeError::ValidationFailed {
                item_type: item_type.to_string(),
                violation,
            });
        }

        self.stage(flat, item_type, schema, pending)
    }

    /// Insert each element under `item_type`, yielding the list of digests
    fn flatten_all(
        &self,
        elements: &[Value],
        item_type: &str,
        reclimit: RecLimit,
        depth: usize,
        pending: &mut Vec<PendingWrite>,
    ) -> Result<Value> {
        elements
            .iter()
            .map(|e| {
                self.flatten(e, item_type, reclimit.step(), depth + 1, pending)
                    .map(Value::from)
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::Array)
    }

    /// Canonicalize and digest a flat item, queueing its record
    fn stage(
        &self,
        flat: Value,
        item_type: &str,
        schema: &SchemaNode,
        pending: &mut Vec<PendingWrite>,
    ) -> Result<Druid> {
        let split = select_inherent(&flat, schema);
        let payload = canonicalize(&split.inherent)?;
        let external_string = match &split.external {
            Some(external) => canonicalize(&Value::Object(external.clone()))?,
            None => NULL_MARKER.to_string(),
        };
        let druid = Druid::from(self.digester.digest(&payload));
        debug!(druid = %druid, item_type, payload = payload.as_str(), "staged");

        pending.push(PendingWrite {
            druid: druid.clone(),
            record: Record {
                payload,
                item_type: item_type.to_string(),
                digest_version: self.digester.version().to_string(),
                external_string,
            },
        });
        Ok(druid)
    }

    fn write_record(&self, druid: &Druid, record: &Record) -> Result<()> {
        let owner = self.federation.resolve(&record.item_type, &self.store)?;
        StoreAdapter::new(owner.as_ref()).put(druid.as_str(), record)?;
        if self.federation.is_peer(&record.item_type) {
            StoreAdapter::new(self.store.as_ref()).put_metadata(druid.as_str(), record)?;
        }
        info!(druid = %druid, item_type = record.item_type.as_str(), "record written");
        Ok(())
    }

    fn is_stored_as(&self, candidate: &str, item_type: &str) -> Result<bool> {
        let stored = StoreAdapter::new(self.store.as_ref()).item_type(candidate)?;
        Ok(stored.as_deref() == Some(item_type))
    }

    // ------------------------------------------------------------------
    // Retrieve
    // ------------------------------------------------------------------

    /// Reconstruct the item stored under `druid`
    pub fn retrieve(&self, druid: &str, reclimit: impl Into<RecLimit>) -> Result<Value> {
        self.retrieve_at(druid, reclimit.into(), 0)
    }

    fn retrieve_at(&self, druid: &str, reclimit: RecLimit, depth: usize) -> Result<Value> {
        if depth > self.max_depth {
            return Err(HengeError::RecursionLimit { depth });
        }

        let item_type = self.item_type_of(druid)?;
        let schema = self.schemas.require(&item_type)?;
        let owner = self.federation.resolve(&item_type, &self.store)?;
        let adapter = StoreAdapter::new(owner.as_ref());

        let payload = adapter
            .payload(druid)?
            .ok_or_else(|| HengeError::not_found(druid))?;
        let mut item = decode(&payload)?;
        if let Some(external) = adapter.external_string(druid)? {
            if let (Value::Object(target), Value::Object(extra)) = (&mut item, decode(&external)?) {
                target.extend(extra);
            }
        }
        debug!(druid, item_type = item_type.as_str(), ?reclimit, "retrieved");

        match schema {
            SchemaNode::Array(arr) => {
                if reclimit.is_exhausted() || arr.items.henge_class().is_none() {
                    return Ok(item);
                }
                if let Value::Array(elements) = &item {
                    return self.retrieve_all(elements, reclimit, depth);
                }
                Ok(item)
            }
            SchemaNode::Object(obj) => {
                if obj.recursive.is_empty() || reclimit.is_exhausted() {
                    return Ok(item);
                }
                if let Value::Object(map) = &mut item {
                    for prop in &obj.recursive {
                        let is_list = obj
                            .properties
                            .get(prop)
                            .map(SchemaNode::is_reference_list)
                            .unwrap_or(false);
                        let expanded = match map.get(prop) {
                            Some(Value::String(s)) if !s.is_empty() => {
                                self.retrieve_at(s, reclimit.step(), depth + 1)?
                            }
                            Some(Value::Array(references)) if is_list => {
                                self.retrieve_all(references, reclimit, depth)?
                            }
                            _ => continue,
                        };
                        map.insert(prop.clone(), expanded);
                    }
                }
                Ok(item)
            }
            SchemaNode::Primitive(_) => Ok(item),
        }
    }

    /// Expand every digest in `references`; anything else is kept as-is
    fn retrieve_all(&self, references: &[Value], reclimit: RecLimit, depth: usize) -> Result<Value> {
        references
            .iter()
            .map(|element| match element {
                Value::String(reference) => self.retrieve_at(reference, reclimit.step(), depth + 1),
                other => Ok(other.clone()),
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::Array)
    }

    /// The raw record stored under `druid`
    pub fn retrieve_record(&self, druid: &str) -> Result<Record> {
        let item_type = self.item_type_of(druid)?;
        let owner = self.federation.resolve(&item_type, &self.store)?;
        let adapter = StoreAdapter::new(owner.as_ref());
        let payload = adapter
            .payload(druid)?
            .ok_or_else(|| HengeError::not_found(druid))?;
        let local = StoreAdapter::new(self.store.as_ref());
        let digest_version = match adapter.digest_version(druid)? {
            Some(version) => version,
            None => local
                .digest_version(druid)?
                .ok_or_else(|| HengeError::not_found(druid))?,
        };
        Ok(Record {
            payload,
            item_type,
            digest_version,
            external_string: adapter
                .external_string(druid)?
                .unwrap_or_else(|| NULL_MARKER.to_string()),
        })
    }

    /// The item type recorded locally for `druid`
    pub fn item_type_of(&self, druid: &str) -> Result<String> {
        StoreAdapter::new(self.store.as_ref())
            .item_type(druid)?
            .ok_or_else(|| HengeError::not_found(druid))
    }

    /// Whether `druid` is known to this henge
    pub fn contains(&self, druid: &str) -> Result<bool> {
        Ok(StoreAdapter::new(self.store.as_ref())
            .item_type(druid)?
            .is_some())
    }

    /// Every record owned by the local store, sorted by digest
    pub fn records(&self) -> Result<Vec<(Druid, Record)>> {
        let mut druids = StoreAdapter::new(self.store.as_ref()).druids()?;
        druids.sort();
        let mut records = Vec::with_capacity(druids.len());
        for druid in druids {
            if self.federation.is_peer(&self.item_type_of(&druid)?) {
                continue;
            }
            let record = self.retrieve_record(&druid)?;
            records.push((Druid::from(druid), record));
        }
        Ok(records)
    }

    /// Remove every record and its metadata from the local store.
    /// Records owned by peers stay in the peer's store.
    pub fn clean(&self) -> Result<usize> {
        let adapter = StoreAdapter::new(self.store.as_ref());
        let mut removed = 0;
        for druid in adapter.druids()? {
            if adapter.remove(&druid)? {
                removed += 1;
            }
        }
        info!(removed, "cleaned store");
        Ok(removed)
    }
}

impl fmt::Debug for Henge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Henge")
            .field("item_types", &self.schemas.item_types())
            .field("peer_types", &self.federation.peer_types())
            .field("digest_version", &self.digester.version())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

fn is_empty_reference(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Types requested from one peer
struct PeerRequest {
    store: Arc<dyn KeyValueStore>,
    schemas: SchemaRegistry,
    types: Vec<String>,
}

/// Builder for [`Henge`]
pub struct HengeBuilder {
    store: Arc<dyn KeyValueStore>,
    documents: Vec<(Option<String>, Value)>,
    peers: Vec<PeerRequest>,
    digester: Box<dyn DigestFunction>,
    validator: Box<dyn Validator>,
    max_depth: usize,
}

impl HengeBuilder {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            documents: Vec::new(),
            peers: Vec::new(),
            digester: Box::new(Sha256Digest),
            validator: Box::new(JsonSchemaValidator::new()),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Add a schema document
    pub fn schema(mut self, document: Value) -> Self {
        self.documents.push((None, document));
        self
    }

    /// Add a schema document registered under `name` when it has no `henge_class`
    pub fn named_schema(mut self, name: impl Into<String>, document: Value) -> Self {
        self.documents.push((Some(name.into()), document));
        self
    }

    pub fn schemas<I>(mut self, documents: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        self.documents
            .extend(documents.into_iter().map(|doc| (None, doc)));
        self
    }

    /// Route `types` to `peer`'s store. Types already known locally stay local.
    pub fn peer<I, S>(mut self, peer: &Henge, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.peers.push(PeerRequest {
            store: Arc::clone(&peer.store),
            schemas: peer.schemas.clone(),
            types: types.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn digest<D: DigestFunction + 'static>(self, digester: D) -> Self {
        self.digest_boxed(Box::new(digester))
    }

    pub fn digest_boxed(mut self, digester: Box<dyn DigestFunction>) -> Self {
        self.digester = digester;
        self
    }

    pub fn validator<V: Validator + 'static>(mut self, validator: V) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn build(self) -> Result<Henge> {
        let mut schemas = SchemaRegistry::compile(
            self.documents
                .iter()
                .map(|(name, doc)| (name.as_deref(), doc)),
        )?;
        let mut federation = FederationRegistry::local(&schemas);

        for peer in &self.peers {
            for item_type in &peer.types {
                if schemas.contains(item_type) {
                    debug!(item_type = item_type.as_str(), "type known locally, not adopting");
                    continue;
                }
                peer.schemas.require(item_type)?;

                let adopted: crate::compiler::Registrations = peer
                    .schemas
                    .closure(item_type)
                    .into_iter()
                    .filter(|(name, _)| !schemas.contains(name))
                    .collect();
                let names: Vec<String> = adopted.keys().cloned().collect();
                info!(item_type = item_type.as_str(), adopted = ?names, "adopting peer type");

                schemas = schemas.merge(adopted);
                federation = federation.with_peer(names, &peer.store);
            }
        }

        Ok(Henge {
            store: self.store,
            schemas,
            federation,
            digester: self.digester,
            validator: self.validator,
            max_depth: self.max_depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn person_henge(store: Arc<MemoryStore>) -> Henge {
        Henge::builder(store)
            .schema(json!({
                "type": "object",
                "henge_class": "person",
                "properties": {
                    "name": { "type": "string" },
                    "age": { "type": "integer" }
                },
                "required": ["name"]
            }))
            .build()
            .unwrap()
    }

    #[test]
    fn test_reclimit_steps() {
        assert!(RecLimit::from(0).is_exhausted());
        assert_eq!(RecLimit::from(2).step(), RecLimit::Levels(1));
        assert_eq!(RecLimit::Unlimited.step(), RecLimit::Unlimited);
        assert_eq!(RecLimit::from(None), RecLimit::Unlimited);
    }

    #[test]
    fn test_insert_writes_four_slots() {
        let store = Arc::new(MemoryStore::new());
        let henge = person_henge(store.clone());
        let druid = henge
            .insert(&json!({ "name": "Pat", "age": 38 }), "person", RecLimit::Unlimited)
            .unwrap();

        assert_eq!(store.len(), 4);
        let record = henge.retrieve_record(druid.as_str()).unwrap();
        assert_eq!(record.payload, r#"{"age":38,"name":"Pat"}"#);
        assert_eq!(record.item_type, "person");
        assert_eq!(record.digest_version, "sha256");
        assert_eq!(record.external_string, NULL_MARKER);
        assert_eq!(druid, Sha256Digest.digest(&record.payload).as_str());
    }

    #[test]
    fn test_undeclared_properties_are_dropped() {
        let store = Arc::new(MemoryStore::new());
        let henge = person_henge(store);
        let druid = henge
            .insert(&json!({ "name": "Pat", "nickname": "P" }), "person", RecLimit::Unlimited)
            .unwrap();
        let item = henge.retrieve(druid.as_str(), RecLimit::Unlimited).unwrap();
        assert_eq!(item, json!({ "name": "Pat" }));
    }

    #[test]
    fn test_custom_digest_function() {
        let store = Arc::new(MemoryStore::new());
        let henge = Henge::builder(store)
            .schema(json!({ "type": "string", "henge_class": "word" }))
            .digest(crate::checksum::FnDigest::new("len", |s: &str| format!("len{}", s.len())))
            .build()
            .unwrap();

        let druid = henge.insert(&json!("abc"), "word", RecLimit::Unlimited).unwrap();
        assert_eq!(druid, "len5");
        assert_eq!(henge.digest_version(), "len");
        assert_eq!(henge.retrieve("len5", RecLimit::Unlimited).unwrap(), json!("abc"));
    }

    #[test]
    fn test_depth_guard() {
        let store = Arc::new(MemoryStore::new());
        let henge = Henge::builder(store.clone())
            .schema(json!({
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
            }))
            .max_depth(0)
            .build()
            .unwrap();

        // each person sits one level below the family
        let family = json!({ "parents": [{ "name": "Pat" }] });
        assert!(matches!(
            henge.insert(&family, "family", RecLimit::Unlimited),
            Err(HengeError::RecursionLimit { depth: 1 })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_top_level_reclimit_zero_still_validates() {
        let store = Arc::new(MemoryStore::new());
        let henge = person_henge(store.clone());

        let result = henge.insert(&json!({ "name": 1 }), "person", 0);
        assert!(matches!(result, Err(HengeError::ValidationFailed { .. })));
        assert!(store.is_empty());

        let druid = henge.insert(&json!({ "name": "Pat" }), "person", 0).unwrap();
        assert_eq!(henge.retrieve(druid.as_str(), 0).unwrap(), json!({ "name": "Pat" }));
    }

    #[test]
    fn test_validate_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let henge = person_henge(store.clone());

        assert!(henge.validate(&json!({ "name": "Pat", "age": 38 }), "person").is_ok());
        assert!(matches!(
            henge.validate(&json!({ "age": 38 }), "person"),
            Err(HengeError::ValidationFailed { .. })
        ));
        assert!(matches!(
            henge.validate(&json!({ "name": "Pat" }), "robot"),
            Err(HengeError::UnknownItemType { .. })
        ));
        assert!(store.is_empty());
    }
}
