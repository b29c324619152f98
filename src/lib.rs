//! Henge
//!
//! A content-addressed store for structured, possibly nested items. Each item
//! is typed by a JSON schema; nested values are stored as items of their own
//! and referenced by digest (a DRUID, "decomposable recursive unique
//! identifier"), so every stored record is flat.
//!
//! ## Features
//!
//! - **Schema Compilation**: hierarchical schemas split into single-level schemas, one per `henge_class`
//! - **Content Addressing**: SHA-256 over a canonical JSON encoding, pluggable per instance
//! - **Inherent Properties**: non-identity metadata stored beside a digest without changing it
//! - **Recursive Retrieval**: references expanded up to a caller-chosen depth
//! - **Federation**: item types owned by a peer henge's store
//!
//! ## Record layout
//!
//! ```text
//! <druid>                  {"age":38,"name":"Pat"}
//! <druid>_item_type        person
//! <druid>_digest_version   sha256
//! <druid>_external_string  null
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use henge::{Henge, MemoryStore, RecLimit};
//! use serde_json::json;
//!
//! let henge = Henge::builder(Arc::new(MemoryStore::new()))
//!     .schema(json!({
//!         "type": "object",
//!         "henge_class": "person",
//!         "properties": { "name": { "type": "string" }, "age": { "type": "integer" } }
//!     }))
//!     .build()?;
//!
//! let druid = henge.insert(&json!({ "name": "Pat", "age": 38 }), "person", RecLimit::Unlimited)?;
//! assert_eq!(henge.retrieve(druid.as_str(), RecLimit::Unlimited)?, json!({ "name": "Pat", "age": 38 }));
//! # Ok::<(), henge::HengeError>(())
//! ```

pub mod canonical;
pub mod checksum;
pub mod compiler;
pub mod config;
pub mod error;
pub mod henge;
pub mod loader;
pub mod registry;
pub mod schema;
pub mod store;
pub mod validation;

pub use canonical::{canonicalize, decode, select_inherent, InherentSplit};
pub use checksum::{DigestFunction, Druid, FnDigest, Sha256Digest, Sha512Digest};
pub use compiler::{split_schema, ARRAY_CLASS};
pub use config::HengeConfig;
pub use error::{HengeError, Result};
pub use henge::{Henge, HengeBuilder, RecLimit};
pub use registry::{FederationRegistry, SchemaRegistry, StoreBinding};
pub use schema::SchemaNode;
pub use store::{KeyValueStore, MemoryStore, Record, StoreAdapter, StoreError};
pub use validation::{JsonSchemaValidator, Validator, Violation};
