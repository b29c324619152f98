//! Error types for the henge store

use thiserror::Error;

use crate::store::StoreError;
use crate::validation::Violation;

/// Result type for henge operations
pub type Result<T> = std::result::Result<T, HengeError>;

/// Henge errors
#[derive(Error, Debug)]
pub enum HengeError {
    #[error("Not found: {druid}")]
    NotFound { druid: String },

    #[error("Unknown item type '{item_type}'. Known types: {known:?}")]
    UnknownItemType { item_type: String, known: Vec<String> },

    #[error("Invalid '{item_type}' item: {violation}")]
    ValidationFailed { item_type: String, violation: Violation },

    #[error("Backend failure: {0}")]
    BackendFailure(#[from] StoreError),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Canonicalization error: {0}")]
    Canonicalization(String),

    #[error("Recursion depth {depth} exceeded")]
    RecursionLimit { depth: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl HengeError {
    pub(crate) fn not_found(druid: impl Into<String>) -> Self {
        Self::NotFound { druid: druid.into() }
    }

    /// Whether this error means the digest is simply absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
