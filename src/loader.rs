//! Schema document loading
//!
//! Reads JSON schema documents from files, or from every `*.json` file under
//! a directory, in sorted path order so compilation is reproducible.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use walkdir::WalkDir;

use crate::error::{HengeError, Result};

/// Load every schema document under `paths`
pub fn load_schema_documents(paths: &[PathBuf]) -> Result<Vec<(PathBuf, Value)>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry.map_err(|e| HengeError::Io(e.into()))?;
                if entry.file_type().is_file() && is_json(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(path.clone());
        }
    }

    files
        .into_iter()
        .map(|file| {
            let content = fs::read_to_string(&file)?;
            let document: Value = serde_json::from_str(&content).map_err(|e| {
                HengeError::InvalidSchema(format!("failed to parse {}: {e}", file.display()))
            })?;
            tracing::debug!(path = %file.display(), "loaded schema document");
            Ok((file, document))
        })
        .collect()
}

fn is_json(path: &Path) -> bool {
    path.extension().map(|ext| ext == "json").unwrap_or(false)
}
