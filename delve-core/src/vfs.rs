//! In-memory file namespace shared by the filesystem tools and
//! large-result eviction.
//!
//! Paths are absolute, `/`-separated and may not contain `..`. Repeated
//! slashes are collapsed; a trailing slash is dropped.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use uuid::Uuid;

/// Directory that receives evicted tool results.
pub const LARGE_RESULTS_DIR: &str = "/large_tool_results";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum VfsError {
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("File '{0}' not found")]
    NotFound(String),
}

/// Thread-safe map from path to file contents.
#[derive(Debug, Default)]
pub struct VirtualFs {
    files: RwLock<BTreeMap<String, String>>,
}

impl VirtualFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and canonicalize a path.
    pub fn normalize(path: &str) -> Result<String, VfsError> {
        let invalid = |reason| VfsError::InvalidPath {
            path: path.to_string(),
            reason,
        };
        if !path.starts_with('/') {
            return Err(invalid("path must be absolute"));
        }
        let mut segments = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(invalid("path must not contain '..'")),
                s => segments.push(s),
            }
        }
        Ok(format!("/{}", segments.join("/")))
    }

    pub fn read(&self, path: &str) -> Result<String, VfsError> {
        let path = Self::normalize(path)?;
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&path)
            .cloned()
            .ok_or(VfsError::NotFound(path))
    }

    /// Create or overwrite a file, returning its canonical path.
    pub fn write(&self, path: &str, content: impl Into<String>) -> Result<String, VfsError> {
        let path = Self::normalize(path)?;
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.clone(), content.into());
        Ok(path)
    }

    pub fn exists(&self, path: &str) -> bool {
        Self::normalize(path).is_ok_and(|p| {
            self.files
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(&p)
        })
    }

    /// Paths under `prefix` (a directory), sorted.
    pub fn list(&self, prefix: &str) -> Result<Vec<String>, VfsError> {
        let prefix = Self::normalize(prefix)?;
        let dir = if prefix == "/" {
            prefix
        } else {
            format!("{prefix}/")
        };
        Ok(self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|p| p.starts_with(&dir))
            .cloned()
            .collect())
    }

    /// Store `content` under a fresh, collision-free path in
    /// [`LARGE_RESULTS_DIR`] and return that path.
    pub fn store_evicted(&self, content: impl Into<String>) -> String {
        let path = format!("{LARGE_RESULTS_DIR}/{}", Uuid::new_v4());
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.clone(), content.into());
        path
    }

    pub fn len(&self) -> usize {
        self.files.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
