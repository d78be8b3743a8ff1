//! Navigation paths from the walk root to the current position.
//!
//! Paths are immutable and append-only: `append` produces a child sharing the
//! parent chain, so paths held by already-built plan nodes are never affected
//! by later traversal.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

/// Marker used for collection index sub-paths.
pub const INDEX_MARKER: &str = "<index>";
/// Marker used for collection element sub-paths.
pub const ELEMENTS_MARKER: &str = "<elements>";
/// Marker used for identifier sub-paths.
pub const IDENTIFIER_MARKER: &str = "<id>";

#[derive(Debug, Clone)]
pub struct PropertyPath {
    parent: Option<Arc<PropertyPath>>,
    property: String,
    full_path: String,
}

impl PropertyPath {
    pub fn root() -> Self {
        PropertyPath {
            parent: None,
            property: String::new(),
            full_path: String::new(),
        }
    }

    pub fn append(&self, property: &str) -> PropertyPath {
        let full_path = if self.full_path.is_empty() {
            property.to_string()
        } else {
            format!("{}.{}", self.full_path, property)
        };
        PropertyPath {
            parent: Some(Arc::new(self.clone())),
            property: property.to_string(),
            full_path,
        }
    }

    pub fn parent(&self) -> Option<&PropertyPath> {
        self.parent.as_deref()
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn depth(&self) -> usize {
        match &self.parent {
            Some(parent) => parent.depth() + 1,
            None => 0,
        }
    }
}

impl PartialEq for PropertyPath {
    fn eq(&self, other: &Self) -> bool {
        self.full_path == other.full_path
    }
}

impl Eq for PropertyPath {}

impl std::hash::Hash for PropertyPath {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.full_path.hash(state);
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.full_path.is_empty() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.full_path)
        }
    }
}

impl Serialize for PropertyPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.full_path)
    }
}

/// Stack of the paths belonging to the currently open fetch owners, kept for
/// diagnostics. The top entry is the logging context for the walk position.
#[derive(Debug, Default)]
pub struct PropertyPathStack {
    stack: Vec<PropertyPath>,
}

impl PropertyPathStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: PropertyPath) {
        self.stack.push(path);
    }

    pub fn pop(&mut self) {
        if self.stack.pop().is_none() {
            log::warn!("Property path stack popped while empty");
        }
    }

    pub fn current(&self) -> Option<&PropertyPath> {
        self.stack.last()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Drop every remaining entry, warning if the stack was not empty. Used
    /// by walk cleanup after a failed traversal.
    pub fn drain_remaining(&mut self) {
        if !self.stack.is_empty() {
            log::warn!(
                "Property path stack not empty at walk completion; {} frame(s) dropped, deepest: {}",
                self.stack.len(),
                self.stack.last().map(|p| p.to_string()).unwrap_or_default()
            );
            self.stack.clear();
        }
    }
}
