//! Association keys and the per-walk registry used for circular detection.
//!
//! An [`AssociationKey`] identifies a physical join predicate: the referring
//! table plus its key columns. Two associations with equal keys are the same
//! physical relationship walked from different attribute paths — the
//! candidate bidirectional/circular link. The registry is append-only for
//! the duration of one walk and is discarded with the rest of the traversal
//! state when the walk completes.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::load_plan::EntityReferenceDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssociationKey {
    pub table: String,
    pub columns: Vec<String>,
}

impl AssociationKey {
    pub fn new<I, S>(table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AssociationKey {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for AssociationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.table, self.columns.join(","))
    }
}

/// What the registry remembers about a registered key.
///
/// The owner side is the entity reference that declared the association; the
/// source side is the entity reference pushed for its target (for collection
/// associations the two coincide, since collections push on the collection
/// stack). Entity-nature circular resolution consumes the source side,
/// collection-nature resolution the owner side. Root-collection
/// registrations carry neither.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredAssociation {
    pub owner: Option<EntityReferenceDescriptor>,
    pub source: Option<EntityReferenceDescriptor>,
}

#[derive(Debug, Default)]
pub struct AssociationKeyRegistry {
    fetched: HashMap<AssociationKey, RegisteredAssociation>,
}

impl AssociationKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_duplicate(&self, key: &AssociationKey) -> bool {
        self.fetched.contains_key(key)
    }

    /// Register a key. First registration wins; the walker's duplicate check
    /// prevents a second registration of the same key within one walk.
    pub fn register(&mut self, key: AssociationKey, entry: RegisteredAssociation) {
        log::trace!("Registering association key : {} -> {:?}", key, entry.source);
        self.fetched.entry(key).or_insert(entry);
    }

    pub fn lookup(&self, key: &AssociationKey) -> Option<&RegisteredAssociation> {
        self.fetched.get(key)
    }

    pub fn len(&self) -> usize {
        self.fetched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetched.is_empty()
    }
}
