//! The walk's terminal artifact: returns, fetches and the query skeleton.
//!
//! A [`LoadPlan`] holds one or more root [`Return`] nodes whose nested
//! [`Fetch`] graphs mirror the join-fetched subset of the domain graph, plus
//! the [`QuerySpaces`] skeleton consumed by the downstream SQL-building
//! stage. Plans are plain values: built once per walk, never mutated after.

pub mod query_spaces;

use serde::Serialize;

use crate::fetch_strategy::{FetchStrategy, LockMode};
use crate::walker::property_path::PropertyPath;
pub use query_spaces::QuerySpaces;

/// What the plan is for: loading an entity or initializing a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Disposition {
    EntityLoader,
    CollectionInitializer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadPlan {
    pub disposition: Disposition,
    pub returns: Vec<Return>,
    pub query_spaces: QuerySpaces,
}

impl LoadPlan {
    /// JSON rendering of the plan tree, for diagnostics.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self)
            .unwrap_or_else(|e| format!("<unserializable load plan: {}>", e))
    }

    pub fn root_entity_return(&self) -> Option<&EntityReturn> {
        self.returns.iter().find_map(|r| match r {
            Return::Entity(entity_return) => Some(entity_return),
            Return::Collection(_) => None,
        })
    }

    pub fn root_collection_return(&self) -> Option<&CollectionReturn> {
        self.returns.iter().find_map(|r| match r {
            Return::Collection(collection_return) => Some(collection_return),
            Return::Entity(_) => None,
        })
    }
}

/// A root-level result node, as opposed to a nested fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Return {
    Entity(EntityReturn),
    Collection(CollectionReturn),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityReturn {
    pub entity_name: String,
    pub space_uid: String,
    pub path: PropertyPath,
    pub lock_mode: LockMode,
    pub identifier: EntityIdentifierDescription,
    pub fetches: Vec<Fetch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionReturn {
    pub role: String,
    pub space_uid: String,
    pub path: PropertyPath,
    pub index: Option<CollectionIndexGraph>,
    pub element: Option<CollectionElementGraph>,
}

/// How an association's target is populated. A fetch node exists for every
/// resolved association — including select/subselect/batch resolutions, so
/// later lazy loading knows the association is there — but only join fetches
/// carry a walked subtree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Fetch {
    Entity(EntityFetch),
    Collection(CollectionFetch),
    Composite(CompositeFetch),
    Any(AnyFetch),
    BidirectionalEntity(BidirectionalEntityReference),
}

impl Fetch {
    pub fn attribute(&self) -> &str {
        match self {
            Fetch::Entity(f) => &f.attribute,
            Fetch::Collection(f) => &f.attribute,
            Fetch::Composite(f) => &f.attribute,
            Fetch::Any(f) => &f.attribute,
            Fetch::BidirectionalEntity(f) => &f.attribute,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityFetch {
    pub attribute: String,
    pub entity_name: String,
    pub strategy: FetchStrategy,
    pub nullable: bool,
    /// Present only for join fetches; non-join fetches own no query space.
    pub space_uid: Option<String>,
    pub path: PropertyPath,
    pub identifier: Option<EntityIdentifierDescription>,
    pub fetches: Vec<Fetch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionFetch {
    pub attribute: String,
    pub role: String,
    pub strategy: FetchStrategy,
    pub space_uid: Option<String>,
    pub path: PropertyPath,
    pub index: Option<CollectionIndexGraph>,
    pub element: Option<CollectionElementGraph>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeFetch {
    pub attribute: String,
    pub name: String,
    pub space_uid: String,
    pub path: PropertyPath,
    pub fetches: Vec<Fetch>,
}

/// A polymorphic "any" fetch: always select-style, never a fetch owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnyFetch {
    pub attribute: String,
    pub strategy: FetchStrategy,
    pub path: PropertyPath,
}

/// A reference back into an already-built fetch subtree, produced when the
/// same association key is reached from a second attribute path. Downstream
/// stages resolve the target by its descriptor instead of re-joining.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BidirectionalEntityReference {
    pub attribute: String,
    pub entity_name: String,
    pub strategy: FetchStrategy,
    pub path: PropertyPath,
    pub target: EntityReferenceDescriptor,
}

/// Identifies an entity-shaped fetch source somewhere in the plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityReferenceDescriptor {
    pub entity_name: String,
    pub space_uid: String,
    pub path: PropertyPath,
}

/// Identifier description attached to entity-shaped nodes. Composite
/// identifiers own fetches (key associations inside the identifier).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EntityIdentifierDescription {
    Simple,
    Composite { fetches: Vec<Fetch> },
}

/// Element graph of a walked collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CollectionElementGraph {
    Basic,
    Any,
    Entity(EntityElementGraph),
    Composite(CompositeElementGraph),
    /// Circular collection: the element resolves back into an already-built
    /// entity reference instead of a second full subtree.
    BidirectionalEntity(BidirectionalEntityReference),
}

/// Index graph of a walked collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CollectionIndexGraph {
    Basic,
    Any,
    Entity(EntityElementGraph),
    Composite(CompositeElementGraph),
}

/// An entity-typed collection element or index: a full fetch source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityElementGraph {
    pub entity_name: String,
    pub space_uid: String,
    pub path: PropertyPath,
    pub identifier: EntityIdentifierDescription,
    pub fetches: Vec<Fetch>,
}

/// A composite-typed collection element or index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeElementGraph {
    pub name: String,
    pub space_uid: String,
    pub path: PropertyPath,
    pub fetches: Vec<Fetch>,
}
