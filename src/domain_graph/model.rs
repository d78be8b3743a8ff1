//! Definition types for the walkable domain model.
//!
//! These are read-only descriptions supplied by an external metamodel-build
//! step (programmatic assembly or the YAML loader in [`super::config`]).
//! The walker only reads them; nothing here is mutated during a walk.

use serde::{Deserialize, Serialize};

use crate::fetch_strategy::MappedFetch;
use crate::plan_builder::association_key::AssociationKey;

/// An entity: name, primary table, identifier structure and the ordered
/// non-identifier attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    pub table: String,
    pub identifier: IdentifierDefinition,
    pub attributes: Vec<AttributeDefinition>,
}

/// Identifier structure of an entity.
///
/// Composite identifiers are walkable: their sub-attributes are visited
/// between the identifier start/finish notifications, so associations mapped
/// inside a composite key surface as fetches owned by the identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IdentifierDefinition {
    /// Single basic-typed identifier attribute.
    Simple { attribute: String, columns: Vec<String> },
    /// One composite-typed identifier attribute (embedded id).
    EncapsulatedComposite {
        attribute: String,
        composite: CompositeDefinition,
        columns: Vec<String>,
    },
    /// Id-class style identifier spanning several attributes of the entity.
    NonEncapsulated {
        attributes: Vec<AttributeDefinition>,
        columns: Vec<String>,
    },
}

impl IdentifierDefinition {
    pub fn columns(&self) -> &[String] {
        match self {
            IdentifierDefinition::Simple { columns, .. } => columns,
            IdentifierDefinition::EncapsulatedComposite { columns, .. } => columns,
            IdentifierDefinition::NonEncapsulated { columns, .. } => columns,
        }
    }

    pub fn is_composite(&self) -> bool {
        !matches!(self, IdentifierDefinition::Simple { .. })
    }
}

/// A named attribute with its value classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    #[serde(default)]
    pub nullable: bool,
    pub value: AttributeValue,
}

/// Closed classification of attribute values. Everything the walker needs to
/// decide stack interaction is in this tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Basic(BasicDefinition),
    Composite(CompositeDefinition),
    Association(AssociationDefinition),
}

/// A basic (scalar) value and the columns it selects from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicDefinition {
    pub columns: Vec<String>,
}

/// An embedded composite: a logical name plus its own attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeDefinition {
    pub name: String,
    pub attributes: Vec<AttributeDefinition>,
}

/// An association attribute: its nature (entity, collection or "any"), the
/// physical key identifying the join predicate, and the mapped fetch plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationDefinition {
    pub nature: AssociationNature,
    pub key: AssociationKey,
    pub fetch: MappedFetch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssociationNature {
    Entity { target: String },
    Collection(CollectionDefinition),
    Any(AnyMappingDefinition),
}

impl AssociationNature {
    pub fn is_collection(&self) -> bool {
        matches!(self, AssociationNature::Collection(_))
    }

    pub fn is_any(&self) -> bool {
        matches!(self, AssociationNature::Any(_))
    }
}

/// A collection association: role, collection table, key columns and the
/// typing of its optional index and its element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDefinition {
    /// Role identifier, `Owner.attribute`.
    pub role: String,
    pub table: String,
    pub key_columns: Vec<String>,
    #[serde(default)]
    pub index: Option<CollectionPart>,
    pub element: CollectionPart,
    /// Names of filters defined against this collection. An enabled filter
    /// forces the collection off the join-fetch path.
    #[serde(default)]
    pub filters: Vec<String>,
}

/// Typing of a collection index or element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollectionPart {
    Basic(BasicDefinition),
    Composite(CompositeDefinition),
    Entity { target: String, columns: Vec<String> },
    Any(AnyMappingDefinition),
}

impl CollectionPart {
    pub fn is_fetch_source(&self) -> bool {
        matches!(
            self,
            CollectionPart::Composite(_) | CollectionPart::Entity { .. }
        )
    }
}

/// A polymorphic "any" mapping: discriminator + key columns. Never
/// join-fetchable, never a fetch owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnyMappingDefinition {
    pub discriminator_column: String,
    pub key_columns: Vec<String>,
    #[serde(default)]
    pub lazy: bool,
}

/// A named set of per-role fetch overrides, activated per load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchProfile {
    pub name: String,
    /// Role (`Owner.attribute`) to overriding style.
    pub overrides: std::collections::HashMap<String, crate::fetch_strategy::FetchStyle>,
}
