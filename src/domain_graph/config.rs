//! Domain model configuration management.
//!
//! Models are declared in YAML and compiled into a [`DomainGraph`]. A model
//! file looks like:
//!
//! ```yaml
//! name: shop_model
//! version: "1.0"
//! entities:
//!   - name: Order
//!     table: orders
//!     id:
//!       attribute: id
//!       columns: [id]
//!     attributes:
//!       - name: customer
//!         nullable: true
//!         association:
//!           entity: Customer
//!           key: { table: orders, columns: [customer_id] }
//!           fetch: { lazy: false, style: join }
//! fetch_profiles:
//!   - name: order-with-lines
//!     overrides:
//!       Order.lines: join
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::errors::DomainGraphError;
use super::model::{
    AnyMappingDefinition, AssociationDefinition, AssociationNature, AttributeDefinition,
    AttributeValue, BasicDefinition, CollectionDefinition, CollectionPart, CompositeDefinition,
    EntityDefinition, FetchProfile, IdentifierDefinition,
};
use super::DomainGraph;
use crate::fetch_strategy::MappedFetch;
use crate::plan_builder::association_key::AssociationKey;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainModelConfig {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub entities: Vec<EntityConfig>,
    #[serde(default)]
    pub fetch_profiles: Vec<FetchProfileConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityConfig {
    pub name: String,
    pub table: String,
    pub id: IdentifierConfig,
    #[serde(default)]
    pub attributes: Vec<AttributeConfig>,
}

/// Identifier declaration. `composite` upgrades the id to an encapsulated
/// composite; `attributes` (without `attribute`) declares an id-class style
/// identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentifierConfig {
    #[serde(default)]
    pub attribute: Option<String>,
    pub columns: Vec<String>,
    #[serde(default)]
    pub composite: Option<CompositeConfig>,
    #[serde(default)]
    pub attributes: Vec<AttributeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeConfig {
    pub name: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(flatten)]
    pub value: AttributeValueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValueConfig {
    Basic(BasicConfig),
    Composite(CompositeConfig),
    Association(AssociationConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BasicConfig {
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompositeConfig {
    pub name: String,
    pub attributes: Vec<AttributeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssociationConfig {
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub collection: Option<CollectionConfig>,
    #[serde(default)]
    pub any: Option<AnyConfig>,
    pub key: AssociationKey,
    pub fetch: MappedFetch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionConfig {
    pub role: String,
    pub table: String,
    pub key_columns: Vec<String>,
    #[serde(default)]
    pub index: Option<CollectionPartConfig>,
    pub element: CollectionPartConfig,
    #[serde(default)]
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CollectionPartConfig {
    Basic(BasicConfig),
    Composite(CompositeConfig),
    Entity { target: String, columns: Vec<String> },
    Any(AnyConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnyConfig {
    pub discriminator_column: String,
    pub key_columns: Vec<String>,
    #[serde(default)]
    pub lazy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchProfileConfig {
    pub name: String,
    pub overrides: HashMap<String, crate::fetch_strategy::FetchStyle>,
}

impl DomainModelConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, DomainGraphError> {
        let contents = fs::read_to_string(path).map_err(|e| DomainGraphError::ConfigReadError {
            error: e.to_string(),
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, DomainGraphError> {
        serde_yaml::from_str(yaml).map_err(|e| DomainGraphError::ConfigParseError {
            error: e.to_string(),
        })
    }

    /// Structural validation of the configuration, before compilation.
    pub fn validate(&self) -> Result<(), DomainGraphError> {
        for entity in &self.entities {
            if entity.id.columns.is_empty() {
                return Err(DomainGraphError::invalid_model(
                    "identifier must declare at least one column",
                    format!("entity `{}`", entity.name),
                ));
            }
            if entity.id.attribute.is_none() && entity.id.attributes.is_empty() {
                return Err(DomainGraphError::invalid_model(
                    "identifier must declare `attribute` or `attributes`",
                    format!("entity `{}`", entity.name),
                ));
            }
            for attribute in &entity.attributes {
                if let AttributeValueConfig::Association(association) = &attribute.value {
                    let natures = usize::from(association.entity.is_some())
                        + usize::from(association.collection.is_some())
                        + usize::from(association.any.is_some());
                    if natures != 1 {
                        return Err(DomainGraphError::invalid_model(
                            "association must declare exactly one of `entity`, `collection`, `any`",
                            format!("attribute `{}.{}`", entity.name, attribute.name),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Compile the configuration into a validated [`DomainGraph`].
    pub fn to_domain_graph(&self) -> Result<DomainGraph, DomainGraphError> {
        self.validate()?;
        let mut graph = DomainGraph::new();
        for entity in &self.entities {
            graph.add_entity(compile_entity(entity)?)?;
        }
        for profile in &self.fetch_profiles {
            graph.add_fetch_profile(FetchProfile {
                name: profile.name.clone(),
                overrides: profile.overrides.clone(),
            });
        }
        graph.validate()?;
        Ok(graph)
    }
}

/// Load and compile a model file in one step.
pub fn load_domain_graph<P: AsRef<Path>>(path: P) -> Result<DomainGraph, DomainGraphError> {
    DomainModelConfig::from_yaml_file(path)?.to_domain_graph()
}

fn compile_entity(config: &EntityConfig) -> Result<EntityDefinition, DomainGraphError> {
    Ok(EntityDefinition {
        name: config.name.clone(),
        table: config.table.clone(),
        identifier: compile_identifier(&config.id)?,
        attributes: compile_attributes(&config.attributes)?,
    })
}

fn compile_identifier(config: &IdentifierConfig) -> Result<IdentifierDefinition, DomainGraphError> {
    if let Some(attribute) = &config.attribute {
        if let Some(composite) = &config.composite {
            Ok(IdentifierDefinition::EncapsulatedComposite {
                attribute: attribute.clone(),
                composite: compile_composite(composite)?,
                columns: config.columns.clone(),
            })
        } else {
            Ok(IdentifierDefinition::Simple {
                attribute: attribute.clone(),
                columns: config.columns.clone(),
            })
        }
    } else {
        Ok(IdentifierDefinition::NonEncapsulated {
            attributes: compile_attributes(&config.attributes)?,
            columns: config.columns.clone(),
        })
    }
}

fn compile_attributes(
    configs: &[AttributeConfig],
) -> Result<Vec<AttributeDefinition>, DomainGraphError> {
    configs.iter().map(compile_attribute).collect()
}

fn compile_attribute(config: &AttributeConfig) -> Result<AttributeDefinition, DomainGraphError> {
    let value = match &config.value {
        AttributeValueConfig::Basic(basic) => AttributeValue::Basic(BasicDefinition {
            columns: basic.columns.clone(),
        }),
        AttributeValueConfig::Composite(composite) => {
            AttributeValue::Composite(compile_composite(composite)?)
        }
        AttributeValueConfig::Association(association) => {
            AttributeValue::Association(compile_association(association)?)
        }
    };
    Ok(AttributeDefinition {
        name: config.name.clone(),
        nullable: config.nullable,
        value,
    })
}

fn compile_composite(config: &CompositeConfig) -> Result<CompositeDefinition, DomainGraphError> {
    Ok(CompositeDefinition {
        name: config.name.clone(),
        attributes: compile_attributes(&config.attributes)?,
    })
}

fn compile_association(
    config: &AssociationConfig,
) -> Result<AssociationDefinition, DomainGraphError> {
    let nature = if let Some(target) = &config.entity {
        AssociationNature::Entity {
            target: target.clone(),
        }
    } else if let Some(collection) = &config.collection {
        AssociationNature::Collection(compile_collection(collection)?)
    } else if let Some(any) = &config.any {
        AssociationNature::Any(compile_any(any))
    } else {
        // validate() rejects this before compilation
        return Err(DomainGraphError::InvalidModel {
            message: "association without a nature".to_string(),
        });
    };
    Ok(AssociationDefinition {
        nature,
        key: config.key.clone(),
        fetch: config.fetch.clone(),
    })
}

fn compile_collection(config: &CollectionConfig) -> Result<CollectionDefinition, DomainGraphError> {
    Ok(CollectionDefinition {
        role: config.role.clone(),
        table: config.table.clone(),
        key_columns: config.key_columns.clone(),
        index: config.index.as_ref().map(compile_part).transpose()?,
        element: compile_part(&config.element)?,
        filters: config.filters.clone(),
    })
}

fn compile_part(config: &CollectionPartConfig) -> Result<CollectionPart, DomainGraphError> {
    Ok(match config {
        CollectionPartConfig::Basic(basic) => CollectionPart::Basic(BasicDefinition {
            columns: basic.columns.clone(),
        }),
        CollectionPartConfig::Composite(composite) => {
            CollectionPart::Composite(compile_composite(composite)?)
        }
        CollectionPartConfig::Entity { target, columns } => CollectionPart::Entity {
            target: target.clone(),
            columns: columns.clone(),
        },
        CollectionPartConfig::Any(any) => CollectionPart::Any(compile_any(any)),
    })
}

fn compile_any(config: &AnyConfig) -> AnyMappingDefinition {
    AnyMappingDefinition {
        discriminator_column: config.discriminator_column.clone(),
        key_columns: config.key_columns.clone(),
        lazy: config.lazy,
    }
}
