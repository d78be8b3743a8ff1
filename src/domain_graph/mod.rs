//! Read-only domain model consumed by the walker.
//!
//! The graph maps entity names to definitions and carries the named fetch
//! profiles. It is assembled once (programmatically or from a YAML
//! configuration) and is immutable during a walk, so multiple plan builds may
//! share one graph without coordination.

use std::collections::HashMap;

pub mod config;
pub mod errors;
pub mod model;

use errors::DomainGraphError;
use model::{
    AssociationNature, AttributeValue, CollectionDefinition, EntityDefinition, FetchProfile,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainGraph {
    entities: HashMap<String, EntityDefinition>,
    fetch_profiles: HashMap<String, FetchProfile>,
}

impl DomainGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entity(&mut self, entity: EntityDefinition) -> Result<(), DomainGraphError> {
        if self.entities.contains_key(&entity.name) {
            return Err(DomainGraphError::DuplicateEntity {
                entity_name: entity.name,
            });
        }
        self.entities.insert(entity.name.clone(), entity);
        Ok(())
    }

    pub fn add_fetch_profile(&mut self, profile: FetchProfile) {
        self.fetch_profiles.insert(profile.name.clone(), profile);
    }

    pub fn entity(&self, entity_name: &str) -> Result<&EntityDefinition, DomainGraphError> {
        self.entities
            .get(entity_name)
            .ok_or_else(|| DomainGraphError::Entity {
                entity_name: entity_name.to_string(),
            })
    }

    /// Look up a collection association by role (`Owner.attribute`).
    pub fn collection(&self, role: &str) -> Result<&CollectionDefinition, DomainGraphError> {
        for entity in self.entities.values() {
            for attribute in entity.all_attributes() {
                if let AttributeValue::Association(association) = &attribute.value {
                    if let AssociationNature::Collection(collection) = &association.nature {
                        if collection.role == role {
                            return Ok(collection);
                        }
                    }
                }
            }
        }
        Err(DomainGraphError::Collection {
            role: role.to_string(),
        })
    }

    pub fn fetch_profile(&self, name: &str) -> Option<&FetchProfile> {
        self.fetch_profiles.get(name)
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Structural validation: every entity association target and every
    /// collection element/index entity target must resolve.
    pub fn validate(&self) -> Result<(), DomainGraphError> {
        for entity in self.entities.values() {
            for attribute in entity.all_attributes() {
                if let AttributeValue::Association(association) = &attribute.value {
                    match &association.nature {
                        AssociationNature::Entity { target } => {
                            self.require_target(target, &entity.name, &attribute.name)?;
                        }
                        AssociationNature::Collection(collection) => {
                            if let model::CollectionPart::Entity { target, .. } =
                                &collection.element
                            {
                                self.require_target(target, &entity.name, &attribute.name)?;
                            }
                            if let Some(model::CollectionPart::Entity { target, .. }) =
                                &collection.index
                            {
                                self.require_target(target, &entity.name, &attribute.name)?;
                            }
                        }
                        AssociationNature::Any(_) => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn require_target(
        &self,
        target: &str,
        owner: &str,
        attribute: &str,
    ) -> Result<(), DomainGraphError> {
        if self.entities.contains_key(target) {
            Ok(())
        } else {
            Err(DomainGraphError::invalid_model(
                format!("association target `{}` is not a defined entity", target),
                format!("attribute `{}.{}`", owner, attribute),
            ))
        }
    }
}

impl EntityDefinition {
    /// All attributes of the entity, identifier attributes first. This is the
    /// walk-relevant attribute set; identifier attributes are visited through
    /// the identifier notifications, not here.
    pub fn all_attributes(&self) -> impl Iterator<Item = &model::AttributeDefinition> {
        let identifier_attributes = match &self.identifier {
            model::IdentifierDefinition::NonEncapsulated { attributes, .. } => attributes.as_slice(),
            model::IdentifierDefinition::EncapsulatedComposite { composite, .. } => {
                composite.attributes.as_slice()
            }
            model::IdentifierDefinition::Simple { .. } => &[],
        };
        identifier_attributes.iter().chain(self.attributes.iter())
    }
}
