//! Traversal engine: the visitation protocol and the recursive graph walker.
//!
//! The walker drives a depth-first visit over the domain graph and reports
//! what it finds through the [`AssociationVisitationStrategy`] notification
//! protocol. Every `starting_*` has a matching `finishing_*`;
//! `starting_attribute` returns whether to descend into the attribute's
//! subtree. The walker keeps no plan state of its own — just its current
//! path and the duplicate-key short-circuit that keeps cyclic graphs finite.

pub mod errors;
pub mod property_path;

use crate::domain_graph::errors::DomainGraphError;
use crate::domain_graph::model::{
    AnyMappingDefinition, AssociationDefinition, AssociationNature, AttributeDefinition,
    AttributeValue, CollectionDefinition, CollectionPart, CompositeDefinition, EntityDefinition,
    IdentifierDefinition,
};
use crate::domain_graph::DomainGraph;
use crate::plan_builder::association_key::AssociationKey;
use property_path::PropertyPath;

/// The fixed notification protocol driven by the walker.
///
/// Implementations own all mutable traversal state (stacks, registry, path
/// context); the protocol's pairing guarantees are what make that state
/// checkable: every push performed in a `starting_*` call has exactly one
/// matching pop in the corresponding `finishing_*` call.
pub trait AssociationVisitationStrategy {
    type Error: From<DomainGraphError>;

    /// Walk lifecycle: called once before the root visit.
    fn start(&mut self) -> Result<(), Self::Error>;
    /// Walk lifecycle: called once after the walk, on every exit path.
    fn finish(&mut self);

    fn starting_entity(&mut self, entity: &EntityDefinition) -> Result<(), Self::Error>;
    fn finishing_entity(&mut self, entity: &EntityDefinition) -> Result<(), Self::Error>;

    fn starting_entity_identifier(&mut self, entity: &EntityDefinition)
        -> Result<(), Self::Error>;
    fn finishing_entity_identifier(
        &mut self,
        entity: &EntityDefinition,
    ) -> Result<(), Self::Error>;

    fn starting_collection(&mut self, collection: &CollectionDefinition)
        -> Result<(), Self::Error>;
    fn finishing_collection(
        &mut self,
        collection: &CollectionDefinition,
    ) -> Result<(), Self::Error>;

    fn starting_collection_index(
        &mut self,
        collection: &CollectionDefinition,
        index: &CollectionPart,
    ) -> Result<(), Self::Error>;
    fn finishing_collection_index(
        &mut self,
        collection: &CollectionDefinition,
        index: &CollectionPart,
    ) -> Result<(), Self::Error>;

    fn starting_collection_elements(
        &mut self,
        collection: &CollectionDefinition,
        element: &CollectionPart,
    ) -> Result<(), Self::Error>;
    fn finishing_collection_elements(
        &mut self,
        collection: &CollectionDefinition,
        element: &CollectionPart,
    ) -> Result<(), Self::Error>;

    fn starting_composite(&mut self, composite: &CompositeDefinition) -> Result<(), Self::Error>;
    fn finishing_composite(&mut self, composite: &CompositeDefinition) -> Result<(), Self::Error>;

    /// Returns whether the walker should descend into the attribute's
    /// subtree. Basic attributes always descend (there is nothing below);
    /// associations descend only when join-fetched.
    fn starting_attribute(&mut self, attribute: &AttributeDefinition) -> Result<bool, Self::Error>;
    fn finishing_attribute(&mut self, attribute: &AttributeDefinition) -> Result<(), Self::Error>;

    /// An any-typed collection element or index was found. Never pushed to
    /// any stack; attribute-level any mappings are handled inside
    /// `starting_attribute`.
    fn found_any(&mut self, any: &AnyMappingDefinition) -> Result<(), Self::Error>;

    /// The association's key was already registered in this walk: the same
    /// physical join predicate reached from a different attribute path. The
    /// walker skips the attribute entirely after this notification.
    fn found_circular_association(
        &mut self,
        attribute: &AttributeDefinition,
        association: &AssociationDefinition,
    ) -> Result<(), Self::Error>;

    fn is_duplicate_association_key(&self, key: &AssociationKey) -> bool;
    fn association_key_registered(&mut self, key: AssociationKey) -> Result<(), Self::Error>;
}

/// Walk an entity-rooted subgraph, notifying the strategy.
///
/// `finish` is guaranteed to run once `start` has succeeded, whether the
/// walk completes or unwinds with an error.
pub fn visit_entity<S: AssociationVisitationStrategy>(
    strategy: &mut S,
    graph: &DomainGraph,
    entity_name: &str,
) -> Result<(), S::Error> {
    let entity = graph.entity(entity_name)?;
    strategy.start()?;
    let outcome = MetamodelGraphWalker::new(strategy, graph).visit_entity_definition(entity);
    strategy.finish();
    outcome
}

/// Walk a collection-rooted subgraph (by role), notifying the strategy.
pub fn visit_collection<S: AssociationVisitationStrategy>(
    strategy: &mut S,
    graph: &DomainGraph,
    role: &str,
) -> Result<(), S::Error> {
    let collection = graph.collection(role)?;
    strategy.start()?;
    let outcome = MetamodelGraphWalker::new(strategy, graph).visit_collection_definition(collection);
    strategy.finish();
    outcome
}

/// The recursive driver. Depth-first, synchronous, single-threaded; recursion
/// depth is bounded by the fetch-strategy decisions that stop the descent
/// into non-join associations.
pub struct MetamodelGraphWalker<'a, S: AssociationVisitationStrategy> {
    strategy: &'a mut S,
    graph: &'a DomainGraph,
    current_path: PropertyPath,
}

impl<'a, S: AssociationVisitationStrategy> MetamodelGraphWalker<'a, S> {
    fn new(strategy: &'a mut S, graph: &'a DomainGraph) -> Self {
        MetamodelGraphWalker {
            strategy,
            graph,
            current_path: PropertyPath::root(),
        }
    }

    fn visit_entity_definition(&mut self, entity: &EntityDefinition) -> Result<(), S::Error> {
        self.strategy.starting_entity(entity)?;
        self.visit_identifier_definition(entity)?;
        self.visit_attributes(&entity.attributes)?;
        self.strategy.finishing_entity(entity)
    }

    fn visit_identifier_definition(&mut self, entity: &EntityDefinition) -> Result<(), S::Error> {
        self.strategy.starting_entity_identifier(entity)?;
        match &entity.identifier {
            IdentifierDefinition::Simple { .. } => {}
            IdentifierDefinition::EncapsulatedComposite { composite, .. } => {
                self.visit_composite_definition(composite)?;
            }
            IdentifierDefinition::NonEncapsulated { attributes, .. } => {
                for attribute in attributes {
                    self.visit_attribute_definition(attribute)?;
                }
            }
        }
        self.strategy.finishing_entity_identifier(entity)
    }

    fn visit_attributes(&mut self, attributes: &[AttributeDefinition]) -> Result<(), S::Error> {
        for attribute in attributes {
            self.visit_attribute_definition(attribute)?;
        }
        Ok(())
    }

    fn visit_attribute_definition(
        &mut self,
        attribute: &AttributeDefinition,
    ) -> Result<(), S::Error> {
        let sub_path = self.current_path.append(&attribute.name);
        log::debug!("Visiting attribute path : {}", sub_path.full_path());

        if let AttributeValue::Association(association) = &attribute.value {
            if self.strategy.is_duplicate_association_key(&association.key) {
                log::debug!(
                    "Property path deemed to be circular : {}",
                    sub_path.full_path()
                );
                return self
                    .strategy
                    .found_circular_association(attribute, association);
            }
        }

        let continue_walk = self.strategy.starting_attribute(attribute)?;
        if continue_walk {
            let previous = std::mem::replace(&mut self.current_path, sub_path);
            let outcome = match &attribute.value {
                AttributeValue::Basic(_) => Ok(()),
                AttributeValue::Composite(composite) => self.visit_composite_definition(composite),
                AttributeValue::Association(association) => self.visit_association(association),
            };
            self.current_path = previous;
            outcome?;
        }
        self.strategy.finishing_attribute(attribute)
    }

    fn visit_association(&mut self, association: &AssociationDefinition) -> Result<(), S::Error> {
        // registered after the starting_attribute push so the strategy can
        // record the owner and the pushed source for circular resolution
        self.strategy
            .association_key_registered(association.key.clone())?;

        match &association.nature {
            AssociationNature::Any(any) => self.strategy.found_any(any),
            AssociationNature::Entity { target } => {
                let entity = self.graph.entity(target)?;
                self.visit_entity_definition(entity)
            }
            AssociationNature::Collection(collection) => {
                self.visit_collection_definition(collection)
            }
        }
    }

    fn visit_collection_definition(
        &mut self,
        collection: &CollectionDefinition,
    ) -> Result<(), S::Error> {
        self.strategy.starting_collection(collection)?;
        self.visit_collection_index(collection)?;
        self.visit_collection_elements(collection)?;
        self.strategy.finishing_collection(collection)
    }

    fn visit_collection_index(
        &mut self,
        collection: &CollectionDefinition,
    ) -> Result<(), S::Error> {
        let Some(index) = &collection.index else {
            return Ok(());
        };
        self.strategy.starting_collection_index(collection, index)?;
        log::debug!(
            "Visiting index for collection : {}",
            self.current_path.full_path()
        );
        let sub_path = self.current_path.append(property_path::INDEX_MARKER);
        let previous = std::mem::replace(&mut self.current_path, sub_path);
        let outcome = self.visit_collection_part(index);
        self.current_path = previous;
        outcome?;
        self.strategy.finishing_collection_index(collection, index)
    }

    fn visit_collection_elements(
        &mut self,
        collection: &CollectionDefinition,
    ) -> Result<(), S::Error> {
        let element = &collection.element;
        self.strategy
            .starting_collection_elements(collection, element)?;
        let sub_path = self.current_path.append(property_path::ELEMENTS_MARKER);
        let previous = std::mem::replace(&mut self.current_path, sub_path);
        let outcome = self.visit_collection_part(element);
        self.current_path = previous;
        outcome?;
        self.strategy
            .finishing_collection_elements(collection, element)
    }

    fn visit_collection_part(&mut self, part: &CollectionPart) -> Result<(), S::Error> {
        match part {
            CollectionPart::Basic(_) => Ok(()),
            CollectionPart::Any(any) => self.strategy.found_any(any),
            CollectionPart::Composite(composite) => self.visit_composite_definition(composite),
            CollectionPart::Entity { target, .. } => {
                let entity = self.graph.entity(target)?;
                self.visit_entity_definition(entity)
            }
        }
    }

    fn visit_composite_definition(
        &mut self,
        composite: &CompositeDefinition,
    ) -> Result<(), S::Error> {
        self.strategy.starting_composite(composite)?;
        self.visit_attributes(&composite.attributes)?;
        self.strategy.finishing_composite(composite)
    }
}
