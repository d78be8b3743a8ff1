//! The plan-building visitation strategy.
//!
//! Owns all mutable traversal state for one walk: the fetch-source frame
//! stack, the collection frame stack, the diagnostic path context, the
//! association-key registry and the query-space skeleton. Frames are pushed
//! by `starting_*` notifications and popped, with identity validation, by
//! the matching `finishing_*` notifications; a completed frame is converted
//! into its plan node and attached to its owner at pop time.

use crate::domain_graph::model::{
    AnyMappingDefinition, AssociationDefinition, AssociationNature, AttributeDefinition,
    AttributeValue, CollectionDefinition, CollectionPart, CompositeDefinition, EntityDefinition,
};
use crate::domain_graph::DomainGraph;
use crate::fetch_strategy::{self, FetchStrategy, FetchStyle, FetchTiming, LoadOptions};
use crate::load_plan::{
    AnyFetch, BidirectionalEntityReference, CollectionElementGraph, CollectionFetch,
    CollectionIndexGraph, CollectionReturn, CompositeElementGraph, CompositeFetch, Disposition,
    EntityElementGraph, EntityFetch, EntityIdentifierDescription, EntityReferenceDescriptor,
    EntityReturn, Fetch, LoadPlan, QuerySpaces, Return,
};
use crate::walker::errors::WalkingError;
use crate::walker::property_path::{
    PropertyPath, PropertyPathStack, ELEMENTS_MARKER, IDENTIFIER_MARKER, INDEX_MARKER,
};
use crate::walker::AssociationVisitationStrategy;

use super::association_key::{AssociationKey, AssociationKeyRegistry, RegisteredAssociation};
use super::errors::PlanBuildError;

/// The kind of root this walk is allowed to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Entity,
    Collection,
}

/// One open fetch source on the stack. The node it will become is assembled
/// from the frame when it pops.
#[derive(Debug)]
struct FetchSourceFrame {
    kind: FrameKind,
    path: PropertyPath,
    space_uid: String,
    identifier: Option<EntityIdentifierDescription>,
    fetches: Vec<Fetch>,
}

#[derive(Debug)]
enum FrameKind {
    RootEntity {
        entity_name: String,
    },
    EntityAttributeFetch {
        attribute: String,
        entity_name: String,
        strategy: FetchStrategy,
        nullable: bool,
        key: AssociationKey,
    },
    CompositeAttributeFetch {
        attribute: String,
        name: String,
    },
    EntityCollectionElement {
        role: String,
        entity_name: String,
    },
    CompositeCollectionElement {
        role: String,
        name: String,
    },
    EntityCollectionIndex {
        role: String,
        entity_name: String,
    },
    CompositeCollectionIndex {
        role: String,
        name: String,
    },
    EntityIdentifier {
        entity_name: String,
    },
}

impl FetchSourceFrame {
    fn describe(&self) -> String {
        match &self.kind {
            FrameKind::RootEntity { entity_name } => {
                format!("root entity return `{}`", entity_name)
            }
            FrameKind::EntityAttributeFetch {
                attribute,
                entity_name,
                ..
            } => format!(
                "entity fetch `{}` ({}) at {}",
                attribute, entity_name, self.path
            ),
            FrameKind::CompositeAttributeFetch { attribute, name } => {
                format!("composite fetch `{}` ({}) at {}", attribute, name, self.path)
            }
            FrameKind::EntityCollectionElement { role, entity_name } => {
                format!("entity element graph of `{}` ({})", role, entity_name)
            }
            FrameKind::CompositeCollectionElement { role, name } => {
                format!("composite element graph of `{}` ({})", role, name)
            }
            FrameKind::EntityCollectionIndex { role, entity_name } => {
                format!("entity index graph of `{}` ({})", role, entity_name)
            }
            FrameKind::CompositeCollectionIndex { role, name } => {
                format!("composite index graph of `{}` ({})", role, name)
            }
            FrameKind::EntityIdentifier { entity_name } => {
                format!("identifier description of `{}`", entity_name)
            }
        }
    }

    fn entity_name(&self) -> Option<&str> {
        match &self.kind {
            FrameKind::RootEntity { entity_name }
            | FrameKind::EntityAttributeFetch { entity_name, .. }
            | FrameKind::EntityCollectionElement { entity_name, .. }
            | FrameKind::EntityCollectionIndex { entity_name, .. }
            | FrameKind::EntityIdentifier { entity_name } => Some(entity_name),
            _ => None,
        }
    }

    /// The entity reference this frame IS, if it is one. Identifier and
    /// composite frames resolve through their owner instead.
    fn as_entity_descriptor(&self) -> Option<EntityReferenceDescriptor> {
        match &self.kind {
            FrameKind::RootEntity { entity_name }
            | FrameKind::EntityAttributeFetch { entity_name, .. }
            | FrameKind::EntityCollectionElement { entity_name, .. }
            | FrameKind::EntityCollectionIndex { entity_name, .. } => {
                Some(EntityReferenceDescriptor {
                    entity_name: entity_name.clone(),
                    space_uid: self.space_uid.clone(),
                    path: self.path.clone(),
                })
            }
            _ => None,
        }
    }

    fn accepts_composite(&self) -> bool {
        matches!(
            self.kind,
            FrameKind::CompositeAttributeFetch { .. }
                | FrameKind::CompositeCollectionElement { .. }
                | FrameKind::CompositeCollectionIndex { .. }
                | FrameKind::EntityIdentifier { .. }
        )
    }
}

/// Nearest enclosing entity reference, resolving through identifier and
/// composite frames.
fn resolve_entity_reference(frames: &[FetchSourceFrame]) -> Option<EntityReferenceDescriptor> {
    frames.iter().rev().find_map(FetchSourceFrame::as_entity_descriptor)
}

/// One open collection reference on the collection stack.
#[derive(Debug)]
struct CollectionFrame {
    kind: CollectionFrameKind,
    role: String,
    path: PropertyPath,
    space_uid: String,
    index: Option<CollectionIndexGraph>,
    element: Option<CollectionElementGraph>,
}

#[derive(Debug)]
enum CollectionFrameKind {
    Root,
    AttributeFetch {
        attribute: String,
        strategy: FetchStrategy,
        key: AssociationKey,
    },
}

pub struct LoadPlanBuildingStrategy<'a> {
    graph: &'a DomainGraph,
    options: &'a LoadOptions,
    root_kind: RootKind,
    query_spaces: QuerySpaces,
    fetch_source_stack: Vec<FetchSourceFrame>,
    collection_stack: Vec<CollectionFrame>,
    path_stack: PropertyPathStack,
    current_property_path: PropertyPath,
    registry: AssociationKeyRegistry,
    root_returns: Vec<Return>,
    joined_collection_count: usize,
}

impl<'a> LoadPlanBuildingStrategy<'a> {
    pub fn new(graph: &'a DomainGraph, options: &'a LoadOptions, root_kind: RootKind) -> Self {
        LoadPlanBuildingStrategy {
            graph,
            options,
            root_kind,
            query_spaces: QuerySpaces::new(),
            fetch_source_stack: Vec::new(),
            collection_stack: Vec::new(),
            path_stack: PropertyPathStack::new(),
            current_property_path: PropertyPath::root(),
            registry: AssociationKeyRegistry::new(),
            root_returns: Vec::new(),
            joined_collection_count: 0,
        }
    }

    /// Current navigation path, for logging/tracing collaborators.
    pub fn current_walk_path(&self) -> Option<&PropertyPath> {
        self.path_stack.current()
    }

    /// Finalize the walk into a plan. Fails if the walk produced no root.
    pub fn into_plan(self) -> Result<LoadPlan, PlanBuildError> {
        if self.root_returns.is_empty() {
            return Err(WalkingError::UnexpectedStackState {
                message: "walk completed without producing a root return".to_string(),
            }
            .into());
        }
        let disposition = match self.root_kind {
            RootKind::Entity => Disposition::EntityLoader,
            RootKind::Collection => Disposition::CollectionInitializer,
        };
        Ok(LoadPlan {
            disposition,
            returns: self.root_returns,
            query_spaces: self.query_spaces,
        })
    }

    fn supports_root_entity_returns(&self) -> bool {
        self.root_kind == RootKind::Entity
    }

    fn supports_root_collection_returns(&self) -> bool {
        self.root_kind == RootKind::Collection
    }

    // stack management ------------------------------------------------------

    fn push_source(&mut self, frame: FetchSourceFrame) {
        log::trace!("Pushing fetch source to stack : {}", frame.describe());
        self.path_stack.push(frame.path.clone());
        self.fetch_source_stack.push(frame);
    }

    fn pop_source(&mut self) -> Result<FetchSourceFrame, WalkingError> {
        let frame = self
            .fetch_source_stack
            .pop()
            .ok_or(WalkingError::EmptyStack)?;
        log::trace!("Popped fetch source from stack : {}", frame.describe());
        self.path_stack.pop();
        Ok(frame)
    }

    fn current_source(&self) -> Result<&FetchSourceFrame, WalkingError> {
        self.fetch_source_stack
            .last()
            .ok_or(WalkingError::EmptyStack)
    }

    fn current_source_fetches_mut(&mut self) -> Result<&mut Vec<Fetch>, WalkingError> {
        self.fetch_source_stack
            .last_mut()
            .map(|frame| &mut frame.fetches)
            .ok_or(WalkingError::EmptyStack)
    }

    fn push_collection(&mut self, frame: CollectionFrame) {
        log::trace!("Pushing collection reference to stack : `{}`", frame.role);
        self.path_stack.push(frame.path.clone());
        self.collection_stack.push(frame);
    }

    fn pop_collection(&mut self) -> Result<CollectionFrame, WalkingError> {
        let frame = self
            .collection_stack
            .pop()
            .ok_or_else(|| WalkingError::UnexpectedStackState {
                message: "no collection reference on stack".to_string(),
            })?;
        log::trace!("Popped collection reference from stack : `{}`", frame.role);
        self.path_stack.pop();
        Ok(frame)
    }

    fn current_collection_mut(&mut self) -> Result<&mut CollectionFrame, WalkingError> {
        self.collection_stack
            .last_mut()
            .ok_or_else(|| WalkingError::UnexpectedStackState {
                message: "no collection reference on stack".to_string(),
            })
    }

    // fetch-strategy resolution --------------------------------------------

    fn resolve_role(&self, attribute: &AttributeDefinition) -> Option<String> {
        resolve_entity_reference(&self.fetch_source_stack)
            .map(|owner| format!("{}.{}", owner.entity_name, attribute.name))
    }

    fn determine_fetch_strategy(
        &self,
        attribute: &AttributeDefinition,
        association: &AssociationDefinition,
        path: &PropertyPath,
    ) -> FetchStrategy {
        let role = self.resolve_role(attribute);
        fetch_strategy::determine_fetch_strategy(
            association,
            role.as_deref(),
            path,
            self.graph,
            self.options,
            self.fetch_source_stack.len(),
            self.joined_collection_count > 0,
        )
    }

    fn validate_fetch_plan(
        &self,
        strategy: &FetchStrategy,
        attribute: &AttributeDefinition,
    ) -> Result<(), PlanBuildError> {
        if strategy.style == FetchStyle::Join && strategy.timing == FetchTiming::Delayed {
            return Err(PlanBuildError::InvalidFetchPlan {
                role: self
                    .resolve_role(attribute)
                    .unwrap_or_else(|| attribute.name.clone()),
                reason: "join fetches cannot be delayed".to_string(),
            });
        }
        Ok(())
    }

    // attribute handling ----------------------------------------------------

    fn handle_composite_attribute(
        &mut self,
        attribute: &AttributeDefinition,
        composite: &CompositeDefinition,
    ) -> Result<(), PlanBuildError> {
        let path = self.current_source()?.path.append(&attribute.name);
        let space_uid = self.query_spaces.make_composite_space(&composite.name);
        self.push_source(FetchSourceFrame {
            kind: FrameKind::CompositeAttributeFetch {
                attribute: attribute.name.clone(),
                name: composite.name.clone(),
            },
            path,
            space_uid,
            identifier: None,
            fetches: Vec::new(),
        });
        Ok(())
    }

    fn handle_association_attribute(
        &mut self,
        attribute: &AttributeDefinition,
        association: &AssociationDefinition,
    ) -> Result<bool, PlanBuildError> {
        // fetch nodes carry the owning source's path (so element, index and
        // identifier sub-paths keep their markers); strategy resolution sees
        // the plain attribute path
        let path = self.current_source()?.path.append(&attribute.name);
        let resolution_path = self.current_property_path.clone();
        let strategy = self.determine_fetch_strategy(attribute, association, &resolution_path);
        self.validate_fetch_plan(&strategy, attribute)?;

        match &association.nature {
            AssociationNature::Any(_) => {
                // an any fetch can never be a join, so it is never pushed
                let fetch = Fetch::Any(AnyFetch {
                    attribute: attribute.name.clone(),
                    strategy,
                    path,
                });
                self.current_source_fetches_mut()?.push(fetch);
                Ok(false)
            }
            AssociationNature::Entity { target } => {
                let entity = self.graph.entity(target)?;
                if strategy.is_join() {
                    let owner_uid = self.current_source()?.space_uid.clone();
                    let space_uid = self
                        .query_spaces
                        .make_entity_space(&entity.name, &entity.table);
                    self.query_spaces.add_join(
                        &owner_uid,
                        space_uid.clone(),
                        association.key.columns.clone(),
                        entity.identifier.columns().to_vec(),
                        attribute.nullable,
                    )?;
                    self.push_source(FetchSourceFrame {
                        kind: FrameKind::EntityAttributeFetch {
                            attribute: attribute.name.clone(),
                            entity_name: entity.name.clone(),
                            strategy,
                            nullable: attribute.nullable,
                            key: association.key.clone(),
                        },
                        path,
                        space_uid,
                        identifier: None,
                        fetches: Vec::new(),
                    });
                    Ok(true)
                } else {
                    // the fetch node still exists so delayed loading knows
                    // about the association; its subtree is not walked
                    let fetch = Fetch::Entity(EntityFetch {
                        attribute: attribute.name.clone(),
                        entity_name: entity.name.clone(),
                        strategy,
                        nullable: attribute.nullable,
                        space_uid: None,
                        path,
                        identifier: None,
                        fetches: Vec::new(),
                    });
                    self.current_source_fetches_mut()?.push(fetch);
                    Ok(false)
                }
            }
            AssociationNature::Collection(collection) => {
                if strategy.is_join() {
                    let owner_uid = self.current_source()?.space_uid.clone();
                    let lhs_columns = self.owner_identifier_columns();
                    let space_uid = self
                        .query_spaces
                        .make_collection_space(&collection.role, &collection.table);
                    self.query_spaces.add_join(
                        &owner_uid,
                        space_uid.clone(),
                        lhs_columns,
                        collection.key_columns.clone(),
                        true,
                    )?;
                    self.push_collection(CollectionFrame {
                        kind: CollectionFrameKind::AttributeFetch {
                            attribute: attribute.name.clone(),
                            strategy,
                            key: association.key.clone(),
                        },
                        role: collection.role.clone(),
                        path,
                        space_uid,
                        index: None,
                        element: None,
                    });
                    self.joined_collection_count += 1;
                    Ok(true)
                } else {
                    let fetch = Fetch::Collection(CollectionFetch {
                        attribute: attribute.name.clone(),
                        role: collection.role.clone(),
                        strategy,
                        space_uid: None,
                        path,
                        index: None,
                        element: None,
                    });
                    self.current_source_fetches_mut()?.push(fetch);
                    Ok(false)
                }
            }
        }
    }

    /// Identifier columns of the nearest enclosing entity reference, for the
    /// owner side of a collection join.
    fn owner_identifier_columns(&self) -> Vec<String> {
        resolve_entity_reference(&self.fetch_source_stack)
            .and_then(|owner| self.graph.entity(&owner.entity_name).ok().map(|entity| {
                entity.identifier.columns().to_vec()
            }))
            .unwrap_or_default()
    }
}

impl AssociationVisitationStrategy for LoadPlanBuildingStrategy<'_> {
    type Error = PlanBuildError;

    fn start(&mut self) -> Result<(), PlanBuildError> {
        if !self.fetch_source_stack.is_empty() || !self.collection_stack.is_empty() {
            return Err(WalkingError::StackNotEmptyOnStart.into());
        }
        self.path_stack.push(PropertyPath::root());
        Ok(())
    }

    fn finish(&mut self) {
        if !self.fetch_source_stack.is_empty() {
            log::warn!(
                "Fetch source stack was not empty at walk completion; {} frame(s) forcibly cleared",
                self.fetch_source_stack.len()
            );
            self.fetch_source_stack.clear();
        }
        if !self.collection_stack.is_empty() {
            log::warn!(
                "Collection reference stack was not empty at walk completion; {} frame(s) forcibly cleared",
                self.collection_stack.len()
            );
            self.collection_stack.clear();
        }
        self.path_stack.pop();
        self.path_stack.drain_remaining();
    }

    fn starting_entity(&mut self, entity: &EntityDefinition) -> Result<(), PlanBuildError> {
        let is_root = self.fetch_source_stack.is_empty();
        if !is_root {
            // a fetch; the real work happened in starting_attribute or the
            // collection element/index hooks
            return Ok(());
        }

        log::trace!("Starting root entity : {}", entity.name);
        if !self.supports_root_entity_returns() {
            return Err(PlanBuildError::RootEntityReturnsNotSupported);
        }

        let space_uid = self
            .query_spaces
            .make_entity_space(&entity.name, &entity.table);
        self.push_source(FetchSourceFrame {
            kind: FrameKind::RootEntity {
                entity_name: entity.name.clone(),
            },
            path: PropertyPath::root(),
            space_uid,
            identifier: None,
            fetches: Vec::new(),
        });

        // register the root's identifying key so circular references back to
        // the root are recognized later in the walk
        self.association_key_registered(AssociationKey {
            table: entity.table.clone(),
            columns: entity.identifier.columns().to_vec(),
        })
    }

    fn finishing_entity(&mut self, entity: &EntityDefinition) -> Result<(), PlanBuildError> {
        let is_root = matches!(
            self.fetch_source_stack.last(),
            Some(frame) if matches!(
                &frame.kind,
                FrameKind::RootEntity { entity_name } if *entity_name == entity.name
            )
        );
        if !is_root {
            // a fetch; popped in finishing_attribute or the collection hooks
            return Ok(());
        }

        let frame = self.pop_source()?;
        match frame.kind {
            FrameKind::RootEntity { entity_name } => {
                self.root_returns.push(Return::Entity(EntityReturn {
                    entity_name,
                    space_uid: frame.space_uid,
                    path: frame.path,
                    lock_mode: self.options.lock_mode,
                    identifier: frame
                        .identifier
                        .unwrap_or(EntityIdentifierDescription::Simple),
                    fetches: frame.fetches,
                }));
                log::trace!("Finished root entity : {}", entity.name);
                Ok(())
            }
            _ => Err(WalkingError::MismatchedFrameOnPop {
                expected: format!("root entity return `{}`", entity.name),
                found: frame.describe(),
            }
            .into()),
        }
    }

    fn starting_entity_identifier(
        &mut self,
        entity: &EntityDefinition,
    ) -> Result<(), PlanBuildError> {
        let current = self.current_source()?;
        if current.entity_name() != Some(&entity.name) {
            return Err(WalkingError::UnexpectedIdentifierOwner {
                found: current.describe(),
                entity: entity.name.clone(),
            }
            .into());
        }

        if entity.identifier.is_composite() {
            let path = current.path.append(IDENTIFIER_MARKER);
            // identifier columns live in the entity's own table; the frame
            // shares the owning space
            let space_uid = current.space_uid.clone();
            log::trace!("Starting entity identifier : {}", entity.name);
            self.push_source(FetchSourceFrame {
                kind: FrameKind::EntityIdentifier {
                    entity_name: entity.name.clone(),
                },
                path,
                space_uid,
                identifier: None,
                fetches: Vec::new(),
            });
        }
        Ok(())
    }

    fn finishing_entity_identifier(
        &mut self,
        entity: &EntityDefinition,
    ) -> Result<(), PlanBuildError> {
        let top_is_identifier = matches!(
            self.current_source()?.kind,
            FrameKind::EntityIdentifier { .. }
        );
        if !top_is_identifier {
            // simple identifier: nothing was pushed, the current source must
            // be the entity owning the identifier
            let current = self.current_source()?;
            if current.entity_name() != Some(&entity.name) {
                return Err(WalkingError::UnexpectedIdentifierOwner {
                    found: current.describe(),
                    entity: entity.name.clone(),
                }
                .into());
            }
            if entity.identifier.is_composite() {
                return Err(WalkingError::UnexpectedStackState {
                    message: format!(
                        "expected identifier frame for `{}` on stack",
                        entity.name
                    ),
                }
                .into());
            }
            return Ok(());
        }

        let popped = self.pop_source()?;
        let identifier_matches = matches!(
            &popped.kind,
            FrameKind::EntityIdentifier { entity_name } if *entity_name == entity.name
        );
        if !identifier_matches {
            return Err(WalkingError::MismatchedFrameOnPop {
                expected: format!("identifier description of `{}`", entity.name),
                found: popped.describe(),
            }
            .into());
        }

        // the frame below must be the entity owning the identifier
        let owner = self
            .fetch_source_stack
            .last_mut()
            .ok_or(WalkingError::EmptyStack)?;
        if owner.entity_name() != Some(&entity.name) {
            return Err(WalkingError::UnexpectedIdentifierOwner {
                found: owner.describe(),
                entity: entity.name.clone(),
            }
            .into());
        }
        owner.identifier = Some(EntityIdentifierDescription::Composite {
            fetches: popped.fetches,
        });
        log::trace!("Finished entity identifier : {}", entity.name);
        Ok(())
    }

    fn starting_collection(
        &mut self,
        collection: &CollectionDefinition,
    ) -> Result<(), PlanBuildError> {
        let is_root = self.fetch_source_stack.is_empty();
        if !is_root {
            // a fetch; handled in starting_attribute
            return Ok(());
        }

        log::trace!("Starting root collection : {}", collection.role);
        if !self.supports_root_collection_returns() {
            return Err(PlanBuildError::RootCollectionReturnsNotSupported);
        }

        let space_uid = self
            .query_spaces
            .make_collection_space(&collection.role, &collection.table);
        self.push_collection(CollectionFrame {
            kind: CollectionFrameKind::Root,
            role: collection.role.clone(),
            path: PropertyPath::root(),
            space_uid,
            index: None,
            element: None,
        });

        self.association_key_registered(AssociationKey {
            table: collection.table.clone(),
            columns: collection.key_columns.clone(),
        })
    }

    fn finishing_collection(
        &mut self,
        collection: &CollectionDefinition,
    ) -> Result<(), PlanBuildError> {
        let is_root = self.fetch_source_stack.is_empty() && self.collection_stack.len() == 1;
        if !is_root {
            // a fetch; popped in finishing_attribute
            return Ok(());
        }

        let frame = self.pop_collection()?;
        if frame.role != collection.role {
            return Err(WalkingError::MismatchedFrameOnPop {
                expected: format!("collection reference `{}`", collection.role),
                found: format!("collection reference `{}`", frame.role),
            }
            .into());
        }
        self.root_returns.push(Return::Collection(CollectionReturn {
            role: frame.role,
            space_uid: frame.space_uid,
            path: frame.path,
            index: frame.index,
            element: frame.element,
        }));
        log::trace!("Finished root collection : {}", collection.role);
        Ok(())
    }

    fn starting_collection_index(
        &mut self,
        collection: &CollectionDefinition,
        index: &CollectionPart,
    ) -> Result<(), PlanBuildError> {
        log::trace!("Starting collection index graph : {}", collection.role);
        match index {
            CollectionPart::Basic(_) => {
                self.current_collection_mut()?.index = Some(CollectionIndexGraph::Basic);
                Ok(())
            }
            CollectionPart::Any(_) => {
                // any-typed indices are signalled via found_any, never pushed
                self.current_collection_mut()?.index = Some(CollectionIndexGraph::Any);
                Ok(())
            }
            CollectionPart::Entity { target, columns } => {
                let entity = self.graph.entity(target)?;
                let entity_name = entity.name.clone();
                let entity_table = entity.table.clone();
                let rhs_columns = entity.identifier.columns().to_vec();
                let (collection_uid, collection_path) = {
                    let frame = self.current_collection_mut()?;
                    (frame.space_uid.clone(), frame.path.clone())
                };
                let space_uid = self
                    .query_spaces
                    .make_entity_space(&entity_name, &entity_table);
                self.query_spaces.add_join(
                    &collection_uid,
                    space_uid.clone(),
                    columns.clone(),
                    rhs_columns,
                    false,
                )?;
                self.push_source(FetchSourceFrame {
                    kind: FrameKind::EntityCollectionIndex {
                        role: collection.role.clone(),
                        entity_name,
                    },
                    path: collection_path.append(INDEX_MARKER),
                    space_uid,
                    identifier: None,
                    fetches: Vec::new(),
                });
                Ok(())
            }
            CollectionPart::Composite(composite) => {
                let collection_path = self.current_collection_mut()?.path.clone();
                let space_uid = self
                    .query_spaces
                    .make_composite_space(&format!("{}.{}", collection.role, INDEX_MARKER));
                self.push_source(FetchSourceFrame {
                    kind: FrameKind::CompositeCollectionIndex {
                        role: collection.role.clone(),
                        name: composite.name.clone(),
                    },
                    path: collection_path.append(INDEX_MARKER),
                    space_uid,
                    identifier: None,
                    fetches: Vec::new(),
                });
                Ok(())
            }
        }
    }

    fn finishing_collection_index(
        &mut self,
        collection: &CollectionDefinition,
        index: &CollectionPart,
    ) -> Result<(), PlanBuildError> {
        match index {
            CollectionPart::Basic(_) | CollectionPart::Any(_) => {
                // nothing was pushed in starting_collection_index
            }
            CollectionPart::Entity { .. } => {
                let popped = self.pop_source()?;
                match popped.kind {
                    FrameKind::EntityCollectionIndex { role, entity_name }
                        if role == collection.role =>
                    {
                        let graph = CollectionIndexGraph::Entity(EntityElementGraph {
                            entity_name,
                            space_uid: popped.space_uid,
                            path: popped.path,
                            identifier: popped
                                .identifier
                                .unwrap_or(EntityIdentifierDescription::Simple),
                            fetches: popped.fetches,
                        });
                        self.current_collection_mut()?.index = Some(graph);
                    }
                    _ => {
                        return Err(WalkingError::MismatchedFrameOnPop {
                            expected: format!("entity index graph of `{}`", collection.role),
                            found: popped.describe(),
                        }
                        .into())
                    }
                }
            }
            CollectionPart::Composite(_) => {
                let popped = self.pop_source()?;
                match popped.kind {
                    FrameKind::CompositeCollectionIndex { role, name }
                        if role == collection.role =>
                    {
                        let graph = CollectionIndexGraph::Composite(CompositeElementGraph {
                            name,
                            space_uid: popped.space_uid,
                            path: popped.path,
                            fetches: popped.fetches,
                        });
                        self.current_collection_mut()?.index = Some(graph);
                    }
                    _ => {
                        return Err(WalkingError::MismatchedFrameOnPop {
                            expected: format!("composite index graph of `{}`", collection.role),
                            found: popped.describe(),
                        }
                        .into())
                    }
                }
            }
        }
        log::trace!("Finished collection index graph : {}", collection.role);
        Ok(())
    }

    fn starting_collection_elements(
        &mut self,
        collection: &CollectionDefinition,
        element: &CollectionPart,
    ) -> Result<(), PlanBuildError> {
        log::trace!("Starting collection element graph : {}", collection.role);
        match element {
            CollectionPart::Basic(_) => {
                self.current_collection_mut()?.element = Some(CollectionElementGraph::Basic);
                Ok(())
            }
            CollectionPart::Any(_) => {
                self.current_collection_mut()?.element = Some(CollectionElementGraph::Any);
                Ok(())
            }
            CollectionPart::Entity { target, columns } => {
                let entity = self.graph.entity(target)?;
                let entity_name = entity.name.clone();
                let entity_table = entity.table.clone();
                let rhs_columns = entity.identifier.columns().to_vec();
                let (collection_uid, collection_path) = {
                    let frame = self.current_collection_mut()?;
                    (frame.space_uid.clone(), frame.path.clone())
                };
                let space_uid = self
                    .query_spaces
                    .make_entity_space(&entity_name, &entity_table);
                self.query_spaces.add_join(
                    &collection_uid,
                    space_uid.clone(),
                    columns.clone(),
                    rhs_columns,
                    false,
                )?;
                self.push_source(FetchSourceFrame {
                    kind: FrameKind::EntityCollectionElement {
                        role: collection.role.clone(),
                        entity_name,
                    },
                    path: collection_path.append(ELEMENTS_MARKER),
                    space_uid,
                    identifier: None,
                    fetches: Vec::new(),
                });
                Ok(())
            }
            CollectionPart::Composite(composite) => {
                let collection_path = self.current_collection_mut()?.path.clone();
                let space_uid = self
                    .query_spaces
                    .make_composite_space(&format!("{}.{}", collection.role, ELEMENTS_MARKER));
                self.push_source(FetchSourceFrame {
                    kind: FrameKind::CompositeCollectionElement {
                        role: collection.role.clone(),
                        name: composite.name.clone(),
                    },
                    path: collection_path.append(ELEMENTS_MARKER),
                    space_uid,
                    identifier: None,
                    fetches: Vec::new(),
                });
                Ok(())
            }
        }
    }

    fn finishing_collection_elements(
        &mut self,
        collection: &CollectionDefinition,
        element: &CollectionPart,
    ) -> Result<(), PlanBuildError> {
        match element {
            CollectionPart::Basic(_) | CollectionPart::Any(_) => {
                // nothing was pushed in starting_collection_elements
            }
            CollectionPart::Entity { .. } => {
                let popped = self.pop_source()?;
                match popped.kind {
                    FrameKind::EntityCollectionElement { role, entity_name }
                        if role == collection.role =>
                    {
                        let graph = CollectionElementGraph::Entity(EntityElementGraph {
                            entity_name,
                            space_uid: popped.space_uid,
                            path: popped.path,
                            identifier: popped
                                .identifier
                                .unwrap_or(EntityIdentifierDescription::Simple),
                            fetches: popped.fetches,
                        });
                        self.current_collection_mut()?.element = Some(graph);
                    }
                    _ => {
                        return Err(WalkingError::MismatchedFrameOnPop {
                            expected: format!("entity element graph of `{}`", collection.role),
                            found: popped.describe(),
                        }
                        .into())
                    }
                }
            }
            CollectionPart::Composite(_) => {
                let popped = self.pop_source()?;
                match popped.kind {
                    FrameKind::CompositeCollectionElement { role, name }
                        if role == collection.role =>
                    {
                        let graph = CollectionElementGraph::Composite(CompositeElementGraph {
                            name,
                            space_uid: popped.space_uid,
                            path: popped.path,
                            fetches: popped.fetches,
                        });
                        self.current_collection_mut()?.element = Some(graph);
                    }
                    _ => {
                        return Err(WalkingError::MismatchedFrameOnPop {
                            expected: format!("composite element graph of `{}`", collection.role),
                            found: popped.describe(),
                        }
                        .into())
                    }
                }
            }
        }
        log::trace!("Finished collection element graph : {}", collection.role);
        Ok(())
    }

    fn starting_composite(&mut self, composite: &CompositeDefinition) -> Result<(), PlanBuildError> {
        log::trace!("Starting composite : {}", composite.name);
        if self.fetch_source_stack.is_empty() && self.collection_stack.is_empty() {
            return Err(WalkingError::CompositeRoot.into());
        }
        // nothing to push; the frame was pushed by the attribute, element,
        // index or identifier notification that introduced the composite
        let current = self.current_source()?;
        if !current.accepts_composite() {
            return Err(WalkingError::UnexpectedStackState {
                message: format!(
                    "expected a composite-accepting fetch source on top of stack, found {}",
                    current.describe()
                ),
            }
            .into());
        }
        Ok(())
    }

    fn finishing_composite(&mut self, composite: &CompositeDefinition) -> Result<(), PlanBuildError> {
        // popped by the finishing notification of whichever hook pushed it
        log::trace!("Finishing composite : {}", composite.name);
        Ok(())
    }

    fn starting_attribute(
        &mut self,
        attribute: &AttributeDefinition,
    ) -> Result<bool, PlanBuildError> {
        log::trace!(
            "{} Starting attribute {}",
            ">>".repeat(self.fetch_source_stack.len()),
            attribute.name
        );
        self.current_property_path = self.current_property_path.append(&attribute.name);

        match &attribute.value {
            AttributeValue::Basic(_) => Ok(true),
            AttributeValue::Composite(composite) => {
                self.handle_composite_attribute(attribute, composite)?;
                Ok(true)
            }
            AttributeValue::Association(association) => {
                self.handle_association_attribute(attribute, association)
            }
        }
    }

    fn finishing_attribute(&mut self, attribute: &AttributeDefinition) -> Result<(), PlanBuildError> {
        match &attribute.value {
            AttributeValue::Basic(_) => {}
            AttributeValue::Composite(_) => {
                // a composite frame is always pushed in starting_attribute,
                // so the pop must match it exactly
                let popped = self.pop_source()?;
                match popped.kind {
                    FrameKind::CompositeAttributeFetch { attribute: popped_attribute, name }
                        if popped_attribute == attribute.name =>
                    {
                        let fetch = Fetch::Composite(CompositeFetch {
                            attribute: popped_attribute,
                            name,
                            space_uid: popped.space_uid,
                            path: popped.path,
                            fetches: popped.fetches,
                        });
                        self.current_source_fetches_mut()?.push(fetch);
                    }
                    _ => {
                        return Err(WalkingError::MismatchedFrameOnPop {
                            expected: format!("composite fetch for attribute `{}`", attribute.name),
                            found: popped.describe(),
                        }
                        .into())
                    }
                }
            }
            AttributeValue::Association(association) => match &association.nature {
                AssociationNature::Any(_) => {
                    // any fetches are never pushed, so there is nothing to pop
                }
                AssociationNature::Entity { target } => {
                    // pop exactly when starting_attribute pushed for this
                    // attribute; the skip is symmetric with the non-join
                    // path. The key comparison tells this attribute's frame
                    // apart from an enclosing fetch that happens to share
                    // its name (keys are registered at most once per walk).
                    let was_pushed = matches!(
                        self.fetch_source_stack.last(),
                        Some(frame) if matches!(
                            &frame.kind,
                            FrameKind::EntityAttributeFetch { attribute: pushed, key, .. }
                                if *pushed == attribute.name && *key == association.key
                        )
                    );
                    if was_pushed {
                        let popped = self.pop_source()?;
                        match popped.kind {
                            FrameKind::EntityAttributeFetch {
                                attribute: popped_attribute,
                                entity_name,
                                strategy,
                                nullable,
                                ..
                            } if entity_name == *target => {
                                let fetch = Fetch::Entity(EntityFetch {
                                    attribute: popped_attribute,
                                    entity_name,
                                    strategy,
                                    nullable,
                                    space_uid: Some(popped.space_uid),
                                    path: popped.path,
                                    identifier: Some(
                                        popped
                                            .identifier
                                            .unwrap_or(EntityIdentifierDescription::Simple),
                                    ),
                                    fetches: popped.fetches,
                                });
                                self.current_source_fetches_mut()?.push(fetch);
                            }
                            _ => {
                                return Err(WalkingError::MismatchedFrameOnPop {
                                    expected: format!(
                                        "entity fetch `{}` ({})",
                                        attribute.name, target
                                    ),
                                    found: popped.describe(),
                                }
                                .into())
                            }
                        }
                    }
                }
                AssociationNature::Collection(collection) => {
                    let was_pushed = matches!(
                        self.collection_stack.last(),
                        Some(frame) if matches!(
                            &frame.kind,
                            CollectionFrameKind::AttributeFetch { attribute: pushed, key, .. }
                                if *pushed == attribute.name && *key == association.key
                        )
                    );
                    if was_pushed {
                        let popped = self.pop_collection()?;
                        if popped.role != collection.role {
                            return Err(WalkingError::MismatchedFrameOnPop {
                                expected: format!("collection reference `{}`", collection.role),
                                found: format!("collection reference `{}`", popped.role),
                            }
                            .into());
                        }
                        if let CollectionFrameKind::AttributeFetch {
                            attribute: popped_attribute,
                            strategy,
                            ..
                        } = popped.kind
                        {
                            let fetch = Fetch::Collection(CollectionFetch {
                                attribute: popped_attribute,
                                role: popped.role,
                                strategy,
                                space_uid: Some(popped.space_uid),
                                path: popped.path,
                                index: popped.index,
                                element: popped.element,
                            });
                            self.current_source_fetches_mut()?.push(fetch);
                        }
                    }
                }
            },
        }

        log::trace!(
            "{} Finishing attribute {}",
            "<<".repeat(self.fetch_source_stack.len()),
            attribute.name
        );
        self.current_property_path = self
            .current_property_path
            .parent()
            .cloned()
            .unwrap_or_else(PropertyPath::root);
        Ok(())
    }

    fn found_any(&mut self, any: &AnyMappingDefinition) -> Result<(), PlanBuildError> {
        // any-typed collection elements/indices carry no fetch source; the
        // element/index shape was already recorded by the collection hooks
        log::trace!(
            "Encountered any mapping (discriminator `{}`); no fetch source",
            any.discriminator_column
        );
        Ok(())
    }

    fn found_circular_association(
        &mut self,
        attribute: &AttributeDefinition,
        association: &AssociationDefinition,
    ) -> Result<(), PlanBuildError> {
        // the walker skipped starting_attribute, so neither path was appended
        let resolution_path = self.current_property_path.append(&attribute.name);
        let path = self.current_source()?.path.append(&attribute.name);
        let strategy = self.determine_fetch_strategy(attribute, association, &resolution_path);
        if !strategy.is_join() {
            // the association will surface on its non-circular path
            return Ok(());
        }

        match &association.nature {
            AssociationNature::Entity { target } => {
                let current_reference = resolve_entity_reference(&self.fetch_source_stack)
                    .ok_or_else(|| WalkingError::UnexpectedStackState {
                        message: "circular association found with no current entity reference"
                            .to_string(),
                    })?;
                let current_entity = self.graph.entity(&current_reference.entity_name)?;
                let current_key = AssociationKey {
                    table: current_entity.table.clone(),
                    columns: current_entity.identifier.columns().to_vec(),
                };
                if association.key == current_key {
                    // the key is the current entity's own identifying
                    // relationship (derived identifier), not a bidirectional
                    // link
                    return Ok(());
                }

                let registered = self
                    .registry
                    .lookup(&association.key)
                    .ok_or_else(|| WalkingError::UnregisteredAssociationKey {
                        key: association.key.to_string(),
                    })?
                    .source
                    .clone();
                match registered {
                    Some(source) => {
                        let fetch = Fetch::BidirectionalEntity(BidirectionalEntityReference {
                            attribute: attribute.name.clone(),
                            entity_name: target.clone(),
                            strategy,
                            path,
                            target: source,
                        });
                        self.current_source_fetches_mut()?.push(fetch);
                    }
                    None => {
                        log::debug!(
                            "Circular association `{}` has no registered source reference; skipping",
                            association.key
                        );
                    }
                }
            }
            AssociationNature::Collection(collection) => {
                let registered = self
                    .registry
                    .lookup(&association.key)
                    .ok_or_else(|| WalkingError::UnregisteredAssociationKey {
                        key: association.key.to_string(),
                    })?
                    .owner
                    .clone();
                match registered {
                    Some(owner) => {
                        let owner_uid = self.current_source()?.space_uid.clone();
                        let lhs_columns = self.owner_identifier_columns();
                        let space_uid = self
                            .query_spaces
                            .make_collection_space(&collection.role, &collection.table);
                        self.query_spaces.add_join(
                            &owner_uid,
                            space_uid.clone(),
                            lhs_columns,
                            collection.key_columns.clone(),
                            true,
                        )?;
                        self.joined_collection_count += 1;
                        let element =
                            CollectionElementGraph::BidirectionalEntity(BidirectionalEntityReference {
                                attribute: attribute.name.clone(),
                                entity_name: owner.entity_name.clone(),
                                strategy,
                                path: path.append(ELEMENTS_MARKER),
                                target: owner,
                            });
                        let fetch = Fetch::Collection(CollectionFetch {
                            attribute: attribute.name.clone(),
                            role: collection.role.clone(),
                            strategy,
                            space_uid: Some(space_uid),
                            path,
                            index: None,
                            element: Some(element),
                        });
                        self.current_source_fetches_mut()?.push(fetch);
                    }
                    None => {
                        log::debug!(
                            "Circular collection `{}` has no registered owner reference; skipping",
                            association.key
                        );
                    }
                }
            }
            AssociationNature::Any(_) => {
                // any keys are never registered, so an any association can
                // never be deemed circular
            }
        }
        Ok(())
    }

    fn is_duplicate_association_key(&self, key: &AssociationKey) -> bool {
        self.registry.is_duplicate(key)
    }

    fn association_key_registered(&mut self, key: AssociationKey) -> Result<(), PlanBuildError> {
        let source = resolve_entity_reference(&self.fetch_source_stack);
        let top_is_this_association = matches!(
            self.fetch_source_stack.last(),
            Some(frame) if matches!(
                &frame.kind,
                FrameKind::EntityAttributeFetch { key: frame_key, .. } if *frame_key == key
            )
        );
        let owner = if top_is_this_association {
            let below = &self.fetch_source_stack[..self.fetch_source_stack.len() - 1];
            resolve_entity_reference(below)
        } else {
            source.clone()
        };
        self.registry
            .register(key, RegisteredAssociation { owner, source });
        Ok(())
    }
}
