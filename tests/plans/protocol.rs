//! Protocol-level tests: notification pairing and root-kind guards,
//! exercised through the walker directly.

use std::collections::HashSet;

use loadgraph::domain_graph::model::{
    AnyMappingDefinition, AssociationDefinition, AttributeDefinition, CollectionDefinition,
    CollectionPart, CompositeDefinition, EntityDefinition,
};
use loadgraph::fetch_strategy::LoadOptions;
use loadgraph::plan_builder::association_key::AssociationKey;
use loadgraph::plan_builder::errors::PlanBuildError;
use loadgraph::plan_builder::strategy::{LoadPlanBuildingStrategy, RootKind};
use loadgraph::walker::{self, AssociationVisitationStrategy};

use crate::fixtures::*;

/// Records every notification and checks start/finish pairing in LIFO order.
/// Descends everywhere, deduplicating keys the way a real strategy does, so
/// cyclic graphs stay finite.
#[derive(Default)]
struct BalanceProbe {
    open: Vec<String>,
    started: usize,
    finished: usize,
    max_depth: usize,
    seen_keys: HashSet<AssociationKey>,
    circular_hits: usize,
}

impl BalanceProbe {
    fn opened(&mut self, tag: String) {
        self.open.push(tag);
        self.started += 1;
        self.max_depth = self.max_depth.max(self.open.len());
    }

    fn closed(&mut self, tag: String) {
        let top = self.open.pop();
        assert_eq!(top.as_deref(), Some(tag.as_str()), "unbalanced pairing");
        self.finished += 1;
    }
}

impl AssociationVisitationStrategy for BalanceProbe {
    type Error = PlanBuildError;

    fn start(&mut self) -> Result<(), PlanBuildError> {
        assert!(self.open.is_empty());
        Ok(())
    }

    fn finish(&mut self) {
        assert!(self.open.is_empty(), "open frames at walk completion");
    }

    fn starting_entity(&mut self, entity: &EntityDefinition) -> Result<(), PlanBuildError> {
        self.opened(format!("entity:{}", entity.name));
        Ok(())
    }

    fn finishing_entity(&mut self, entity: &EntityDefinition) -> Result<(), PlanBuildError> {
        self.closed(format!("entity:{}", entity.name));
        Ok(())
    }

    fn starting_entity_identifier(
        &mut self,
        entity: &EntityDefinition,
    ) -> Result<(), PlanBuildError> {
        self.opened(format!("id:{}", entity.name));
        Ok(())
    }

    fn finishing_entity_identifier(
        &mut self,
        entity: &EntityDefinition,
    ) -> Result<(), PlanBuildError> {
        self.closed(format!("id:{}", entity.name));
        Ok(())
    }

    fn starting_collection(
        &mut self,
        collection: &CollectionDefinition,
    ) -> Result<(), PlanBuildError> {
        self.opened(format!("collection:{}", collection.role));
        Ok(())
    }

    fn finishing_collection(
        &mut self,
        collection: &CollectionDefinition,
    ) -> Result<(), PlanBuildError> {
        self.closed(format!("collection:{}", collection.role));
        Ok(())
    }

    fn starting_collection_index(
        &mut self,
        collection: &CollectionDefinition,
        _index: &CollectionPart,
    ) -> Result<(), PlanBuildError> {
        self.opened(format!("index:{}", collection.role));
        Ok(())
    }

    fn finishing_collection_index(
        &mut self,
        collection: &CollectionDefinition,
        _index: &CollectionPart,
    ) -> Result<(), PlanBuildError> {
        self.closed(format!("index:{}", collection.role));
        Ok(())
    }

    fn starting_collection_elements(
        &mut self,
        collection: &CollectionDefinition,
        _element: &CollectionPart,
    ) -> Result<(), PlanBuildError> {
        self.opened(format!("elements:{}", collection.role));
        Ok(())
    }

    fn finishing_collection_elements(
        &mut self,
        collection: &CollectionDefinition,
        _element: &CollectionPart,
    ) -> Result<(), PlanBuildError> {
        self.closed(format!("elements:{}", collection.role));
        Ok(())
    }

    fn starting_composite(&mut self, composite: &CompositeDefinition) -> Result<(), PlanBuildError> {
        self.opened(format!("composite:{}", composite.name));
        Ok(())
    }

    fn finishing_composite(
        &mut self,
        composite: &CompositeDefinition,
    ) -> Result<(), PlanBuildError> {
        self.closed(format!("composite:{}", composite.name));
        Ok(())
    }

    fn starting_attribute(
        &mut self,
        attribute: &AttributeDefinition,
    ) -> Result<bool, PlanBuildError> {
        self.opened(format!("attribute:{}", attribute.name));
        Ok(true)
    }

    fn finishing_attribute(
        &mut self,
        attribute: &AttributeDefinition,
    ) -> Result<(), PlanBuildError> {
        self.closed(format!("attribute:{}", attribute.name));
        Ok(())
    }

    fn found_any(&mut self, _any: &AnyMappingDefinition) -> Result<(), PlanBuildError> {
        Ok(())
    }

    fn found_circular_association(
        &mut self,
        _attribute: &AttributeDefinition,
        _association: &AssociationDefinition,
    ) -> Result<(), PlanBuildError> {
        self.circular_hits += 1;
        Ok(())
    }

    fn is_duplicate_association_key(&self, key: &AssociationKey) -> bool {
        self.seen_keys.contains(key)
    }

    fn association_key_registered(&mut self, key: AssociationKey) -> Result<(), PlanBuildError> {
        assert!(self.seen_keys.insert(key), "key registered twice");
        Ok(())
    }
}

#[test]
fn every_starting_notification_has_a_matching_finishing_notification() {
    let _ = env_logger::builder().is_test(true).try_init();
    let graph = order_customer_graph();

    let mut probe = BalanceProbe::default();
    walker::visit_entity(&mut probe, &graph, "Order").unwrap();

    assert!(probe.open.is_empty());
    assert_eq!(probe.started, probe.finished);
    assert!(probe.max_depth > 3, "walk should have nested notifications");
    // Customer.orders reuses Order.customer's key, so the dedup check fires
    // exactly once
    assert_eq!(probe.circular_hits, 1);
}

#[test]
fn collection_rooted_walk_is_balanced_too() {
    let graph = order_customer_graph();

    let mut probe = BalanceProbe::default();
    walker::visit_collection(&mut probe, &graph, "Customer.orders").unwrap();

    assert!(probe.open.is_empty());
    assert_eq!(probe.started, probe.finished);
}

#[test]
fn entity_root_is_rejected_by_a_collection_rooted_strategy() {
    let graph = order_customer_graph();
    let options = LoadOptions::default();

    let mut strategy = LoadPlanBuildingStrategy::new(&graph, &options, RootKind::Collection);
    let err = walker::visit_entity(&mut strategy, &graph, "Order").unwrap_err();
    assert_eq!(err, PlanBuildError::RootEntityReturnsNotSupported);
}

#[test]
fn collection_root_is_rejected_by_an_entity_rooted_strategy() {
    let graph = order_customer_graph();
    let options = LoadOptions::default();

    let mut strategy = LoadPlanBuildingStrategy::new(&graph, &options, RootKind::Entity);
    let err = walker::visit_collection(&mut strategy, &graph, "Customer.orders").unwrap_err();
    assert_eq!(err, PlanBuildError::RootCollectionReturnsNotSupported);
}
