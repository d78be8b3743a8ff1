//! Plan assembly: one full walk from a root navigable to a [`LoadPlan`].
//!
//! The entry points validate the requested root and options, run the walk
//! and package the resulting return graph and query skeleton. Cleanup of the
//! traversal state is guaranteed on every exit path; on failure no partial
//! plan is returned.

pub mod association_key;
pub mod errors;
pub mod strategy;

use crate::domain_graph::errors::DomainGraphError;
use crate::domain_graph::DomainGraph;
use crate::fetch_strategy::LoadOptions;
use crate::load_plan::LoadPlan;
use crate::walker;
use errors::PlanBuildError;
use strategy::{LoadPlanBuildingStrategy, RootKind};

/// Build a plan for loading one entity by identifier: a single root entity
/// return with the join-fetched subgraph nested beneath it.
pub fn build_entity_load_plan(
    graph: &DomainGraph,
    entity_name: &str,
    options: &LoadOptions,
) -> Result<LoadPlan, PlanBuildError> {
    validate_options(graph, options)?;
    let mut strategy = LoadPlanBuildingStrategy::new(graph, options, RootKind::Entity);
    walker::visit_entity(&mut strategy, graph, entity_name)?;
    let plan = strategy.into_plan()?;
    log::debug!(
        "Built entity load plan for `{}` :\n{}",
        entity_name,
        plan.to_pretty_json()
    );
    Ok(plan)
}

/// Build a plan for initializing one collection by role: a single root
/// collection return with its index/element graphs.
pub fn build_collection_load_plan(
    graph: &DomainGraph,
    role: &str,
    options: &LoadOptions,
) -> Result<LoadPlan, PlanBuildError> {
    validate_options(graph, options)?;
    let mut strategy = LoadPlanBuildingStrategy::new(graph, options, RootKind::Collection);
    walker::visit_collection(&mut strategy, graph, role)?;
    let plan = strategy.into_plan()?;
    log::debug!(
        "Built collection load plan for `{}` :\n{}",
        role,
        plan.to_pretty_json()
    );
    Ok(plan)
}

fn validate_options(graph: &DomainGraph, options: &LoadOptions) -> Result<(), PlanBuildError> {
    for profile in &options.active_fetch_profiles {
        if graph.fetch_profile(profile).is_none() {
            return Err(DomainGraphError::FetchProfile {
                profile: profile.clone(),
            }
            .into());
        }
    }
    Ok(())
}
