//! Loadgraph - load-plan construction over a declarative domain model
//!
//! This crate walks a read-only domain model (entities, embedded composites,
//! collections and their associations) and produces an executable load plan:
//! - Root returns with nested fetch graphs
//! - Per-association fetch strategies (join / select / subselect / batch)
//! - Circular and bidirectional association resolution
//! - A relational query-space skeleton for a downstream SQL-building stage

pub mod domain_graph;
pub mod fetch_strategy;
pub mod load_plan;
pub mod plan_builder;
pub mod walker;
