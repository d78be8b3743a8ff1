//! Fetch timing/style types, load-time options, and the strategy resolver.
//!
//! The resolver is a pure function of the association's static mapping plus
//! the caller-supplied options and walk position. The builder relies on it
//! being deterministic within a walk so that the push decision made while
//! starting an attribute always agrees with the pop made while finishing it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain_graph::model::{AssociationDefinition, AssociationNature};
use crate::domain_graph::DomainGraph;
use crate::walker::property_path::PropertyPath;

/// When an association's target is populated relative to the owning query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchTiming {
    Immediate,
    Delayed,
}

/// How an association's target is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStyle {
    Join,
    Select,
    Subselect,
    Batch,
}

/// The resolved (timing, style) pair for one association in one walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchStrategy {
    pub timing: FetchTiming,
    pub style: FetchStyle,
}

impl FetchStrategy {
    pub const IMMEDIATE_JOIN: FetchStrategy = FetchStrategy {
        timing: FetchTiming::Immediate,
        style: FetchStyle::Join,
    };

    /// Only an immediate join fetch is walked inline.
    pub fn is_join(&self) -> bool {
        self.timing == FetchTiming::Immediate && self.style == FetchStyle::Join
    }
}

/// The fetch plan declared in the mapping, before options are applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedFetch {
    pub lazy: bool,
    pub style: FetchStyle,
}

/// Lock mode requested for root returns. Carried onto the plan unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    #[default]
    None,
    Read,
    PessimisticRead,
    PessimisticWrite,
}

/// A requested fetch graph: the set of property paths (relative to the walk
/// root) that must be join-fetched regardless of mapped laziness.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchGraph {
    paths: HashSet<String>,
}

impl FetchGraph {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FetchGraph {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn includes(&self, full_path: &str) -> bool {
        self.paths.contains(full_path)
    }
}

/// Caller-supplied, fetch-influencing options for one plan build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOptions {
    pub lock_mode: LockMode,
    pub active_fetch_profiles: HashSet<String>,
    pub enabled_filters: HashSet<String>,
    pub fetch_graph: Option<FetchGraph>,
    pub max_fetch_depth: Option<usize>,
}

impl LoadOptions {
    pub fn with_fetch_profile(mut self, profile: impl Into<String>) -> Self {
        self.active_fetch_profiles.insert(profile.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.enabled_filters.insert(filter.into());
        self
    }
}

/// Resolve the fetch strategy for one association at one walk position.
///
/// Resolution order: fetch-graph path override, then active fetch-profile
/// override for the association's role, then the mapped plan. A join
/// resolution is afterwards demoted to select when the join would be
/// structurally unreasonable (depth exceeded, second joined collection,
/// filtered collection). "Any" associations never resolve to join.
pub fn determine_fetch_strategy(
    association: &AssociationDefinition,
    role: Option<&str>,
    path: &PropertyPath,
    graph: &DomainGraph,
    options: &LoadOptions,
    current_depth: usize,
    collection_join_active: bool,
) -> FetchStrategy {
    let resolved = resolve_base_strategy(association, role, path, graph, options);
    adjust_join_fetch_if_needed(
        association,
        resolved,
        options,
        current_depth,
        collection_join_active,
    )
}

fn resolve_base_strategy(
    association: &AssociationDefinition,
    role: Option<&str>,
    path: &PropertyPath,
    graph: &DomainGraph,
    options: &LoadOptions,
) -> FetchStrategy {
    if let Some(fetch_graph) = &options.fetch_graph {
        if fetch_graph.includes(path.full_path()) {
            return FetchStrategy::IMMEDIATE_JOIN;
        }
    }

    if let Some(role) = role {
        for profile_name in &options.active_fetch_profiles {
            let Some(profile) = graph.fetch_profile(profile_name) else {
                continue;
            };
            if let Some(style) = profile.overrides.get(role) {
                // profile overrides are eager by definition
                return FetchStrategy {
                    timing: FetchTiming::Immediate,
                    style: *style,
                };
            }
        }
    }

    let style = association.fetch.style;
    let timing = determine_fetch_timing(style, association.fetch.lazy);
    FetchStrategy { timing, style }
}

fn determine_fetch_timing(style: FetchStyle, lazy: bool) -> FetchTiming {
    match style {
        FetchStyle::Join => FetchTiming::Immediate,
        FetchStyle::Select => {
            if lazy {
                FetchTiming::Delayed
            } else {
                FetchTiming::Immediate
            }
        }
        FetchStyle::Subselect | FetchStyle::Batch => FetchTiming::Delayed,
    }
}

fn adjust_join_fetch_if_needed(
    association: &AssociationDefinition,
    resolved: FetchStrategy,
    options: &LoadOptions,
    current_depth: usize,
    collection_join_active: bool,
) -> FetchStrategy {
    if association.nature.is_any() {
        // an "any" target has no single table to join
        return FetchStrategy {
            timing: determine_fetch_timing(FetchStyle::Select, association.fetch.lazy),
            style: FetchStyle::Select,
        };
    }

    if !resolved.is_join() {
        return resolved;
    }

    if let Some(max_depth) = options.max_fetch_depth {
        if current_depth > max_depth {
            return demoted_to_select(resolved);
        }
    }

    if let AssociationNature::Collection(collection) = &association.nature {
        if collection_join_active {
            // a second joined collection would multiply rows
            return demoted_to_select(resolved);
        }
        if collection
            .filters
            .iter()
            .any(|f| options.enabled_filters.contains(f))
        {
            return demoted_to_select(resolved);
        }
    }

    resolved
}

fn demoted_to_select(resolved: FetchStrategy) -> FetchStrategy {
    FetchStrategy {
        timing: resolved.timing,
        style: FetchStyle::Select,
    }
}
