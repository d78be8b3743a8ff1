//! Plan-build error taxonomy.
//!
//! Mapping/configuration problems ([`crate::domain_graph::errors::DomainGraphError`],
//! rejected root kinds, incoherent fetch plans) are reported to the caller as
//! a rejected build request. Traversal-consistency problems
//! ([`crate::walker::errors::WalkingError`]) indicate a defect in the walk
//! itself and surface as a distinct kind. Nothing is retried here; no
//! partial plan is ever returned on failure.

use thiserror::Error;

use crate::domain_graph::errors::DomainGraphError;
use crate::walker::errors::WalkingError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlanBuildError {
    #[error("This strategy does not support root entity returns")]
    RootEntityReturnsNotSupported,
    #[error("This strategy does not support root collection returns")]
    RootCollectionReturnsNotSupported,
    #[error("Fetch plan for `{role}` is incoherent: {reason}")]
    InvalidFetchPlan { role: String, reason: String },
    #[error(transparent)]
    Graph(#[from] DomainGraphError),
    #[error(transparent)]
    Walking(#[from] WalkingError),
}
