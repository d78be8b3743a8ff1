//! Traversal-consistency errors.
//!
//! These indicate a defect in the walking logic or an inconsistent domain
//! graph, as opposed to mapping/configuration problems. They are fatal to the
//! current walk and never silently ignored mid-walk.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum WalkingError {
    #[error("Fetch owner stack was not empty on start; strategy instances must not be used concurrently")]
    StackNotEmptyOnStart,
    #[error("Mismatched fetch source from stack on pop; expected {expected}, but found {found}")]
    MismatchedFrameOnPop { expected: String, found: String },
    #[error("Unexpected state in fetch source stack: {message}")]
    UnexpectedStackState { message: String },
    #[error("No fetch source is currently on the stack")]
    EmptyStack,
    #[error("A composite cannot be the root of a walk")]
    CompositeRoot,
    #[error(
        "Encountered unexpected fetch owner [{found}] in stack while processing entity identifier for [{entity}]"
    )]
    UnexpectedIdentifierOwner { found: String, entity: String },
    #[error("Expecting an association key registration for {key}")]
    UnregisteredAssociationKey { key: String },
}
