//! # Domain Graph Error Types
//!
//! Error handling for domain-model lookups and for loading/validating the
//! declarative model configuration.
//!
//! ## Error Categories
//!
//! - **Lookup Errors**: missing entity, collection role, or fetch profile
//! - **Model Errors**: structurally invalid model definitions
//! - **Configuration Errors**: file I/O and parsing issues during model loading

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DomainGraphError {
    #[error("No entity definition found for `{entity_name}`")]
    Entity { entity_name: String },
    #[error("No collection definition found for role `{role}`")]
    Collection { role: String },
    #[error("No fetch profile named `{profile}` is defined in the domain model")]
    FetchProfile { profile: String },
    #[error("Duplicate entity definition for `{entity_name}`")]
    DuplicateEntity { entity_name: String },
    #[error("Invalid domain model: {message}")]
    InvalidModel { message: String },
    #[error("Failed to read model configuration file: {error}")]
    ConfigReadError { error: String },
    #[error("Failed to parse model configuration: {error}")]
    ConfigParseError { error: String },
}

impl DomainGraphError {
    /// Create an InvalidModel error with context about where the problem was found.
    pub fn invalid_model(message: impl Into<String>, context: impl Into<String>) -> Self {
        DomainGraphError::InvalidModel {
            message: format!("{}\n  Context: {}", message.into(), context.into()),
        }
    }
}
