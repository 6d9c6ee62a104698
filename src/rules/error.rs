use thiserror::Error;

use crate::expr::error::CompileError;
use crate::routing::subject::PatternError;

/// Rejection of a rule definition or registry mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("route '{0}' already exists")]
    DuplicateRoute(String),

    #[error("route '{0}' not found")]
    RouteNotFound(String),

    #[error("route '{route_id}': {source}")]
    InvalidPattern {
        route_id: String,
        source: PatternError,
    },

    #[error("route '{route_id}': filter rejected: {source}")]
    Compile {
        route_id: String,
        source: CompileError,
    },

    #[error("route '{route_id}': {reason}")]
    InvalidRule { route_id: String, reason: String },

    #[error("route '{route_id}': invalid template: {reason}")]
    InvalidTemplate { route_id: String, reason: String },
}

impl RegistryError {
    /// Stable machine-readable name, used as a metric label and in API errors.
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::DuplicateRoute(_) => "duplicate_route",
            RegistryError::RouteNotFound(_) => "route_not_found",
            RegistryError::InvalidPattern { .. } => "invalid_pattern",
            RegistryError::Compile { source, .. } => match source {
                CompileError::Syntax { .. } => "syntax_error",
                CompileError::Type { .. } => "type_error",
            },
            RegistryError::InvalidRule { .. } => "invalid_rule",
            RegistryError::InvalidTemplate { .. } => "invalid_template",
        }
    }

    /// Errors raised while validating or compiling a definition, as opposed
    /// to conflicts with the current registry contents.
    pub fn is_definition_error(&self) -> bool {
        !matches!(
            self,
            RegistryError::DuplicateRoute(_) | RegistryError::RouteNotFound(_)
        )
    }
}
