//! Error types for the search facade.

use thiserror::Error;

/// Failure kinds surfaced by every facade operation.
///
/// Builder errors (`InvalidQuery`, `InvalidAggregation`, `InvalidRequest`)
/// are raised before any round trip to the engine.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Malformed or empty query parameters.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Malformed aggregation, duplicate name, unknown sub-aggregation
    /// reference or non-positive size.
    #[error("Invalid aggregation: {0}")]
    InvalidAggregation(String),

    /// A write request is missing something it needs (e.g. the document id).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The request never asked for an aggregation with this name.
    #[error("Aggregation not present in request: {0}")]
    MissingAggregation(String),

    /// The aggregation exists but has a different result shape.
    #[error("Aggregation '{name}' is a {actual} result, not {expected}")]
    TypeMismatch {
        /// Aggregation name.
        name: String,
        /// Shape the caller asked for.
        expected: &'static str,
        /// Shape the aggregation actually has.
        actual: &'static str,
    },

    /// The gateway could not complete the round trip.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A create-only write hit an existing document.
    #[error("Document already exists: {index}/{id}")]
    Conflict {
        /// Index name.
        index: String,
        /// Document ID.
        id: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be loaded or resolved.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<opensearch::Error> for SearchError {
    fn from(err: opensearch::Error) -> Self {
        SearchError::Transport(err.to_string())
    }
}

impl SearchError {
    /// True for errors detected while building a request, before any I/O.
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            SearchError::InvalidQuery(_)
                | SearchError::InvalidAggregation(_)
                | SearchError::InvalidRequest(_)
        )
    }
}

/// Result type alias for facade operations.
pub type Result<T> = std::result::Result<T, SearchError>;
