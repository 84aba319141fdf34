//! Request composition.

use crate::aggregation::{NamedAggregation, aggregations_json, ensure_unique_names};
use crate::error::{Result, SearchError};
use crate::query::Query;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Where a request is sent: an index plus an optional legacy document kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionRef {
    /// Index name.
    pub index: String,
    /// Document kind, kept for catalogs written against typed engines.
    ///
    /// The gateways address documents by index alone and never send it;
    /// the service warns at construction when one is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
}

impl CollectionRef {
    /// Reference an index without a document kind.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_type: None,
        }
    }

    /// Attach a document kind.
    pub fn with_doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }
}

impl std::fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.doc_type {
            Some(doc_type) => write!(f, "{}/{}", self.index, doc_type),
            None => f.write_str(&self.index),
        }
    }
}

/// An immutable search request: target, optional query, named aggregations.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    collection: CollectionRef,
    query: Option<Query>,
    aggregations: Vec<NamedAggregation>,
    size: Option<i64>,
}

impl SearchRequest {
    /// Bind a collection, a query and aggregations into one request.
    ///
    /// Aggregation names must be unique. A request with neither query nor
    /// aggregations is allowed and lists the collection.
    pub fn compose(
        collection: CollectionRef,
        query: Option<Query>,
        aggregations: Vec<NamedAggregation>,
    ) -> Result<Self> {
        if collection.index.trim().is_empty() {
            return Err(SearchError::InvalidRequest(
                "collection index must not be empty".to_string(),
            ));
        }
        ensure_unique_names(aggregations.iter().map(|a| a.name.as_str()))?;

        Ok(Self {
            collection,
            query,
            aggregations,
            size: None,
        })
    }

    /// Cap the number of hits returned (the engine default is 10).
    pub fn with_size(mut self, size: i64) -> Result<Self> {
        if size < 0 {
            return Err(SearchError::InvalidRequest(format!(
                "hit count must not be negative, got {}",
                size
            )));
        }
        self.size = Some(size);
        Ok(self)
    }

    /// Target collection.
    pub fn collection(&self) -> &CollectionRef {
        &self.collection
    }

    /// Query, if any.
    pub fn query(&self) -> Option<&Query> {
        self.query.as_ref()
    }

    /// Top-level aggregations in declaration order.
    pub fn aggregations(&self) -> &[NamedAggregation] {
        &self.aggregations
    }

    /// Top-level aggregation by name.
    pub fn aggregation(&self, name: &str) -> Option<&NamedAggregation> {
        self.aggregations.iter().find(|a| a.name == name)
    }

    /// Hit cap, if set.
    pub fn size(&self) -> Option<i64> {
        self.size
    }

    /// Build the search body.
    pub fn to_body(&self) -> Value {
        let mut body = serde_json::Map::new();

        if let Some(query) = &self.query {
            body.insert("query".to_string(), query.to_json());
        }
        if let Some(size) = self.size {
            body.insert("size".to_string(), json!(size));
        }
        if !self.aggregations.is_empty() {
            body.insert("aggs".to_string(), aggregations_json(&self.aggregations));
        }

        Value::Object(body)
    }
}
