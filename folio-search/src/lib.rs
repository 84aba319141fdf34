//! Search facade over an Elasticsearch-compatible document engine.
//!
//! This crate provides:
//! - Typed query and aggregation builders that reject malformed input before
//!   any network call
//! - A request composer and a response extractor that classifies each
//!   aggregation result by the aggregation that produced it
//! - Document writes (index, partial update, delete-by-query)
//! - An OpenSearch gateway and an in-memory gateway behind one trait
//!
//! # Example
//!
//! ```rust,no_run
//! use folio_search::{Book, CatalogConfig, OpenSearchConfig, SearchService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = CatalogConfig::default().with_env()?;
//!     let service = SearchService::connect(OpenSearchConfig::from_env(), catalog)?;
//!
//!     let id = service
//!         .add_book(&Book::named("Dune").with_author("Frank Herbert").with_price(15.0))
//!         .await?;
//!     println!("indexed {}", id);
//!
//!     let most_expensive = service.max_aggregate("price").await?;
//!     println!("max price: {:?}", most_expensive);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod aggregation;
mod catalog;
mod client;
mod config;
mod document;
mod error;
mod memory;
mod query;
mod request;
mod response;
mod transport;

pub use aggregation::{
    Aggregation, AggregationBuilder, AggregationKind, BucketOrder, FILTERED_TERMS_NAME, MAX_NAME,
    NamedAggregation, ORDERED_TERMS_NAME, SortOrder, TERMS_NAME, TOP_HITS_NAME, TermsAggregation,
    TermsBuilder, TopHitsAggregation,
};
pub use catalog::{DELETE_BY_QUERY_LIMIT, SearchService};
pub use client::OpenSearchTransport;
pub use config::{
    BOOKS, CatalogConfig, FORMS, FieldNames, FileFormat, LOGS, OpenSearchConfig, TopHitsDefaults,
};
pub use document::{Book, Document};
pub use error::{Result, SearchError};
pub use memory::MemoryTransport;
pub use query::{BoolQuery, MatchPhraseQuery, Query, QueryBuilder, TermQuery, TermsQuery};
pub use request::{CollectionRef, SearchRequest};
pub use response::{AggregationResult, Bucket, Hit, HitSample, SearchResponse, Stats};
pub use transport::{Transport, WriteMode, WriteOptions};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        AggregationBuilder, Book, CatalogConfig, CollectionRef, Document, MemoryTransport,
        OpenSearchConfig, Query, QueryBuilder, Result, SearchError, SearchRequest, SearchResponse,
        SearchService, SortOrder, Transport,
    };
}
