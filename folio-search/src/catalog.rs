//! Search service.
//!
//! [`SearchService`] ties the builders, a [`Transport`] and the catalog
//! configuration together. The generic operations (`search`,
//! `index_document`, `update_document`, `delete_by_query`) work on any
//! collection; the named catalog operations below them are fixed queries
//! over the `books`, `logs` and `forms` datasets.

use crate::{
    aggregation::{
        AggregationBuilder, FILTERED_TERMS_NAME, MAX_NAME, NamedAggregation, ORDERED_TERMS_NAME,
        SortOrder, TERMS_NAME, TOP_HITS_NAME,
    },
    client::OpenSearchTransport,
    config::{BOOKS, CatalogConfig, FORMS, LOGS, OpenSearchConfig},
    document::{Book, Document},
    error::{Result, SearchError},
    query::{Query, QueryBuilder},
    request::{CollectionRef, SearchRequest},
    response::{Bucket, Hit, HitSample, SearchResponse},
    transport::{Transport, WriteMode, WriteOptions},
};
use folio_log::{debug, error, info, warn};
use std::sync::Arc;

/// Upper bound on the documents a single delete-by-query resolves.
pub const DELETE_BY_QUERY_LIMIT: i64 = 10_000;

/// Facade over a document engine.
#[derive(Clone)]
pub struct SearchService {
    transport: Arc<dyn Transport>,
    catalog: Arc<CatalogConfig>,
    queries: QueryBuilder,
    aggregations: AggregationBuilder,
}

impl SearchService {
    /// Create a service over an existing gateway.
    pub fn new(transport: Arc<dyn Transport>, catalog: CatalogConfig) -> Self {
        for dataset in catalog.typed_datasets() {
            warn!("document kind ignored, documents are addressed by index only"; "dataset" => dataset);
        }
        let queries = QueryBuilder::new(catalog.keyword_suffix.clone());
        let aggregations = AggregationBuilder::new(catalog.keyword_suffix.clone());
        Self {
            transport,
            catalog: Arc::new(catalog),
            queries,
            aggregations,
        }
    }

    /// Create a service talking to OpenSearch.
    pub fn connect(config: OpenSearchConfig, catalog: CatalogConfig) -> Result<Self> {
        let transport = OpenSearchTransport::new(config)?;
        info!("Search service ready"; "datasets" => catalog.collections.len(), "create_only" => catalog.create_only);
        Ok(Self::new(Arc::new(transport), catalog))
    }

    /// Catalog configuration.
    pub fn catalog(&self) -> &CatalogConfig {
        &self.catalog
    }

    /// Query builder configured with the catalog's keyword suffix.
    pub fn queries(&self) -> &QueryBuilder {
        &self.queries
    }

    /// Aggregation builder configured with the catalog's keyword suffix.
    pub fn aggregations(&self) -> &AggregationBuilder {
        &self.aggregations
    }

    fn write_options(&self) -> WriteOptions {
        WriteOptions {
            mode: if self.catalog.create_only {
                WriteMode::CreateOnly
            } else {
                WriteMode::Upsert
            },
            refresh: true,
        }
    }

    // =========================================================================
    // Generic operations
    // =========================================================================

    /// Execute a composed request and parse the response against it.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let collection = request.collection();
        debug!("search"; "index" => collection.index, "aggs" => request.aggregations().len());

        let raw = self
            .transport
            .search(request)
            .await
            .inspect_err(|e| error!("search failed"; "index" => collection.index, "error" => e))?;
        let response = SearchResponse::parse(&raw, request)
            .inspect_err(|e| error!("unreadable search response"; "index" => collection.index, "error" => e))?;

        debug!("search done"; "index" => collection.index, "total" => response.total, "took_ms" => response.took_ms);
        Ok(response)
    }

    /// Store `document`, returning the identifier it was written under.
    ///
    /// A missing or empty `id` gets a fresh random identifier. An existing
    /// document with the same identifier is overwritten unless the catalog
    /// is configured `create_only`, in which case the write fails with
    /// [`SearchError::Conflict`].
    pub async fn index_document<D: Document>(
        &self,
        collection: &CollectionRef,
        document: &D,
        id: Option<&str>,
    ) -> Result<String> {
        let id = match id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let source = document.project()?;
        debug!("index document"; "index" => collection.index, "id" => id, "fields" => source.len());

        self.transport
            .index(collection, &id, &source, self.write_options())
            .await
            .inspect_err(|e| error!("index failed"; "index" => collection.index, "id" => id, "error" => e))
    }

    /// Merge the present attributes of `document` into its stored version.
    ///
    /// Attributes absent from `document` are left untouched.
    pub async fn update_document<D: Document>(&self, collection: &CollectionRef, document: &D) -> Result<()> {
        let id = document
            .id()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| SearchError::InvalidRequest("update requires a document id".to_string()))?;
        let patch = document.project()?;
        debug!("update document"; "index" => collection.index, "id" => id, "fields" => patch.len());

        self.transport
            .update(collection, id, &patch, self.write_options())
            .await
            .inspect_err(|e| error!("update failed"; "index" => collection.index, "id" => id, "error" => e))
    }

    /// Delete every document matching `query`, returning how many were deleted.
    ///
    /// Matches are resolved with one search and then deleted one at a time,
    /// so documents written after the search are not affected. At most
    /// [`DELETE_BY_QUERY_LIMIT`] documents are resolved per call.
    pub async fn delete_by_query(&self, collection: &CollectionRef, query: Query) -> Result<usize> {
        let request =
            SearchRequest::compose(collection.clone(), Some(query), Vec::new())?.with_size(DELETE_BY_QUERY_LIMIT)?;
        let response = self.search(&request).await?;

        if response.total > response.hits().len() as u64 {
            warn!("delete by query truncated"; "index" => collection.index, "total" => response.total, "resolved" => response.hits().len());
        }

        let options = self.write_options();
        let mut deleted = 0;
        for hit in response.hits() {
            let existed = self
                .transport
                .delete(collection, &hit.id, options)
                .await
                .inspect_err(|e| error!("delete failed"; "index" => collection.index, "id" => hit.id, "error" => e))?;
            if existed {
                deleted += 1;
            }
        }

        debug!("delete by query done"; "index" => collection.index, "deleted" => deleted);
        Ok(deleted)
    }

    // =========================================================================
    // Catalog operations
    // =========================================================================

    async fn aggregate_only(
        &self,
        dataset: &str,
        aggregation: NamedAggregation,
    ) -> Result<SearchResponse> {
        let collection = self.catalog.collection(dataset)?.clone();
        let request = SearchRequest::compose(collection, None, vec![aggregation])?.with_size(0)?;
        self.search(&request).await
    }

    /// Index a book, using its identifier when it has one.
    pub async fn add_book(&self, book: &Book) -> Result<String> {
        let books = self.catalog.collection(BOOKS)?;
        self.index_document(books, book, book.id()).await
    }

    /// Books whose name contains `name` as a phrase.
    pub async fn get_book(&self, name: &str) -> Result<Vec<Book>> {
        let books = self.catalog.collection(BOOKS)?.clone();
        let query = self.queries.phrase_match(&self.catalog.fields.book_name, name)?;
        let request = SearchRequest::compose(books, Some(query), Vec::new())?;
        self.search(&request).await?.documents()
    }

    /// Merge the present attributes of `book` into the stored book.
    pub async fn update_book(&self, book: &Book) -> Result<()> {
        let books = self.catalog.collection(BOOKS)?;
        self.update_document(books, book).await
    }

    /// Delete books whose name contains `name` as a phrase.
    pub async fn delete_book(&self, name: &str) -> Result<usize> {
        let books = self.catalog.collection(BOOKS)?;
        let query = self.queries.phrase_match(&self.catalog.fields.book_name, name)?;
        self.delete_by_query(books, query).await
    }

    /// Maximum of `field` across all books.
    pub async fn max_aggregate(&self, field: &str) -> Result<Option<f64>> {
        let aggregation = self.aggregations.max(field)?;
        self.aggregate_only(BOOKS, aggregation).await?.scalar(MAX_NAME)
    }

    /// Highest books by `field`, projected to the configured attributes.
    pub async fn top_aggregate(&self, field: &str) -> Result<HitSample> {
        let defaults = &self.catalog.top_hits;
        let includes: Vec<&str> = defaults.includes.iter().map(String::as_str).collect();
        let excludes: Vec<&str> = defaults.excludes.iter().map(String::as_str).collect();
        let aggregation = self
            .aggregations
            .top_hits(field, SortOrder::Desc, &includes, &excludes, defaults.size)?;

        Ok(self.aggregate_only(BOOKS, aggregation).await?.hit_sample(TOP_HITS_NAME)?.clone())
    }

    /// Book counts per value of `field`.
    pub async fn terms_aggregate(&self, field: &str) -> Result<Vec<Bucket>> {
        let aggregation = self.aggregations.terms(field)?;
        Ok(self.aggregate_only(BOOKS, aggregation).await?.buckets(TERMS_NAME)?.to_vec())
    }

    /// Log buckets per value of `field`, highest average metric first.
    ///
    /// Each bucket carries a stats sub-aggregation over the configured log
    /// metric field.
    pub async fn log_terms_multi_aggregate(&self, field: &str) -> Result<Vec<Bucket>> {
        let fields = &self.catalog.fields;
        let aggregation =
            self.aggregations
                .terms_with_ordered_sub_agg(field, &fields.log_metric_name, &fields.log_metric, false)?;
        Ok(self.aggregate_only(LOGS, aggregation).await?.buckets(ORDERED_TERMS_NAME)?.to_vec())
    }

    /// Log buckets per value of `field`, keeping keys matching `include`
    /// and not matching `exclude`. A `None` pattern does not filter.
    pub async fn filter_aggregate(
        &self,
        include: Option<&str>,
        exclude: Option<&str>,
        field: &str,
    ) -> Result<Vec<Bucket>> {
        let aggregation = self.aggregations.filtered_terms(field, include, exclude)?;
        Ok(self.aggregate_only(LOGS, aggregation).await?.buckets(FILTERED_TERMS_NAME)?.to_vec())
    }

    /// Forms with exactly this article id, all scored equally.
    pub async fn term(&self, article_id: &str) -> Result<SearchResponse> {
        let forms = self.catalog.collection(FORMS)?.clone();
        let query = self
            .queries
            .constant_score(self.queries.exact_term(&self.catalog.fields.form_article_id, article_id)?);
        let request = SearchRequest::compose(forms, Some(query), Vec::new())?;
        self.search(&request).await
    }

    /// Forms posted on `post_date` or carrying `article_id`, minus those
    /// posted on `not_key`.
    pub async fn bool_with_multi_filter(&self, post_date: &str, article_id: &str, not_key: &str) -> Result<Vec<Hit>> {
        let forms = self.catalog.collection(FORMS)?.clone();
        let fields = &self.catalog.fields;

        let should = vec![
            self.queries.exact_terms(&fields.form_post_date, [post_date])?,
            self.queries.exact_term(&fields.form_article_id, article_id)?,
        ];
        let must_not = vec![self.queries.exact_term(&fields.form_post_date, not_key)?];
        let query = self.queries.bool_combine(should, must_not)?;

        let request = SearchRequest::compose(forms, Some(query), Vec::new())?;
        Ok(self.search(&request).await?.into_hits())
    }
}

impl std::fmt::Debug for SearchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchService")
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}
