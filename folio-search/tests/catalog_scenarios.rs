//! End-to-end scenarios for the search service over the in-memory gateway.

use folio_search::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Form {
    #[serde(skip)]
    id: Option<String>,
    #[serde(rename = "articleID", default, skip_serializing_if = "Option::is_none")]
    article_id: Option<String>,
    #[serde(rename = "postDate", default, skip_serializing_if = "Option::is_none")]
    post_date: Option<String>,
}

impl Document for Form {
    fn dataset() -> &'static str {
        FORMS
    }
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LogEntry {
    #[serde(skip)]
    id: Option<String>,
    machine: serde_json::Value,
}

impl Document for LogEntry {
    fn dataset() -> &'static str {
        LOGS
    }
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}

fn setup() -> (Arc<MemoryTransport>, SearchService) {
    setup_with(CatalogConfig::default())
}

fn setup_with(catalog: CatalogConfig) -> (Arc<MemoryTransport>, SearchService) {
    let transport = Arc::new(MemoryTransport::new());
    let service = SearchService::new(transport.clone(), catalog);
    (transport, service)
}

fn form(id: &str, article_id: &str, post_date: &str) -> Form {
    Form {
        id: Some(id.to_string()),
        article_id: Some(article_id.to_string()),
        post_date: Some(post_date.to_string()),
    }
}

fn log(os: &str, ram: u64) -> LogEntry {
    LogEntry {
        id: None,
        machine: json!({ "os": os, "ram": ram }),
    }
}

async fn add_forms(service: &SearchService, forms: &[Form]) {
    let collection = service.catalog().collection(FORMS).unwrap().clone();
    for f in forms {
        service.index_document(&collection, f, f.id.as_deref()).await.unwrap();
    }
}

async fn add_logs(service: &SearchService, logs: &[LogEntry]) {
    let collection = service.catalog().collection(LOGS).unwrap().clone();
    for entry in logs {
        service.index_document(&collection, entry, None).await.unwrap();
    }
}

fn keys(source: &serde_json::Map<String, serde_json::Value>) -> BTreeSet<String> {
    source.keys().cloned().collect()
}

fn ids(hits: &[Hit]) -> Vec<String> {
    hits.iter().map(|h| h.id.clone()).collect()
}

// =============================================================================
// Writes
// =============================================================================

#[tokio::test]
async fn test_add_then_get_round_trip() {
    let (_, service) = setup();
    let book = Book::named("The Dispossessed")
        .with_id("b-42")
        .with_author("Le Guin")
        .with_price(12.5);

    let id = service.add_book(&book).await.unwrap();
    assert_eq!(id, "b-42");

    let found = service.get_book("The Dispossessed").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id.as_deref(), Some("b-42"));
    assert_eq!(found[0].project().unwrap(), book.project().unwrap());
}

#[tokio::test]
async fn test_stored_source_omits_absent_attributes() {
    let (transport, service) = setup();
    service
        .add_book(&Book::named("Dune").with_id("b-1").with_author("Herbert"))
        .await
        .unwrap();

    let stored = transport.document("books", "b-1").unwrap();
    assert_eq!(
        keys(&stored),
        BTreeSet::from(["author".to_string(), "name".to_string()])
    );
}

#[tokio::test]
async fn test_add_without_id_generates_one() {
    let (transport, service) = setup();
    let id = service.add_book(&Book::named("Dune")).await.unwrap();

    assert!(!id.is_empty());
    assert!(transport.document("books", &id).is_some());
}

#[tokio::test]
async fn test_add_with_existing_id_overwrites_by_default() {
    let (transport, service) = setup();
    service.add_book(&Book::named("Dune").with_id("b-1").with_price(10.0)).await.unwrap();
    service.add_book(&Book::named("Dune Messiah").with_id("b-1")).await.unwrap();

    assert_eq!(transport.len("books"), 1);
    let stored = transport.document("books", "b-1").unwrap();
    assert_eq!(stored["name"], json!("Dune Messiah"));
    assert!(!stored.contains_key("price"));
}

#[tokio::test]
async fn test_create_only_rejects_existing_id() {
    let catalog = CatalogConfig {
        create_only: true,
        ..CatalogConfig::default()
    };
    let (transport, service) = setup_with(catalog);
    service.add_book(&Book::named("Dune").with_id("b-1")).await.unwrap();

    let err = service
        .add_book(&Book::named("Dune Messiah").with_id("b-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::Conflict { ref id, .. } if id == "b-1"));
    assert_eq!(transport.document("books", "b-1").unwrap()["name"], json!("Dune"));
}

#[tokio::test]
async fn test_update_merges_present_attributes() {
    let (transport, service) = setup();
    service
        .add_book(&Book::named("Dune").with_id("b-1").with_author("Herbert").with_price(10.0))
        .await
        .unwrap();

    let patch = Book::default().with_id("b-1").with_price(15.0);
    service.update_book(&patch).await.unwrap();

    let stored = transport.document("books", "b-1").unwrap();
    assert_eq!(stored["name"], json!("Dune"));
    assert_eq!(stored["author"], json!("Herbert"));
    assert_eq!(stored["price"], json!(15.0));
}

#[tokio::test]
async fn test_update_of_missing_document_fails() {
    let (_, service) = setup();
    let err = service
        .update_book(&Book::named("Dune").with_id("nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::Transport(_)));
}

#[tokio::test]
async fn test_delete_book_removes_matches_only() {
    let (transport, service) = setup();
    service.add_book(&Book::named("Dune").with_id("b-1")).await.unwrap();
    service.add_book(&Book::named("Dune Messiah").with_id("b-2")).await.unwrap();
    service.add_book(&Book::named("Hyperion").with_id("b-3")).await.unwrap();

    let deleted = service.delete_book("dune").await.unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(transport.len("books"), 1);
    assert!(transport.document("books", "b-3").is_some());
}

#[tokio::test]
async fn test_delete_with_no_matches_is_a_no_op() {
    let (transport, service) = setup();
    service.add_book(&Book::named("Dune").with_id("b-1")).await.unwrap();

    assert_eq!(service.delete_book("Neuromancer").await.unwrap(), 0);
    assert!(service.get_book("Neuromancer").await.unwrap().is_empty());
    assert_eq!(transport.len("books"), 1);
    assert!(!transport.calls().iter().any(|c| c.starts_with("delete:")));
}

#[tokio::test]
async fn test_transport_failure_is_surfaced() {
    let (transport, service) = setup();
    transport.set_unavailable(true);

    let err = service.add_book(&Book::named("Dune")).await.unwrap_err();
    assert!(matches!(err, SearchError::Transport(_)));

    let err = service.delete_book("Dune").await.unwrap_err();
    assert!(matches!(err, SearchError::Transport(_)));

    let err = service.get_book("Dune").await.unwrap_err();
    assert!(matches!(err, SearchError::Transport(_)));
}

// =============================================================================
// Queries
// =============================================================================

#[tokio::test]
async fn test_exact_term_matches_verbatim_value_only() {
    let (_, service) = setup();
    add_forms(
        &service,
        &[
            form("f-1", "Art 12", "2020-01-01"),
            form("f-2", "Art", "2020-01-01"),
            form("f-3", "art 12", "2020-01-01"),
        ],
    )
    .await;

    let response = service.term("Art 12").await.unwrap();
    assert_eq!(ids(response.hits()), vec!["f-1"]);
    assert_eq!(response.total, 1);

    let response = service.term("Art").await.unwrap();
    assert_eq!(ids(response.hits()), vec!["f-2"]);
}

#[tokio::test]
async fn test_exact_term_on_numeric_field() {
    let (_, service) = setup();
    service.add_book(&Book::named("Dune").with_id("b-1").with_price(15.0)).await.unwrap();
    service.add_book(&Book::named("Solaris").with_id("b-2").with_price(9.0)).await.unwrap();

    let query = service.queries().exact_term("price", 15).unwrap();
    assert_eq!(query.to_json(), json!({ "term": { "price": 15 } }));

    let request = SearchRequest::compose(CollectionRef::new("books"), Some(query), vec![]).unwrap();
    let response = service.search(&request).await.unwrap();
    assert_eq!(ids(response.hits()), vec!["b-1"]);
}

#[tokio::test]
async fn test_typed_collection_is_addressed_by_index() {
    let catalog = CatalogConfig::default()
        .with_vars([("FOLIO_BOOKS_TYPE".to_string(), "novel".to_string())])
        .unwrap();
    let (transport, service) = setup_with(catalog);

    service.add_book(&Book::named("Dune").with_id("b-1")).await.unwrap();
    assert_eq!(service.get_book("Dune").await.unwrap().len(), 1);
    assert_eq!(
        transport.calls(),
        vec!["index:books/b-1".to_string(), "search:books".to_string()]
    );
}

#[tokio::test]
async fn test_phrase_match_is_token_based() {
    let (_, service) = setup();
    service.add_book(&Book::named("Children of Dune").with_id("b-1")).await.unwrap();
    service.add_book(&Book::named("Dune").with_id("b-2")).await.unwrap();

    let found = service.get_book("children OF dune").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id.as_deref(), Some("b-1"));
}

#[tokio::test]
async fn test_bool_with_only_must_not_keeps_everything_else() {
    let (_, service) = setup();
    for (id, name) in [("b-1", "Dune"), ("b-2", "Hyperion"), ("b-3", "Solaris")] {
        service.add_book(&Book::named(name).with_id(id)).await.unwrap();
    }

    let queries = service.queries();
    let query = queries
        .bool_combine(vec![], vec![queries.exact_term("name", "Hyperion").unwrap()])
        .unwrap();
    let request = SearchRequest::compose(CollectionRef::new("books"), Some(query), vec![]).unwrap();
    let response = service.search(&request).await.unwrap();

    assert_eq!(ids(response.hits()), vec!["b-1", "b-3"]);
}

#[tokio::test]
async fn test_bool_with_multi_filter() {
    let (_, service) = setup();
    add_forms(
        &service,
        &[
            form("f-1", "a1", "2020-01-01"),
            form("f-2", "a2", "2020-01-02"),
            form("f-3", "a3", "2020-01-03"),
            form("f-4", "a2", "2020-01-04"),
        ],
    )
    .await;

    let hits = service
        .bool_with_multi_filter("2020-01-01", "a2", "2020-01-02")
        .await
        .unwrap();
    assert_eq!(ids(&hits), vec!["f-1", "f-4"]);

    let form: Form = hits[1].deserialize().unwrap();
    assert_eq!(form.id.as_deref(), Some("f-4"));
    assert_eq!(form.post_date.as_deref(), Some("2020-01-04"));
}

#[tokio::test]
async fn test_empty_bool_is_rejected_before_any_call() {
    let (transport, service) = setup();
    let err = service.queries().bool_combine(vec![], vec![]).unwrap_err();

    assert!(matches!(err, SearchError::InvalidQuery(_)));
    assert!(transport.calls().is_empty());
}

// =============================================================================
// Aggregations
// =============================================================================

#[tokio::test]
async fn test_max_of_single_book() {
    let (_, service) = setup();
    service
        .add_book(&Book::named("Dune").with_author("Herbert").with_price(15.0))
        .await
        .unwrap();

    assert_eq!(service.max_aggregate("price").await.unwrap(), Some(15.0));
}

#[tokio::test]
async fn test_max_of_empty_index_is_absent() {
    let (_, service) = setup();
    assert_eq!(service.max_aggregate("price").await.unwrap(), None);
}

#[tokio::test]
async fn test_top_aggregate_highest_first() {
    let (_, service) = setup();
    service
        .add_book(&Book::named("Cheap").with_author("A").with_price(10.0))
        .await
        .unwrap();
    service
        .add_book(&Book::named("Dear").with_author("B").with_price(20.0))
        .await
        .unwrap();

    let sample = service.top_aggregate("price").await.unwrap();
    assert_eq!(sample.total, 2);
    assert_eq!(sample.hits.len(), 2);
    assert_eq!(sample.hits[0].source["price"], json!(20.0));
    assert_eq!(sample.hits[1].source["price"], json!(10.0));
    assert_eq!(
        keys(&sample.hits[0].source),
        BTreeSet::from(["name".to_string(), "price".to_string()])
    );
}

#[tokio::test]
async fn test_top_hits_exclude_wins_over_include() {
    let (_, service) = setup();
    service
        .add_book(&Book::named("Dune").with_author("Herbert").with_price(15.0))
        .await
        .unwrap();

    let aggregation = service
        .aggregations()
        .top_hits("price", SortOrder::Desc, &["name", "price"], &["price"], 2)
        .unwrap();
    let request = SearchRequest::compose(CollectionRef::new("books"), None, vec![aggregation]).unwrap();
    let response = service.search(&request).await.unwrap();

    let sample = response.hit_sample(TOP_HITS_NAME).unwrap();
    assert_eq!(keys(&sample.hits[0].source), BTreeSet::from(["name".to_string()]));
}

#[tokio::test]
async fn test_terms_aggregate_counts_exact_values() {
    let (_, service) = setup();
    for (name, author) in [("Dune", "Frank Herbert"), ("Dune Messiah", "Frank Herbert"), ("Solaris", "Lem")] {
        service.add_book(&Book::named(name).with_author(author)).await.unwrap();
    }

    let field = service.aggregations().keyword_field("author");
    let buckets = service.terms_aggregate(&field).await.unwrap();

    let summary: Vec<(String, u64)> = buckets.iter().map(|b| (b.key_string(), b.doc_count)).collect();
    assert_eq!(
        summary,
        vec![("Frank Herbert".to_string(), 2), ("Lem".to_string(), 1)]
    );
}

#[tokio::test]
async fn test_log_buckets_ordered_by_average_metric() {
    let (_, service) = setup();
    add_logs(
        &service,
        &[
            log("win 8", 100),
            log("win 8", 200),
            log("osx", 300),
            log("ios", 50),
        ],
    )
    .await;

    let buckets = service.log_terms_multi_aggregate("machine.os.keyword").await.unwrap();
    let order: Vec<String> = buckets.iter().map(Bucket::key_string).collect();
    assert_eq!(order, vec!["osx", "win 8", "ios"]);

    let ram = buckets[1].sub_aggregation("ram").unwrap().as_stats("ram").unwrap();
    assert_eq!(ram.count, 2);
    assert_eq!(ram.avg, Some(150.0));
    assert_eq!(ram.max, Some(200.0));
}

#[tokio::test]
async fn test_filter_aggregate_include_and_exclude() {
    let (_, service) = setup();
    add_logs(
        &service,
        &[log("win 8", 1), log("win xp", 1), log("win 8", 1), log("osx", 1)],
    )
    .await;

    let buckets = service
        .filter_aggregate(Some("win.*"), Some("win xp"), "machine.os.keyword")
        .await
        .unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].key_string(), "win 8");
    assert_eq!(buckets[0].doc_count, 2);
}

#[tokio::test]
async fn test_filter_aggregate_one_sided() {
    let (_, service) = setup();
    add_logs(
        &service,
        &[log("win 8", 1), log("win xp", 1), log("win 8", 1), log("osx", 1)],
    )
    .await;

    let included = service
        .filter_aggregate(Some("win.*"), None, "machine.os.keyword")
        .await
        .unwrap();
    let keys: Vec<String> = included.iter().map(Bucket::key_string).collect();
    assert_eq!(keys, vec!["win 8", "win xp"]);

    let excluded = service
        .filter_aggregate(None, Some("win.*"), "machine.os.keyword")
        .await
        .unwrap();
    let keys: Vec<String> = excluded.iter().map(Bucket::key_string).collect();
    assert_eq!(keys, vec!["osx"]);
}

#[tokio::test]
async fn test_top_hits_excluding_every_included_field_projects_nothing() {
    let (_, service) = setup();
    service
        .add_book(&Book::named("Dune").with_author("Herbert").with_price(15.0))
        .await
        .unwrap();

    let aggregation = service
        .aggregations()
        .top_hits("price", SortOrder::Desc, &["price"], &["price"], 1)
        .unwrap();
    let request = SearchRequest::compose(CollectionRef::new("books"), None, vec![aggregation]).unwrap();
    let response = service.search(&request).await.unwrap();

    let sample = response.hit_sample(TOP_HITS_NAME).unwrap();
    assert_eq!(sample.hits.len(), 1);
    assert!(sample.hits[0].source.is_empty());
}

#[tokio::test]
async fn test_undeclared_sub_aggregation_is_rejected_before_any_call() {
    let (transport, service) = setup();
    let aggregations = service.aggregations();

    let err = aggregations
        .terms_builder(ORDERED_TERMS_NAME, "machine.os.keyword")
        .order_by_sub_aggregation("ram.avg", false)
        .sub_aggregation(aggregations.stats("ram", "machine.ram").unwrap())
        .build()
        .unwrap_err();

    assert!(matches!(err, SearchError::InvalidAggregation(_)));
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_wrong_accessor_is_a_type_mismatch() {
    let (_, service) = setup();
    service.add_book(&Book::named("Dune").with_price(15.0)).await.unwrap();

    let aggregation = service.aggregations().max("price").unwrap();
    let request = SearchRequest::compose(CollectionRef::new("books"), None, vec![aggregation]).unwrap();
    let response = service.search(&request).await.unwrap();

    assert!(matches!(
        response.buckets(MAX_NAME),
        Err(SearchError::TypeMismatch { .. })
    ));
    assert!(matches!(
        response.scalar("avg"),
        Err(SearchError::MissingAggregation(_))
    ));
    assert_eq!(response.scalar(MAX_NAME).unwrap(), Some(15.0));
}

#[tokio::test]
async fn test_empty_bucket_list_is_not_an_error() {
    let (_, service) = setup();
    let buckets = service.terms_aggregate("author.keyword").await.unwrap();
    assert!(buckets.is_empty());
}
