//! Response extraction.
//!
//! Engine responses report aggregation results by name without saying what
//! kind of aggregation produced them. [`SearchResponse::parse`] reads the raw
//! response together with the request that produced it, so every named
//! result is classified by its declared [`AggregationKind`] into one closed
//! [`AggregationResult`] variant. Asking for the wrong shape is a
//! [`SearchError::TypeMismatch`]; asking for a name the request never
//! declared is a [`SearchError::MissingAggregation`].

use crate::aggregation::{Aggregation, AggregationKind, NamedAggregation};
use crate::document::Document;
use crate::error::{Result, SearchError};
use crate::request::SearchRequest;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A matched document.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Document ID.
    pub id: String,
    /// Index name.
    pub index: String,
    /// Relevance score (absent when sorting by field).
    pub score: Option<f64>,
    /// Stored fields.
    pub source: Map<String, Value>,
}

impl Hit {
    fn parse(raw: &Value) -> Result<Self> {
        let source = match raw.get("_source") {
            Some(Value::Object(map)) => map.clone(),
            None | Some(Value::Null) => Map::new(),
            Some(other) => {
                return Err(SearchError::Transport(format!(
                    "hit _source is not an object: {}",
                    other
                )));
            }
        };

        Ok(Self {
            id: raw["_id"].as_str().unwrap_or_default().to_string(),
            index: raw["_index"].as_str().unwrap_or_default().to_string(),
            score: raw["_score"].as_f64(),
            source,
        })
    }

    /// Deserialize the stored fields into `T`, carrying over the identifier.
    pub fn deserialize<T: Document>(&self) -> Result<T> {
        let mut doc: T = serde_json::from_value(Value::Object(self.source.clone()))?;
        if !self.id.is_empty() {
            doc.set_id(self.id.clone());
        }
        Ok(doc)
    }
}

/// Count/min/max/avg/sum summary. Empty input yields `count == 0` and no values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    /// Number of values.
    pub count: u64,
    /// Minimum.
    pub min: Option<f64>,
    /// Maximum.
    pub max: Option<f64>,
    /// Average.
    pub avg: Option<f64>,
    /// Sum.
    pub sum: Option<f64>,
}

impl Stats {
    /// Metric by name, as used in bucket ordering paths.
    pub fn metric(&self, metric: &str) -> Option<f64> {
        match metric {
            "count" => Some(self.count as f64),
            "min" => self.min,
            "max" => self.max,
            "avg" => self.avg,
            "sum" => self.sum,
            _ => None,
        }
    }
}

/// One bucket of a terms aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    /// Bucket key (string or number).
    pub key: Value,
    /// Formatted key, when the engine supplies one.
    pub key_as_string: Option<String>,
    /// Number of documents in the bucket.
    pub doc_count: u64,
    /// Sub-aggregation results by name.
    pub sub_aggregations: BTreeMap<String, AggregationResult>,
}

impl Bucket {
    /// Key rendered as text.
    pub fn key_string(&self) -> String {
        match (&self.key_as_string, &self.key) {
            (Some(formatted), _) => formatted.clone(),
            (None, Value::String(s)) => s.clone(),
            (None, other) => other.to_string(),
        }
    }

    /// Sub-aggregation result by name.
    pub fn sub_aggregation(&self, name: &str) -> Result<&AggregationResult> {
        self.sub_aggregations
            .get(name)
            .ok_or_else(|| SearchError::MissingAggregation(name.to_string()))
    }
}

/// Documents sampled by a top-hits aggregation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HitSample {
    /// Documents that were eligible.
    pub total: u64,
    /// Sampled documents, in sort order.
    pub hits: Vec<Hit>,
}

/// A named aggregation result.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationResult {
    /// Single metric; `None` when no document had the field.
    Scalar(Option<f64>),
    /// Stats summary.
    Stats(Stats),
    /// Buckets in engine order.
    Buckets(Vec<Bucket>),
    /// Sampled documents.
    Hits(HitSample),
}

impl AggregationResult {
    /// Shape of this result.
    pub fn kind(&self) -> AggregationKind {
        match self {
            AggregationResult::Scalar(_) => AggregationKind::Scalar,
            AggregationResult::Stats(_) => AggregationKind::Stats,
            AggregationResult::Buckets(_) => AggregationKind::Buckets,
            AggregationResult::Hits(_) => AggregationKind::Hits,
        }
    }

    fn mismatch(&self, name: &str, expected: AggregationKind) -> SearchError {
        SearchError::TypeMismatch {
            name: name.to_string(),
            expected: expected.as_str(),
            actual: self.kind().as_str(),
        }
    }

    /// Scalar value of aggregation `name`.
    pub fn as_scalar(&self, name: &str) -> Result<Option<f64>> {
        match self {
            AggregationResult::Scalar(value) => Ok(*value),
            other => Err(other.mismatch(name, AggregationKind::Scalar)),
        }
    }

    /// Stats summary of aggregation `name`.
    pub fn as_stats(&self, name: &str) -> Result<&Stats> {
        match self {
            AggregationResult::Stats(stats) => Ok(stats),
            other => Err(other.mismatch(name, AggregationKind::Stats)),
        }
    }

    /// Buckets of aggregation `name`.
    pub fn as_buckets(&self, name: &str) -> Result<&[Bucket]> {
        match self {
            AggregationResult::Buckets(buckets) => Ok(buckets),
            other => Err(other.mismatch(name, AggregationKind::Buckets)),
        }
    }

    /// Hit sample of aggregation `name`.
    pub fn as_hit_sample(&self, name: &str) -> Result<&HitSample> {
        match self {
            AggregationResult::Hits(sample) => Ok(sample),
            other => Err(other.mismatch(name, AggregationKind::Hits)),
        }
    }

    fn parse(named: &NamedAggregation, raw: &Value) -> Result<Self> {
        let result = match &named.aggregation {
            Aggregation::Max { .. } | Aggregation::Avg { .. } => {
                AggregationResult::Scalar(raw["value"].as_f64())
            }
            Aggregation::Stats { .. } => AggregationResult::Stats(Stats {
                count: raw["count"].as_u64().unwrap_or(0),
                min: raw["min"].as_f64(),
                max: raw["max"].as_f64(),
                avg: raw["avg"].as_f64(),
                sum: raw["sum"].as_f64(),
            }),
            Aggregation::Terms(terms) => {
                let raw_buckets = raw["buckets"].as_array().ok_or_else(|| {
                    malformed(&named.name, "terms result has no bucket array")
                })?;

                let mut buckets = Vec::with_capacity(raw_buckets.len());
                for raw_bucket in raw_buckets {
                    let mut sub_aggregations = BTreeMap::new();
                    for sub in &terms.sub_aggregations {
                        let raw_sub = raw_bucket.get(&sub.name).ok_or_else(|| {
                            malformed(&named.name, &format!("bucket lacks '{}'", sub.name))
                        })?;
                        sub_aggregations.insert(sub.name.clone(), Self::parse(sub, raw_sub)?);
                    }

                    buckets.push(Bucket {
                        key: raw_bucket["key"].clone(),
                        key_as_string: raw_bucket["key_as_string"].as_str().map(str::to_string),
                        doc_count: raw_bucket["doc_count"].as_u64().unwrap_or(0),
                        sub_aggregations,
                    });
                }
                AggregationResult::Buckets(buckets)
            }
            Aggregation::TopHits(_) => {
                let hits = raw["hits"]["hits"]
                    .as_array()
                    .map(|arr| arr.iter().map(Hit::parse).collect::<Result<Vec<_>>>())
                    .transpose()?
                    .unwrap_or_default();

                AggregationResult::Hits(HitSample {
                    total: parse_total(&raw["hits"]["total"]),
                    hits,
                })
            }
        };
        Ok(result)
    }
}

/// A parsed search response.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    /// Time taken in milliseconds.
    pub took_ms: u64,
    /// Total matching documents.
    pub total: u64,
    /// Maximum score.
    pub max_score: Option<f64>,
    hits: Vec<Hit>,
    aggregations: BTreeMap<String, AggregationResult>,
}

impl SearchResponse {
    /// Parse a raw engine response produced by `request`.
    pub fn parse(raw: &Value, request: &SearchRequest) -> Result<Self> {
        let hits = raw["hits"]["hits"]
            .as_array()
            .map(|arr| arr.iter().map(Hit::parse).collect::<Result<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();

        let mut aggregations = BTreeMap::new();
        for named in request.aggregations() {
            let raw_agg = raw
                .get("aggregations")
                .and_then(|aggs| aggs.get(&named.name))
                .ok_or_else(|| malformed(&named.name, "not present in response"))?;
            aggregations.insert(named.name.clone(), AggregationResult::parse(named, raw_agg)?);
        }

        Ok(Self {
            took_ms: raw["took"].as_u64().unwrap_or(0),
            total: parse_total(&raw["hits"]["total"]),
            max_score: raw["hits"]["max_score"].as_f64(),
            hits,
            aggregations,
        })
    }

    /// Matched documents in engine order. Empty when nothing matched.
    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    /// Consume the response, keeping the hits.
    pub fn into_hits(self) -> Vec<Hit> {
        self.hits
    }

    /// Matched documents deserialized as `T`.
    pub fn documents<T: Document>(&self) -> Result<Vec<T>> {
        self.hits.iter().map(Hit::deserialize).collect()
    }

    /// Aggregation result by name.
    pub fn aggregation(&self, name: &str) -> Result<&AggregationResult> {
        self.aggregations
            .get(name)
            .ok_or_else(|| SearchError::MissingAggregation(name.to_string()))
    }

    /// Scalar aggregation result.
    pub fn scalar(&self, name: &str) -> Result<Option<f64>> {
        self.aggregation(name)?.as_scalar(name)
    }

    /// Stats aggregation result.
    pub fn stats(&self, name: &str) -> Result<&Stats> {
        self.aggregation(name)?.as_stats(name)
    }

    /// Bucket aggregation result.
    pub fn buckets(&self, name: &str) -> Result<&[Bucket]> {
        self.aggregation(name)?.as_buckets(name)
    }

    /// Top-hits aggregation result.
    pub fn hit_sample(&self, name: &str) -> Result<&HitSample> {
        self.aggregation(name)?.as_hit_sample(name)
    }
}

fn malformed(name: &str, detail: &str) -> SearchError {
    SearchError::Transport(format!("malformed aggregation '{}': {}", name, detail))
}

// Newer engines report `{ "value": n, "relation": "eq" }`, older ones a bare number.
fn parse_total(raw: &Value) -> u64 {
    raw.as_u64()
        .or_else(|| raw["value"].as_u64())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{AggregationBuilder, SortOrder};
    use crate::document::Book;
    use crate::request::CollectionRef;
    use serde_json::json;

    fn request(aggs: Vec<NamedAggregation>) -> SearchRequest {
        SearchRequest::compose(CollectionRef::new("books"), None, aggs).unwrap()
    }

    #[test]
    fn test_hits_in_engine_order() {
        let raw = json!({
            "took": 3,
            "hits": {
                "total": { "value": 2, "relation": "eq" },
                "max_score": 1.4,
                "hits": [
                    { "_index": "books", "_id": "b", "_score": 1.4, "_source": { "name": "Dune" } },
                    { "_index": "books", "_id": "a", "_score": 0.7, "_source": { "name": "Dune Messiah", "price": 9.5 } }
                ]
            }
        });

        let response = SearchResponse::parse(&raw, &request(vec![])).unwrap();
        assert_eq!(response.total, 2);
        assert_eq!(response.took_ms, 3);
        let ids: Vec<&str> = response.hits().iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let books: Vec<Book> = response.documents().unwrap();
        assert_eq!(books[1].id.as_deref(), Some("a"));
        assert_eq!(books[1].price, Some(9.5));
    }

    #[test]
    fn test_no_hits_is_empty_not_error() {
        let raw = json!({ "hits": { "total": 0, "hits": [] } });
        let response = SearchResponse::parse(&raw, &request(vec![])).unwrap();
        assert!(response.hits().is_empty());
        assert_eq!(response.total, 0);
    }

    #[test]
    fn test_scalar_extraction() {
        let aggs = AggregationBuilder::default();
        let raw = json!({ "hits": { "hits": [] }, "aggregations": { "max": { "value": 15.0 } } });
        let response = SearchResponse::parse(&raw, &request(vec![aggs.max("price").unwrap()])).unwrap();

        assert_eq!(response.scalar("max").unwrap(), Some(15.0));
    }

    #[test]
    fn test_scalar_without_matches_is_absent() {
        let aggs = AggregationBuilder::default();
        let raw = json!({ "hits": { "hits": [] }, "aggregations": { "max": { "value": null } } });
        let response = SearchResponse::parse(&raw, &request(vec![aggs.max("price").unwrap()])).unwrap();

        assert_eq!(response.scalar("max").unwrap(), None);
    }

    #[test]
    fn test_missing_aggregation() {
        let raw = json!({ "hits": { "hits": [] } });
        let response = SearchResponse::parse(&raw, &request(vec![])).unwrap();
        assert!(matches!(
            response.scalar("max"),
            Err(SearchError::MissingAggregation(name)) if name == "max"
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let aggs = AggregationBuilder::default();
        let raw = json!({
            "hits": { "hits": [] },
            "aggregations": { "term": { "buckets": [ { "key": 10, "doc_count": 2 } ] } }
        });
        let response = SearchResponse::parse(&raw, &request(vec![aggs.terms("price").unwrap()])).unwrap();

        match response.scalar("term") {
            Err(SearchError::TypeMismatch { name, expected, actual }) => {
                assert_eq!(name, "term");
                assert_eq!(expected, "scalar");
                assert_eq!(actual, "bucket list");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(response.hit_sample("term"), Err(SearchError::TypeMismatch { .. })));
        assert_eq!(response.buckets("term").unwrap()[0].doc_count, 2);
    }

    #[test]
    fn test_buckets_with_stats_sub_aggregation() {
        let aggs = AggregationBuilder::default();
        let named = aggs
            .terms_with_ordered_sub_agg("bytes", "ram", "machine.ram", false)
            .unwrap();
        let raw = json!({
            "hits": { "hits": [] },
            "aggregations": {
                "bytes": {
                    "buckets": [
                        {
                            "key": 6219, "doc_count": 3,
                            "ram": { "count": 3, "min": 1.0, "max": 5.0, "avg": 3.0, "sum": 9.0 }
                        },
                        {
                            "key": 0, "doc_count": 1,
                            "ram": { "count": 1, "min": 2.0, "max": 2.0, "avg": 2.0, "sum": 2.0 }
                        }
                    ]
                }
            }
        });

        let response = SearchResponse::parse(&raw, &request(vec![named])).unwrap();
        let buckets = response.buckets("bytes").unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].key_string(), "6219");

        let ram = buckets[0].sub_aggregation("ram").unwrap().as_stats("ram").unwrap();
        assert_eq!(ram.avg, Some(3.0));
        assert_eq!(ram.metric("count"), Some(3.0));
        assert!(buckets[0].sub_aggregation("cpu").is_err());
    }

    #[test]
    fn test_hit_sample() {
        let aggs = AggregationBuilder::default();
        let named = aggs
            .top_hits("price", SortOrder::Desc, &["name"], &[], 2)
            .unwrap();
        let raw = json!({
            "hits": { "hits": [] },
            "aggregations": {
                "top_sales_hits": {
                    "hits": {
                        "total": { "value": 3, "relation": "eq" },
                        "hits": [
                            { "_index": "books", "_id": "2", "_score": null, "_source": { "name": "B" } },
                            { "_index": "books", "_id": "1", "_score": null, "_source": { "name": "A" } }
                        ]
                    }
                }
            }
        });

        let response = SearchResponse::parse(&raw, &request(vec![named])).unwrap();
        let sample = response.hit_sample("top_sales_hits").unwrap();
        assert_eq!(sample.total, 3);
        assert_eq!(sample.hits[0].source["name"], json!("B"));
        assert!(sample.hits[0].score.is_none());
    }

    #[test]
    fn test_declared_but_absent_aggregation_is_transport_error() {
        let aggs = AggregationBuilder::default();
        let raw = json!({ "hits": { "hits": [] } });
        let result = SearchResponse::parse(&raw, &request(vec![aggs.max("price").unwrap()]));
        assert!(matches!(result, Err(SearchError::Transport(_))));
    }
}
