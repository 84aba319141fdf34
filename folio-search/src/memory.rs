//! In-memory gateway for tests and local development.
//!
//! [`MemoryTransport`] evaluates the query and aggregation subset the
//! builders produce over JSON documents held in process. Text fields are
//! analyzed by lower-casing and splitting on non-alphanumeric characters;
//! `<field><suffix>` addresses the stored value verbatim. Unknown indices
//! behave as empty ones. Writes are visible to the next search immediately.

use crate::{
    aggregation::{
        Aggregation, BucketOrder, SortOrder, TermsAggregation, TopHitsAggregation, anchored_regex,
    },
    error::{Result, SearchError},
    query::Query,
    request::{CollectionRef, SearchRequest},
    transport::{Transport, WriteMode, WriteOptions},
};
use async_trait::async_trait;
use folio_log::debug;
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Mutex, PoisonError, RwLock};

const DEFAULT_HIT_COUNT: i64 = 10;
const DEFAULT_BUCKET_COUNT: i64 = 10;

#[derive(Debug, Clone)]
struct StoredDoc {
    id: String,
    source: Map<String, Value>,
}

/// In-process [`Transport`].
#[derive(Debug)]
pub struct MemoryTransport {
    keyword_suffix: String,
    indices: RwLock<BTreeMap<String, Vec<StoredDoc>>>,
    calls: Mutex<Vec<String>>,
    unavailable: AtomicBool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> SearchError {
    SearchError::Transport("memory store lock poisoned".to_string())
}

impl MemoryTransport {
    /// Empty store whose unanalyzed siblings use the `.keyword` suffix.
    pub fn new() -> Self {
        Self::with_keyword_suffix(".keyword")
    }

    /// Empty store with a custom unanalyzed-sibling suffix.
    pub fn with_keyword_suffix(suffix: impl Into<String>) -> Self {
        Self {
            keyword_suffix: suffix.into(),
            indices: RwLock::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every following call fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    /// Calls received so far, e.g. `search:books` or `delete:books/42`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of documents stored in `index`.
    pub fn len(&self, index: &str) -> usize {
        self.indices
            .read()
            .map(|indices| indices.get(index).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Whether `index` holds no documents.
    pub fn is_empty(&self, index: &str) -> bool {
        self.len(index) == 0
    }

    /// Stored source of one document.
    pub fn document(&self, index: &str, id: &str) -> Option<Map<String, Value>> {
        let indices = self.indices.read().ok()?;
        indices
            .get(index)?
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.source.clone())
    }

    fn enter(&self, call: String) -> Result<()> {
        debug!("memory transport call"; "call" => call);
        self.calls.lock().map_err(poisoned)?.push(call);
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(SearchError::Transport("engine unavailable".to_string()));
        }
        Ok(())
    }

    /// Split `<base><suffix>` into `(base, true)`; anything else is analyzed.
    fn resolve<'f>(&self, field: &'f str) -> (&'f str, bool) {
        if !self.keyword_suffix.is_empty() {
            if let Some(base) = field.strip_suffix(self.keyword_suffix.as_str()) {
                return (base, true);
            }
        }
        (field, false)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    fn matches(&self, query: &Query, source: &Map<String, Value>) -> bool {
        match query {
            Query::MatchPhrase(m) => {
                let (base, exact) = self.resolve(&m.field);
                let phrase = tokenize(&m.value);
                lookup(source, base).into_iter().any(|stored| {
                    let Some(text) = scalar_text(stored) else {
                        return false;
                    };
                    if exact {
                        text == m.value
                    } else {
                        contains_sequence(&tokenize(&text), &phrase)
                    }
                })
            }
            Query::Term(t) => self.term_matches(&t.field, &t.value, source),
            Query::Terms(t) => t
                .values
                .iter()
                .any(|value| self.term_matches(&t.field, value, source)),
            Query::ConstantScore(inner) => self.matches(inner, source),
            Query::Bool(b) => {
                (b.should.is_empty() || b.should.iter().any(|q| self.matches(q, source)))
                    && !b.must_not.iter().any(|q| self.matches(q, source))
            }
        }
    }

    /// Term values are compared untokenized: against the stored value on an
    /// unanalyzed sibling, against single tokens on an analyzed field.
    fn term_matches(&self, field: &str, value: &Value, source: &Map<String, Value>) -> bool {
        let (base, exact) = self.resolve(field);
        lookup(source, base).into_iter().any(|stored| match stored {
            Value::String(s) => match value.as_str() {
                Some(wanted) if exact => s == wanted,
                Some(wanted) => tokenize(s).iter().any(|token| token == wanted),
                None => false,
            },
            Value::Number(n) => numeric(value) == n.as_f64(),
            Value::Bool(b) => value.as_bool() == Some(*b) || value.as_str() == Some(b.to_string().as_str()),
            _ => false,
        })
    }

    // -------------------------------------------------------------------------
    // Aggregations
    // -------------------------------------------------------------------------

    fn aggregate(&self, aggregation: &Aggregation, docs: &[&StoredDoc]) -> Result<Value> {
        match aggregation {
            Aggregation::Max { field } => {
                let max = self
                    .numbers(docs, field)
                    .into_iter()
                    .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))));
                Ok(json!({ "value": max }))
            }
            Aggregation::Avg { field } => {
                let values = self.numbers(docs, field);
                let avg = (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64);
                Ok(json!({ "value": avg }))
            }
            Aggregation::Stats { field } => Ok(stats_json(&self.numbers(docs, field))),
            Aggregation::Terms(terms) => self.terms(terms, docs),
            Aggregation::TopHits(top) => Ok(self.top_hits(top, docs)),
        }
    }

    fn numbers(&self, docs: &[&StoredDoc], field: &str) -> Vec<f64> {
        let (base, _) = self.resolve(field);
        docs.iter()
            .flat_map(|doc| lookup(&doc.source, base))
            .filter_map(Value::as_f64)
            .collect()
    }

    fn terms(&self, terms: &TermsAggregation, docs: &[&StoredDoc]) -> Result<Value> {
        let (base, exact) = self.resolve(&terms.field);
        let compile = |pattern: &Option<String>| {
            pattern
                .as_deref()
                .map(anchored_regex)
                .transpose()
                .map_err(|e| SearchError::Transport(format!("bad bucket pattern: {}", e)))
        };
        let include = compile(&terms.include)?;
        let exclude = compile(&terms.exclude)?;

        // key text -> (key, documents)
        let mut groups: BTreeMap<String, (Value, Vec<&StoredDoc>)> = BTreeMap::new();
        for doc in docs {
            let mut keys: BTreeMap<String, Value> = BTreeMap::new();
            for stored in lookup(&doc.source, base) {
                match stored {
                    Value::String(s) if exact => {
                        keys.insert(s.clone(), stored.clone());
                    }
                    Value::String(s) => {
                        for token in tokenize(s) {
                            keys.insert(token.clone(), Value::String(token));
                        }
                    }
                    Value::Number(_) | Value::Bool(_) => {
                        keys.insert(stored.to_string(), stored.clone());
                    }
                    _ => {}
                }
            }

            for (text, key) in keys {
                if include.as_ref().is_some_and(|r| !r.is_match(&text)) {
                    continue;
                }
                if exclude.as_ref().is_some_and(|r| r.is_match(&text)) {
                    continue;
                }
                groups.entry(text).or_insert_with(|| (key, Vec::new())).1.push(*doc);
            }
        }

        let mut buckets = Vec::with_capacity(groups.len());
        for (_, (key, members)) in groups {
            let mut subs = Map::new();
            for sub in &terms.sub_aggregations {
                subs.insert(sub.name.clone(), self.aggregate(&sub.aggregation, &members)?);
            }
            buckets.push((key, members.len() as u64, subs));
        }

        let by_count = |a: &(Value, u64, Map<String, Value>), b: &(Value, u64, Map<String, Value>)| {
            a.1.cmp(&b.1)
        };
        let by_key = |a: &(Value, u64, Map<String, Value>), b: &(Value, u64, Map<String, Value>)| {
            compare_keys(&a.0, &b.0)
        };

        match &terms.order {
            None => buckets.sort_by(|a, b| by_count(b, a).then_with(|| by_key(a, b))),
            Some(BucketOrder::Count(order)) => {
                buckets.sort_by(|a, b| directed(by_count(a, b), *order).then_with(|| by_key(a, b)))
            }
            Some(BucketOrder::Key(order)) => buckets.sort_by(|a, b| directed(by_key(a, b), *order)),
            Some(BucketOrder::SubAggregation { path, order }) => {
                let (name, metric) = match path.split_once('.') {
                    Some((name, metric)) => (name, metric),
                    None => (path.as_str(), "value"),
                };
                let metric_of = |subs: &Map<String, Value>| subs.get(name).and_then(|s| s[metric].as_f64());
                buckets.sort_by(|a, b| {
                    directed(compare_optional(metric_of(&a.2), metric_of(&b.2)), *order)
                        .then_with(|| by_key(a, b))
                });
            }
        }

        let size = terms.size.unwrap_or(DEFAULT_BUCKET_COUNT).max(0) as usize;
        let buckets: Vec<Value> = buckets
            .into_iter()
            .take(size)
            .map(|(key, doc_count, subs)| {
                let mut bucket = subs;
                bucket.insert("key".to_string(), key);
                bucket.insert("doc_count".to_string(), json!(doc_count));
                Value::Object(bucket)
            })
            .collect();

        Ok(json!({ "buckets": buckets }))
    }

    fn top_hits(&self, top: &TopHitsAggregation, docs: &[&StoredDoc]) -> Value {
        let (base, _) = self.resolve(&top.sort_field);
        let sort_value = |doc: &StoredDoc| lookup(&doc.source, base).into_iter().next().cloned();

        let mut sorted: Vec<&StoredDoc> = docs.to_vec();
        sorted.sort_by(|a, b| match (sort_value(*a), sort_value(*b)) {
            (Some(x), Some(y)) => directed(compare_keys(&x, &y), top.order),
            // Documents without the sort field go last in either direction.
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });

        let hits: Vec<Value> = sorted
            .into_iter()
            .take(top.size.max(0) as usize)
            .map(|doc| {
                json!({
                    "_id": doc.id,
                    "_score": null,
                    "_source": project_source(&doc.source, &top.includes, &top.excludes),
                    "sort": [sort_value(doc)],
                })
            })
            .collect();

        json!({
            "hits": {
                "total": { "value": docs.len(), "relation": "eq" },
                "max_score": null,
                "hits": hits,
            }
        })
    }

    // -------------------------------------------------------------------------
    // Round trips
    // -------------------------------------------------------------------------

    fn run_search(&self, request: &SearchRequest) -> Result<Value> {
        let index = &request.collection().index;
        self.enter(format!("search:{}", index))?;

        let indices = self.indices.read().map_err(poisoned)?;
        let matched: Vec<&StoredDoc> = indices
            .get(index)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| request.query().is_none_or(|q| self.matches(q, &doc.source)))
                    .collect()
            })
            .unwrap_or_default();

        let hit_count = request.size().unwrap_or(DEFAULT_HIT_COUNT).max(0) as usize;
        let hits: Vec<Value> = matched
            .iter()
            .take(hit_count)
            .map(|doc| {
                json!({
                    "_index": index,
                    "_id": doc.id,
                    "_score": 1.0,
                    "_source": doc.source,
                })
            })
            .collect();

        let max_score = if matched.is_empty() { Value::Null } else { json!(1.0) };
        let mut aggregations = Map::new();
        for named in request.aggregations() {
            aggregations.insert(named.name.clone(), self.aggregate(&named.aggregation, &matched)?);
        }

        Ok(json!({
            "took": 0,
            "timed_out": false,
            "hits": {
                "total": { "value": matched.len(), "relation": "eq" },
                "max_score": max_score,
                "hits": hits,
            },
            "aggregations": aggregations,
        }))
    }

    fn run_index(
        &self,
        collection: &CollectionRef,
        id: &str,
        source: &Map<String, Value>,
        options: WriteOptions,
    ) -> Result<String> {
        self.enter(format!("index:{}/{}", collection.index, id))?;

        let mut indices = self.indices.write().map_err(poisoned)?;
        let docs = indices.entry(collection.index.clone()).or_default();
        match docs.iter_mut().find(|d| d.id == id) {
            Some(_) if options.mode == WriteMode::CreateOnly => Err(SearchError::Conflict {
                index: collection.index.clone(),
                id: id.to_string(),
            }),
            Some(existing) => {
                existing.source = source.clone();
                Ok(id.to_string())
            }
            None => {
                docs.push(StoredDoc {
                    id: id.to_string(),
                    source: source.clone(),
                });
                Ok(id.to_string())
            }
        }
    }

    fn run_update(&self, collection: &CollectionRef, id: &str, patch: &Map<String, Value>) -> Result<()> {
        self.enter(format!("update:{}/{}", collection.index, id))?;

        let mut indices = self.indices.write().map_err(poisoned)?;
        let existing = indices
            .get_mut(&collection.index)
            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
            .ok_or_else(|| {
                SearchError::Transport(format!("document not found: {}/{}", collection.index, id))
            })?;

        merge_patch(&mut existing.source, patch);
        Ok(())
    }

    fn run_delete(&self, collection: &CollectionRef, id: &str) -> Result<bool> {
        self.enter(format!("delete:{}/{}", collection.index, id))?;

        let mut indices = self.indices.write().map_err(poisoned)?;
        let Some(docs) = indices.get_mut(&collection.index) else {
            return Ok(false);
        };
        let before = docs.len();
        docs.retain(|d| d.id != id);
        Ok(docs.len() < before)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn search(&self, request: &SearchRequest) -> Result<Value> {
        self.run_search(request)
    }

    async fn index(
        &self,
        collection: &CollectionRef,
        id: &str,
        source: &Map<String, Value>,
        options: WriteOptions,
    ) -> Result<String> {
        self.run_index(collection, id, source, options)
    }

    async fn update(
        &self,
        collection: &CollectionRef,
        id: &str,
        patch: &Map<String, Value>,
        _options: WriteOptions,
    ) -> Result<()> {
        self.run_update(collection, id, patch)
    }

    async fn delete(&self, collection: &CollectionRef, id: &str, _options: WriteOptions) -> Result<bool> {
        self.run_delete(collection, id)
    }

    async fn refresh(&self, collection: &CollectionRef) -> Result<()> {
        self.enter(format!("refresh:{}", collection.index))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_sequence(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Values at `path`: a literal dotted key first, then nested objects.
/// Arrays are flattened.
fn lookup<'v>(source: &'v Map<String, Value>, path: &str) -> Vec<&'v Value> {
    let found = source.get(path).or_else(|| {
        let mut parts = path.split('.');
        let mut current = source.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    });

    match found {
        Some(Value::Array(items)) => items.iter().filter(|v| !v.is_null()).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(value) => vec![value],
    }
}

fn compare_keys(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => scalar_text(a).cmp(&scalar_text(b)),
    }
}

fn compare_optional(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}

fn directed(ordering: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

fn stats_json(values: &[f64]) -> Value {
    if values.is_empty() {
        return json!({ "count": 0, "min": null, "max": null, "avg": null, "sum": 0.0 });
    }
    let sum: f64 = values.iter().sum();
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    json!({
        "count": values.len(),
        "min": min,
        "max": max,
        "avg": sum / values.len() as f64,
        "sum": sum,
    })
}

fn project_source(source: &Map<String, Value>, includes: &[String], excludes: &[String]) -> Map<String, Value> {
    source
        .iter()
        .filter(|(key, _)| includes.is_empty() || includes.contains(key))
        .filter(|(key, _)| !excludes.contains(key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn merge_patch(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge_patch(existing, nested),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}
