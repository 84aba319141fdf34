//! Aggregation builder.
//!
//! Every aggregation carries its name ([`NamedAggregation`]); the name is how
//! results are looked up in the response and how bucket ordering refers to a
//! sibling sub-aggregation. All validation happens here, before a request is
//! ever sent.

use crate::error::{Result, SearchError};
use regex::Regex;
use serde_json::{Map, Value, json};
use std::collections::HashSet;

/// Name of the aggregation built by [`AggregationBuilder::max`].
pub const MAX_NAME: &str = "max";
/// Name of the aggregation built by [`AggregationBuilder::top_hits`].
pub const TOP_HITS_NAME: &str = "top_sales_hits";
/// Name of the aggregation built by [`AggregationBuilder::terms`].
pub const TERMS_NAME: &str = "term";
/// Name of the aggregation built by [`AggregationBuilder::terms_with_ordered_sub_agg`].
pub const ORDERED_TERMS_NAME: &str = "bytes";
/// Name of the aggregation built by [`AggregationBuilder::filtered_terms`].
pub const FILTERED_TERMS_NAME: &str = "filter";

const STATS_METRICS: [&str; 5] = ["count", "min", "max", "avg", "sum"];

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    /// Order keyword used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    fn ascending(ascending: bool) -> Self {
        if ascending { SortOrder::Asc } else { SortOrder::Desc }
    }
}

/// Result shape an aggregation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationKind {
    /// Single numeric value (max, avg).
    Scalar,
    /// Count/min/max/avg/sum summary.
    Stats,
    /// Bucket list (terms family).
    Buckets,
    /// Sample of documents (top hits).
    Hits,
}

impl AggregationKind {
    /// Human-readable shape name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationKind::Scalar => "scalar",
            AggregationKind::Stats => "stats",
            AggregationKind::Buckets => "bucket list",
            AggregationKind::Hits => "hit sample",
        }
    }
}

/// Aggregation specifications.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    /// Maximum of a numeric field.
    Max {
        /// Field to find the maximum of.
        field: String,
    },
    /// Average of a numeric field.
    Avg {
        /// Field to average.
        field: String,
    },
    /// Count/min/max/avg/sum of a numeric field.
    Stats {
        /// Field to summarize.
        field: String,
    },
    /// Buckets by distinct value.
    Terms(TermsAggregation),
    /// Top documents per sort field.
    TopHits(TopHitsAggregation),
}

impl Aggregation {
    /// Shape of the result this aggregation produces.
    pub fn kind(&self) -> AggregationKind {
        match self {
            Aggregation::Max { .. } | Aggregation::Avg { .. } => AggregationKind::Scalar,
            Aggregation::Stats { .. } => AggregationKind::Stats,
            Aggregation::Terms(_) => AggregationKind::Buckets,
            Aggregation::TopHits(_) => AggregationKind::Hits,
        }
    }

    /// Convert to JSON.
    pub fn to_json(&self) -> Value {
        match self {
            Aggregation::Max { field } => json!({ "max": { "field": field } }),
            Aggregation::Avg { field } => json!({ "avg": { "field": field } }),
            Aggregation::Stats { field } => json!({ "stats": { "field": field } }),
            Aggregation::Terms(terms) => terms.to_json(),
            Aggregation::TopHits(top) => top.to_json(),
        }
    }
}

/// Bucket ordering for terms aggregations.
#[derive(Debug, Clone, PartialEq)]
pub enum BucketOrder {
    /// By document count.
    Count(SortOrder),
    /// By bucket key.
    Key(SortOrder),
    /// By a sub-aggregation metric, e.g. `ram.avg` or `max_price`.
    SubAggregation {
        /// `<sub-aggregation name>[.<metric>]`
        path: String,
        /// Direction.
        order: SortOrder,
    },
}

impl BucketOrder {
    fn to_json(&self) -> Value {
        match self {
            BucketOrder::Count(order) => json!({ "_count": order.as_str() }),
            BucketOrder::Key(order) => json!({ "_key": order.as_str() }),
            BucketOrder::SubAggregation { path, order } => json!({ path: order.as_str() }),
        }
    }
}

/// Terms aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct TermsAggregation {
    /// Field to bucket on, used verbatim.
    pub field: String,
    /// Maximum number of buckets.
    pub size: Option<i64>,
    /// Bucket order; the engine default is descending document count.
    pub order: Option<BucketOrder>,
    /// Regular expression bucket keys must match.
    pub include: Option<String>,
    /// Regular expression bucket keys must not match.
    pub exclude: Option<String>,
    /// Aggregations computed inside each bucket.
    pub sub_aggregations: Vec<NamedAggregation>,
}

impl TermsAggregation {
    fn to_json(&self) -> Value {
        let mut terms = json!({ "field": self.field });
        if let Some(size) = self.size {
            terms["size"] = json!(size);
        }
        if let Some(order) = &self.order {
            terms["order"] = order.to_json();
        }
        if let Some(include) = &self.include {
            terms["include"] = json!(include);
        }
        if let Some(exclude) = &self.exclude {
            terms["exclude"] = json!(exclude);
        }

        let mut agg = json!({ "terms": terms });
        if !self.sub_aggregations.is_empty() {
            agg["aggs"] = aggregations_json(&self.sub_aggregations);
        }
        agg
    }
}

/// Top-hits aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct TopHitsAggregation {
    /// Field to sort by.
    pub sort_field: String,
    /// Sort direction.
    pub order: SortOrder,
    /// Source fields to keep (empty keeps everything not excluded).
    pub includes: Vec<String>,
    /// Source fields to drop. Never overlaps `includes`.
    pub excludes: Vec<String>,
    /// Maximum number of documents returned.
    pub size: i64,
}

impl TopHitsAggregation {
    fn to_json(&self) -> Value {
        json!({
            "top_hits": {
                "sort": [ { &self.sort_field: { "order": self.order.as_str() } } ],
                "_source": {
                    "includes": self.includes,
                    "excludes": self.excludes,
                },
                "size": self.size,
            }
        })
    }
}

/// An aggregation together with its request-unique name.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedAggregation {
    /// Name the result is reported under.
    pub name: String,
    /// The aggregation.
    pub aggregation: Aggregation,
}

impl NamedAggregation {
    /// Pair a name with an aggregation.
    pub fn new(name: impl Into<String>, aggregation: Aggregation) -> Self {
        Self {
            name: name.into(),
            aggregation,
        }
    }
}

/// Render a list of named aggregations as an `aggs` object.
pub(crate) fn aggregations_json(aggregations: &[NamedAggregation]) -> Value {
    let mut map = Map::new();
    for named in aggregations {
        map.insert(named.name.clone(), named.aggregation.to_json());
    }
    Value::Object(map)
}

/// Fail with `InvalidAggregation` on the first repeated name.
pub(crate) fn ensure_unique_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(SearchError::InvalidAggregation(format!(
                "duplicate aggregation name '{}'",
                name
            )));
        }
    }
    Ok(())
}

/// Builds validated aggregations.
#[derive(Debug, Clone)]
pub struct AggregationBuilder {
    keyword_suffix: String,
}

impl Default for AggregationBuilder {
    fn default() -> Self {
        Self::new(".keyword")
    }
}

impl AggregationBuilder {
    /// Create a builder; `keyword_suffix` is only used by [`keyword_field`](Self::keyword_field).
    pub fn new(keyword_suffix: impl Into<String>) -> Self {
        Self {
            keyword_suffix: keyword_suffix.into(),
        }
    }

    /// Name of `field`'s unanalyzed sibling.
    ///
    /// Bucket aggregations use their field verbatim. Bucketing an analyzed
    /// text field yields one bucket per token; pass the result of this
    /// method to get one bucket per stored value instead.
    pub fn keyword_field(&self, field: &str) -> String {
        if self.keyword_suffix.is_empty() || field.ends_with(&self.keyword_suffix) {
            field.to_string()
        } else {
            format!("{}{}", field, self.keyword_suffix)
        }
    }

    /// Maximum of `field`, named `max`.
    pub fn max(&self, field: &str) -> Result<NamedAggregation> {
        Ok(NamedAggregation::new(
            MAX_NAME,
            Aggregation::Max {
                field: require_field(field)?,
            },
        ))
    }

    /// Average of `field` under a caller-chosen name.
    pub fn avg(&self, name: &str, field: &str) -> Result<NamedAggregation> {
        Ok(NamedAggregation::new(
            require_name(name)?,
            Aggregation::Avg {
                field: require_field(field)?,
            },
        ))
    }

    /// Stats of `field` under a caller-chosen name.
    pub fn stats(&self, name: &str, field: &str) -> Result<NamedAggregation> {
        Ok(NamedAggregation::new(
            require_name(name)?,
            Aggregation::Stats {
                field: require_field(field)?,
            },
        ))
    }

    /// Up to `size` documents sorted by `sort_field`, named `top_sales_hits`.
    ///
    /// A field listed in both `includes` and `excludes` is excluded. The
    /// include list is kept as given, so excluding every included field
    /// yields an empty projection rather than the full document.
    pub fn top_hits(
        &self,
        sort_field: &str,
        order: SortOrder,
        includes: &[&str],
        excludes: &[&str],
        size: i64,
    ) -> Result<NamedAggregation> {
        let sort_field = require_field(sort_field)?;
        if size < 1 {
            return Err(SearchError::InvalidAggregation(format!(
                "top_hits size must be at least 1, got {}",
                size
            )));
        }

        let excludes: Vec<String> = excludes
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        let includes: Vec<String> = includes
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();

        Ok(NamedAggregation::new(
            TOP_HITS_NAME,
            Aggregation::TopHits(TopHitsAggregation {
                sort_field,
                order,
                includes,
                excludes,
                size,
            }),
        ))
    }

    /// Buckets by `field`, named `term`, in descending document count.
    pub fn terms(&self, field: &str) -> Result<NamedAggregation> {
        self.terms_builder(TERMS_NAME, field).build()
    }

    /// Buckets by `field`, named `bytes`, ordered by the average of
    /// `metric_field` computed in a stats sub-aggregation called `sub_agg_name`.
    pub fn terms_with_ordered_sub_agg(
        &self,
        field: &str,
        sub_agg_name: &str,
        metric_field: &str,
        ascending: bool,
    ) -> Result<NamedAggregation> {
        self.terms_builder(ORDERED_TERMS_NAME, field)
            .sub_aggregation(self.stats(sub_agg_name, metric_field)?)
            .order_by_sub_aggregation(format!("{}.avg", sub_agg_name), ascending)
            .build()
    }

    /// Buckets by `field`, named `filter`, keeping keys that match
    /// `include` and do not match `exclude`. Either side may be left out.
    ///
    /// `field` is used verbatim; see [`keyword_field`](Self::keyword_field).
    pub fn filtered_terms(
        &self,
        field: &str,
        include: Option<&str>,
        exclude: Option<&str>,
    ) -> Result<NamedAggregation> {
        let mut builder = self.terms_builder(FILTERED_TERMS_NAME, field);
        if let Some(pattern) = include {
            builder = builder.include(pattern);
        }
        if let Some(pattern) = exclude {
            builder = builder.exclude(pattern);
        }
        builder.build()
    }

    /// General terms builder.
    pub fn terms_builder(&self, name: &str, field: &str) -> TermsBuilder {
        TermsBuilder::new(name, field)
    }
}

/// Builder for terms aggregations.
///
/// Sub-aggregations must be added before an ordering clause refers to them;
/// a reference to a name not declared yet makes [`build`](Self::build) fail.
#[derive(Debug)]
pub struct TermsBuilder {
    name: String,
    terms: TermsAggregation,
    error: Option<SearchError>,
}

impl TermsBuilder {
    fn new(name: &str, field: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            terms: TermsAggregation {
                field: field.trim().to_string(),
                size: None,
                order: None,
                include: None,
                exclude: None,
                sub_aggregations: Vec::new(),
            },
            error: None,
        }
    }

    fn fail(&mut self, err: SearchError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Maximum number of buckets.
    pub fn size(mut self, size: i64) -> Self {
        if size < 1 {
            self.fail(SearchError::InvalidAggregation(format!(
                "terms size must be at least 1, got {}",
                size
            )));
        }
        self.terms.size = Some(size);
        self
    }

    /// Regular expression bucket keys must match.
    pub fn include(mut self, pattern: &str) -> Self {
        match compile_pattern(pattern) {
            Ok(()) => self.terms.include = Some(pattern.to_string()),
            Err(e) => self.fail(e),
        }
        self
    }

    /// Regular expression bucket keys must not match.
    pub fn exclude(mut self, pattern: &str) -> Self {
        match compile_pattern(pattern) {
            Ok(()) => self.terms.exclude = Some(pattern.to_string()),
            Err(e) => self.fail(e),
        }
        self
    }

    /// Declare a sub-aggregation computed in every bucket.
    pub fn sub_aggregation(mut self, sub: NamedAggregation) -> Self {
        self.terms.sub_aggregations.push(sub);
        self
    }

    /// Order buckets by document count.
    pub fn order_by_count(mut self, ascending: bool) -> Self {
        self.terms.order = Some(BucketOrder::Count(SortOrder::ascending(ascending)));
        self
    }

    /// Order buckets by key.
    pub fn order_by_key(mut self, ascending: bool) -> Self {
        self.terms.order = Some(BucketOrder::Key(SortOrder::ascending(ascending)));
        self
    }

    /// Order buckets by a declared sub-aggregation's metric.
    ///
    /// `path` is `<name>` for single-value metrics or `<name>.<metric>` for
    /// stats (`count`, `min`, `max`, `avg`, `sum`).
    pub fn order_by_sub_aggregation(mut self, path: impl Into<String>, ascending: bool) -> Self {
        let path = path.into();
        if let Err(e) = self.check_order_path(&path) {
            self.fail(e);
        }
        self.terms.order = Some(BucketOrder::SubAggregation {
            path,
            order: SortOrder::ascending(ascending),
        });
        self
    }

    fn check_order_path(&self, path: &str) -> Result<()> {
        let (name, metric) = match path.split_once('.') {
            Some((name, metric)) => (name, Some(metric)),
            None => (path, None),
        };

        let sub = self
            .terms
            .sub_aggregations
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| {
                SearchError::InvalidAggregation(format!(
                    "order references undeclared sub-aggregation '{}'",
                    name
                ))
            })?;

        match (sub.aggregation.kind(), metric) {
            (AggregationKind::Scalar, None) | (AggregationKind::Scalar, Some("value")) => Ok(()),
            (AggregationKind::Stats, Some(m)) if STATS_METRICS.contains(&m) => Ok(()),
            (kind, _) => Err(SearchError::InvalidAggregation(format!(
                "cannot order buckets by '{}': '{}' is a {} aggregation",
                path,
                name,
                kind.as_str()
            ))),
        }
    }

    /// Validate and produce the named aggregation.
    pub fn build(self) -> Result<NamedAggregation> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let name = require_name(&self.name)?;
        require_field(&self.terms.field)?;
        ensure_unique_names(self.terms.sub_aggregations.iter().map(|s| s.name.as_str()))?;

        Ok(NamedAggregation::new(name, Aggregation::Terms(self.terms)))
    }
}

fn require_field(field: &str) -> Result<String> {
    let field = field.trim();
    if field.is_empty() {
        return Err(SearchError::InvalidAggregation(
            "aggregation field must not be empty".to_string(),
        ));
    }
    Ok(field.to_string())
}

fn require_name(name: &str) -> Result<String> {
    let name = name.trim();
    // `.` separates a sub-aggregation name from its metric in order paths.
    if name.is_empty() || name.contains(['[', ']', '>', '.']) {
        return Err(SearchError::InvalidAggregation(format!(
            "invalid aggregation name '{}'",
            name
        )));
    }
    Ok(name.to_string())
}

/// Bucket filters are full-key regular expressions.
pub(crate) fn anchored_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})$", pattern))
}

fn compile_pattern(pattern: &str) -> Result<()> {
    if pattern.is_empty() {
        return Err(SearchError::InvalidAggregation(
            "bucket filter pattern must not be empty".to_string(),
        ));
    }
    anchored_regex(pattern)
        .map(|_| ())
        .map_err(|e| SearchError::InvalidAggregation(format!("bad pattern '{}': {}", pattern, e)))
}
