//! Query DSL builder.
//!
//! [`QueryBuilder`] validates caller parameters and produces [`Query`]
//! values. It never falls back to `match_all`: an empty field, an empty
//! value or a boolean query without clauses is an [`SearchError::InvalidQuery`].

use crate::error::{Result, SearchError};
use serde_json::{Value, json};

/// Query types produced by the builder.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Analyzed phrase match.
    MatchPhrase(MatchPhraseQuery),
    /// Exact, untokenized match on one value.
    Term(TermQuery),
    /// Exact, untokenized match on any of several values.
    Terms(TermsQuery),
    /// Wraps a query so every match gets the same score.
    ConstantScore(Box<Query>),
    /// Should/must-not combination.
    Bool(BoolQuery),
}

impl Query {
    /// Convert query to JSON.
    pub fn to_json(&self) -> Value {
        match self {
            Query::MatchPhrase(m) => json!({ "match_phrase": { &m.field: m.value } }),
            Query::Term(t) => json!({ "term": { &t.field: t.value } }),
            Query::Terms(t) => json!({ "terms": { &t.field: t.values } }),
            Query::ConstantScore(inner) => {
                json!({ "constant_score": { "filter": inner.to_json() } })
            }
            Query::Bool(b) => b.to_json(),
        }
    }
}

/// Phrase match on an analyzed field.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchPhraseQuery {
    /// Field to search.
    pub field: String,
    /// Phrase whose tokens must appear in sequence.
    pub value: String,
}

/// Term query for exact matching.
#[derive(Debug, Clone, PartialEq)]
pub struct TermQuery {
    /// Field name, already rewritten to the unanalyzed sibling.
    pub field: String,
    /// Exact value to match.
    pub value: Value,
}

/// Terms query for matching multiple exact values.
#[derive(Debug, Clone, PartialEq)]
pub struct TermsQuery {
    /// Field name, already rewritten to the unanalyzed sibling.
    pub field: String,
    /// Values to match.
    pub values: Vec<Value>,
}

/// Bool query: at least one `should` clause matches (when any are given)
/// and no `must_not` clause matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    /// Should match (OR, contributes to score).
    pub should: Vec<Query>,
    /// Must not match (hard exclusion).
    pub must_not: Vec<Query>,
}

impl BoolQuery {
    fn to_json(&self) -> Value {
        let mut bool_query = serde_json::Map::new();

        if !self.should.is_empty() {
            bool_query.insert(
                "should".to_string(),
                Value::Array(self.should.iter().map(|q| q.to_json()).collect()),
            );
        }
        if !self.must_not.is_empty() {
            bool_query.insert(
                "must_not".to_string(),
                Value::Array(self.must_not.iter().map(|q| q.to_json()).collect()),
            );
        }

        json!({ "bool": bool_query })
    }
}

/// Builds validated queries.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    keyword_suffix: String,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new(".keyword")
    }
}

impl QueryBuilder {
    /// Create a builder that addresses unanalyzed siblings as `<field><suffix>`.
    pub fn new(keyword_suffix: impl Into<String>) -> Self {
        Self {
            keyword_suffix: keyword_suffix.into(),
        }
    }

    /// Name of `field`'s unanalyzed sibling. Already-suffixed names are
    /// returned unchanged.
    pub fn keyword_field(&self, field: &str) -> String {
        if self.keyword_suffix.is_empty() || field.ends_with(&self.keyword_suffix) {
            field.to_string()
        } else {
            format!("{}{}", field, self.keyword_suffix)
        }
    }

    /// Phrase match: `value`'s tokens must appear in sequence in `field`.
    pub fn phrase_match(&self, field: &str, value: &str) -> Result<Query> {
        let field = require_field(field)?;
        if value.trim().is_empty() {
            return Err(SearchError::InvalidQuery(format!(
                "match_phrase on '{}' needs a non-empty value",
                field
            )));
        }

        Ok(Query::MatchPhrase(MatchPhraseQuery {
            field,
            value: value.to_string(),
        }))
    }

    /// Exact match on `field`. `value` is not tokenized.
    ///
    /// String values target the unanalyzed sibling; numbers and booleans
    /// target `field` itself, since non-text fields have no sibling.
    pub fn exact_term(&self, field: &str, value: impl Into<Value>) -> Result<Query> {
        let field = require_field(field)?;
        let value = require_value(&field, value.into())?;
        let field = if value.is_string() {
            self.keyword_field(&field)
        } else {
            field
        };

        Ok(Query::Term(TermQuery { field, value }))
    }

    /// Exact match on any of `values`. The unanalyzed sibling is targeted
    /// when every value is a string.
    pub fn exact_terms<V>(&self, field: &str, values: impl IntoIterator<Item = V>) -> Result<Query>
    where
        V: Into<Value>,
    {
        let field = require_field(field)?;
        let values = values
            .into_iter()
            .map(|v| require_value(&field, v.into()))
            .collect::<Result<Vec<_>>>()?;

        if values.is_empty() {
            return Err(SearchError::InvalidQuery(format!(
                "terms on '{}' needs at least one value",
                field
            )));
        }

        let field = if values.iter().all(Value::is_string) {
            self.keyword_field(&field)
        } else {
            field
        };

        Ok(Query::Terms(TermsQuery { field, values }))
    }

    /// Combine clauses: any `should` may match, no `must_not` may match.
    ///
    /// An empty `should` with a non-empty `must_not` matches everything
    /// except the excluded documents. Both empty is rejected.
    pub fn bool_combine(&self, should: Vec<Query>, must_not: Vec<Query>) -> Result<Query> {
        if should.is_empty() && must_not.is_empty() {
            return Err(SearchError::InvalidQuery(
                "bool query needs at least one should or must_not clause".to_string(),
            ));
        }

        Ok(Query::Bool(BoolQuery { should, must_not }))
    }

    /// Disable relevance scoring for `inner`.
    pub fn constant_score(&self, inner: Query) -> Query {
        Query::ConstantScore(Box::new(inner))
    }
}

fn require_field(field: &str) -> Result<String> {
    let field = field.trim();
    if field.is_empty() {
        return Err(SearchError::InvalidQuery(
            "field name must not be empty".to_string(),
        ));
    }
    Ok(field.to_string())
}

fn require_value(field: &str, value: Value) -> Result<Value> {
    let valid = match &value {
        Value::String(s) => !s.trim().is_empty(),
        Value::Number(_) | Value::Bool(_) => true,
        Value::Null | Value::Array(_) | Value::Object(_) => false,
    };

    if valid {
        Ok(value)
    } else {
        Err(SearchError::InvalidQuery(format!(
            "term on '{}' needs a non-empty scalar value",
            field
        )))
    }
}
