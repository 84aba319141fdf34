//! Connection and catalog configuration.
//!
//! [`OpenSearchConfig`] describes how to reach the engine. [`CatalogConfig`]
//! holds everything the builders would otherwise hard-code: which index and
//! document kind each logical dataset lives in, the unanalyzed-field suffix,
//! the field names the catalog operations target and the top-hits projection.
//! Both are resolved once when the service is constructed.

use crate::error::{Result, SearchError};
use crate::request::CollectionRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Logical dataset holding books.
pub const BOOKS: &str = "books";
/// Logical dataset holding web-server log entries.
pub const LOGS: &str = "logs";
/// Logical dataset holding submitted forms.
pub const FORMS: &str = "forms";

const ENV_PREFIX: &str = "FOLIO";

// =============================================================================
// Connection
// =============================================================================

/// OpenSearch connection configuration.
#[derive(Debug, Clone)]
pub struct OpenSearchConfig {
    /// OpenSearch URL(s). Only the first is used by the single-node pool.
    pub urls: Vec<String>,
    /// Basic auth username.
    pub username: Option<String>,
    /// Basic auth password.
    pub password: Option<String>,
    /// Request timeout.
    pub request_timeout: Duration,
}

impl OpenSearchConfig {
    /// Create a new configuration with a single URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            password: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Read `FOLIO_OPENSEARCH_URL`, `FOLIO_OPENSEARCH_USERNAME`,
    /// `FOLIO_OPENSEARCH_PASSWORD` and `FOLIO_OPENSEARCH_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Same as [`from_env`](Self::from_env) over an explicit variable set.
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: BTreeMap<String, String> = vars.into_iter().collect();
        let key = |name: &str| format!("{}_OPENSEARCH_{}", ENV_PREFIX, name);

        let mut config = Self::new(
            vars.get(&key("URL"))
                .cloned()
                .unwrap_or_else(|| "http://localhost:9200".to_string()),
        );
        if let (Some(user), Some(pass)) = (vars.get(&key("USERNAME")), vars.get(&key("PASSWORD"))) {
            config = config.with_basic_auth(user.clone(), pass.clone());
        }
        if let Some(secs) = vars
            .get(&key("TIMEOUT_SECS"))
            .and_then(|s| s.parse::<u64>().ok())
        {
            config = config.with_request_timeout(Duration::from_secs(secs));
        }
        config
    }

    /// Set basic authentication credentials.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Field names used by the catalog operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    /// Book title field matched by `get_book` / `delete_book`.
    pub book_name: String,
    /// Form article identifier (analyzed; exact matches use its sibling).
    pub form_article_id: String,
    /// Form post date (analyzed; exact matches use its sibling).
    pub form_post_date: String,
    /// Numeric log field summarized per bucket by `log_terms_multi_aggregate`.
    pub log_metric: String,
    /// Name of the stats sub-aggregation over `log_metric`.
    pub log_metric_name: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            book_name: "name".to_string(),
            form_article_id: "articleID".to_string(),
            form_post_date: "postDate".to_string(),
            log_metric: "machine.ram".to_string(),
            log_metric_name: "ram".to_string(),
        }
    }
}

/// Projection applied by `top_aggregate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopHitsDefaults {
    /// Fields to keep.
    pub includes: Vec<String>,
    /// Fields to drop. Wins over `includes`.
    pub excludes: Vec<String>,
    /// Maximum number of sampled documents.
    pub size: i64,
}

impl Default for TopHitsDefaults {
    fn default() -> Self {
        Self {
            includes: vec!["name".to_string(), "price".to_string()],
            excludes: ["publish", "type", "author", "info"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            size: 2,
        }
    }
}

/// Dataset and field configuration for the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Suffix naming a text field's unanalyzed sibling.
    pub keyword_suffix: String,
    /// Reject writes whose identifier already exists instead of overwriting.
    pub create_only: bool,
    /// Collection reference per logical dataset name.
    pub collections: BTreeMap<String, CollectionRef>,
    /// Field names used by the catalog operations.
    pub fields: FieldNames,
    /// Top-hits projection.
    pub top_hits: TopHitsDefaults,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let collections = [BOOKS, LOGS, FORMS]
            .iter()
            .map(|name| (name.to_string(), CollectionRef::new(*name)))
            .collect();

        Self {
            keyword_suffix: ".keyword".to_string(),
            create_only: false,
            collections,
            fields: FieldNames::default(),
            top_hits: TopHitsDefaults::default(),
        }
    }
}

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    /// JSON document.
    Json,
    /// TOML document.
    Toml,
}

impl FileFormat {
    /// Detect the format from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            _ => None,
        }
    }
}

impl CatalogConfig {
    /// Load from a `.toml` or `.json` file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = path
            .extension()
            .and_then(|s| s.to_str())
            .and_then(FileFormat::from_extension)
            .ok_or_else(|| {
                SearchError::Config(format!("Unsupported config file: {}", path.display()))
            })?;

        let content = std::fs::read_to_string(path)
            .map_err(|e| SearchError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        Self::parse(&content, format)
    }

    /// Parse configuration text.
    pub fn parse(content: &str, format: FileFormat) -> Result<Self> {
        let config: Self = match format {
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|e| SearchError::Config(format!("JSON parse error: {}", e)))?,
            FileFormat::Toml => toml::from_str(content)
                .map_err(|e| SearchError::Config(format!("TOML parse error: {}", e)))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a `.env` file (if present) and apply `FOLIO_*` overrides.
    pub fn with_dotenv(self, path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| SearchError::Config(e.to_string()))?;
            }
            None => {
                dotenvy::dotenv().ok();
            }
        }
        self.with_env()
    }

    /// Apply `FOLIO_*` overrides from the process environment.
    pub fn with_env(self) -> Result<Self> {
        self.with_vars(std::env::vars())
    }

    /// Apply overrides from an explicit variable set.
    ///
    /// Recognized keys: `FOLIO_KEYWORD_SUFFIX`, `FOLIO_CREATE_ONLY`,
    /// `FOLIO_<DATASET>_INDEX` and `FOLIO_<DATASET>_TYPE`. A dataset named
    /// only in the environment is added.
    pub fn with_vars<I>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let prefix = format!("{}_", ENV_PREFIX);

        for (key, value) in vars {
            let Some(key) = key.strip_prefix(&prefix) else {
                continue;
            };

            match key {
                "KEYWORD_SUFFIX" => self.keyword_suffix = value,
                "CREATE_ONLY" => {
                    self.create_only = value == "1" || value.eq_ignore_ascii_case("true")
                }
                _ => {
                    if let Some(dataset) = key.strip_suffix("_INDEX") {
                        let dataset = dataset.to_lowercase();
                        self.collections
                            .entry(dataset.clone())
                            .or_insert_with(|| CollectionRef::new(dataset))
                            .index = value;
                    } else if let Some(dataset) = key.strip_suffix("_TYPE") {
                        let dataset = dataset.to_lowercase();
                        self.collections
                            .entry(dataset.clone())
                            .or_insert_with(|| CollectionRef::new(dataset))
                            .doc_type = Some(value).filter(|v| !v.is_empty());
                    }
                }
            }
        }

        self.validate()?;
        Ok(self)
    }

    /// Resolve a logical dataset name.
    pub fn collection(&self, dataset: &str) -> Result<&CollectionRef> {
        self.collections
            .get(dataset)
            .ok_or_else(|| SearchError::Config(format!("Unknown dataset: {}", dataset)))
    }

    /// Datasets whose collection names a document kind, which typeless
    /// engines do not use.
    pub fn typed_datasets(&self) -> Vec<&str> {
        self.collections
            .iter()
            .filter(|(_, collection)| collection.doc_type.is_some())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// `field` followed by the unanalyzed suffix, unless it already ends in it.
    pub fn keyword_field(&self, field: &str) -> String {
        if self.keyword_suffix.is_empty() || field.ends_with(&self.keyword_suffix) {
            field.to_string()
        } else {
            format!("{}{}", field, self.keyword_suffix)
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some((name, _)) = self
            .collections
            .iter()
            .find(|(_, collection)| collection.index.trim().is_empty())
        {
            return Err(SearchError::Config(format!(
                "Dataset '{}' has an empty index name",
                name
            )));
        }
        if self.top_hits.size < 1 {
            return Err(SearchError::Config(
                "top_hits.size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
