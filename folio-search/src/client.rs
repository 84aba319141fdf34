//! OpenSearch gateway.

use crate::{
    config::OpenSearchConfig,
    error::{Result, SearchError},
    request::{CollectionRef, SearchRequest},
    transport::{Transport, WriteMode, WriteOptions},
};
use async_trait::async_trait;
use folio_log::{debug, error, info, trace};
use opensearch::{
    OpenSearch,
    http::{
        StatusCode,
        transport::{SingleNodeConnectionPool, TransportBuilder},
    },
    params::{OpType, Refresh},
};
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// [`Transport`] backed by the `opensearch` client.
#[derive(Clone)]
pub struct OpenSearchTransport {
    client: Arc<OpenSearch>,
    config: Arc<OpenSearchConfig>,
}

impl OpenSearchTransport {
    /// Create a new gateway.
    pub fn new(config: OpenSearchConfig) -> Result<Self> {
        info!("Initializing OpenSearch transport"; "urls" => format!("{:?}", config.urls));

        let url = config
            .urls
            .first()
            .ok_or_else(|| SearchError::Config("No URLs provided".to_string()))?;

        let url = opensearch::http::Url::parse(url)
            .map_err(|e| SearchError::Config(format!("Invalid URL: {}", e)))?;

        let conn_pool = SingleNodeConnectionPool::new(url);
        let mut builder = TransportBuilder::new(conn_pool)
            .timeout(config.request_timeout)
            .disable_proxy();

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.auth(opensearch::auth::Credentials::Basic(
                user.clone(),
                pass.clone(),
            ));
        }

        let transport = builder
            .build()
            .map_err(|e| SearchError::Transport(e.to_string()))?;

        Ok(Self {
            client: Arc::new(OpenSearch::new(transport)),
            config: Arc::new(config),
        })
    }

    /// Get the underlying OpenSearch client.
    pub fn inner(&self) -> &OpenSearch {
        &self.client
    }

    /// Get the configuration.
    pub fn config(&self) -> &OpenSearchConfig {
        &self.config
    }

    /// Ping the cluster.
    pub async fn ping(&self) -> bool {
        self.client.ping().send().await.is_ok()
    }
}

fn refresh_param(options: WriteOptions) -> Refresh {
    if options.refresh {
        Refresh::WaitFor
    } else {
        Refresh::False
    }
}

fn engine_failure(operation: &str, collection: &CollectionRef, status: StatusCode, body: &Value) -> SearchError {
    let reason = body
        .get("error")
        .and_then(|e| e.get("reason").or(Some(e)))
        .and_then(|r| r.as_str())
        .unwrap_or("Unknown error");

    error!("{} failed", operation; "index" => collection.index, "status" => status.as_u16(), "reason" => reason);
    SearchError::Transport(format!("{} on {} returned {}: {}", operation, collection, status.as_u16(), reason))
}

#[async_trait]
impl Transport for OpenSearchTransport {
    async fn search(&self, request: &SearchRequest) -> Result<Value> {
        let collection = request.collection();
        let body = request.to_body();
        debug!("Searching"; "index" => collection.index, "aggs" => request.aggregations().len());
        trace!("Search body: {}", body);

        let response = self
            .client
            .search(opensearch::SearchParts::Index(&[collection.index.as_str()]))
            .body(body)
            .send()
            .await?;

        let status = response.status_code();
        let result: Value = response.json().await?;

        if !status.is_success() {
            return Err(engine_failure("search", collection, status, &result));
        }

        Ok(result)
    }

    async fn index(
        &self,
        collection: &CollectionRef,
        id: &str,
        source: &Map<String, Value>,
        options: WriteOptions,
    ) -> Result<String> {
        debug!("Indexing document"; "index" => collection.index, "id" => id, "mode" => format!("{:?}", options.mode));

        let mut request = self
            .client
            .index(opensearch::IndexParts::IndexId(&collection.index, id))
            .refresh(refresh_param(options));
        if options.mode == WriteMode::CreateOnly {
            request = request.op_type(OpType::Create);
        }

        let response = request.body(source).send().await?;
        let status = response.status_code();
        let body: Value = response.json().await?;

        if status == StatusCode::CONFLICT {
            return Err(SearchError::Conflict {
                index: collection.index.clone(),
                id: id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(engine_failure("index", collection, status, &body));
        }

        Ok(body["_id"].as_str().unwrap_or(id).to_string())
    }

    async fn update(
        &self,
        collection: &CollectionRef,
        id: &str,
        patch: &Map<String, Value>,
        options: WriteOptions,
    ) -> Result<()> {
        debug!("Updating document"; "index" => collection.index, "id" => id, "fields" => patch.len());

        let response = self
            .client
            .update(opensearch::UpdateParts::IndexId(&collection.index, id))
            .refresh(refresh_param(options))
            .body(json!({ "doc": patch }))
            .send()
            .await?;

        let status = response.status_code();
        if status == StatusCode::NOT_FOUND {
            return Err(SearchError::Transport(format!(
                "document not found: {}/{}",
                collection.index, id
            )));
        }
        if !status.is_success() {
            let body: Value = response.json().await?;
            return Err(engine_failure("update", collection, status, &body));
        }

        Ok(())
    }

    async fn delete(&self, collection: &CollectionRef, id: &str, options: WriteOptions) -> Result<bool> {
        debug!("Deleting document"; "index" => collection.index, "id" => id);

        let response = self
            .client
            .delete(opensearch::DeleteParts::IndexId(&collection.index, id))
            .refresh(refresh_param(options))
            .send()
            .await?;

        let status = response.status_code();
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            let body: Value = response.json().await?;
            return Err(engine_failure("delete", collection, status, &body));
        }

        Ok(true)
    }

    async fn refresh(&self, collection: &CollectionRef) -> Result<()> {
        debug!("Refreshing index"; "index" => collection.index);

        let response = self
            .client
            .indices()
            .refresh(opensearch::indices::IndicesRefreshParts::Index(&[collection.index.as_str()]))
            .send()
            .await?;

        let status = response.status_code();
        if !status.is_success() {
            let body: Value = response.json().await?;
            return Err(engine_failure("refresh", collection, status, &body));
        }

        Ok(())
    }
}

impl std::fmt::Debug for OpenSearchTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenSearchTransport")
            .field("urls", &self.config.urls)
            .finish()
    }
}
