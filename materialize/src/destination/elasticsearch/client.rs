use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::error::{ErrorKind, MaterializeError};

/// Number of failed bulk items reported in an error.
const MAX_REPORTED_ITEM_ERRORS: usize = 5;

#[derive(Debug, Error)]
pub enum ElasticsearchError {
    #[error("Endpoint cannot be a base URL: {0}")]
    InvalidEndpoint(Url),

    #[error("Request failed with status {status}: {body}")]
    RequestFailed { status: StatusCode, body: String },

    #[error("{failed} bulk items failed: {}", .errors.join("; "))]
    BulkItemsFailed { failed: usize, errors: Vec<String> },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<ElasticsearchError> for MaterializeError {
    fn from(err: ElasticsearchError) -> MaterializeError {
        match err {
            ElasticsearchError::InvalidEndpoint(_) => MaterializeError::from((
                ErrorKind::ConfigError,
                "Elasticsearch endpoint is invalid",
                err.to_string(),
            )),
            ElasticsearchError::RequestFailed { .. } => MaterializeError::from((
                ErrorKind::DestinationError,
                "Elasticsearch request failed",
                err.to_string(),
            )),
            ElasticsearchError::BulkItemsFailed { .. } => MaterializeError::from((
                ErrorKind::BulkItemFailed,
                "Elasticsearch rejected bulk items",
                err.to_string(),
            )),
            ElasticsearchError::HttpError(err) => err.into(),
            ElasticsearchError::JsonError(err) => err.into(),
        }
    }
}

/// One `index` action of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItem {
    pub index: String,
    pub id: String,
    pub document: Value,
}

#[derive(Debug, Deserialize)]
struct MultiGetResponse {
    docs: Vec<MultiGetDoc>,
}

#[derive(Debug, Deserialize)]
struct MultiGetDoc {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<serde_json::Map<String, Value>>,
}

/// Minimal Elasticsearch HTTP client covering the APIs materializations need.
#[derive(Debug, Clone)]
pub struct ElasticsearchClient {
    client: Client,
    endpoint: Url,
}

impl ElasticsearchClient {
    pub fn new(endpoint: Url) -> ElasticsearchClient {
        ElasticsearchClient {
            client: Client::new(),
            endpoint,
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ElasticsearchError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ElasticsearchError::InvalidEndpoint(self.endpoint.clone()))?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    async fn check(response: Response) -> Result<Response, ElasticsearchError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(ElasticsearchError::RequestFailed { status, body });
        }

        Ok(response)
    }

    /// Fetches the documents of `ids` from `index`, skipping those not found.
    pub async fn multi_get(
        &self,
        index: &str,
        ids: &[String],
    ) -> Result<Vec<Value>, ElasticsearchError> {
        let response = self
            .client
            .post(self.url(&[index, "_mget"])?)
            .json(&json!({ "ids": ids }))
            .send()
            .await?;
        let response: MultiGetResponse = Self::check(response).await?.json().await?;

        Ok(response
            .docs
            .into_iter()
            .filter(|doc| doc.found)
            .filter_map(|doc| doc.source)
            .collect())
    }

    /// Makes recent operations on `index` visible to search.
    pub async fn refresh(&self, index: &str) -> Result<(), ElasticsearchError> {
        let response = self
            .client
            .post(self.url(&[index, "_refresh"])?)
            .send()
            .await?;
        Self::check(response).await?;

        Ok(())
    }

    /// Submits `items` as one bulk request, failing if any item was rejected.
    pub async fn bulk(&self, items: &[BulkItem]) -> Result<(), ElasticsearchError> {
        if items.is_empty() {
            return Ok(());
        }

        let body = bulk_body(items)?;
        let response = self
            .client
            .post(self.url(&["_bulk"])?)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let response: BulkResponse = Self::check(response).await?.json().await?;

        if response.errors {
            let failed = response
                .items
                .iter()
                .filter_map(|item| item.values().next())
                .filter_map(|result| result.get("error"))
                .collect::<Vec<_>>();

            return Err(ElasticsearchError::BulkItemsFailed {
                failed: failed.len(),
                errors: failed
                    .iter()
                    .take(MAX_REPORTED_ITEM_ERRORS)
                    .map(|error| error.to_string())
                    .collect(),
            });
        }

        debug!(items = items.len(), "submitted bulk request");

        Ok(())
    }

    /// Creates `index` with `mapping`. Returns `false` if the index already existed.
    pub async fn create_index(&self, index: &str, mapping: &Value) -> Result<bool, ElasticsearchError> {
        let response = self
            .client
            .put(self.url(&[index])?)
            .json(&json!({ "mappings": mapping }))
            .send()
            .await?;

        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await?;
            if body.contains("resource_already_exists_exception") {
                info!(index, "index already exists");
                return Ok(false);
            }
            return Err(ElasticsearchError::RequestFailed {
                status: StatusCode::BAD_REQUEST,
                body,
            });
        }
        Self::check(response).await?;

        Ok(true)
    }
}

/// Renders `items` as newline-delimited action and source lines.
fn bulk_body(items: &[BulkItem]) -> Result<Vec<u8>, serde_json::Error> {
    let mut body = Vec::new();
    for item in items {
        serde_json::to_writer(
            &mut body,
            &json!({ "index": { "_index": item.index, "_id": item.id } }),
        )?;
        body.push(b'\n');
        serde_json::to_writer(&mut body, &item.document)?;
        body.push(b'\n');
    }

    Ok(body)
}
