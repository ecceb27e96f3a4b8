//! OpenSearch-compatible client for the compliance-result index.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{SearchClient, SearchHit, SearchPage};
use crate::error::ClientError;

#[derive(Debug, Deserialize)]
struct RawSearchResponse {
    hits: RawHits,
}

#[derive(Debug, Deserialize)]
struct RawHits {
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: serde_json::Value,
    #[serde(default)]
    sort: Vec<serde_json::Value>,
}

impl From<RawSearchResponse> for SearchPage {
    fn from(raw: RawSearchResponse) -> Self {
        SearchPage {
            hits: raw
                .hits
                .hits
                .into_iter()
                .map(|h| SearchHit {
                    id: h.id,
                    source: h.source,
                    sort: h.sort,
                })
                .collect(),
        }
    }
}

/// Search index client speaking the OpenSearch REST API.
pub struct OpenSearchClient {
    base_url: String,
    credentials: Option<(String, String)>,
    http_client: Client,
}

impl OpenSearchClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: None,
            http_client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Uses HTTP basic authentication for every request.
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, pass)) => request.basic_auth(user, Some(pass)),
            None => request,
        }
    }

    fn search_url(&self, index: &str) -> String {
        format!("{}/{}/_search", self.base_url, index)
    }

    fn document_url(&self, index: &str, key: &str) -> String {
        format!("{}/{}/_doc/{}", self.base_url, index, key)
    }
}

#[async_trait]
impl SearchClient for OpenSearchClient {
    async fn search(
        &self,
        index: &str,
        query: &serde_json::Value,
    ) -> Result<SearchPage, ClientError> {
        let request = self.http_client.post(self.search_url(index)).json(query);
        let response = self.authorize(request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                service: "search",
                status: status.as_u16(),
                body,
            });
        }

        let raw: RawSearchResponse = response.json().await?;
        Ok(raw.into())
    }

    async fn delete(&self, key: &str, index: &str) -> Result<bool, ClientError> {
        let request = self.http_client.delete(self.document_url(index, key));
        let response = self.authorize(request).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            debug!(index, key, "Document already absent");
            return Ok(false);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                service: "search",
                status: status.as_u16(),
                body,
            });
        }
        Ok(true)
    }
}
