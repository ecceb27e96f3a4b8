//! HTTP clients for the benchmark and integration services.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{BenchmarkClient, IntegrationClient};
use crate::error::ClientError;
use crate::model::{Benchmark, Control, Integration, IntegrationFilter, IntegrationState, Query};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn build_http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// GETs `url` and decodes a JSON body; 404 maps to `None`.
async fn get_json<T: DeserializeOwned>(
    client: &Client,
    service: &'static str,
    url: &str,
) -> Result<Option<T>, ClientError> {
    debug!(service, url, "GET");
    let response = client.get(url).send().await?;
    let status = response.status();

    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            service,
            status: status.as_u16(),
            body,
        });
    }

    Ok(Some(response.json::<T>().await?))
}

/// Like [`get_json`] but treats 404 as an error.
async fn get_json_required<T: DeserializeOwned>(
    client: &Client,
    service: &'static str,
    url: &str,
) -> Result<T, ClientError> {
    get_json(client, service, url)
        .await?
        .ok_or(ClientError::Status {
            service,
            status: StatusCode::NOT_FOUND.as_u16(),
            body: url.to_string(),
        })
}

/// Benchmark service client.
pub struct HttpBenchmarkClient {
    base_url: String,
    http_client: Client,
}

impl HttpBenchmarkClient {
    /// Creates a client for the service at `base_url` (e.g. "http://compliance:8000").
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: build_http_client(DEFAULT_TIMEOUT),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl BenchmarkClient for HttpBenchmarkClient {
    async fn list_benchmarks(&self) -> Result<Vec<Benchmark>, ClientError> {
        let url = format!("{}/api/v1/benchmarks", self.base_url);
        get_json_required(&self.http_client, "benchmark", &url).await
    }

    async fn get_benchmark(&self, id: &str) -> Result<Option<Benchmark>, ClientError> {
        let url = format!("{}/api/v1/benchmarks/{}", self.base_url, id);
        get_json(&self.http_client, "benchmark", &url).await
    }

    async fn get_control(&self, id: &str) -> Result<Option<Control>, ClientError> {
        let url = format!("{}/api/v1/controls/{}", self.base_url, id);
        get_json(&self.http_client, "benchmark", &url).await
    }

    async fn list_queries(&self) -> Result<Vec<Query>, ClientError> {
        let url = format!("{}/api/v1/queries", self.base_url);
        get_json_required(&self.http_client, "benchmark", &url).await
    }
}

/// Integration service client.
pub struct HttpIntegrationClient {
    base_url: String,
    http_client: Client,
}

impl HttpIntegrationClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: build_http_client(DEFAULT_TIMEOUT),
        }
    }

    /// Builds the listing URL with the filter encoded as query parameters.
    pub fn integrations_url(&self, filter: &IntegrationFilter) -> String {
        let mut params = Vec::new();
        if !filter.states.is_empty() {
            let states: Vec<&str> = filter.states.iter().map(state_param).collect();
            params.push(format!("states={}", states.join(",")));
        }
        if !filter.integration_types.is_empty() {
            params.push(format!("types={}", filter.integration_types.join(",")));
        }

        let mut url = format!("{}/api/v1/integrations", self.base_url);
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }
}

fn state_param(state: &IntegrationState) -> &'static str {
    match state {
        IntegrationState::Active => "active",
        IntegrationState::Inactive => "inactive",
        IntegrationState::Archived => "archived",
        IntegrationState::Sample => "sample",
    }
}

#[async_trait]
impl IntegrationClient for HttpIntegrationClient {
    async fn list_integrations(
        &self,
        filter: &IntegrationFilter,
    ) -> Result<Vec<Integration>, ClientError> {
        let url = self.integrations_url(filter);
        let integrations: Vec<Integration> =
            get_json_required(&self.http_client, "integration", &url).await?;
        // The service may ignore unknown parameters; filter locally as well.
        Ok(integrations
            .into_iter()
            .filter(|i| filter.matches(i))
            .collect())
    }

    async fn list_assignments_by_benchmark(
        &self,
        benchmark_id: &str,
    ) -> Result<Vec<String>, ClientError> {
        let url = format!(
            "{}/api/v1/assignments/benchmark/{}",
            self.base_url, benchmark_id
        );
        Ok(get_json(&self.http_client, "integration", &url)
            .await?
            .unwrap_or_default())
    }
}
