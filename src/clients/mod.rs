//! Read-only collaborator clients.
//!
//! The scheduler consumes three external services through the traits
//! defined here:
//!
//! - [`BenchmarkClient`]: benchmark trees, controls and query definitions
//! - [`IntegrationClient`]: the integration inventory and benchmark assignments
//! - [`SearchClient`]: the compliance-result search index
//!
//! HTTP implementations live in [`http`] and [`search`].

pub mod http;
pub mod search;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::model::{Benchmark, Control, Integration, IntegrationFilter, Query};

pub use http::{HttpBenchmarkClient, HttpIntegrationClient};
pub use search::OpenSearchClient;

/// Source of benchmark definitions.
#[async_trait]
pub trait BenchmarkClient: Send + Sync {
    /// Lists the root benchmarks that are evaluated on a schedule.
    async fn list_benchmarks(&self) -> Result<Vec<Benchmark>, ClientError>;

    /// Fetches one benchmark node; `None` when it does not exist.
    async fn get_benchmark(&self, id: &str) -> Result<Option<Benchmark>, ClientError>;

    /// Fetches one control; `None` when it does not exist.
    async fn get_control(&self, id: &str) -> Result<Option<Control>, ClientError>;

    /// Lists every query definition.
    async fn list_queries(&self) -> Result<Vec<Query>, ClientError>;
}

/// Source of the integration inventory.
#[async_trait]
pub trait IntegrationClient: Send + Sync {
    async fn list_integrations(
        &self,
        filter: &IntegrationFilter,
    ) -> Result<Vec<Integration>, ClientError>;

    /// Integration IDs assigned to a benchmark.
    async fn list_assignments_by_benchmark(
        &self,
        benchmark_id: &str,
    ) -> Result<Vec<String>, ClientError>;
}

/// One document returned by a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Index-assigned document ID.
    pub id: String,
    /// Document body.
    pub source: serde_json::Value,
    /// Sort values of this hit, used as the cursor for the next page.
    #[serde(default)]
    pub sort: Vec<serde_json::Value>,
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
}

impl SearchPage {
    /// Sort values of the last hit, if the page is non-empty.
    pub fn cursor(&self) -> Option<&[serde_json::Value]> {
        self.hits.last().map(|hit| hit.sort.as_slice())
    }
}

/// Document search index holding compliance results.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Runs a query DSL document against `index`.
    async fn search(
        &self,
        index: &str,
        query: &serde_json::Value,
    ) -> Result<SearchPage, ClientError>;

    /// Deletes the document stored under `key`. Returns `false` when no
    /// such document exists.
    async fn delete(&self, key: &str, index: &str) -> Result<bool, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cursor_is_last_hit_sort() {
        let page = SearchPage {
            hits: vec![
                SearchHit {
                    id: "a".to_string(),
                    source: json!({}),
                    sort: vec![json!(1), json!("a")],
                },
                SearchHit {
                    id: "b".to_string(),
                    source: json!({}),
                    sort: vec![json!(2), json!("b")],
                },
            ],
        };

        assert_eq!(page.cursor(), Some(&[json!(2), json!("b")][..]));
        assert!(SearchPage::default().cursor().is_none());
    }
}
