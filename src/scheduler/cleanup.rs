//! Cleanup loop: removes compliance results of integrations that no longer
//! exist from the search index.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::driver::PeriodicTask;
use super::Collaborators;
use crate::clients::{IntegrationClient, SearchClient};
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::metrics::MetricsCollector;
use crate::model::IntegrationFilter;

/// One compliance result as stored in the search index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceResultDoc {
    pub benchmark_id: String,
    pub control_id: String,
    pub integration_id: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub compliance_status: Option<String>,
    /// Unix milliseconds of the evaluation.
    pub evaluated_at: i64,
}

impl ComplianceResultDoc {
    /// Document key: hex SHA-256 over the identifying fields.
    pub fn key(&self) -> String {
        let parts = [
            self.benchmark_id.as_str(),
            self.control_id.as_str(),
            self.integration_id.as_str(),
            self.resource_id.as_deref().unwrap_or(""),
            self.resource_type.as_deref().unwrap_or(""),
        ];
        let mut hasher = Sha256::new();
        hasher.update(parts.join("|").as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Result of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub pages: usize,
    pub deleted: u64,
    /// Hits whose derived key matched no stored document.
    pub missing: u64,
    pub skipped: u64,
    pub orphaned_integrations: BTreeSet<String>,
}

pub struct CleanupLoop {
    integrations: Arc<dyn IntegrationClient>,
    search: Arc<dyn SearchClient>,
    index: String,
    page_size: usize,
    metrics: MetricsCollector,
}

impl CleanupLoop {
    pub fn new(deps: &Collaborators, config: &SchedulerConfig) -> Self {
        Self {
            integrations: deps.integrations.clone(),
            search: deps.search.clone(),
            index: config.compliance_result_index.clone(),
            page_size: config.cleanup_page_size,
            metrics: MetricsCollector::new(),
        }
    }

    /// Deletes every result whose integration is not in the inventory.
    /// An empty inventory skips the pass.
    pub async fn run_pass(&self) -> Result<CleanupReport, SchedulerError> {
        let inventory: Vec<String> = self
            .integrations
            .list_integrations(&IntegrationFilter::all())
            .await?
            .into_iter()
            .map(|i| i.integration_id)
            .collect();

        let mut report = CleanupReport::default();
        if inventory.is_empty() {
            warn!("Integration inventory is empty; skipping cleanup pass");
            return Ok(report);
        }

        let mut cursor: Option<Vec<Value>> = None;
        loop {
            let query = orphan_query(&inventory, self.page_size, cursor.as_deref());
            let page = self.search.search(&self.index, &query).await?;
            if page.hits.is_empty() {
                break;
            }
            report.pages += 1;

            for hit in &page.hits {
                let doc: ComplianceResultDoc = match serde_json::from_value(hit.source.clone()) {
                    Ok(doc) => doc,
                    Err(e) => {
                        warn!(hit_id = %hit.id, error = %e, "Unreadable compliance result; skipping");
                        report.skipped += 1;
                        continue;
                    }
                };
                let key = doc.key();
                if self.search.delete(&key, &self.index).await? {
                    report.deleted += 1;
                } else {
                    warn!(hit_id = %hit.id, key = %key, "No document stored under derived key");
                    report.missing += 1;
                }
                report.orphaned_integrations.insert(doc.integration_id);
            }

            debug!(page = report.pages, hits = page.hits.len(), "Processed cleanup page");
            match page.cursor() {
                Some(sort) if !sort.is_empty() => cursor = Some(sort.to_vec()),
                _ => break,
            }
        }

        self.metrics.record_cleanup_deleted(report.deleted);
        Ok(report)
    }
}

/// Page query for results outside `inventory`, ordered by evaluation time
/// with the document ID as tiebreaker.
fn orphan_query(inventory: &[String], size: usize, search_after: Option<&[Value]>) -> Value {
    let mut query = json!({
        "size": size,
        "query": {
            "bool": {
                "must_not": [
                    { "terms": { "integration_id": inventory } }
                ]
            }
        },
        "sort": [
            { "evaluated_at": "asc" },
            { "_id": "asc" }
        ]
    });
    if let Some(after) = search_after {
        query["search_after"] = Value::Array(after.to_vec());
    }
    query
}

#[async_trait]
impl PeriodicTask for CleanupLoop {
    fn name(&self) -> &str {
        "cleanup"
    }

    async fn run_once(&self) -> Result<(), SchedulerError> {
        let report = self.run_pass().await?;
        info!(
            deleted = report.deleted,
            missing = report.missing,
            skipped = report.skipped,
            pages = report.pages,
            orphaned_integrations = ?report.orphaned_integrations,
            "Cleanup pass finished"
        );
        Ok(())
    }
}
