//! Shared fixtures for the integration tests: fake collaborator services
//! and a harness wiring them to the in-memory store and queue.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use compliance_scheduler::clients::{
    BenchmarkClient, IntegrationClient, SearchClient, SearchHit, SearchPage,
};
use compliance_scheduler::config::SchedulerConfig;
use compliance_scheduler::model::{
    Benchmark, Control, Integration, IntegrationFilter, IntegrationState, Query, Severity,
};
use compliance_scheduler::queue::{
    Delivery, InMemoryQueue, MessageQueue, PublishReceipt, QueueError, ReadFrom,
};
use compliance_scheduler::scheduler::{Collaborators, ComplianceResultDoc, ManualClock};
use compliance_scheduler::store::InMemoryJobStore;
use compliance_scheduler::ClientError;

// ============================================================================
// Benchmark service
// ============================================================================

#[derive(Default)]
pub struct FakeBenchmarks {
    benchmarks: Mutex<HashMap<String, Benchmark>>,
    controls: Mutex<HashMap<String, Control>>,
    queries: Mutex<Vec<Query>>,
}

impl FakeBenchmarks {
    pub fn add_benchmark(&self, benchmark: Benchmark) {
        self.benchmarks
            .lock()
            .unwrap()
            .insert(benchmark.id.clone(), benchmark);
    }

    pub fn add_control(&self, control: Control) {
        self.controls
            .lock()
            .unwrap()
            .insert(control.id.clone(), control);
    }

    pub fn add_query(&self, query: Query) {
        self.queries.lock().unwrap().push(query);
    }

    pub fn remove_query(&self, id: &str) {
        self.queries.lock().unwrap().retain(|q| q.id != id);
    }
}

#[async_trait]
impl BenchmarkClient for FakeBenchmarks {
    async fn list_benchmarks(&self) -> Result<Vec<Benchmark>, ClientError> {
        let mut all: Vec<Benchmark> = self.benchmarks.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn get_benchmark(&self, id: &str) -> Result<Option<Benchmark>, ClientError> {
        Ok(self.benchmarks.lock().unwrap().get(id).cloned())
    }

    async fn get_control(&self, id: &str) -> Result<Option<Control>, ClientError> {
        Ok(self.controls.lock().unwrap().get(id).cloned())
    }

    async fn list_queries(&self) -> Result<Vec<Query>, ClientError> {
        Ok(self.queries.lock().unwrap().clone())
    }
}

// ============================================================================
// Integration service
// ============================================================================

#[derive(Default)]
pub struct FakeIntegrations {
    integrations: Mutex<Vec<Integration>>,
    assignments: Mutex<HashMap<String, Vec<String>>>,
}

impl FakeIntegrations {
    pub fn add(&self, integration: Integration) {
        self.integrations.lock().unwrap().push(integration);
    }

    pub fn remove(&self, integration_id: &str) {
        self.integrations
            .lock()
            .unwrap()
            .retain(|i| i.integration_id != integration_id);
        for assigned in self.assignments.lock().unwrap().values_mut() {
            assigned.retain(|id| id != integration_id);
        }
    }

    pub fn assign(&self, benchmark_id: &str, integration_id: &str) {
        self.assignments
            .lock()
            .unwrap()
            .entry(benchmark_id.to_string())
            .or_default()
            .push(integration_id.to_string());
    }
}

#[async_trait]
impl IntegrationClient for FakeIntegrations {
    async fn list_integrations(
        &self,
        filter: &IntegrationFilter,
    ) -> Result<Vec<Integration>, ClientError> {
        Ok(self
            .integrations
            .lock()
            .unwrap()
            .iter()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect())
    }

    async fn list_assignments_by_benchmark(
        &self,
        benchmark_id: &str,
    ) -> Result<Vec<String>, ClientError> {
        Ok(self
            .assignments
            .lock()
            .unwrap()
            .get(benchmark_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Search index
// ============================================================================

/// Result index keyed by document key. Honours `size`, the `must_not`
/// integration filter and `search_after` over `[evaluated_at, key]`.
#[derive(Default)]
pub struct FakeSearch {
    docs: Mutex<BTreeMap<String, Value>>,
    searches: AtomicUsize,
}

impl FakeSearch {
    pub fn insert(&self, doc: &ComplianceResultDoc) {
        let source = serde_json::to_value(doc).unwrap();
        self.docs.lock().unwrap().insert(doc.key(), source);
    }

    pub fn insert_raw(&self, key: &str, source: Value) {
        self.docs.lock().unwrap().insert(key.to_string(), source);
    }

    pub fn integration_ids(&self) -> Vec<String> {
        self.docs
            .lock()
            .unwrap()
            .values()
            .map(|d| d["integration_id"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchClient for FakeSearch {
    async fn search(&self, _index: &str, query: &Value) -> Result<SearchPage, ClientError> {
        self.searches.fetch_add(1, Ordering::SeqCst);

        let size = query["size"].as_u64().unwrap_or(10) as usize;
        let excluded: Vec<String> = query["query"]["bool"]["must_not"][0]["terms"]
            ["integration_id"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let cursor = query["search_after"].as_array().map(|after| {
            (
                after[0].as_i64().unwrap_or_default(),
                after[1].as_str().unwrap_or_default().to_string(),
            )
        });

        let docs = self.docs.lock().unwrap();
        let mut matching: Vec<(i64, String, Value)> = docs
            .iter()
            .filter(|(_, source)| {
                let integration = source["integration_id"].as_str().unwrap_or_default();
                !excluded.iter().any(|e| e == integration)
            })
            .map(|(key, source)| {
                (
                    source["evaluated_at"].as_i64().unwrap_or_default(),
                    key.clone(),
                    source.clone(),
                )
            })
            .collect();
        matching.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        let hits = matching
            .into_iter()
            .filter(|(at, key, _)| match &cursor {
                Some((c_at, c_key)) => (*at, key) > (*c_at, c_key),
                None => true,
            })
            .take(size)
            .map(|(at, key, source)| SearchHit {
                sort: vec![json!(at), json!(key)],
                id: key,
                source,
            })
            .collect();
        Ok(SearchPage { hits })
    }

    async fn delete(&self, key: &str, _index: &str) -> Result<bool, ClientError> {
        Ok(self.docs.lock().unwrap().remove(key).is_some())
    }
}

pub fn result_doc(integration_id: &str, control_id: &str, evaluated_at: i64) -> ComplianceResultDoc {
    ComplianceResultDoc {
        benchmark_id: "cis".to_string(),
        control_id: control_id.to_string(),
        integration_id: integration_id.to_string(),
        resource_id: Some(format!("res-{control_id}-{evaluated_at}")),
        resource_type: Some("aws::s3::bucket".to_string()),
        compliance_status: Some("failed".to_string()),
        evaluated_at,
    }
}

// ============================================================================
// Queue wrapper
// ============================================================================

/// In-memory queue whose next `n` publishes fail.
pub struct FlakyQueue {
    inner: InMemoryQueue,
    failures_left: AtomicUsize,
}

impl FlakyQueue {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: InMemoryQueue::default(),
            failures_left: AtomicUsize::new(failures),
        }
    }

    pub fn inner(&self) -> &InMemoryQueue {
        &self.inner
    }
}

#[async_trait]
impl MessageQueue for FlakyQueue {
    async fn ensure_stream(&self, topic: &str, group: &str) -> Result<(), QueueError> {
        self.inner.ensure_stream(topic, group).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        dedup_key: &str,
    ) -> Result<PublishReceipt, QueueError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(QueueError::Unavailable("injected publish failure".to_string()));
        }
        self.inner.publish(topic, payload, dedup_key).await
    }

    async fn receive(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        from: ReadFrom,
        max: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        self.inner
            .receive(topic, group, consumer, from, max, block)
            .await
    }

    async fn ack(&self, topic: &str, group: &str, id: &str) -> Result<(), QueueError> {
        self.inner.ack(topic, group, id).await
    }
}

// ============================================================================
// Harness
// ============================================================================

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

pub fn test_config() -> SchedulerConfig {
    let mut config = SchedulerConfig::default().with_database_url("postgres://unused");
    config.receive_block = Duration::from_millis(10);
    config
}

pub struct Harness {
    pub store: Arc<InMemoryJobStore>,
    pub queue: Arc<dyn MessageQueue>,
    pub memory_queue: Option<Arc<InMemoryQueue>>,
    pub benchmarks: Arc<FakeBenchmarks>,
    pub integrations: Arc<FakeIntegrations>,
    pub search: Arc<FakeSearch>,
    pub clock: Arc<ManualClock>,
    pub config: SchedulerConfig,
}

impl Harness {
    /// Empty collaborators over an in-memory queue.
    pub fn new() -> Self {
        let queue = Arc::new(InMemoryQueue::default());
        Self::with_queue(queue.clone(), Some(queue))
    }

    pub fn with_queue(
        queue: Arc<dyn MessageQueue>,
        memory_queue: Option<Arc<InMemoryQueue>>,
    ) -> Self {
        Self {
            store: Arc::new(InMemoryJobStore::new()),
            queue,
            memory_queue,
            benchmarks: Arc::new(FakeBenchmarks::default()),
            integrations: Arc::new(FakeIntegrations::default()),
            search: Arc::new(FakeSearch::default()),
            clock: Arc::new(ManualClock::new(start_time())),
            config: test_config(),
        }
    }

    /// The standard fixture:
    ///
    /// ```text
    /// cis
    /// ├── cis-iam: c1 -> q1, c2 -> q1
    /// └── cis-net: c3 -> q2 (global)
    /// ```
    ///
    /// with two active AWS integrations assigned to `cis`.
    pub fn with_fixture(self) -> Self {
        self.benchmarks
            .add_benchmark(Benchmark::new("cis").with_children(["cis-iam", "cis-net"]));
        self.benchmarks
            .add_benchmark(Benchmark::new("cis-iam").with_controls(["c1", "c2"]));
        self.benchmarks
            .add_benchmark(Benchmark::new("cis-net").with_controls(["c3"]));
        self.benchmarks
            .add_control(Control::new("c1", "q1", Severity::High));
        self.benchmarks
            .add_control(Control::new("c2", "q1", Severity::Medium));
        self.benchmarks
            .add_control(Control::new("c3", "q2", Severity::Low));
        self.benchmarks.add_query(Query::new("q1"));
        self.benchmarks.add_query(Query::new("q2").global());

        for id in ["acc-1", "acc-2"] {
            self.integrations
                .add(Integration::new(id, "aws", IntegrationState::Active));
            self.integrations.assign("cis", id);
        }
        self
    }

    pub fn deps(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            queue: self.queue.clone(),
            benchmarks: self.benchmarks.clone(),
            integrations: self.integrations.clone(),
            search: self.search.clone(),
            clock: self.clock.clone(),
        }
    }

    pub fn memory_queue(&self) -> &InMemoryQueue {
        self.memory_queue
            .as_deref()
            .expect("harness was built over an in-memory queue")
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.clock.advance(by);
    }
}
