//! Runner builder: expands a benchmark tree into deduplicated runners.
//!
//! The tree is walked depth first. Every control contributes a [`Caller`]
//! to the runner keyed by its query (and the integration, unless the query
//! is global). Controls reached through different branches that need the
//! same query land on the same key, so their callers are appended to one
//! runner instead of creating duplicates.
//!
//! The builder itself is pure: it works on a [`BenchmarkCatalog`] snapshot
//! loaded up front, so a build either yields the complete runner set for
//! the job or an error.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::clients::BenchmarkClient;
use crate::error::BuildError;
use crate::model::{
    Benchmark, Caller, ComplianceJob, Control, Integration, NewRunner, Query, RunnerKey,
};

/// Immutable snapshot of one benchmark tree and the definitions it needs.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkCatalog {
    benchmarks: HashMap<String, Benchmark>,
    controls: HashMap<String, Control>,
    queries: HashMap<String, Query>,
}

impl BenchmarkCatalog {
    /// Builds a catalog from already-fetched definitions.
    pub fn new(
        benchmarks: impl IntoIterator<Item = Benchmark>,
        controls: impl IntoIterator<Item = Control>,
        queries: impl IntoIterator<Item = Query>,
    ) -> Self {
        Self {
            benchmarks: benchmarks.into_iter().map(|b| (b.id.clone(), b)).collect(),
            controls: controls.into_iter().map(|c| (c.id.clone(), c)).collect(),
            queries: queries.into_iter().map(|q| (q.id.clone(), q)).collect(),
        }
    }

    /// Fetches the tree rooted at `root_id` with every control on it, plus
    /// the full query list.
    ///
    /// Fails if any benchmark or control in the tree cannot be resolved.
    pub async fn load(client: &dyn BenchmarkClient, root_id: &str) -> Result<Self, BuildError> {
        let mut benchmarks = HashMap::new();
        let mut controls = HashMap::new();
        let mut pending = vec![root_id.to_string()];

        while let Some(id) = pending.pop() {
            if benchmarks.contains_key(&id) {
                continue;
            }
            let benchmark = client
                .get_benchmark(&id)
                .await?
                .ok_or_else(|| BuildError::BenchmarkNotFound(id.clone()))?;

            for control_id in &benchmark.controls {
                if controls.contains_key(control_id) {
                    continue;
                }
                let control = client
                    .get_control(control_id)
                    .await?
                    .ok_or_else(|| BuildError::ControlNotFound(control_id.clone()))?;
                controls.insert(control_id.clone(), control);
            }

            pending.extend(benchmark.children.iter().cloned());
            benchmarks.insert(id, benchmark);
        }

        let queries = client
            .list_queries()
            .await?
            .into_iter()
            .map(|q| (q.id.clone(), q))
            .collect();

        debug!(
            root = root_id,
            benchmarks = benchmarks.len(),
            controls = controls.len(),
            "Loaded benchmark catalog"
        );

        Ok(Self {
            benchmarks,
            controls,
            queries,
        })
    }

    pub fn benchmark(&self, id: &str) -> Option<&Benchmark> {
        self.benchmarks.get(id)
    }

    pub fn control(&self, id: &str) -> Option<&Control> {
        self.controls.get(id)
    }

    pub fn query(&self, id: &str) -> Option<&Query> {
        self.queries.get(id)
    }
}

/// Output of one build: per-integration and global runners.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunnerBuild {
    pub per_integration: Vec<NewRunner>,
    pub global: Vec<NewRunner>,
}

impl RunnerBuild {
    pub fn len(&self) -> usize {
        self.per_integration.len() + self.global.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runners keyed by [`RunnerKey`], kept in first-seen order.
#[derive(Debug, Default)]
struct RunnerBucket {
    index: HashMap<RunnerKey, usize>,
    runners: Vec<NewRunner>,
}

impl RunnerBucket {
    fn add(&mut self, runner: NewRunner) {
        let key = runner.key();
        match self.index.get(&key) {
            Some(&pos) => self.runners[pos].callers.extend(runner.callers),
            None => {
                self.index.insert(key, self.runners.len());
                self.runners.push(runner);
            }
        }
    }

    fn into_filtered(self, existing_keys: &HashSet<String>) -> Vec<NewRunner> {
        self.runners
            .into_iter()
            .filter(|r| !existing_keys.contains(&r.key().identifier()))
            .collect()
    }
}

struct Walk<'a> {
    job: &'a ComplianceJob,
    catalog: &'a BenchmarkCatalog,
    integration: Option<&'a Integration>,
    tracks_drift_events: bool,
    per_integration: RunnerBucket,
    global: RunnerBucket,
}

impl Walk<'_> {
    fn visit(&mut self, benchmark_id: &str, path: &mut Vec<String>) -> Result<(), BuildError> {
        if path.iter().any(|p| p == benchmark_id) {
            return Err(BuildError::Cycle(benchmark_id.to_string()));
        }
        let benchmark = self
            .catalog
            .benchmark(benchmark_id)
            .ok_or_else(|| BuildError::BenchmarkNotFound(benchmark_id.to_string()))?;

        path.push(benchmark_id.to_string());

        for child in &benchmark.children {
            self.visit(child, path)?;
        }

        for control_id in &benchmark.controls {
            self.add_control(control_id, path)?;
        }

        path.pop();
        Ok(())
    }

    fn add_control(&mut self, control_id: &str, path: &[String]) -> Result<(), BuildError> {
        let control = self
            .catalog
            .control(control_id)
            .ok_or_else(|| BuildError::ControlNotFound(control_id.to_string()))?;

        let Some(query_id) = control.query_id.as_deref() else {
            return Ok(());
        };
        let query = self
            .catalog
            .query(query_id)
            .ok_or_else(|| BuildError::QueryNotFound {
                control_id: control_id.to_string(),
                query_id: query_id.to_string(),
            })?;

        if let Some(integration) = self.integration {
            if !query.applies_to(&integration.integration_type) {
                return Ok(());
            }
        }

        let caller = Caller {
            root_benchmark: self.job.benchmark_id.clone(),
            parent_benchmark_ids: path.to_vec(),
            control_id: control.id.clone(),
            control_severity: control.severity,
            tracks_drift_events: self.tracks_drift_events,
        };

        let integration_id = match (query.global, self.integration) {
            (true, _) => None,
            (false, Some(integration)) => Some(integration.integration_id.clone()),
            // Without an integration only global queries can run.
            (false, None) => return Ok(()),
        };

        let runner = NewRunner {
            parent_job_id: self.job.id,
            benchmark_id: self.job.benchmark_id.clone(),
            query_id: query.id.clone(),
            integration_id,
            resource_collection_id: self.job.resource_collection_id.clone(),
            trigger_type: self.job.trigger_type,
            callers: vec![caller],
        };

        if query.global {
            self.global.add(runner);
        } else {
            self.per_integration.add(runner);
        }
        Ok(())
    }
}

/// Builds the runners `job` needs for `integration`.
///
/// Runners whose key identifier is in `existing_keys` are dropped, which
/// makes repeated builds for the same job idempotent.
pub fn build_runners(
    job: &ComplianceJob,
    catalog: &BenchmarkCatalog,
    integration: Option<&Integration>,
    existing_keys: &HashSet<String>,
) -> Result<RunnerBuild, BuildError> {
    let root = catalog
        .benchmark(&job.benchmark_id)
        .ok_or_else(|| BuildError::BenchmarkNotFound(job.benchmark_id.clone()))?;

    let mut walk = Walk {
        job,
        catalog,
        integration,
        tracks_drift_events: root.tracks_drift_events,
        per_integration: RunnerBucket::default(),
        global: RunnerBucket::default(),
    };
    walk.visit(&job.benchmark_id, &mut Vec::new())?;

    Ok(RunnerBuild {
        per_integration: walk.per_integration.into_filtered(existing_keys),
        global: walk.global.into_filtered(existing_keys),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IntegrationState, JobStatus, Severity, TriggerType};
    use chrono::Utc;

    fn job(benchmark: &str) -> ComplianceJob {
        ComplianceJob {
            id: 11,
            parent_id: None,
            benchmark_id: benchmark.to_string(),
            integration_id: "acc-1".to_string(),
            resource_collection_id: None,
            trigger_type: TriggerType::Scheduled,
            status: JobStatus::Created,
            are_all_runners_queued: false,
            with_incidents: true,
            created_by: "system".to_string(),
            failure_message: None,
            started_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn aws(id: &str) -> Integration {
        Integration::new(id, "aws", IntegrationState::Active)
    }

    /// root -> child1 (c1 -> q1), child2 (c2 -> q1, c3 -> q2 global)
    fn example_catalog() -> BenchmarkCatalog {
        BenchmarkCatalog::new(
            vec![
                Benchmark::new("root").with_children(["child1", "child2"]),
                Benchmark::new("child1").with_controls(["c1"]),
                Benchmark::new("child2").with_controls(["c2", "c3"]),
            ],
            vec![
                Control::new("c1", "q1", Severity::High),
                Control::new("c2", "q1", Severity::Low),
                Control::new("c3", "q2", Severity::Medium),
            ],
            vec![Query::new("q1"), Query::new("q2").global()],
        )
    }

    #[test]
    fn test_example_tree_collapses_to_two_runners() {
        let build = build_runners(
            &job("root"),
            &example_catalog(),
            Some(&aws("acc-1")),
            &HashSet::new(),
        )
        .expect("build should succeed");

        assert_eq!(build.len(), 2);

        assert_eq!(build.per_integration.len(), 1);
        let q1 = &build.per_integration[0];
        assert_eq!(q1.query_id, "q1");
        assert_eq!(q1.integration_id.as_deref(), Some("acc-1"));
        let controls: Vec<_> = q1.callers.iter().map(|c| c.control_id.as_str()).collect();
        assert_eq!(controls, vec!["c1", "c2"]);

        assert_eq!(build.global.len(), 1);
        let q2 = &build.global[0];
        assert_eq!(q2.query_id, "q2");
        assert!(q2.integration_id.is_none());
        assert_eq!(q2.callers.len(), 1);
        assert_eq!(q2.callers[0].control_id, "c3");
    }

    #[test]
    fn test_caller_records_benchmark_path() {
        let build = build_runners(
            &job("root"),
            &example_catalog(),
            Some(&aws("acc-1")),
            &HashSet::new(),
        )
        .expect("build should succeed");

        let c2 = build.per_integration[0]
            .callers
            .iter()
            .find(|c| c.control_id == "c2")
            .expect("c2 caller present");
        assert_eq!(c2.root_benchmark, "root");
        assert_eq!(c2.parent_benchmark_ids, vec!["root", "child2"]);
        assert_eq!(c2.control_severity, Severity::Low);
    }

    #[test]
    fn test_same_query_from_n_paths_yields_n_callers() {
        // q1 reached through five distinct controls spread over a shared subtree.
        let catalog = BenchmarkCatalog::new(
            vec![
                Benchmark::new("root")
                    .with_children(["a", "b"])
                    .with_controls(["c0"]),
                Benchmark::new("a").with_children(["shared"]).with_controls(["c1"]),
                Benchmark::new("b").with_children(["shared"]),
                Benchmark::new("shared").with_controls(["c2", "c3"]),
            ],
            vec![
                Control::new("c0", "q1", Severity::Low),
                Control::new("c1", "q1", Severity::Low),
                Control::new("c2", "q1", Severity::Low),
                Control::new("c3", "q1", Severity::Low),
            ],
            vec![Query::new("q1")],
        );

        let build = build_runners(&job("root"), &catalog, Some(&aws("acc-1")), &HashSet::new())
            .expect("build should succeed");

        assert_eq!(build.per_integration.len(), 1);
        // c0, c1, and c2/c3 reached via both a and b.
        assert_eq!(build.per_integration[0].callers.len(), 6);
        assert!(build.global.is_empty());
    }

    #[test]
    fn test_integration_type_restriction() {
        let catalog = BenchmarkCatalog::new(
            vec![Benchmark::new("root").with_controls(["c1", "c2", "c3"])],
            vec![
                Control::new("c1", "aws-only", Severity::High),
                Control::new("c2", "azure-only", Severity::High),
                Control::new("c3", "azure-global", Severity::High),
            ],
            vec![
                Query::new("aws-only").restricted_to(["aws"]),
                Query::new("azure-only").restricted_to(["azure"]),
                Query::new("azure-global").restricted_to(["azure"]).global(),
            ],
        );

        let build = build_runners(&job("root"), &catalog, Some(&aws("acc-1")), &HashSet::new())
            .expect("build should succeed");

        let per: Vec<_> = build.per_integration.iter().map(|r| r.query_id.as_str()).collect();
        let global: Vec<_> = build.global.iter().map(|r| r.query_id.as_str()).collect();
        assert_eq!(per, vec!["aws-only"]);
        assert_eq!(global, vec!["azure-global"]);
    }

    #[test]
    fn test_existing_keys_are_filtered() {
        let catalog = example_catalog();
        let first = build_runners(&job("root"), &catalog, Some(&aws("acc-1")), &HashSet::new())
            .expect("build should succeed");

        let existing: HashSet<String> = first
            .per_integration
            .iter()
            .chain(first.global.iter())
            .map(|r| r.key().identifier())
            .collect();

        let second = build_runners(&job("root"), &catalog, Some(&aws("acc-1")), &existing)
            .expect("build should succeed");
        assert!(second.is_empty());
    }

    #[test]
    fn test_missing_query_aborts_build() {
        let catalog = BenchmarkCatalog::new(
            vec![Benchmark::new("root").with_controls(["c1"])],
            vec![Control::new("c1", "ghost", Severity::High)],
            Vec::<Query>::new(),
        );

        let err = build_runners(&job("root"), &catalog, Some(&aws("acc-1")), &HashSet::new())
            .expect_err("missing query should fail");
        assert!(matches!(err, BuildError::QueryNotFound { .. }));
    }

    #[test]
    fn test_missing_child_benchmark_aborts_build() {
        let catalog = BenchmarkCatalog::new(
            vec![Benchmark::new("root").with_children(["gone"])],
            Vec::<Control>::new(),
            Vec::<Query>::new(),
        );

        let err = build_runners(&job("root"), &catalog, Some(&aws("acc-1")), &HashSet::new())
            .expect_err("missing benchmark should fail");
        assert!(matches!(err, BuildError::BenchmarkNotFound(id) if id == "gone"));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let catalog = BenchmarkCatalog::new(
            vec![
                Benchmark::new("root").with_children(["a"]),
                Benchmark::new("a").with_children(["root"]),
            ],
            Vec::<Control>::new(),
            Vec::<Query>::new(),
        );

        let err = build_runners(&job("root"), &catalog, Some(&aws("acc-1")), &HashSet::new())
            .expect_err("cycle should fail");
        assert!(matches!(err, BuildError::Cycle(_)));
    }

    #[test]
    fn test_without_integration_only_global_runners() {
        let build = build_runners(&job("root"), &example_catalog(), None, &HashSet::new())
            .expect("build should succeed");
        assert!(build.per_integration.is_empty());
        assert_eq!(build.global.len(), 1);
    }

    #[test]
    fn test_drift_flag_comes_from_root() {
        let catalog = BenchmarkCatalog::new(
            vec![
                Benchmark::new("root").with_children(["child"]).tracking_drift_events(),
                Benchmark::new("child").with_controls(["c1"]),
            ],
            vec![Control::new("c1", "q1", Severity::High)],
            vec![Query::new("q1")],
        );

        let build = build_runners(&job("root"), &catalog, Some(&aws("acc-1")), &HashSet::new())
            .expect("build should succeed");
        assert!(build.per_integration[0].callers[0].tracks_drift_events);
    }
}
