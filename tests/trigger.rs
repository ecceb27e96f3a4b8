//! Manual triggers and re-triggers.

mod common;

use common::Harness;
use compliance_scheduler::model::{JobStatus, TriggerType};
use compliance_scheduler::scheduler::{PeriodicTask, SchedulerLoop, TriggerService};
use compliance_scheduler::store::JobStore;
use compliance_scheduler::{BuildError, SchedulerError};

#[tokio::test]
async fn test_trigger_without_integrations_targets_all_assigned() {
    let h = Harness::new().with_fixture();
    let triggers = TriggerService::new(&h.deps());

    let jobs = triggers.trigger_manual("cis", &[], "alice", true).await.unwrap();

    let mut targets: Vec<&str> = jobs.iter().map(|j| j.integration_id.as_str()).collect();
    targets.sort();
    assert_eq!(targets, vec!["acc-1", "acc-2"]);
    for job in &jobs {
        assert_eq!(job.trigger_type, TriggerType::Manual);
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.created_by, "alice");
        assert!(job.with_incidents);
    }
}

#[tokio::test]
async fn test_unassigned_integration_creates_nothing() {
    let h = Harness::new().with_fixture();
    let triggers = TriggerService::new(&h.deps());

    let err = triggers
        .trigger_manual(
            "cis",
            &["acc-1".to_string(), "acc-9".to_string()],
            "alice",
            false,
        )
        .await
        .unwrap_err();

    match err {
        SchedulerError::NotAssigned { integration_id, .. } => assert_eq!(integration_id, "acc-9"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.store.jobs().await.is_empty());
}

#[tokio::test]
async fn test_unknown_benchmark_is_rejected() {
    let h = Harness::new().with_fixture();
    let err = TriggerService::new(&h.deps())
        .trigger_manual("nope", &[], "alice", false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Build(BuildError::BenchmarkNotFound(ref id)) if id == "nope"
    ));
}

#[tokio::test]
async fn test_retrigger_creates_child_with_same_scope() {
    let h = Harness::new().with_fixture();
    let triggers = TriggerService::new(&h.deps());
    let original = triggers
        .trigger_manual("cis", &["acc-2".to_string()], "alice", true)
        .await
        .unwrap()
        .remove(0);

    let child = triggers.retrigger(original.id, "bob").await.unwrap();

    assert_ne!(child.id, original.id);
    assert_eq!(child.parent_id, Some(original.id));
    assert_eq!(child.benchmark_id, "cis");
    assert_eq!(child.integration_id, "acc-2");
    assert_eq!(child.trigger_type, TriggerType::Manual);
    assert!(child.with_incidents);
    assert_eq!(child.created_by, "bob");
}

#[tokio::test]
async fn test_retrigger_unknown_job() {
    let h = Harness::new().with_fixture();
    let err = TriggerService::new(&h.deps())
        .retrigger(404, "bob")
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::JobNotFound(404)));
}

#[tokio::test]
async fn test_manual_jobs_do_not_delay_the_schedule() {
    let h = Harness::new().with_fixture();
    let deps = h.deps();
    TriggerService::new(&deps)
        .trigger_manual("cis", &[], "alice", false)
        .await
        .unwrap();

    SchedulerLoop::new(&deps, &h.config).run_once().await.unwrap();

    let scheduled = h
        .store
        .jobs()
        .await
        .into_iter()
        .filter(|j| j.trigger_type == TriggerType::Scheduled)
        .count();
    assert_eq!(scheduled, 2);
    assert!(h
        .store
        .latest_scheduled_job("cis", "acc-1")
        .await
        .unwrap()
        .is_some());
}
