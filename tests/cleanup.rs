//! Cleanup reconciles the result index against the integration inventory.

mod common;

use serde_json::json;

use common::{result_doc, Harness};
use compliance_scheduler::model::{Integration, IntegrationState};
use compliance_scheduler::scheduler::{CleanupLoop, PeriodicTask};

fn with_inventory(ids: &[&str]) -> Harness {
    let h = Harness::new();
    for id in ids {
        h.integrations
            .add(Integration::new(*id, "aws", IntegrationState::Active));
    }
    h
}

#[tokio::test]
async fn test_deletes_only_orphaned_results_across_pages() {
    let mut h = with_inventory(&["A", "C"]);
    h.config = h.config.clone().with_cleanup_page_size(2);

    for (i, integration) in ["A", "B", "C"].iter().enumerate() {
        for n in 0..5 {
            let at = 1_000 + (n * 3 + i as i64) * 10;
            h.search.insert(&result_doc(integration, &format!("c{n}"), at));
        }
    }
    assert_eq!(h.search.len(), 15);

    let cleanup = CleanupLoop::new(&h.deps(), &h.config);
    let report = cleanup.run_pass().await.unwrap();

    assert_eq!(report.deleted, 5);
    assert_eq!(report.pages, 3);
    assert_eq!(
        report.orphaned_integrations.into_iter().collect::<Vec<_>>(),
        vec!["B".to_string()]
    );

    let mut remaining = h.search.integration_ids();
    remaining.sort();
    assert_eq!(remaining.len(), 10);
    assert!(remaining.iter().all(|id| id == "A" || id == "C"));
}

#[tokio::test]
async fn test_second_pass_finds_nothing() {
    let h = with_inventory(&["A"]);
    h.search.insert(&result_doc("B", "c1", 10));
    h.search.insert(&result_doc("A", "c1", 20));

    let cleanup = CleanupLoop::new(&h.deps(), &h.config);
    assert_eq!(cleanup.run_pass().await.unwrap().deleted, 1);

    let again = cleanup.run_pass().await.unwrap();
    assert_eq!(again.deleted, 0);
    assert_eq!(again.pages, 0);
    assert_eq!(h.search.len(), 1);
}

#[tokio::test]
async fn test_empty_inventory_skips_pass() {
    let h = with_inventory(&[]);
    h.search.insert(&result_doc("B", "c1", 10));

    let cleanup = CleanupLoop::new(&h.deps(), &h.config);
    cleanup.run_once().await.unwrap();

    assert_eq!(h.search.len(), 1);
    assert_eq!(h.search.search_count(), 0);
}

#[tokio::test]
async fn test_unreadable_documents_are_skipped() {
    let h = with_inventory(&["A"]);
    h.search
        .insert_raw("broken", json!({"integration_id": "B", "evaluated_at": 5}));
    h.search.insert(&result_doc("B", "c1", 10));

    let cleanup = CleanupLoop::new(&h.deps(), &h.config);
    let report = cleanup.run_pass().await.unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(h.search.len(), 1);
}

#[tokio::test]
async fn test_key_mismatch_is_not_counted_as_deleted() {
    let h = with_inventory(&["A"]);
    let stored_elsewhere = serde_json::to_value(result_doc("B", "c1", 10)).unwrap();
    h.search.insert_raw("index-assigned-id", stored_elsewhere);
    h.search.insert(&result_doc("B", "c2", 20));

    let cleanup = CleanupLoop::new(&h.deps(), &h.config);
    let report = cleanup.run_pass().await.unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(report.missing, 1);
    assert_eq!(report.pages, 1);
    assert_eq!(h.search.len(), 1);
}
