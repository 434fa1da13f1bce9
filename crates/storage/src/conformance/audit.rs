//! Audit row conformance tests.
//!
//! Baseline snapshot rows are write-once per (baseline, case); review-case
//! records only ever accumulate, and only go away with their review-case.

use std::future::Future;

use super::{make_baseline, make_record, make_review_case, seed_baseline, seed_review, TestResult};
use crate::record::BaselineCaseSnapshot;
use crate::{CasebookStorage, StorageError};

pub(super) async fn run_audit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "audit",
            "baseline_snapshot_is_write_once",
            baseline_snapshot_is_write_once(factory).await,
        ),
        TestResult::from_result(
            "audit",
            "baseline_snapshots_deleted_per_baseline",
            baseline_snapshots_deleted_per_baseline(factory).await,
        ),
        TestResult::from_result(
            "audit",
            "records_accumulate_in_order",
            records_accumulate_in_order(factory).await,
        ),
        TestResult::from_result(
            "audit",
            "records_deleted_only_for_named_review_cases",
            records_deleted_only_for_named_review_cases(factory).await,
        ),
    ]
}

fn snapshot_row(baseline_id: &str, case_id: &str) -> BaselineCaseSnapshot {
    BaselineCaseSnapshot {
        baseline_id: baseline_id.to_string(),
        case_id: case_id.to_string(),
        case_version: 0,
        name: format!("case {case_id}"),
        content: serde_json::json!({ "steps": ["open"] }),
        captured_at: "2025-01-02T00:00:00Z".to_string(),
    }
}

async fn baseline_snapshot_is_write_once<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_baseline(&s).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_baseline_snapshot(&mut snap, snapshot_row("base-1", "case-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .insert_baseline_snapshot(&mut snap, snapshot_row("base-1", "case-1"))
        .await;
    let _ = s.abort_snapshot(snap).await;
    if !matches!(result, Err(StorageError::AlreadyExists { .. })) {
        return Err(format!("expected AlreadyExists, got {result:?}"));
    }
    Ok(())
}

async fn baseline_snapshots_deleted_per_baseline<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_baseline(&s).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_baseline(&mut snap, make_baseline("base-2", "plan-1", &["case-1"]))
        .await
        .map_err(|e| e.to_string())?;
    for (baseline, case) in [("base-1", "case-1"), ("base-1", "case-2"), ("base-2", "case-1")] {
        s.insert_baseline_snapshot(&mut snap, snapshot_row(baseline, case))
            .await
            .map_err(|e| e.to_string())?;
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let removed = s
        .delete_baseline_snapshots(&mut snap, &["base-1".to_string()])
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if removed != 2 {
        return Err(format!("expected 2 rows removed, got {removed}"));
    }
    let left = s
        .list_baseline_snapshots("base-2")
        .await
        .map_err(|e| e.to_string())?;
    if left.len() != 1 {
        return Err(format!("other baseline's rows touched: {}", left.len()));
    }
    Ok(())
}

async fn records_accumulate_in_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_review(&s).await?;
    let source = s.get_review_case("rc-1").await.map_err(|e| e.to_string())?;

    for id in ["rec-b", "rec-a", "rec-c"] {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.insert_review_case_record(&mut snap, make_record(id, &source))
            .await
            .map_err(|e| e.to_string())?;
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    }

    let ids: Vec<String> = s
        .list_review_case_records("rc-1")
        .await
        .map_err(|e| e.to_string())?
        .into_iter()
        .map(|r| r.id)
        .collect();
    if ids != ["rec-b", "rec-a", "rec-c"] {
        return Err(format!("expected append order, got {ids:?}"));
    }
    Ok(())
}

async fn records_deleted_only_for_named_review_cases<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_review(&s).await?;

    let other = make_review_case("rc-2", "review-1", "case-1");
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_review_case(&mut snap, other.clone())
        .await
        .map_err(|e| e.to_string())?;
    let first = s
        .get_review_cases_for_update(&mut snap, &["rc-1".to_string()])
        .await
        .map_err(|e| e.to_string())?;
    s.insert_review_case_record(&mut snap, make_record("rec-1", &first[0]))
        .await
        .map_err(|e| e.to_string())?;
    s.insert_review_case_record(&mut snap, make_record("rec-2", &other))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let removed = s
        .delete_review_case_records(&mut snap, &["rc-1".to_string()])
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if removed != 1 {
        return Err(format!("expected 1 record removed, got {removed}"));
    }
    let kept = s
        .list_review_case_records("rc-2")
        .await
        .map_err(|e| e.to_string())?;
    if kept.len() != 1 {
        return Err("unrelated record was deleted".to_string());
    }
    Ok(())
}
