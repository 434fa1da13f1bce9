//! Snapshot isolation conformance tests.
//!
//! Verifies that uncommitted writes are invisible outside a snapshot,
//! committed writes are visible, aborted writes are discarded, and a
//! snapshot reads its own writes.

use std::future::Future;

use super::{make_baseline, make_case, seed_review, TestResult};
use crate::record::ReviewStatus;
use crate::{CasebookStorage, StorageError};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "snapshot",
            "begin_commit_abort_succeed",
            begin_commit_abort_succeed(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "uncommitted_baseline_invisible",
            uncommitted_baseline_invisible(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "committed_baseline_visible",
            committed_baseline_visible(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "aborted_baseline_invisible",
            aborted_baseline_invisible(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "snapshot_reads_own_writes",
            snapshot_reads_own_writes(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "uncommitted_review_update_invisible",
            uncommitted_review_update_invisible(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "sequential_snapshots_see_prior_commits",
            sequential_snapshots_see_prior_commits(factory).await,
        ),
    ]
}

async fn begin_commit_abort_succeed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    let snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    Ok(())
}

async fn uncommitted_baseline_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_baseline(&mut snap, make_baseline("base-1", "plan-1", &["case-1"]))
        .await
        .map_err(|e| e.to_string())?;
    // Do NOT commit; the snapshot stays open.

    let result = s.get_baseline("base-1").await;
    if !matches!(result, Err(StorageError::NotFound { .. })) {
        return Err(format!(
            "expected NotFound for uncommitted baseline, got {result:?}"
        ));
    }
    let listed = s.list_baselines("plan-1").await.map_err(|e| e.to_string())?;
    if !listed.is_empty() {
        return Err(format!("expected empty list, got {} rows", listed.len()));
    }
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    Ok(())
}

async fn committed_baseline_visible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let baseline = make_baseline("base-1", "plan-1", &["case-1", "case-2"]);
    s.insert_baseline(&mut snap, baseline.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let stored = s.get_baseline("base-1").await.map_err(|e| e.to_string())?;
    if stored != baseline {
        return Err(format!("stored baseline differs: {stored:?}"));
    }
    Ok(())
}

async fn aborted_baseline_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_baseline(&mut snap, make_baseline("base-1", "plan-1", &[]))
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if s.get_baseline("base-1").await.is_ok() {
        return Err("aborted baseline is visible".to_string());
    }
    Ok(())
}

async fn snapshot_reads_own_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_case(&mut snap, make_case("case-1", "plan-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.increment_case_versions(&mut snap, &["case-1".to_string()])
        .await
        .map_err(|e| e.to_string())?;
    let cases = s
        .get_cases(&mut snap, &["case-1".to_string()])
        .await
        .map_err(|e| e.to_string())?;
    if cases.len() != 1 || cases[0].version != 1 {
        return Err(format!("expected own write with version 1, got {cases:?}"));
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let case = s.get_case("case-1").await.map_err(|e| e.to_string())?;
    if case.version != 1 {
        return Err(format!("expected committed version 1, got {}", case.version));
    }
    Ok(())
}

async fn uncommitted_review_update_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_review(&s).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut review = s
        .get_review_for_update(&mut snap, "review-1")
        .await
        .map_err(|e| e.to_string())?;
    review.status = ReviewStatus::InProgress;
    s.update_review(&mut snap, &review, 0)
        .await
        .map_err(|e| e.to_string())?;

    let outside = s.get_review("review-1").await.map_err(|e| e.to_string())?;
    if outside.status != ReviewStatus::Pending {
        return Err(format!(
            "uncommitted status leaked: {}",
            outside.status.as_str()
        ));
    }
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    Ok(())
}

async fn sequential_snapshots_see_prior_commits<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_review(&s).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let found = s
        .find_review_by_name(&mut snap, "test-project", "review review-1")
        .await
        .map_err(|e| e.to_string())?;
    if found.is_none() {
        return Err("committed review not visible to a later snapshot".to_string());
    }
    let rows = s
        .list_review_cases_in(&mut snap, "review-1")
        .await
        .map_err(|e| e.to_string())?;
    if rows.len() != 1 {
        return Err(format!("expected 1 review case, got {}", rows.len()));
    }
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    Ok(())
}
