use std::future::Future;

use super::{make_record, seed_baseline, seed_review, TestResult};
use crate::record::{table, BaselineCaseSnapshot, CaseReviewStatus, ReviewStatus};
use crate::{CasebookStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    // Basic version tracking
    results.push(TestResult::from_result(
        "version",
        "rows_start_at_version_zero",
        rows_start_at_version_zero(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "update_increments_row_version",
        update_increments_row_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "second_update_same_snapshot_uses_new_version",
        second_update_same_snapshot_uses_new_version(factory).await,
    ));

    // Wrong version fails
    results.push(TestResult::from_result(
        "version",
        "update_with_wrong_version_returns_conflict",
        update_with_wrong_version_returns_conflict(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "conflict_does_not_change_row",
        conflict_does_not_change_row(factory).await,
    ));

    // Race conditions (sequential simulation)
    results.push(TestResult::from_result(
        "version",
        "stale_snapshot_loses_at_commit",
        stale_snapshot_loses_at_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "losing_snapshot_applies_nothing",
        losing_snapshot_applies_nothing(factory).await,
    ));

    // Deletes pin the version they read
    results.push(TestResult::from_result(
        "version",
        "stale_baseline_delete_loses_at_commit",
        stale_baseline_delete_loses_at_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "stale_review_case_delete_loses_at_commit",
        stale_review_case_delete_loses_at_commit(factory).await,
    ));

    results
}

async fn rows_start_at_version_zero<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_review(&s).await?;
    seed_baseline(&s).await?;

    let review = s.get_review("review-1").await.map_err(|e| e.to_string())?;
    let row = s.get_review_case("rc-1").await.map_err(|e| e.to_string())?;
    let baseline = s.get_baseline("base-1").await.map_err(|e| e.to_string())?;
    if review.row_version != 0 || row.row_version != 0 || baseline.row_version != 0 {
        return Err(format!(
            "expected all versions 0, got review={} review_case={} baseline={}",
            review.row_version, row.row_version, baseline.row_version
        ));
    }
    Ok(())
}

async fn update_increments_row_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_baseline(&s).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut baseline = s
        .get_baseline_for_update(&mut snap, "base-1")
        .await
        .map_err(|e| e.to_string())?;
    baseline.case_ids.insert("case-3".to_string());
    let new_version = s
        .update_baseline(&mut snap, &baseline, 0)
        .await
        .map_err(|e| e.to_string())?;
    if new_version != 1 {
        return Err(format!("expected new version 1, got {new_version}"));
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let stored = s.get_baseline("base-1").await.map_err(|e| e.to_string())?;
    if stored.row_version != 1 || !stored.case_ids.contains("case-3") {
        return Err(format!("update not committed: {stored:?}"));
    }
    Ok(())
}

async fn second_update_same_snapshot_uses_new_version<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
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
    let v1 = s
        .update_review(&mut snap, &review, 0)
        .await
        .map_err(|e| e.to_string())?;
    review.status = ReviewStatus::Completed;
    let v2 = s
        .update_review(&mut snap, &review, v1)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let stored = s.get_review("review-1").await.map_err(|e| e.to_string())?;
    if v2 != 2 || stored.row_version != 2 || stored.status != ReviewStatus::Completed {
        return Err(format!("expected version 2 COMPLETED, got {stored:?}"));
    }
    Ok(())
}

async fn update_with_wrong_version_returns_conflict<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_review(&s).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let rows = s
        .get_review_cases_for_update(&mut snap, &["rc-1".to_string()])
        .await
        .map_err(|e| e.to_string())?;
    let result = s.update_review_case(&mut snap, &rows[0], 7).await;
    let _ = s.abort_snapshot(snap).await;

    match result {
        Err(StorageError::ConcurrentConflict {
            table: t,
            id,
            expected_version,
        }) => {
            if t != table::REVIEW_CASE || id != "rc-1" || expected_version != 7 {
                return Err(format!(
                    "conflict fields wrong: table={t} id={id} expected={expected_version}"
                ));
            }
            Ok(())
        }
        other => Err(format!("expected ConcurrentConflict, got {other:?}")),
    }
}

async fn conflict_does_not_change_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_review(&s).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut rows = s
        .get_review_cases_for_update(&mut snap, &["rc-1".to_string()])
        .await
        .map_err(|e| e.to_string())?;
    rows[0].review_status = CaseReviewStatus::UnPass;
    if s.update_review_case(&mut snap, &rows[0], 3).await.is_ok() {
        return Err("stale update accepted".to_string());
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let stored = s.get_review_case("rc-1").await.map_err(|e| e.to_string())?;
    if stored.review_status != CaseReviewStatus::Prepare || stored.row_version != 0 {
        return Err(format!("rejected update mutated row: {stored:?}"));
    }
    Ok(())
}

async fn stale_snapshot_loses_at_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_baseline(&s).await?;

    let mut first = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut second = s.begin_snapshot().await.map_err(|e| e.to_string())?;

    let mut a = s
        .get_baseline_for_update(&mut first, "base-1")
        .await
        .map_err(|e| e.to_string())?;
    let mut b = s
        .get_baseline_for_update(&mut second, "base-1")
        .await
        .map_err(|e| e.to_string())?;
    a.established = true;
    b.established = true;
    s.update_baseline(&mut first, &a, 0)
        .await
        .map_err(|e| e.to_string())?;

    // Second may detect the conflict at update time or at commit time.
    let second_result = match s.update_baseline(&mut second, &b, 0).await {
        Ok(_) => {
            s.commit_snapshot(first).await.map_err(|e| e.to_string())?;
            s.commit_snapshot(second).await
        }
        Err(e) => {
            s.commit_snapshot(first).await.map_err(|e| e.to_string())?;
            let _ = s.abort_snapshot(second).await;
            Err(e)
        }
    };
    match second_result {
        Err(StorageError::ConcurrentConflict { .. }) => {}
        other => return Err(format!("expected second writer to conflict, got {other:?}")),
    }

    let stored = s.get_baseline("base-1").await.map_err(|e| e.to_string())?;
    if stored.row_version != 1 {
        return Err(format!("expected exactly one applied update, got {}", stored.row_version));
    }
    Ok(())
}

async fn losing_snapshot_applies_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_baseline(&s).await?;

    let mut winner = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut loser = s.begin_snapshot().await.map_err(|e| e.to_string())?;

    let w = s
        .get_baseline_for_update(&mut winner, "base-1")
        .await
        .map_err(|e| e.to_string())?;
    let l = s
        .get_baseline_for_update(&mut loser, "base-1")
        .await
        .map_err(|e| e.to_string())?;
    s.update_baseline(&mut winner, &w, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(winner).await.map_err(|e| e.to_string())?;

    // The loser bumps a case first, then tries the stale baseline update.
    let ids = vec!["case-1".to_string()];
    s.increment_case_versions(&mut loser, &ids)
        .await
        .map_err(|e| e.to_string())?;
    let outcome = match s.update_baseline(&mut loser, &l, 0).await {
        Ok(_) => s.commit_snapshot(loser).await,
        Err(e) => {
            let _ = s.abort_snapshot(loser).await;
            Err(e)
        }
    };
    if !matches!(outcome, Err(StorageError::ConcurrentConflict { .. })) {
        return Err(format!("expected conflict, got {outcome:?}"));
    }

    let case = s.get_case("case-1").await.map_err(|e| e.to_string())?;
    if case.version != 0 {
        return Err(format!("loser's version bump leaked: {}", case.version));
    }
    Ok(())
}

async fn stale_baseline_delete_loses_at_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_baseline(&s).await?;
    let ids = vec!["base-1".to_string()];

    let mut deleter = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut establisher = s.begin_snapshot().await.map_err(|e| e.to_string())?;

    let mut baseline = s
        .get_baseline_for_update(&mut establisher, "base-1")
        .await
        .map_err(|e| e.to_string())?;
    baseline.established = true;
    s.update_baseline(&mut establisher, &baseline, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.insert_baseline_snapshot(
        &mut establisher,
        BaselineCaseSnapshot {
            baseline_id: "base-1".to_string(),
            case_id: "case-1".to_string(),
            case_version: 0,
            name: "case case-1".to_string(),
            content: serde_json::json!({}),
            captured_at: "2025-01-02T00:00:00Z".to_string(),
        },
    )
    .await
    .map_err(|e| e.to_string())?;
    s.commit_snapshot(establisher)
        .await
        .map_err(|e| e.to_string())?;

    // The deleter read the baseline before the establish landed.
    s.delete_baseline_snapshots(&mut deleter, &ids)
        .await
        .map_err(|e| e.to_string())?;
    s.delete_baselines(&mut deleter, &ids)
        .await
        .map_err(|e| e.to_string())?;
    let outcome = s.commit_snapshot(deleter).await;
    if !matches!(outcome, Err(StorageError::ConcurrentConflict { .. })) {
        return Err(format!("expected stale delete to conflict, got {outcome:?}"));
    }

    let stored = s.get_baseline("base-1").await.map_err(|e| e.to_string())?;
    let rows = s
        .list_baseline_snapshots("base-1")
        .await
        .map_err(|e| e.to_string())?;
    if !stored.established || rows.len() != 1 {
        return Err(format!(
            "established baseline damaged: established={} snapshot rows={}",
            stored.established,
            rows.len()
        ));
    }
    Ok(())
}

async fn stale_review_case_delete_loses_at_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_review(&s).await?;
    let ids = vec!["rc-1".to_string()];

    let mut deleter = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut reviewer = s.begin_snapshot().await.map_err(|e| e.to_string())?;

    let mut rows = s
        .get_review_cases_for_update(&mut reviewer, &ids)
        .await
        .map_err(|e| e.to_string())?;
    let mut row = rows.remove(0);
    row.review_status = CaseReviewStatus::Pass;
    s.update_review_case(&mut reviewer, &row, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.insert_review_case_record(&mut reviewer, make_record("rec-1", &row))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(reviewer).await.map_err(|e| e.to_string())?;

    s.delete_review_case_records(&mut deleter, &ids)
        .await
        .map_err(|e| e.to_string())?;
    s.delete_review_cases(&mut deleter, &ids)
        .await
        .map_err(|e| e.to_string())?;
    let outcome = s.commit_snapshot(deleter).await;
    if !matches!(outcome, Err(StorageError::ConcurrentConflict { .. })) {
        return Err(format!("expected stale delete to conflict, got {outcome:?}"));
    }

    let stored = s.get_review_case("rc-1").await.map_err(|e| e.to_string())?;
    let records = s
        .list_review_case_records("rc-1")
        .await
        .map_err(|e| e.to_string())?;
    if stored.review_status != CaseReviewStatus::Pass || records.len() != 1 {
        return Err(format!(
            "reviewed row damaged: status={} records={}",
            stored.review_status,
            records.len()
        ));
    }
    Ok(())
}
