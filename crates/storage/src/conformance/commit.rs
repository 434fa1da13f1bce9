use std::future::Future;

use super::{make_record, seed_baseline, seed_review, TestResult};
use crate::record::{BaselineCaseSnapshot, CaseReviewMirror, CaseReviewStatus, ReviewStatus};
use crate::CasebookStorage;

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    // Decision fan-out: review-case + record + case mirror
    results.push(TestResult::from_result(
        "commit",
        "decision_fan_out_all_visible_after_commit",
        decision_fan_out_all_visible_after_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "decision_fan_out_none_visible_after_abort",
        decision_fan_out_none_visible_after_abort(factory).await,
    ));

    // Establish: flag + snapshot rows + version bump
    results.push(TestResult::from_result(
        "commit",
        "establish_all_visible_after_commit",
        establish_all_visible_after_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "establish_none_visible_after_abort",
        establish_none_visible_after_abort(factory).await,
    ));

    // Cascading deletes
    results.push(TestResult::from_result(
        "commit",
        "cascade_delete_applied_on_commit",
        cascade_delete_applied_on_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "cascade_delete_discarded_on_abort",
        cascade_delete_discarded_on_abort(factory).await,
    ));

    results
}

/// Apply one decision to rc-1 inside `snap`.
async fn apply_decision<S: CasebookStorage>(
    s: &S,
    snap: &mut S::Snapshot,
) -> Result<(), String> {
    let mut rows = s
        .get_review_cases_for_update(snap, &["rc-1".to_string()])
        .await
        .map_err(|e| format!("read: {e}"))?;
    let mut row = rows.remove(0);
    let expected = row.row_version;
    row.review_status = CaseReviewStatus::Pass;
    row.reviewer_id = Some("reviewer".to_string());
    row.review_date = Some("2025-01-02T00:00:00Z".to_string());
    row.row_version = s
        .update_review_case(snap, &row, expected)
        .await
        .map_err(|e| format!("update: {e}"))?;
    s.insert_review_case_record(snap, make_record("rec-1", &row))
        .await
        .map_err(|e| format!("record: {e}"))?;
    s.mirror_case_review(
        snap,
        "case-1",
        &CaseReviewMirror {
            review_status: CaseReviewStatus::Pass,
            reviewer_id: row.reviewer_id.clone(),
            review_date: row.review_date.clone(),
        },
    )
    .await
    .map_err(|e| format!("mirror: {e}"))
}

async fn decision_fan_out_all_visible_after_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_review(&s).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    apply_decision(&s, &mut snap).await?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let row = s.get_review_case("rc-1").await.map_err(|e| e.to_string())?;
    if row.review_status != CaseReviewStatus::Pass || row.row_version != 1 {
        return Err(format!("review case not updated: {row:?}"));
    }
    let records = s
        .list_review_case_records("rc-1")
        .await
        .map_err(|e| e.to_string())?;
    if records.len() != 1 {
        return Err(format!("expected 1 record, got {}", records.len()));
    }
    let case = s.get_case("case-1").await.map_err(|e| e.to_string())?;
    if case.review_status != CaseReviewStatus::Pass {
        return Err(format!("case mirror not applied: {}", case.review_status));
    }
    Ok(())
}

async fn decision_fan_out_none_visible_after_abort<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_review(&s).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    apply_decision(&s, &mut snap).await?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let row = s.get_review_case("rc-1").await.map_err(|e| e.to_string())?;
    if row.review_status != CaseReviewStatus::Prepare || row.row_version != 0 {
        return Err(format!("aborted decision leaked: {row:?}"));
    }
    let records = s
        .list_review_case_records("rc-1")
        .await
        .map_err(|e| e.to_string())?;
    if !records.is_empty() {
        return Err(format!("aborted record leaked: {} rows", records.len()));
    }
    let case = s.get_case("case-1").await.map_err(|e| e.to_string())?;
    if case.review_status != CaseReviewStatus::Prepare {
        return Err("aborted case mirror leaked".to_string());
    }
    Ok(())
}

async fn establish_in<S: CasebookStorage>(s: &S, snap: &mut S::Snapshot) -> Result<(), String> {
    let mut baseline = s
        .get_baseline_for_update(snap, "base-1")
        .await
        .map_err(|e| format!("read: {e}"))?;
    let ids: Vec<String> = baseline.case_ids.iter().cloned().collect();
    let cases = s
        .get_cases(snap, &ids)
        .await
        .map_err(|e| format!("cases: {e}"))?;
    for case in cases {
        s.insert_baseline_snapshot(
            snap,
            BaselineCaseSnapshot {
                baseline_id: baseline.id.clone(),
                case_id: case.id.clone(),
                case_version: case.version,
                name: case.name.clone(),
                content: case.content.clone(),
                captured_at: "2025-01-02T00:00:00Z".to_string(),
            },
        )
        .await
        .map_err(|e| format!("snapshot row: {e}"))?;
    }
    let expected = baseline.row_version;
    baseline.established = true;
    s.update_baseline(snap, &baseline, expected)
        .await
        .map_err(|e| format!("flag: {e}"))?;
    s.increment_case_versions(snap, &ids)
        .await
        .map_err(|e| format!("bump: {e}"))?;
    Ok(())
}

async fn establish_all_visible_after_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_baseline(&s).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    establish_in(&s, &mut snap).await?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let baseline = s.get_baseline("base-1").await.map_err(|e| e.to_string())?;
    if !baseline.established {
        return Err("established flag not committed".to_string());
    }
    let rows = s
        .list_baseline_snapshots("base-1")
        .await
        .map_err(|e| e.to_string())?;
    if rows.len() != 2 {
        return Err(format!("expected 2 snapshot rows, got {}", rows.len()));
    }
    for id in ["case-1", "case-2"] {
        let case = s.get_case(id).await.map_err(|e| e.to_string())?;
        if case.version != 1 {
            return Err(format!("{id}: expected version 1, got {}", case.version));
        }
    }
    Ok(())
}

async fn establish_none_visible_after_abort<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_baseline(&s).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    establish_in(&s, &mut snap).await?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let baseline = s.get_baseline("base-1").await.map_err(|e| e.to_string())?;
    if baseline.established {
        return Err("aborted establish flag leaked".to_string());
    }
    let rows = s
        .list_baseline_snapshots("base-1")
        .await
        .map_err(|e| e.to_string())?;
    if !rows.is_empty() {
        return Err(format!("aborted snapshot rows leaked: {}", rows.len()));
    }
    let case = s.get_case("case-1").await.map_err(|e| e.to_string())?;
    if case.version != 0 {
        return Err(format!("aborted version bump leaked: {}", case.version));
    }
    Ok(())
}

async fn cascade_delete_in<S: CasebookStorage>(
    s: &S,
    snap: &mut S::Snapshot,
) -> Result<(), String> {
    let review_ids = s
        .list_review_ids_by_plan(snap, "plan-1")
        .await
        .map_err(|e| format!("list reviews: {e}"))?;
    let rc_ids = s
        .list_review_case_ids_by_reviews(snap, &review_ids)
        .await
        .map_err(|e| format!("list review cases: {e}"))?;
    s.delete_review_case_records(snap, &rc_ids)
        .await
        .map_err(|e| format!("delete records: {e}"))?;
    s.delete_review_cases(snap, &rc_ids)
        .await
        .map_err(|e| format!("delete review cases: {e}"))?;
    let removed = s
        .delete_reviews(snap, &review_ids)
        .await
        .map_err(|e| format!("delete reviews: {e}"))?;
    if removed != 1 {
        return Err(format!("expected 1 review removed, got {removed}"));
    }
    Ok(())
}

async fn seed_with_record<S: CasebookStorage>(s: &S) -> Result<(), String> {
    seed_review(s).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    apply_decision(s, &mut snap).await?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())
}

async fn cascade_delete_applied_on_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_with_record(&s).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    cascade_delete_in(&s, &mut snap).await?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if s.get_review("review-1").await.is_ok() {
        return Err("review survived cascade".to_string());
    }
    if s.get_review_case("rc-1").await.is_ok() {
        return Err("review case survived cascade".to_string());
    }
    let records = s
        .list_review_case_records("rc-1")
        .await
        .map_err(|e| e.to_string())?;
    if !records.is_empty() {
        return Err("records survived cascade".to_string());
    }
    Ok(())
}

async fn cascade_delete_discarded_on_abort<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_with_record(&s).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    cascade_delete_in(&s, &mut snap).await?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let review = s.get_review("review-1").await.map_err(|e| e.to_string())?;
    if review.status != ReviewStatus::Pending {
        return Err(format!("unexpected review status {}", review.status));
    }
    s.get_review_case("rc-1").await.map_err(|e| e.to_string())?;
    let records = s
        .list_review_case_records("rc-1")
        .await
        .map_err(|e| e.to_string())?;
    if records.len() != 1 {
        return Err(format!("expected record to survive abort, got {}", records.len()));
    }
    Ok(())
}
