use std::future::Future;

use super::{make_case, make_review, seed_review, TestResult};
use crate::record::table;
use crate::{CasebookStorage, StorageError};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "error",
        "query_missing_rows_not_found",
        query_missing_rows_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "not_found_has_correct_fields",
        not_found_has_correct_fields(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "bulk_read_fails_on_any_missing_id",
        bulk_read_fails_on_any_missing_id(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "update_missing_row_not_found",
        update_missing_row_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "duplicate_insert_already_exists",
        duplicate_insert_already_exists(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "review_name_taken_at_commit",
        review_name_taken_at_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "lists_empty_for_unknown_parent",
        lists_empty_for_unknown_parent(factory).await,
    ));

    results
}

async fn query_missing_rows_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    if !matches!(s.get_baseline("nope").await, Err(StorageError::NotFound { .. })) {
        return Err("get_baseline: expected NotFound".to_string());
    }
    if !matches!(s.get_case("nope").await, Err(StorageError::NotFound { .. })) {
        return Err("get_case: expected NotFound".to_string());
    }
    if !matches!(s.get_review("nope").await, Err(StorageError::NotFound { .. })) {
        return Err("get_review: expected NotFound".to_string());
    }
    if !matches!(s.get_review_case("nope").await, Err(StorageError::NotFound { .. })) {
        return Err("get_review_case: expected NotFound".to_string());
    }
    Ok(())
}

async fn not_found_has_correct_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.get_review_for_update(&mut snap, "review-x").await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::NotFound { table: t, id }) => {
            if t != table::REVIEW || id != "review-x" {
                return Err(format!("wrong fields: table={t} id={id}"));
            }
            Ok(())
        }
        other => Err(format!("expected NotFound, got {other:?}")),
    }
}

async fn bulk_read_fails_on_any_missing_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_review(&s).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let cases = s
        .get_cases(&mut snap, &["case-1".to_string(), "case-9".to_string()])
        .await;
    let rows = s
        .get_review_cases_for_update(&mut snap, &["rc-1".to_string(), "rc-9".to_string()])
        .await;
    let _ = s.abort_snapshot(snap).await;

    match cases {
        Err(StorageError::NotFound { id, .. }) if id == "case-9" => {}
        other => return Err(format!("get_cases: expected NotFound case-9, got {other:?}")),
    }
    match rows {
        Err(StorageError::NotFound { id, .. }) if id == "rc-9" => Ok(()),
        other => Err(format!(
            "get_review_cases_for_update: expected NotFound rc-9, got {other:?}"
        )),
    }
}

async fn update_missing_row_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
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
    review.id = "review-ghost".to_string();
    let result = s.update_review(&mut snap, &review, 0).await;
    let mirror = s
        .mirror_case_review(
            &mut snap,
            "case-ghost",
            &crate::record::CaseReviewMirror {
                review_status: crate::record::CaseReviewStatus::Pass,
                reviewer_id: None,
                review_date: None,
            },
        )
        .await;
    let _ = s.abort_snapshot(snap).await;

    if !matches!(result, Err(StorageError::NotFound { .. })) {
        return Err(format!("update_review: expected NotFound, got {result:?}"));
    }
    if !matches!(mirror, Err(StorageError::NotFound { .. })) {
        return Err(format!("mirror_case_review: expected NotFound, got {mirror:?}"));
    }
    Ok(())
}

async fn duplicate_insert_already_exists<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_review(&s).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.insert_case(&mut snap, make_case("case-1", "plan-1")).await;
    let _ = s.abort_snapshot(snap).await;
    if !matches!(result, Err(StorageError::AlreadyExists { .. })) {
        return Err(format!("expected AlreadyExists, got {result:?}"));
    }
    Ok(())
}

async fn review_name_taken_at_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_review(&s).await?;

    // Both snapshots start before either name is committed.
    let mut a = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut b = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut first = make_review("review-a", "plan-1");
    first.name = "Sprint".to_string();
    let mut second = make_review("review-b", "plan-1");
    second.name = "Sprint".to_string();
    let mut elsewhere = make_review("review-c", "plan-1");
    elsewhere.name = "Sprint".to_string();
    elsewhere.project_id = "other-project".to_string();

    s.insert_review(&mut a, first).await.map_err(|e| e.to_string())?;
    s.insert_review(&mut a, elsewhere).await.map_err(|e| e.to_string())?;
    s.insert_review(&mut b, second).await.map_err(|e| e.to_string())?;
    s.commit_snapshot(a).await.map_err(|e| e.to_string())?;

    match s.commit_snapshot(b).await {
        Err(StorageError::NameTaken {
            table: t,
            project_id,
            name,
        }) => {
            if t != table::REVIEW || project_id != "test-project" || name != "Sprint" {
                return Err(format!(
                    "NameTaken fields wrong: table={t} project={project_id} name={name}"
                ));
            }
        }
        other => return Err(format!("expected NameTaken, got {other:?}")),
    }
    if s.get_review("review-b").await.is_ok() {
        return Err("rejected review was committed".to_string());
    }
    Ok(())
}

async fn lists_empty_for_unknown_parent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_review(&s).await?;

    let checks = [
        ("list_baselines", s.list_baselines("plan-x").await.map(|v| v.len())),
        ("list_reviews", s.list_reviews("plan-x").await.map(|v| v.len())),
        ("list_review_cases", s.list_review_cases("review-x").await.map(|v| v.len())),
        (
            "list_review_case_records",
            s.list_review_case_records("rc-x").await.map(|v| v.len()),
        ),
        (
            "list_baseline_snapshots",
            s.list_baseline_snapshots("base-x").await.map(|v| v.len()),
        ),
    ];
    for (name, result) in checks {
        match result {
            Ok(0) => {}
            other => return Err(format!("{name}: expected empty, got {other:?}")),
        }
    }
    Ok(())
}
