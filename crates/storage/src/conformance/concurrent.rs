use std::future::Future;
use std::sync::Arc;

use super::{make_review_case, seed_review, TestResult};
use crate::record::CaseReviewStatus;
use crate::{CasebookStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_review_case_updates_exactly_one_wins",
        concurrent_review_case_updates_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_different_rows_all_succeed",
        concurrent_updates_different_rows_all_succeed(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_case_increments_all_land",
        concurrent_case_increments_all_land(factory).await,
    ));

    results
}

/// Update `id` from `expected_version` in a fresh snapshot and commit.
///
/// Returns `Ok(true)` on a committed win and `Ok(false)` when the OCC check
/// rejected the write, whether at update time or at commit time.
async fn race_update<S: CasebookStorage>(
    s: Arc<S>,
    id: String,
    expected_version: i64,
    reviewer: String,
) -> Result<bool, StorageError> {
    let mut snap = s.begin_snapshot().await?;
    let mut rows = match s.get_review_cases_for_update(&mut snap, &[id]).await {
        Ok(rows) => rows,
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            return Err(e);
        }
    };
    let mut row = rows.remove(0);
    row.review_status = CaseReviewStatus::Pass;
    row.reviewer_id = Some(reviewer);
    match s.update_review_case(&mut snap, &row, expected_version).await {
        Ok(_) => match s.commit_snapshot(snap).await {
            Ok(()) => Ok(true),
            Err(StorageError::ConcurrentConflict { .. }) => Ok(false),
            Err(e) => Err(e),
        },
        Err(StorageError::ConcurrentConflict { .. }) => {
            s.abort_snapshot(snap).await?;
            Ok(false)
        }
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    }
}

// ── Concurrent update: exactly one wins ─────────────────────────────────────

/// N tasks each open a snapshot and attempt to decide the same review-case
/// from version 0. Exactly one commit succeeds; the rest must conflict.
async fn concurrent_review_case_updates_exactly_one_wins<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_review(&*storage).await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(race_update(
            s,
            "rc-1".to_string(),
            0,
            format!("reviewer-{i}"),
        )));
    }

    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }
    let row = storage
        .get_review_case("rc-1")
        .await
        .map_err(|e| e.to_string())?;
    if row.row_version != 1 {
        return Err(format!("expected version 1, got {}", row.row_version));
    }
    Ok(())
}

// ── Concurrent updates to different rows: all succeed ───────────────────────

/// N tasks each update a different review-case. All should succeed: no false
/// conflicts when there is no contention.
async fn concurrent_updates_different_rows_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_review(&*storage).await?;
    {
        let mut snap = storage
            .begin_snapshot()
            .await
            .map_err(|e| format!("begin: {e}"))?;
        for i in 0..N {
            storage
                .insert_review_case(
                    &mut snap,
                    make_review_case(&format!("rc-n{i}"), "review-1", "case-1"),
                )
                .await
                .map_err(|e| format!("insert: {e}"))?;
        }
        storage
            .commit_snapshot(snap)
            .await
            .map_err(|e| format!("commit seed: {e}"))?;
    }

    let mut handles = Vec::new();
    for i in 0..N {
        handles.push(tokio::spawn(race_update(
            storage.clone(),
            format!("rc-n{i}"),
            0,
            format!("reviewer-{i}"),
        )));
    }
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        if !won {
            return Err("uncontended update lost".to_string());
        }
    }

    let rows = storage
        .list_review_cases("review-1")
        .await
        .map_err(|e| e.to_string())?;
    let decided = rows
        .iter()
        .filter(|r| r.review_status == CaseReviewStatus::Pass)
        .count();
    if decided != N {
        return Err(format!("expected {N} decided rows, got {decided}"));
    }
    Ok(())
}

// ── Concurrent version bumps: every increment lands ─────────────────────────

/// N tasks each bump the same case once. Increments are deltas, so the final
/// version must be exactly N.
async fn concurrent_case_increments_all_land<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_review(&*storage).await?;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            s.increment_case_versions(&mut snap, &["case-1".to_string()])
                .await?;
            s.commit_snapshot(snap).await
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
    }

    let case = storage.get_case("case-1").await.map_err(|e| e.to_string())?;
    if case.version != N as i64 {
        return Err(format!("expected version {N}, got {}", case.version));
    }
    Ok(())
}
