//! ReviewCaseLedger decisions, resets, deletes and the audit trail.

mod common;

use casebook_storage::{CaseReviewStatus, CasebookStorage, ReviewCase, ReviewStatus};
use casebook_workflow::{
    ActivityFailurePolicy, ActivityKind, CaseDecision, Decision, Permission, ResetMode, Violation,
    WorkflowConfig, WorkflowError,
};
use common::*;

/// Committed state of a set of review-cases, for before/after comparisons.
async fn rows_of(h: &Harness, rows: &[ReviewCase]) -> Vec<ReviewCase> {
    let mut out = Vec::new();
    for row in rows {
        out.push(h.engine.review_cases().get(&row.id).await.unwrap());
    }
    out
}

// ──────────────────────────────────────────────
// Decisions
// ──────────────────────────────────────────────

#[tokio::test]
async fn decision_stamps_row_mirrors_case_and_appends_record() {
    let h = harness();
    let (review, rows) = started_review(&h, "r", PLAN, &["A"]).await;

    let updated = h
        .engine
        .review_cases()
        .review(
            &ctx_as("bob"),
            vec![CaseDecision::new(&rows[0].id, Decision::UnPass).with_remark("step 2 unclear")],
        )
        .await
        .unwrap();
    let row = &updated[0];
    assert_eq!(row.review_status, CaseReviewStatus::UnPass);
    assert_eq!(row.reviewer_id.as_deref(), Some("bob"));
    assert_eq!(row.remark.as_deref(), Some("step 2 unclear"));
    assert!(row.review_date.is_some());
    assert_eq!(
        row.reviewed_case_snapshot.as_ref(),
        Some(&h.storage.get_case("A").await.unwrap().content)
    );
    assert_eq!(row.row_version, rows[0].row_version + 1);
    assert_eq!(h.engine.review_cases().get(&row.id).await.unwrap(), *row);

    let case = h.storage.get_case("A").await.unwrap();
    assert_eq!(case.review_status, CaseReviewStatus::UnPass);
    assert_eq!(case.reviewer_id.as_deref(), Some("bob"));
    assert_eq!(case.review_date, row.review_date);
    assert_eq!(case.version, 1);

    let history = h.engine.review_cases().history(&row.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].review_case_id, row.id);
    assert_eq!(history[0].review_id, review.id);
    assert_eq!(history[0].review_status, CaseReviewStatus::UnPass);
    assert_eq!(history[0].remark.as_deref(), Some("step 2 unclear"));
    assert_ne!(history[0].id, row.id);

    let entries = h.activities.entries_of(ActivityKind::CaseReviewed);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].source_id, "A");
    assert_eq!(entries[0].operator_id, "bob");
}

#[tokio::test]
async fn every_submission_appends_one_record() {
    let h = harness();
    let (_, rows) = started_review(&h, "r", PLAN, &["A"]).await;
    let ledger = h.engine.review_cases();

    let decisions = [Decision::Pass, Decision::Pass, Decision::UnPass, Decision::Pass];
    for decision in decisions {
        ledger
            .review(&ctx(), vec![CaseDecision::new(&rows[0].id, decision)])
            .await
            .unwrap();
    }

    let history = ledger.history(&rows[0].id).await.unwrap();
    assert_eq!(history.len(), decisions.len());
    let statuses: Vec<CaseReviewStatus> = history.iter().map(|r| r.review_status).collect();
    assert_eq!(
        statuses,
        vec![
            CaseReviewStatus::Pass,
            CaseReviewStatus::Pass,
            CaseReviewStatus::UnPass,
            CaseReviewStatus::Pass,
        ]
    );
    let versions: Vec<i64> = history.iter().map(|r| r.row_version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn decisions_need_a_started_review() {
    let h = harness();
    seed_cases(&h.storage, PLAN, &["A"]).await;
    let review = h
        .engine
        .reviews()
        .create(&ctx(), new_review("r", PLAN, &["A"]))
        .await
        .unwrap();
    let rows = review_cases_in_order(&h, &review.id, &["A"]).await;

    let err = h
        .engine
        .review_cases()
        .review(&ctx(), vec![CaseDecision::new(&rows[0].id, Decision::Pass)])
        .await
        .unwrap_err();
    assert_eq!(
        err.violation(),
        Some(&Violation::NotReviewable {
            review_id: review.id.clone(),
            status: ReviewStatus::Pending,
        })
    );
    assert_eq!(rows_of(&h, &rows).await, rows);
    assert!(h.engine.review_cases().history(&rows[0].id).await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_and_empty_batches_are_rejected() {
    let h = harness();
    let (_, rows) = started_review(&h, "r", PLAN, &["A"]).await;
    let ledger = h.engine.review_cases();

    let err = ledger
        .review(
            &ctx(),
            vec![
                CaseDecision::new(&rows[0].id, Decision::Pass),
                CaseDecision::new(&rows[0].id, Decision::UnPass),
            ],
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.violation(),
        Some(&Violation::DuplicateTarget {
            id: rows[0].id.clone()
        })
    );

    let err = ledger.review(&ctx(), Vec::new()).await.unwrap_err();
    assert_eq!(err.violation(), Some(&Violation::EmptyBatch));
    assert!(ledger.history(&rows[0].id).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_review_case_is_not_found() {
    let h = harness();
    let (_, rows) = started_review(&h, "r", PLAN, &["A"]).await;
    let err = h
        .engine
        .review_cases()
        .review(
            &ctx(),
            vec![
                CaseDecision::new(&rows[0].id, Decision::Pass),
                CaseDecision::new("ghost", Decision::Pass),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { ref id, .. } if id == "ghost"));
    assert_eq!(rows_of(&h, &rows).await, rows);
}

#[tokio::test]
async fn decisions_need_review_permission() {
    let h = harness_with(WorkflowConfig::default(), DenyOn::new(PLAN, Permission::Review));
    let (_, rows) = started_review(&h, "r", PLAN, &["A"]).await;
    let err = h
        .engine
        .review_cases()
        .review(&ctx(), vec![CaseDecision::new(&rows[0].id, Decision::Pass)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::PermissionDenied {
            permission: Permission::Review,
            ..
        }
    ));
}

// ──────────────────────────────────────────────
// Batch scope
// ──────────────────────────────────────────────

#[tokio::test]
async fn batches_across_plans_mutate_nothing() {
    let h = harness();
    let (_, mine) = started_review(&h, "mine", PLAN, &["A"]).await;
    let (_, theirs) = started_review(&h, "theirs", OTHER_PLAN, &["X"]).await;
    let both = vec![mine[0].clone(), theirs[0].clone()];
    let both_ids = ids(&[mine[0].id.as_str(), theirs[0].id.as_str()]);
    let ledger = h.engine.review_cases();

    let review = ledger
        .review(
            &ctx(),
            both_ids
                .iter()
                .map(|id| CaseDecision::new(id, Decision::Pass))
                .collect(),
        )
        .await;
    let reset = ledger
        .review_reset(&ctx(), both_ids.clone(), ResetMode::Init)
        .await;
    let delete = ledger.delete(&ctx(), both_ids.clone()).await;

    for result in [review.map(|_| ()), reset.map(|_| ()), delete.map(|_| ())] {
        assert!(matches!(
            result.unwrap_err().violation(),
            Some(Violation::MixedPlans { .. })
        ));
    }
    assert_eq!(rows_of(&h, &both).await, both);
    for row in &both {
        assert!(ledger.history(&row.id).await.unwrap().is_empty());
    }
    assert_eq!(
        h.storage.get_case("A").await.unwrap().review_status,
        CaseReviewStatus::Prepare
    );
    assert!(h.activities.entries().is_empty());
}

#[tokio::test]
async fn batches_across_reviews_of_one_plan_mutate_nothing() {
    let h = harness();
    let (_, first) = started_review(&h, "first", PLAN, &["A"]).await;
    let (_, second) = started_review(&h, "second", PLAN, &["B"]).await;
    let both = vec![first[0].clone(), second[0].clone()];
    let both_ids = ids(&[first[0].id.as_str(), second[0].id.as_str()]);
    let ledger = h.engine.review_cases();

    let err = ledger
        .review(
            &ctx(),
            both_ids
                .iter()
                .map(|id| CaseDecision::new(id, Decision::UnPass))
                .collect(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.violation(),
        Some(Violation::MixedReviews { review_ids }) if review_ids.len() == 2
    ));

    let err = ledger.delete(&ctx(), both_ids).await.unwrap_err();
    assert!(matches!(
        err.violation(),
        Some(Violation::MixedReviews { .. })
    ));
    assert_eq!(rows_of(&h, &both).await, both);
}

// ──────────────────────────────────────────────
// Reset
// ──────────────────────────────────────────────

#[tokio::test]
async fn review_then_init_reset_round_trips_and_reopens_review() {
    let h = harness();
    let (review, rows) = started_review(&h, "r", PLAN, &["A", "B"]).await;
    let ledger = h.engine.review_cases();
    let reviews = h.engine.reviews();
    let row_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

    ledger
        .review(
            &ctx(),
            vec![
                CaseDecision::new(&row_ids[0], Decision::Pass),
                CaseDecision::new(&row_ids[1], Decision::UnPass),
            ],
        )
        .await
        .unwrap();
    assert_eq!(
        reviews.end(&ctx(), &review.id).await.unwrap().status,
        ReviewStatus::Completed
    );

    let reset = ledger
        .review_reset(&ctx(), row_ids.clone(), ResetMode::from_flag(true))
        .await
        .unwrap();
    assert_eq!(reset.len(), 2);
    assert_eq!(
        reviews.get(&review.id).await.unwrap().status,
        ReviewStatus::Pending
    );

    for (before, after) in rows.iter().zip(rows_of(&h, &rows).await) {
        assert_eq!(after.review_status, before.review_status);
        assert_eq!(after.reviewer_id, before.reviewer_id);
        assert_eq!(after.review_date, before.review_date);
        assert_eq!(after.remark, before.remark);
        assert_eq!(after.reviewed_case_snapshot, before.reviewed_case_snapshot);
        assert_eq!(after.row_version, before.row_version + 2);
    }
    for case_id in ["A", "B"] {
        let case = h.storage.get_case(case_id).await.unwrap();
        assert_eq!(case.review_status, CaseReviewStatus::Prepare);
        assert_eq!(case.reviewer_id, None);
        assert_eq!(case.review_date, None);
    }

    // Resets are not decisions: the trail still holds one record per row.
    for id in &row_ids {
        assert_eq!(ledger.history(id).await.unwrap().len(), 1);
    }
    assert_eq!(
        h.activities.entries_of(ActivityKind::ReviewResultReset).len(),
        2
    );
}

#[tokio::test]
async fn restart_reset_reopens_for_the_same_reviewer() {
    let h = harness();
    let (review, rows) = started_review(&h, "r", PLAN, &["A"]).await;
    let ledger = h.engine.review_cases();

    ledger
        .review(
            &ctx_as("bob"),
            vec![CaseDecision::new(&rows[0].id, Decision::Pass).with_remark("fine")],
        )
        .await
        .unwrap();
    let reset = ledger
        .review_reset(&ctx(), ids(&[rows[0].id.as_str()]), ResetMode::from_flag(false))
        .await
        .unwrap();

    let row = &reset[0];
    assert_eq!(row.review_status, CaseReviewStatus::Again);
    assert_eq!(row.reviewer_id.as_deref(), Some("bob"));
    assert_eq!(row.review_date, None);
    assert_eq!(row.remark, None);

    let case = h.storage.get_case("A").await.unwrap();
    assert_eq!(case.review_status, CaseReviewStatus::Again);
    assert_eq!(case.reviewer_id.as_deref(), Some("bob"));

    // Again is pending, and the review stays in progress.
    let err = h.engine.reviews().end(&ctx(), &review.id).await.unwrap_err();
    assert!(matches!(
        err.violation(),
        Some(Violation::PendingCases { pending: 1, .. })
    ));
}

#[tokio::test]
async fn reset_needs_reset_permission() {
    let h = harness_with(
        WorkflowConfig::default(),
        DenyOn::new(PLAN, Permission::ResetReviewResult),
    );
    let (_, rows) = started_review(&h, "r", PLAN, &["A"]).await;
    h.engine
        .review_cases()
        .review(&ctx(), vec![CaseDecision::new(&rows[0].id, Decision::Pass)])
        .await
        .unwrap();

    let err = h
        .engine
        .review_cases()
        .review_reset(&ctx(), ids(&[rows[0].id.as_str()]), ResetMode::Init)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::PermissionDenied { .. }));
    assert_eq!(
        h.engine.review_cases().get(&rows[0].id).await.unwrap().review_status,
        CaseReviewStatus::Pass
    );
}

// ──────────────────────────────────────────────
// Attach / detach
// ──────────────────────────────────────────────

#[tokio::test]
async fn add_rejects_attached_and_foreign_cases() {
    let h = harness();
    let (review, _) = started_review(&h, "r", PLAN, &["A"]).await;
    seed_cases(&h.storage, PLAN, &["B"]).await;
    seed_cases(&h.storage, OTHER_PLAN, &["X"]).await;
    let ledger = h.engine.review_cases();

    let err = ledger
        .add(&ctx(), &review.id, ids(&["B", "A"]))
        .await
        .unwrap_err();
    assert_eq!(
        err.violation(),
        Some(&Violation::AlreadyAttached {
            review_id: review.id.clone(),
            case_id: "A".to_string(),
        })
    );

    let err = ledger.add(&ctx(), &review.id, ids(&["X"])).await.unwrap_err();
    assert!(matches!(
        err.violation(),
        Some(Violation::CasesOutsidePlan { .. })
    ));

    let err = ledger
        .add(&ctx(), &review.id, ids(&["B", "B"]))
        .await
        .unwrap_err();
    assert!(matches!(
        err.violation(),
        Some(Violation::DuplicateTarget { .. })
    ));

    let added = ledger.add(&ctx(), &review.id, ids(&["B"])).await.unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].case_id, "B");
    assert_eq!(added[0].review_status, CaseReviewStatus::Prepare);
    assert_eq!(ledger.list(&review.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn completed_reviews_accept_no_new_cases() {
    let h = harness();
    let (review, rows) = started_review(&h, "r", PLAN, &["A"]).await;
    seed_cases(&h.storage, PLAN, &["B"]).await;
    h.engine
        .review_cases()
        .review(&ctx(), vec![CaseDecision::new(&rows[0].id, Decision::Pass)])
        .await
        .unwrap();
    h.engine.reviews().end(&ctx(), &review.id).await.unwrap();

    let err = h
        .engine
        .review_cases()
        .add(&ctx(), &review.id, ids(&["B"]))
        .await
        .unwrap_err();
    assert_eq!(
        err.violation(),
        Some(&Violation::ReviewCompleted {
            review_id: review.id.clone()
        })
    );
}

#[tokio::test]
async fn delete_removes_rows_and_their_records() {
    let h = harness();
    let (review, rows) = started_review(&h, "r", PLAN, &["A", "B"]).await;
    let ledger = h.engine.review_cases();
    ledger
        .review(&ctx(), vec![CaseDecision::new(&rows[0].id, Decision::UnPass)])
        .await
        .unwrap();

    let removed = ledger
        .delete(&ctx(), ids(&[rows[0].id.as_str()]))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(matches!(
        ledger.get(&rows[0].id).await,
        Err(WorkflowError::NotFound { .. })
    ));
    assert!(h
        .storage
        .list_review_case_records(&rows[0].id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(ledger.list(&review.id).await.unwrap().len(), 1);

    let deleted = h.activities.entries_of(ActivityKind::ReviewCaseDeleted);
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].source_id, "A");
}

// ──────────────────────────────────────────────
// Activity failure policy
// ──────────────────────────────────────────────

#[tokio::test]
async fn failing_sink_rolls_back_decisions_under_fail_policy() {
    let h = harness_with_config(WorkflowConfig {
        activity_failure: ActivityFailurePolicy::Fail,
        ..WorkflowConfig::default()
    });
    let (_, rows) = started_review(&h, "r", PLAN, &["A"]).await;
    h.activities.fail_with("sink down");

    let err = h
        .engine
        .review_cases()
        .review(&ctx(), vec![CaseDecision::new(&rows[0].id, Decision::Pass)])
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Activity(_)));
    assert_eq!(rows_of(&h, &rows).await, rows);
    assert!(h.engine.review_cases().history(&rows[0].id).await.unwrap().is_empty());
    assert_eq!(
        h.storage.get_case("A").await.unwrap().review_status,
        CaseReviewStatus::Prepare
    );
}

#[tokio::test]
async fn failing_sink_keeps_decisions_under_log_policy() {
    let h = harness();
    let (_, rows) = started_review(&h, "r", PLAN, &["A"]).await;
    h.activities.fail_with("sink down");

    h.engine
        .review_cases()
        .review(&ctx(), vec![CaseDecision::new(&rows[0].id, Decision::Pass)])
        .await
        .unwrap();
    assert_eq!(h.engine.review_cases().history(&rows[0].id).await.unwrap().len(), 1);
    assert!(h.activities.entries().is_empty());
}

// ──────────────────────────────────────────────
// Concurrency
// ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_decisions_on_one_row_never_double_apply() {
    let h = harness();
    let (_, rows) = started_review(&h, "r", PLAN, &["A"]).await;

    let mut handles = Vec::new();
    for i in 0..4 {
        let engine = h.engine.clone();
        let id = rows[0].id.clone();
        handles.push(tokio::spawn(async move {
            let remark = format!("attempt {i}");
            engine
                .review_cases()
                .review(
                    &ctx(),
                    vec![CaseDecision::new(id, Decision::Pass).with_remark(remark)],
                )
                .await
        }));
    }

    let mut won = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(e) => assert!(e.is_conflict(), "unexpected error: {e}"),
        }
    }
    assert!(won >= 1);
    let history = h.engine.review_cases().history(&rows[0].id).await.unwrap();
    assert_eq!(history.len(), won);
    let row = h.engine.review_cases().get(&rows[0].id).await.unwrap();
    assert_eq!(row.row_version, won as i64);
}
