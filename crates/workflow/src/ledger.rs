//! Per-case decisions inside a review.
//!
//! Every batch operation resolves its target rows, then runs
//! [`assert_single_scope`] before touching anything: a batch that spans more
//! than one plan or more than one review is rejected as a whole. Each batch
//! also rewrites the owning review row, so a batch and a concurrent
//! `end`/`block` on the same review cannot both commit.

use std::collections::BTreeSet;
use std::sync::Arc;

use casebook_storage::{
    Case, CaseReviewMirror, CaseReviewStatus, CasebookStorage, Review, ReviewCase,
    ReviewCaseRecord, ReviewStatus, StorageError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::batch::{assert_single_scope, reject_duplicates, Scope};
use crate::collab::{Activity, ActivityKind, Permission};
use crate::context::RequestContext;
use crate::engine::Services;
use crate::error::{Violation, WorkflowError};
use crate::review::{accepts_decisions, save_review};
use crate::stamp;
use crate::tx::Outcome;

// ── Requests ─────────────────────────────────────────────────────────────────

/// A reviewer's verdict on one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Pass,
    UnPass,
    /// Looked at, not concluded. Keeps the case pending.
    Underway,
}

impl Decision {
    pub fn status(self) -> CaseReviewStatus {
        match self {
            Decision::Pass => CaseReviewStatus::Pass,
            Decision::UnPass => CaseReviewStatus::UnPass,
            Decision::Underway => CaseReviewStatus::Underway,
        }
    }
}

/// One entry of a [`ReviewCaseLedger::review`] batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseDecision {
    pub review_case_id: String,
    pub decision: Decision,
    pub remark: Option<String>,
}

impl CaseDecision {
    pub fn new(review_case_id: impl Into<String>, decision: Decision) -> Self {
        Self {
            review_case_id: review_case_id.into(),
            decision,
            remark: None,
        }
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }
}

/// How [`ReviewCaseLedger::review_reset`] reverts a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetMode {
    /// Back to `Prepare`, as if never reviewed.
    Init,
    /// To `Again`: reopened for the same reviewer.
    Restart,
}

impl ResetMode {
    /// `true` selects [`ResetMode::Init`], `false` [`ResetMode::Restart`].
    pub fn from_flag(reset: bool) -> Self {
        if reset {
            ResetMode::Init
        } else {
            ResetMode::Restart
        }
    }
}

// ── Ledger ───────────────────────────────────────────────────────────────────

pub struct ReviewCaseLedger<S> {
    services: Arc<Services<S>>,
}

impl<S: CasebookStorage> ReviewCaseLedger<S> {
    pub(crate) fn new(services: Arc<Services<S>>) -> Self {
        Self { services }
    }

    /// Attach plan cases to a review that has not completed.
    #[instrument(skip_all, fields(review_id = %review_id, user = %ctx.user_id))]
    pub async fn add(
        &self,
        ctx: &RequestContext,
        review_id: &str,
        case_ids: Vec<String>,
    ) -> Result<Vec<ReviewCase>, WorkflowError> {
        let svc = &self.services;
        let mut snapshot = svc.begin().await?;
        let result: Result<Outcome<Vec<ReviewCase>>, WorkflowError> = async {
            let mut review = svc
                .storage
                .get_review_for_update(&mut snapshot, review_id)
                .await?;
            svc.authorize(ctx, &review.plan_id, Permission::ManageReview)
                .await?;
            let rows = attach_cases(svc, &mut snapshot, ctx, &review, &case_ids).await?;
            save_review(svc, &mut snapshot, &mut review).await?;
            Ok(Outcome::quiet(rows))
        }
        .await;
        let rows = svc.finish(snapshot, result).await?;
        info!(review_id, attached = rows.len(), "cases attached to review");
        Ok(rows)
    }

    /// Submit a batch of decisions on one review.
    ///
    /// Each row is stamped with the caller as reviewer, the decision, the
    /// remark and the live content of its case; one audit record is appended
    /// per row and the result is mirrored onto the case.
    #[instrument(skip_all, fields(count = decisions.len(), user = %ctx.user_id))]
    pub async fn review(
        &self,
        ctx: &RequestContext,
        decisions: Vec<CaseDecision>,
    ) -> Result<Vec<ReviewCase>, WorkflowError> {
        let ids: Vec<String> = decisions
            .iter()
            .map(|d| d.review_case_id.clone())
            .collect();
        reject_duplicates(&ids)?;

        let svc = &self.services;
        let mut snapshot = svc.begin().await?;
        let result: Result<Outcome<Vec<ReviewCase>>, WorkflowError> = async {
            let rows = svc
                .storage
                .get_review_cases_for_update(&mut snapshot, &ids)
                .await?;
            let scope = assert_single_scope(&rows)?;
            svc.authorize(ctx, &scope.plan_id, Permission::Review)
                .await?;
            let mut review = svc
                .storage
                .get_review_for_update(&mut snapshot, &scope.review_id)
                .await?;
            if !accepts_decisions(review.status) {
                return Err(Violation::NotReviewable {
                    review_id: review.id.clone(),
                    status: review.status,
                }
                .into());
            }

            let case_ids: Vec<String> = rows.iter().map(|r| r.case_id.clone()).collect();
            let cases = svc.storage.get_cases(&mut snapshot, &case_ids).await?;
            let now = stamp::now_rfc3339();

            let mut updated = Vec::with_capacity(rows.len());
            for ((row, decision), case) in rows.into_iter().zip(&decisions).zip(&cases) {
                let (row, _record) =
                    apply_decision(svc, &mut snapshot, ctx, row, decision, case, &now).await?;
                updated.push(row);
            }
            save_review(svc, &mut snapshot, &mut review).await?;

            let plan_name = svc.plan_label(&scope.plan_id).await;
            let activities = updated
                .iter()
                .map(|row| {
                    activity(
                        ctx,
                        &review,
                        row,
                        ActivityKind::CaseReviewed,
                        format!(
                            "case '{}' reviewed as {} in review '{}' of plan '{}'",
                            row.case_name, row.review_status, review.name, plan_name
                        ),
                        &now,
                    )
                })
                .collect();
            Ok(Outcome::with_activities(updated, activities))
        }
        .await;
        let updated = svc.finish(snapshot, result).await?;
        info!(reviewed = updated.len(), "review decisions recorded");
        Ok(updated)
    }

    /// Revert decisions on one review. A completed review goes back to
    /// `Pending`.
    #[instrument(skip_all, fields(count = review_case_ids.len(), mode = ?mode, user = %ctx.user_id))]
    pub async fn review_reset(
        &self,
        ctx: &RequestContext,
        review_case_ids: Vec<String>,
        mode: ResetMode,
    ) -> Result<Vec<ReviewCase>, WorkflowError> {
        reject_duplicates(&review_case_ids)?;

        let svc = &self.services;
        let mut snapshot = svc.begin().await?;
        let result: Result<Outcome<(Vec<ReviewCase>, ReviewStatus)>, WorkflowError> = async {
            let rows = svc
                .storage
                .get_review_cases_for_update(&mut snapshot, &review_case_ids)
                .await?;
            let scope = assert_single_scope(&rows)?;
            svc.authorize(ctx, &scope.plan_id, Permission::ResetReviewResult)
                .await?;
            let mut review = svc
                .storage
                .get_review_for_update(&mut snapshot, &scope.review_id)
                .await?;

            let mut reset = Vec::with_capacity(rows.len());
            for mut row in rows {
                reset_row(&mut row, mode);
                let expected = row.row_version;
                row.row_version = svc
                    .storage
                    .update_review_case(&mut snapshot, &row, expected)
                    .await?;
                svc.storage
                    .mirror_case_review(&mut snapshot, &row.case_id, &mirror_of(&row))
                    .await?;
                reset.push(row);
            }

            if review.status == ReviewStatus::Completed {
                debug!(review_id = %review.id, "completed review reopened");
                review.status = ReviewStatus::Pending;
            }
            save_review(svc, &mut snapshot, &mut review).await?;

            let now = stamp::now_rfc3339();
            let plan_name = svc.plan_label(&scope.plan_id).await;
            let activities = reset
                .iter()
                .map(|row| {
                    activity(
                        ctx,
                        &review,
                        row,
                        ActivityKind::ReviewResultReset,
                        format!(
                            "review result of case '{}' reset to {} in review '{}' of plan '{}'",
                            row.case_name, row.review_status, review.name, plan_name
                        ),
                        &now,
                    )
                })
                .collect();
            Ok(Outcome::with_activities((reset, review.status), activities))
        }
        .await;
        let (reset, status) = svc.finish(snapshot, result).await?;
        info!(reset = reset.len(), review_status = %status, "review results reset");
        Ok(reset)
    }

    /// Detach review-cases from their review, removing their audit records.
    #[instrument(skip_all, fields(count = review_case_ids.len(), user = %ctx.user_id))]
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        review_case_ids: Vec<String>,
    ) -> Result<usize, WorkflowError> {
        reject_duplicates(&review_case_ids)?;

        let svc = &self.services;
        let mut snapshot = svc.begin().await?;
        let result: Result<Outcome<usize>, WorkflowError> = async {
            let rows = svc
                .storage
                .get_review_cases_for_update(&mut snapshot, &review_case_ids)
                .await?;
            let Scope { plan_id, review_id } = assert_single_scope(&rows)?;
            svc.authorize(ctx, &plan_id, Permission::ManageReview)
                .await?;

            let records = svc
                .trail()
                .purge(&mut snapshot, &review_case_ids)
                .await?;
            let removed = svc
                .storage
                .delete_review_cases(&mut snapshot, &review_case_ids)
                .await?;
            debug!(removed, records, "review-case rows removed");

            // Rows can outlive their review when single-review deletes do not cascade.
            let review = match svc
                .storage
                .get_review_for_update(&mut snapshot, &review_id)
                .await
            {
                Ok(mut review) => {
                    save_review(svc, &mut snapshot, &mut review).await?;
                    Some(review)
                }
                Err(StorageError::NotFound { .. }) => None,
                Err(e) => return Err(e.into()),
            };

            let now = stamp::now_rfc3339();
            let plan_name = svc.plan_label(&plan_id).await;
            let review_name = review.as_ref().map(|r| r.name.as_str()).unwrap_or("");
            let activities = rows
                .iter()
                .map(|row| Activity {
                    project_id: review
                        .as_ref()
                        .map(|r| r.project_id.clone())
                        .unwrap_or_else(|| ctx.project_id.clone()),
                    plan_id: row.plan_id.clone(),
                    source_id: row.case_id.clone(),
                    kind: ActivityKind::ReviewCaseDeleted,
                    operator_id: ctx.user_id.clone(),
                    content: format!(
                        "case '{}' removed from review '{}' of plan '{}'",
                        row.case_name, review_name, plan_name
                    ),
                    created_at: now.clone(),
                })
                .collect();
            Ok(Outcome::with_activities(removed, activities))
        }
        .await;
        let removed = svc.finish(snapshot, result).await?;
        info!(removed, "review cases deleted");
        Ok(removed)
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub async fn get(&self, review_case_id: &str) -> Result<ReviewCase, WorkflowError> {
        Ok(self.services.storage.get_review_case(review_case_id).await?)
    }

    /// Review-cases of one review, in attach order.
    pub async fn list(&self, review_id: &str) -> Result<Vec<ReviewCase>, WorkflowError> {
        let storage = &self.services.storage;
        storage.get_review(review_id).await?;
        Ok(storage.list_review_cases(review_id).await?)
    }

    /// Every audit record of one review-case, oldest first.
    pub async fn history(
        &self,
        review_case_id: &str,
    ) -> Result<Vec<ReviewCaseRecord>, WorkflowError> {
        self.services.storage.get_review_case(review_case_id).await?;
        self.services.trail().history(review_case_id).await
    }
}

// ── Fan-out ──────────────────────────────────────────────────────────────────

/// Create one review-case per case under `review`.
pub(crate) async fn attach_cases<S: CasebookStorage>(
    svc: &Services<S>,
    snapshot: &mut S::Snapshot,
    ctx: &RequestContext,
    review: &Review,
    case_ids: &[String],
) -> Result<Vec<ReviewCase>, WorkflowError> {
    reject_duplicates(case_ids)?;
    if review.status == ReviewStatus::Completed {
        return Err(Violation::ReviewCompleted {
            review_id: review.id.clone(),
        }
        .into());
    }
    svc.plans.check_cases(&review.plan_id, case_ids).await?;

    let attached: BTreeSet<String> = svc
        .storage
        .list_review_cases_in(snapshot, &review.id)
        .await?
        .into_iter()
        .map(|rc| rc.case_id)
        .collect();
    if let Some(case_id) = case_ids.iter().find(|id| attached.contains(*id)) {
        return Err(Violation::AlreadyAttached {
            review_id: review.id.clone(),
            case_id: case_id.clone(),
        }
        .into());
    }

    let cases = svc.storage.get_cases(snapshot, case_ids).await?;
    let now = stamp::now_rfc3339();
    let mut rows = Vec::with_capacity(cases.len());
    for case in cases {
        let row = ReviewCase {
            id: stamp::new_id(),
            review_id: review.id.clone(),
            plan_id: review.plan_id.clone(),
            case_id: case.id,
            case_name: case.name,
            case_version: case.version,
            review_status: CaseReviewStatus::Prepare,
            reviewer_id: None,
            review_date: None,
            remark: None,
            reviewed_case_snapshot: None,
            created_by: ctx.user_id.clone(),
            created_at: now.clone(),
            row_version: 0,
        };
        svc.storage.insert_review_case(snapshot, row.clone()).await?;
        rows.push(row);
    }
    Ok(rows)
}

/// Apply one decision: write the review-case under its version, append the
/// audit record and mirror the result onto the case. All three writes land
/// in `snapshot` or none does.
async fn apply_decision<S: CasebookStorage>(
    svc: &Services<S>,
    snapshot: &mut S::Snapshot,
    ctx: &RequestContext,
    mut row: ReviewCase,
    decision: &CaseDecision,
    case: &Case,
    now: &str,
) -> Result<(ReviewCase, ReviewCaseRecord), WorkflowError> {
    row.review_status = decision.decision.status();
    row.reviewer_id = Some(ctx.user_id.clone());
    row.review_date = Some(now.to_string());
    row.remark = decision.remark.clone();
    row.reviewed_case_snapshot = Some(case.content.clone());

    let expected = row.row_version;
    row.row_version = svc
        .storage
        .update_review_case(snapshot, &row, expected)
        .await?;
    let record = svc.trail().append(snapshot, &row).await?;
    svc.storage
        .mirror_case_review(snapshot, &row.case_id, &mirror_of(&row))
        .await?;
    Ok((row, record))
}

fn reset_row(row: &mut ReviewCase, mode: ResetMode) {
    match mode {
        ResetMode::Init => {
            row.review_status = CaseReviewStatus::Prepare;
            row.reviewer_id = None;
            row.reviewed_case_snapshot = None;
        }
        ResetMode::Restart => {
            row.review_status = CaseReviewStatus::Again;
        }
    }
    row.review_date = None;
    row.remark = None;
}

fn mirror_of(row: &ReviewCase) -> CaseReviewMirror {
    CaseReviewMirror {
        review_status: row.review_status,
        reviewer_id: row.reviewer_id.clone(),
        review_date: row.review_date.clone(),
    }
}

fn activity(
    ctx: &RequestContext,
    review: &Review,
    row: &ReviewCase,
    kind: ActivityKind,
    content: String,
    now: &str,
) -> Activity {
    Activity {
        project_id: review.project_id.clone(),
        plan_id: review.plan_id.clone(),
        source_id: row.case_id.clone(),
        kind,
        operator_id: ctx.user_id.clone(),
        content,
        created_at: now.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decided_row() -> ReviewCase {
        ReviewCase {
            id: "rc-1".to_string(),
            review_id: "r-1".to_string(),
            plan_id: "plan-1".to_string(),
            case_id: "case-1".to_string(),
            case_name: "login".to_string(),
            case_version: 2,
            review_status: CaseReviewStatus::UnPass,
            reviewer_id: Some("alice".to_string()),
            review_date: Some("2026-01-01T00:00:00Z".to_string()),
            remark: Some("steps unclear".to_string()),
            reviewed_case_snapshot: Some(serde_json::json!({ "steps": [] })),
            created_by: "bob".to_string(),
            created_at: "2025-12-31T00:00:00Z".to_string(),
            row_version: 3,
        }
    }

    #[test]
    fn init_reset_clears_the_decision() {
        let mut row = decided_row();
        reset_row(&mut row, ResetMode::Init);
        assert_eq!(row.review_status, CaseReviewStatus::Prepare);
        assert_eq!(row.reviewer_id, None);
        assert_eq!(row.review_date, None);
        assert_eq!(row.remark, None);
        assert_eq!(row.reviewed_case_snapshot, None);
        assert_eq!(row.case_version, 2);
    }

    #[test]
    fn restart_reset_keeps_the_reviewer() {
        let mut row = decided_row();
        reset_row(&mut row, ResetMode::Restart);
        assert_eq!(row.review_status, CaseReviewStatus::Again);
        assert_eq!(row.reviewer_id.as_deref(), Some("alice"));
        assert_eq!(row.review_date, None);
        assert_eq!(row.remark, None);
        assert!(row.review_status.is_pending());
    }

    #[test]
    fn reset_flag_selects_mode() {
        assert_eq!(ResetMode::from_flag(true), ResetMode::Init);
        assert_eq!(ResetMode::from_flag(false), ResetMode::Restart);
    }

    #[test]
    fn mirror_copies_review_fields() {
        let row = decided_row();
        let mirror = mirror_of(&row);
        assert_eq!(mirror.review_status, CaseReviewStatus::UnPass);
        assert_eq!(mirror.reviewer_id.as_deref(), Some("alice"));
        assert_eq!(mirror.review_date, row.review_date);
    }

    #[test]
    fn decisions_map_to_case_statuses() {
        assert_eq!(Decision::Pass.status(), CaseReviewStatus::Pass);
        assert_eq!(Decision::UnPass.status(), CaseReviewStatus::UnPass);
        assert_eq!(Decision::Underway.status(), CaseReviewStatus::Underway);
        assert!(Decision::Underway.status().is_pending());
    }
}
