//! The review lifecycle state machine.
//!
//! ```text
//!   PENDING ──start──▶ IN_PROGRESS ──end──▶ COMPLETED
//!                        │    ▲                 │
//!                      block  │ end        reset (ledger)
//!                        ▼    │                 │
//!                       BLOCKED ◀──block        ▼
//!                                            PENDING
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use casebook_storage::{CasebookStorage, Review, ReviewStatus};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, instrument};

use crate::collab::Permission;
use crate::config::MAX_CLONE_ATTEMPTS;
use crate::context::RequestContext;
use crate::engine::Services;
use crate::error::{Violation, WorkflowError};
use crate::ledger;
use crate::stamp;
use crate::tx::Outcome;

// ── Transition table ─────────────────────────────────────────────────────────

/// A lifecycle action requested on a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Start,
    End,
    Block,
}

impl ReviewAction {
    pub fn verb(&self) -> &'static str {
        match self {
            ReviewAction::Start => "start",
            ReviewAction::End => "end",
            ReviewAction::Block => "block",
        }
    }
}

/// The status `action` leads to from `current`, or `None` if the
/// transition is illegal. `End` additionally requires zero pending cases,
/// which is checked by the caller.
pub fn next_status(current: ReviewStatus, action: ReviewAction) -> Option<ReviewStatus> {
    use ReviewStatus::*;
    match (current, action) {
        (Pending, ReviewAction::Start) => Some(InProgress),
        (InProgress | Blocked, ReviewAction::End) => Some(Completed),
        (InProgress | Blocked, ReviewAction::Block) => Some(Blocked),
        _ => None,
    }
}

/// Whether review-cases of a review in `status` accept decisions.
pub fn accepts_decisions(status: ReviewStatus) -> bool {
    matches!(status, ReviewStatus::InProgress | ReviewStatus::Blocked)
}

// ── Requests ─────────────────────────────────────────────────────────────────

/// Input of [`ReviewWorkflow::create`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewReview {
    pub plan_id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub participant_ids: Vec<String>,
    /// Cases attached in the same snapshot as the review row.
    pub case_ids: Vec<String>,
}

/// Input of [`ReviewWorkflow::update`]. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewUpdate {
    pub name: Option<String>,
    /// `Some(None)` clears the description. In JSON an explicit `null`
    /// clears it and an absent key leaves it alone.
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    pub owner_id: Option<String>,
    pub participant_ids: Option<Vec<String>>,
}

/// Any present value, `null` included, becomes `Some`.
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Row counts removed by a review delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Removal {
    pub reviews: usize,
    pub review_cases: usize,
    pub records: usize,
}

// ── Workflow ─────────────────────────────────────────────────────────────────

pub struct ReviewWorkflow<S> {
    services: Arc<Services<S>>,
}

impl<S: CasebookStorage> ReviewWorkflow<S> {
    pub(crate) fn new(services: Arc<Services<S>>) -> Self {
        Self { services }
    }

    /// Create a review in `Pending`, optionally attaching cases.
    #[instrument(skip_all, fields(plan_id = %request.plan_id, user = %ctx.user_id))]
    pub async fn create(
        &self,
        ctx: &RequestContext,
        request: NewReview,
    ) -> Result<Review, WorkflowError> {
        let svc = &self.services;
        svc.authorize(ctx, &request.plan_id, Permission::ManageReview)
            .await?;
        if !svc.plans.review_enabled(&request.plan_id).await? {
            return Err(Violation::ReviewDisabled {
                plan_id: request.plan_id,
            }
            .into());
        }
        let name = svc.checked_name(&request.name)?;
        ensure_users_exist(svc, &request.owner_id, &request.participant_ids).await?;

        let now = stamp::now_rfc3339();
        let review = Review {
            id: stamp::new_id(),
            project_id: ctx.project_id.clone(),
            plan_id: request.plan_id,
            name,
            description: request.description,
            owner_id: request.owner_id,
            participant_ids: dedup(request.participant_ids),
            status: ReviewStatus::Pending,
            created_by: ctx.user_id.clone(),
            created_at: now.clone(),
            updated_at: now,
            row_version: 0,
        };
        let case_ids = request.case_ids;

        let mut snapshot = svc.begin().await?;
        let result: Result<Outcome<Review>, WorkflowError> = async {
            ensure_name_free(svc, &mut snapshot, &review.project_id, &review.name, None).await?;
            svc.storage
                .insert_review(&mut snapshot, review.clone())
                .await?;
            if !case_ids.is_empty() {
                ledger::attach_cases(svc, &mut snapshot, ctx, &review, &case_ids).await?;
            }
            Ok(Outcome::quiet(review))
        }
        .await;
        let review = svc.finish(snapshot, result).await?;
        info!(review_id = %review.id, cases = case_ids.len(), "review created");
        Ok(review)
    }

    /// Change name, description, owner or participants.
    #[instrument(skip_all, fields(review_id = %review_id, user = %ctx.user_id))]
    pub async fn update(
        &self,
        ctx: &RequestContext,
        review_id: &str,
        changes: ReviewUpdate,
    ) -> Result<Review, WorkflowError> {
        let svc = &self.services;
        let mut snapshot = svc.begin().await?;
        let result: Result<Outcome<Review>, WorkflowError> = async {
            let mut review = svc
                .storage
                .get_review_for_update(&mut snapshot, review_id)
                .await?;
            svc.authorize(ctx, &review.plan_id, Permission::ManageReview)
                .await?;

            if let Some(name) = &changes.name {
                let name = svc.checked_name(name)?;
                if name != review.name {
                    ensure_name_free(svc, &mut snapshot, &review.project_id, &name, Some(&review.id))
                        .await?;
                    review.name = name;
                }
            }
            if changes.owner_id.is_some() || changes.participant_ids.is_some() {
                let owner = changes.owner_id.as_deref().unwrap_or(&review.owner_id);
                let participants = changes
                    .participant_ids
                    .as_deref()
                    .unwrap_or(&review.participant_ids);
                ensure_users_exist(svc, owner, participants).await?;
            }
            if let Some(owner_id) = changes.owner_id {
                review.owner_id = owner_id;
            }
            if let Some(participant_ids) = changes.participant_ids {
                review.participant_ids = dedup(participant_ids);
            }
            if let Some(description) = changes.description {
                review.description = description;
            }

            save_review(svc, &mut snapshot, &mut review).await?;
            Ok(Outcome::quiet(review))
        }
        .await;
        let review = svc.finish(snapshot, result).await?;
        info!(review_id, "review updated");
        Ok(review)
    }

    /// `Pending` → `InProgress`.
    #[instrument(skip_all, fields(review_id = %review_id, user = %ctx.user_id))]
    pub async fn start(&self, ctx: &RequestContext, review_id: &str) -> Result<Review, WorkflowError> {
        self.transition(ctx, review_id, ReviewAction::Start).await
    }

    /// `InProgress` or `Blocked` → `Completed`, once no review-case is pending.
    #[instrument(skip_all, fields(review_id = %review_id, user = %ctx.user_id))]
    pub async fn end(&self, ctx: &RequestContext, review_id: &str) -> Result<Review, WorkflowError> {
        self.transition(ctx, review_id, ReviewAction::End).await
    }

    /// `InProgress` or `Blocked` → `Blocked`.
    #[instrument(skip_all, fields(review_id = %review_id, user = %ctx.user_id))]
    pub async fn block(&self, ctx: &RequestContext, review_id: &str) -> Result<Review, WorkflowError> {
        self.transition(ctx, review_id, ReviewAction::Block).await
    }

    async fn transition(
        &self,
        ctx: &RequestContext,
        review_id: &str,
        action: ReviewAction,
    ) -> Result<Review, WorkflowError> {
        let svc = &self.services;
        let mut snapshot = svc.begin().await?;
        let result: Result<Outcome<Review>, WorkflowError> = async {
            let mut review = svc
                .storage
                .get_review_for_update(&mut snapshot, review_id)
                .await?;
            svc.authorize(ctx, &review.plan_id, Permission::ManageReview)
                .await?;
            let next = next_status(review.status, action).ok_or_else(|| {
                Violation::IllegalTransition {
                    review_id: review.id.clone(),
                    status: review.status,
                    action: action.verb(),
                }
            })?;

            if action == ReviewAction::End {
                let pending = svc
                    .storage
                    .list_review_cases_in(&mut snapshot, &review.id)
                    .await?
                    .iter()
                    .filter(|rc| rc.review_status.is_pending())
                    .count();
                if pending > 0 {
                    debug!(review_id, pending, "end refused");
                    return Err(Violation::PendingCases {
                        review_id: review.id.clone(),
                        pending,
                    }
                    .into());
                }
            }

            review.status = next;
            save_review(svc, &mut snapshot, &mut review).await?;
            Ok(Outcome::quiet(review))
        }
        .await;
        let review = svc.finish(snapshot, result).await?;
        info!(review_id, action = action.verb(), status = %review.status, "review transitioned");
        Ok(review)
    }

    /// Copy a review's static fields under a new, unused name. Cases and
    /// decisions are not copied; the clone starts `Pending`.
    #[instrument(skip_all, fields(review_id = %review_id, user = %ctx.user_id))]
    pub async fn clone_review(
        &self,
        ctx: &RequestContext,
        review_id: &str,
    ) -> Result<Review, WorkflowError> {
        let svc = &self.services;
        let mut snapshot = svc.begin().await?;
        let result: Result<Outcome<Review>, WorkflowError> = async {
            let source = svc
                .storage
                .get_review_for_update(&mut snapshot, review_id)
                .await?;
            svc.authorize(ctx, &source.plan_id, Permission::ManageReview)
                .await?;

            let name = free_clone_name(svc, &mut snapshot, &source).await?;
            let now = stamp::now_rfc3339();
            let clone = Review {
                id: stamp::new_id(),
                project_id: source.project_id.clone(),
                plan_id: source.plan_id.clone(),
                name,
                description: source.description.clone(),
                owner_id: source.owner_id.clone(),
                participant_ids: source.participant_ids.clone(),
                status: ReviewStatus::Pending,
                created_by: ctx.user_id.clone(),
                created_at: now.clone(),
                updated_at: now,
                row_version: 0,
            };
            svc.storage
                .insert_review(&mut snapshot, clone.clone())
                .await?;
            Ok(Outcome::quiet(clone))
        }
        .await;
        let clone = svc.finish(snapshot, result).await?;
        info!(review_id, clone_id = %clone.id, name = %clone.name, "review cloned");
        Ok(clone)
    }

    /// Delete one review row. Its review-cases and their records are only
    /// removed when `cascade_single_review_delete` is set.
    #[instrument(skip_all, fields(review_id = %review_id, user = %ctx.user_id))]
    pub async fn delete(&self, ctx: &RequestContext, review_id: &str) -> Result<Removal, WorkflowError> {
        let svc = &self.services;
        let cascade = svc.config.cascade_single_review_delete;
        let mut snapshot = svc.begin().await?;
        let result: Result<Outcome<Removal>, WorkflowError> = async {
            let review = svc
                .storage
                .get_review_for_update(&mut snapshot, review_id)
                .await?;
            svc.authorize(ctx, &review.plan_id, Permission::ManageReview)
                .await?;
            let review_ids = vec![review.id];
            let mut removal = Removal::default();
            if cascade {
                let rc_ids = svc
                    .storage
                    .list_review_case_ids_by_reviews(&mut snapshot, &review_ids)
                    .await?;
                remove_review_cases(svc, &mut snapshot, &rc_ids, &mut removal).await?;
            }
            removal.reviews = svc
                .storage
                .delete_reviews(&mut snapshot, &review_ids)
                .await?;
            Ok(Outcome::quiet(removal))
        }
        .await;
        let removal = svc.finish(snapshot, result).await?;
        info!(review_id, cascade, review_cases = removal.review_cases, "review deleted");
        Ok(removal)
    }

    /// Delete every review of a plan together with their review-cases and
    /// records.
    #[instrument(skip_all, fields(plan_id = %plan_id, user = %ctx.user_id))]
    pub async fn delete_by_plan(
        &self,
        ctx: &RequestContext,
        plan_id: &str,
    ) -> Result<Removal, WorkflowError> {
        let svc = &self.services;
        svc.authorize(ctx, plan_id, Permission::ManageReview).await?;
        let mut snapshot = svc.begin().await?;
        let result: Result<Outcome<Removal>, WorkflowError> = async {
            let review_ids = svc
                .storage
                .list_review_ids_by_plan(&mut snapshot, plan_id)
                .await?;
            let mut removal = Removal::default();
            if review_ids.is_empty() {
                return Ok(Outcome::quiet(removal));
            }
            let rc_ids = svc
                .storage
                .list_review_case_ids_by_reviews(&mut snapshot, &review_ids)
                .await?;
            remove_review_cases(svc, &mut snapshot, &rc_ids, &mut removal).await?;
            removal.reviews = svc
                .storage
                .delete_reviews(&mut snapshot, &review_ids)
                .await?;
            Ok(Outcome::quiet(removal))
        }
        .await;
        let removal = svc.finish(snapshot, result).await?;
        info!(plan_id, reviews = removal.reviews, "plan reviews deleted");
        Ok(removal)
    }

    /// Detach a case from every review it is part of. Reviews stay.
    ///
    /// Permission is checked on the plans the review-cases belong to, so
    /// rows left behind by a case the host already deleted can be removed.
    #[instrument(skip_all, fields(case_id = %case_id, user = %ctx.user_id))]
    pub async fn delete_by_case(
        &self,
        ctx: &RequestContext,
        case_id: &str,
    ) -> Result<Removal, WorkflowError> {
        let svc = &self.services;
        let mut snapshot = svc.begin().await?;
        let result: Result<Outcome<Removal>, WorkflowError> = async {
            let rc_ids = svc
                .storage
                .list_review_case_ids_by_case(&mut snapshot, case_id)
                .await?;
            let rows = svc
                .storage
                .get_review_cases_for_update(&mut snapshot, &rc_ids)
                .await?;
            let plan_ids: BTreeSet<&str> = rows.iter().map(|row| row.plan_id.as_str()).collect();
            for plan_id in plan_ids {
                svc.authorize(ctx, plan_id, Permission::ManageReview).await?;
            }
            let mut removal = Removal::default();
            remove_review_cases(svc, &mut snapshot, &rc_ids, &mut removal).await?;
            Ok(Outcome::quiet(removal))
        }
        .await;
        let removal = svc.finish(snapshot, result).await?;
        info!(case_id, review_cases = removal.review_cases, "case detached from reviews");
        Ok(removal)
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub async fn get(&self, review_id: &str) -> Result<Review, WorkflowError> {
        Ok(self.services.storage.get_review(review_id).await?)
    }

    pub async fn list_by_plan(&self, plan_id: &str) -> Result<Vec<Review>, WorkflowError> {
        Ok(self.services.storage.list_reviews(plan_id).await?)
    }

    /// Number of review-cases under `review_id` that still block `end`.
    pub async fn pending_count(&self, review_id: &str) -> Result<usize, WorkflowError> {
        let storage = &self.services.storage;
        storage.get_review(review_id).await?;
        Ok(storage
            .list_review_cases(review_id)
            .await?
            .iter()
            .filter(|rc| rc.review_status.is_pending())
            .count())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Stamp `updated_at` and write the review under its current version.
pub(crate) async fn save_review<S: CasebookStorage>(
    svc: &Services<S>,
    snapshot: &mut S::Snapshot,
    review: &mut Review,
) -> Result<(), WorkflowError> {
    review.updated_at = stamp::now_rfc3339();
    let expected = review.row_version;
    review.row_version = svc
        .storage
        .update_review(snapshot, review, expected)
        .await?;
    Ok(())
}

async fn remove_review_cases<S: CasebookStorage>(
    svc: &Services<S>,
    snapshot: &mut S::Snapshot,
    rc_ids: &[String],
    removal: &mut Removal,
) -> Result<(), WorkflowError> {
    if rc_ids.is_empty() {
        return Ok(());
    }
    removal.records += svc.trail().purge(snapshot, rc_ids).await?;
    removal.review_cases += svc.storage.delete_review_cases(snapshot, rc_ids).await?;
    Ok(())
}

async fn ensure_users_exist<S: CasebookStorage>(
    svc: &Services<S>,
    owner_id: &str,
    participant_ids: &[String],
) -> Result<(), WorkflowError> {
    let mut users: Vec<String> = vec![owner_id.to_string()];
    users.extend(participant_ids.iter().cloned());
    let users = dedup(users);
    let missing = svc.users.missing_users(&users).await?;
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Violation::UnknownUsers { user_ids: missing }.into())
    }
}

async fn ensure_name_free<S: CasebookStorage>(
    svc: &Services<S>,
    snapshot: &mut S::Snapshot,
    project_id: &str,
    name: &str,
    except_id: Option<&str>,
) -> Result<(), WorkflowError> {
    match svc
        .storage
        .find_review_by_name(snapshot, project_id, name)
        .await?
    {
        Some(existing) if Some(existing.id.as_str()) != except_id => {
            Err(WorkflowError::NameConflict {
                project_id: project_id.to_string(),
                name: name.to_string(),
            })
        }
        _ => Ok(()),
    }
}

async fn free_clone_name<S: CasebookStorage>(
    svc: &Services<S>,
    snapshot: &mut S::Snapshot,
    source: &Review,
) -> Result<String, WorkflowError> {
    let suffix = &svc.config.clone_suffix;
    let max = svc.config.max_name_length;
    let mut candidate = String::new();
    for attempt in 1..=MAX_CLONE_ATTEMPTS {
        candidate = clone_name(&source.name, suffix, attempt, max);
        let taken = svc
            .storage
            .find_review_by_name(snapshot, &source.project_id, &candidate)
            .await?
            .is_some();
        if !taken {
            return Ok(candidate);
        }
    }
    Err(WorkflowError::NameConflict {
        project_id: source.project_id.clone(),
        name: candidate,
    })
}

/// `<name><suffix>` on the first attempt, `<name><suffix>_<n>` after that.
/// The base name is shortened so the result fits in `max` characters.
pub(crate) fn clone_name(name: &str, suffix: &str, attempt: u32, max: usize) -> String {
    let tail = if attempt <= 1 {
        suffix.to_string()
    } else {
        format!("{suffix}_{attempt}")
    };
    let keep = max.saturating_sub(tail.chars().count());
    let candidate: String = name.chars().take(keep).chain(tail.chars()).collect();
    candidate.chars().take(max).collect()
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use casebook_storage::ReviewStatus::*;

    #[test]
    fn start_only_from_pending() {
        assert_eq!(next_status(Pending, ReviewAction::Start), Some(InProgress));
        for status in [InProgress, Completed, Blocked] {
            assert_eq!(next_status(status, ReviewAction::Start), None);
        }
    }

    #[test]
    fn end_and_block_share_source_states() {
        for status in [InProgress, Blocked] {
            assert_eq!(next_status(status, ReviewAction::End), Some(Completed));
            assert_eq!(next_status(status, ReviewAction::Block), Some(Blocked));
        }
        for status in [Pending, Completed] {
            assert_eq!(next_status(status, ReviewAction::End), None);
            assert_eq!(next_status(status, ReviewAction::Block), None);
        }
    }

    #[test]
    fn decisions_need_a_running_review() {
        assert!(accepts_decisions(InProgress));
        assert!(accepts_decisions(Blocked));
        assert!(!accepts_decisions(Pending));
        assert!(!accepts_decisions(Completed));
    }

    #[test]
    fn clone_names_count_up() {
        assert_eq!(clone_name("Sprint", "_COPY", 1, 255), "Sprint_COPY");
        assert_eq!(clone_name("Sprint", "_COPY", 2, 255), "Sprint_COPY_2");
        assert_eq!(clone_name("Sprint", "_COPY", 17, 255), "Sprint_COPY_17");
    }

    #[test]
    fn clone_names_fit_the_limit() {
        let long = "x".repeat(20);
        let name = clone_name(&long, "_COPY", 3, 12);
        assert_eq!(name.chars().count(), 12);
        assert!(name.ends_with("_COPY_3"));
        assert_ne!(clone_name(&long, "_COPY", 2, 12), name);
    }

    #[test]
    fn clone_names_count_characters_not_bytes() {
        let name = clone_name("评审评审评审", "_C", 1, 5);
        assert_eq!(name, "评审评_C");
    }

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let ids = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(dedup(ids), vec!["b".to_string(), "a".to_string()]);
    }
}
