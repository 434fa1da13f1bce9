use std::fmt;

use casebook_storage::{table, ReviewStatus, StorageError};

use crate::collab::Permission;

/// The kind of row an id failed to resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Baseline,
    BaselineCaseSnapshot,
    Case,
    Review,
    ReviewCase,
    ReviewCaseRecord,
}

impl EntityKind {
    fn from_table(name: &str) -> Option<Self> {
        match name {
            table::BASELINE => Some(EntityKind::Baseline),
            table::BASELINE_CASE_SNAPSHOT => Some(EntityKind::BaselineCaseSnapshot),
            table::CASE => Some(EntityKind::Case),
            table::REVIEW => Some(EntityKind::Review),
            table::REVIEW_CASE => Some(EntityKind::ReviewCase),
            table::REVIEW_CASE_RECORD => Some(EntityKind::ReviewCaseRecord),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Baseline => "baseline",
            EntityKind::BaselineCaseSnapshot => "baseline case snapshot",
            EntityKind::Case => "case",
            EntityKind::Review => "review",
            EntityKind::ReviewCase => "review case",
            EntityKind::ReviewCaseRecord => "review case record",
        };
        f.write_str(name)
    }
}

/// A business precondition that was not met. Raised before any mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("baseline {baseline_id} is already established")]
    BaselineEstablished { baseline_id: String },

    #[error("baseline {baseline_id} has no cases to establish")]
    EmptyBaseline { baseline_id: String },

    #[error("review {review_id} still has {pending} pending case(s)")]
    PendingCases { review_id: String, pending: usize },

    #[error("cannot {action} review {review_id} while it is {status}")]
    IllegalTransition {
        review_id: String,
        status: ReviewStatus,
        action: &'static str,
    },

    #[error("review {review_id} is {status}; decisions need a started, unfinished review")]
    NotReviewable {
        review_id: String,
        status: ReviewStatus,
    },

    #[error("review {review_id} is completed and accepts no new cases")]
    ReviewCompleted { review_id: String },

    #[error("batch spans more than one plan: {plan_ids:?}")]
    MixedPlans { plan_ids: Vec<String> },

    #[error("batch spans more than one review: {review_ids:?}")]
    MixedReviews { review_ids: Vec<String> },

    #[error("batch is empty")]
    EmptyBatch,

    #[error("{id} appears more than once in the batch")]
    DuplicateTarget { id: String },

    #[error("cases do not belong to plan {plan_id}: {case_ids:?}")]
    CasesOutsidePlan {
        plan_id: String,
        case_ids: Vec<String>,
    },

    #[error("case {case_id} is already attached to review {review_id}")]
    AlreadyAttached { review_id: String, case_id: String },

    #[error("review is not enabled on plan {plan_id}")]
    ReviewDisabled { plan_id: String },

    #[error("users do not exist: {user_ids:?}")]
    UnknownUsers { user_ids: Vec<String> },

    #[error("name must be between 1 and {max} characters")]
    InvalidName { max: usize },
}

/// Errors surfaced by every engine operation.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("precondition violated: {0}")]
    Precondition(#[from] Violation),

    #[error("permission {permission} denied on plan {plan_id}")]
    PermissionDenied {
        permission: Permission,
        plan_id: String,
    },

    #[error("a review named '{name}' already exists in project {project_id}")]
    NameConflict { project_id: String, name: String },

    /// Only raised under the `fail` activity policy.
    #[error("activity recording failed: {0}")]
    Activity(String),

    /// A collaborator could not answer (as opposed to answering "no").
    #[error("collaborator unavailable: {0}")]
    Collaborator(String),

    #[error(transparent)]
    Storage(StorageError),
}

impl WorkflowError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        WorkflowError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the loser of an optimistic-concurrency race produced this error.
    pub fn is_conflict(&self) -> bool {
        matches!(self, WorkflowError::Storage(e) if e.is_conflict())
    }

    /// The violation, if this is a precondition failure.
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            WorkflowError::Precondition(v) => Some(v),
            _ => None,
        }
    }
}

impl From<StorageError> for WorkflowError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { table, id } => match EntityKind::from_table(table) {
                Some(kind) => WorkflowError::NotFound { kind, id },
                None => WorkflowError::Storage(StorageError::NotFound { table, id }),
            },
            StorageError::NameTaken {
                project_id, name, ..
            } => WorkflowError::NameConflict { project_id, name },
            other => WorkflowError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_not_found_maps_to_entity_kind() {
        let err: WorkflowError = StorageError::NotFound {
            table: table::REVIEW_CASE,
            id: "rc-1".to_string(),
        }
        .into();
        match err {
            WorkflowError::NotFound { kind, id } => {
                assert_eq!(kind, EntityKind::ReviewCase);
                assert_eq!(id, "rc-1");
            }
            other => panic!("expected NotFound, got {other}"),
        }
    }

    #[test]
    fn conflicts_stay_storage_errors() {
        let err: WorkflowError = StorageError::ConcurrentConflict {
            table: table::BASELINE,
            id: "b-1".to_string(),
            expected_version: 2,
        }
        .into();
        assert!(err.is_conflict());
        assert!(err.violation().is_none());
    }

    #[test]
    fn name_taken_at_commit_is_a_name_conflict() {
        let err: WorkflowError = StorageError::NameTaken {
            table: table::REVIEW,
            project_id: "proj-1".to_string(),
            name: "Sprint".to_string(),
        }
        .into();
        match err {
            WorkflowError::NameConflict { project_id, name } => {
                assert_eq!(project_id, "proj-1");
                assert_eq!(name, "Sprint");
            }
            other => panic!("expected NameConflict, got {other}"),
        }
    }

    #[test]
    fn violation_messages_name_the_subject() {
        let err = WorkflowError::from(Violation::PendingCases {
            review_id: "r-1".to_string(),
            pending: 2,
        });
        assert_eq!(
            err.to_string(),
            "precondition violated: review r-1 still has 2 pending case(s)"
        );
    }
}
