//! Collaborators the engine consumes but never implements policy for.
//!
//! - [`AuthorizationGuard`]: per-plan permission checks, raises on denial
//! - [`PlanConsistencyChecker`]: case/plan membership and plan settings
//! - [`ActivityRecorder`]: fire-and-forget audit-log sink
//! - [`UserDirectory`]: owner/participant resolution
//!
//! Bundled implementations cover embedding and tests: [`AllowAll`],
//! [`StaticUsers`], [`StoragePlanChecker`], [`MemoryActivityRecorder`] and
//! [`TracingActivityRecorder`].

mod activity;
mod allow_all;
mod plan_checker;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::error::WorkflowError;

pub use activity::{Activity, ActivityKind, MemoryActivityRecorder, TracingActivityRecorder};
pub use allow_all::{AllowAll, StaticUsers};
pub use plan_checker::StoragePlanChecker;

// ──────────────────────────────────────────────
// Permissions
// ──────────────────────────────────────────────

/// Plan-scoped permissions the engine asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Create, edit, establish and delete baselines.
    EstablishBaseline,
    /// Create, start, end, block, clone and delete reviews; attach and detach cases.
    ManageReview,
    /// Submit review decisions.
    Review,
    /// Undo review decisions.
    ResetReviewResult,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::EstablishBaseline => "establish_baseline",
            Permission::ManageReview => "manage_review",
            Permission::Review => "review",
            Permission::ResetReviewResult => "reset_review_result",
        };
        f.write_str(name)
    }
}

// ──────────────────────────────────────────────
// Traits
// ──────────────────────────────────────────────

/// Permission evaluation, delegated entirely to the host.
#[async_trait]
pub trait AuthorizationGuard: Send + Sync {
    /// Return `Err(WorkflowError::PermissionDenied { .. })` if `ctx` may not
    /// exercise `permission` on `plan_id`.
    async fn check(
        &self,
        ctx: &RequestContext,
        plan_id: &str,
        permission: Permission,
    ) -> Result<(), WorkflowError>;

    /// Human-readable name of an authorization object (a plan), used only in
    /// activity messages. The object may have been deleted legitimately.
    async fn display_name(&self, object_id: &str) -> Result<String, WorkflowError>;
}

/// Plan-level facts the engine does not own.
#[async_trait]
pub trait PlanConsistencyChecker: Send + Sync {
    /// Fail with `Violation::CasesOutsidePlan` unless every case belongs to `plan_id`.
    async fn check_cases(&self, plan_id: &str, case_ids: &[String]) -> Result<(), WorkflowError>;

    /// Whether reviews may be created on `plan_id`.
    async fn review_enabled(&self, plan_id: &str) -> Result<bool, WorkflowError>;
}

/// Audit-log sink. Whether its failure rolls back the business change is
/// decided by [`ActivityFailurePolicy`](crate::config::ActivityFailurePolicy).
#[async_trait]
pub trait ActivityRecorder: Send + Sync {
    async fn add(&self, activity: Activity) -> Result<(), ActivityError>;

    async fn add_all(&self, activities: Vec<Activity>) -> Result<(), ActivityError> {
        for activity in activities {
            self.add(activity).await?;
        }
        Ok(())
    }
}

/// Owner/participant existence checks.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// The subset of `user_ids` that does not resolve to a user.
    async fn missing_users(&self, user_ids: &[String]) -> Result<Vec<String>, WorkflowError>;
}

/// Failure reported by an [`ActivityRecorder`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("activity sink error: {0}")]
pub struct ActivityError(pub String);
