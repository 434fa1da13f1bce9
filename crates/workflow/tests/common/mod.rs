//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use casebook_storage::{Case, CaseReviewStatus, CasebookStorage, MemoryStorage, Review, ReviewCase};
use casebook_workflow::{
    AllowAll, AuthorizationGuard, Engine, MemoryActivityRecorder, NewReview, Permission,
    RequestContext, WorkflowConfig, WorkflowError,
};
use tokio::sync::Notify;

pub const PROJECT: &str = "proj-1";
pub const PLAN: &str = "plan-1";
pub const OTHER_PLAN: &str = "plan-2";

// ──────────────────────────────────────────────
// Harness
// ──────────────────────────────────────────────

pub struct Harness {
    pub engine: Engine<MemoryStorage>,
    pub storage: Arc<MemoryStorage>,
    pub activities: Arc<MemoryActivityRecorder>,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn ctx() -> RequestContext {
    RequestContext::new("alice", PROJECT)
}

pub fn ctx_as(user_id: &str) -> RequestContext {
    RequestContext::new(user_id, PROJECT)
}

pub fn harness() -> Harness {
    harness_with(WorkflowConfig::default(), Arc::new(AllowAll))
}

pub fn harness_with_config(config: WorkflowConfig) -> Harness {
    harness_with(config, Arc::new(AllowAll))
}

pub fn harness_with(config: WorkflowConfig, guard: Arc<dyn AuthorizationGuard>) -> Harness {
    init_tracing();
    let storage = Arc::new(MemoryStorage::new());
    let activities = Arc::new(MemoryActivityRecorder::new());
    let engine = Engine::builder(Arc::clone(&storage))
        .guard(guard)
        .activities(activities.clone())
        .config(config)
        .build();
    Harness {
        engine,
        storage,
        activities,
    }
}

// ──────────────────────────────────────────────
// Seeding
// ──────────────────────────────────────────────

pub fn case(id: &str, plan_id: &str) -> Case {
    Case {
        id: id.to_string(),
        project_id: PROJECT.to_string(),
        plan_id: plan_id.to_string(),
        name: format!("case {id}"),
        content: serde_json::json!({ "title": id, "steps": ["open", "check"] }),
        version: 1,
        review_status: CaseReviewStatus::Prepare,
        reviewer_id: None,
        review_date: None,
    }
}

pub async fn seed_cases(storage: &MemoryStorage, plan_id: &str, ids: &[&str]) {
    let mut snap = storage.begin_snapshot().await.unwrap();
    for id in ids {
        storage.insert_case(&mut snap, case(id, plan_id)).await.unwrap();
    }
    storage.commit_snapshot(snap).await.unwrap();
}

pub fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

pub fn new_review(name: &str, plan_id: &str, case_ids: &[&str]) -> NewReview {
    NewReview {
        plan_id: plan_id.to_string(),
        name: name.to_string(),
        description: Some("pre-release review".to_string()),
        owner_id: "alice".to_string(),
        participant_ids: ids(&["bob", "carol"]),
        case_ids: ids(case_ids),
    }
}

/// Seed `case_ids` on `plan_id`, create a review over them and start it.
/// Review-cases are returned in `case_ids` order.
pub async fn started_review(
    h: &Harness,
    name: &str,
    plan_id: &str,
    case_ids: &[&str],
) -> (Review, Vec<ReviewCase>) {
    seed_cases(&h.storage, plan_id, case_ids).await;
    let review = h
        .engine
        .reviews()
        .create(&ctx(), new_review(name, plan_id, case_ids))
        .await
        .unwrap();
    let review = h.engine.reviews().start(&ctx(), &review.id).await.unwrap();
    let rows = review_cases_in_order(h, &review.id, case_ids).await;
    (review, rows)
}

pub async fn review_cases_in_order(h: &Harness, review_id: &str, case_ids: &[&str]) -> Vec<ReviewCase> {
    let listed = h.engine.review_cases().list(review_id).await.unwrap();
    case_ids
        .iter()
        .map(|case_id| {
            listed
                .iter()
                .find(|rc| rc.case_id == *case_id)
                .cloned()
                .unwrap()
        })
        .collect()
}

// ──────────────────────────────────────────────
// Guards
// ──────────────────────────────────────────────

/// Denies one permission on one plan, grants everything else.
pub struct DenyOn {
    pub plan_id: String,
    pub permission: Permission,
}

impl DenyOn {
    pub fn new(plan_id: &str, permission: Permission) -> Arc<Self> {
        Arc::new(Self {
            plan_id: plan_id.to_string(),
            permission,
        })
    }
}

#[async_trait]
impl AuthorizationGuard for DenyOn {
    async fn check(
        &self,
        _ctx: &RequestContext,
        plan_id: &str,
        permission: Permission,
    ) -> Result<(), WorkflowError> {
        if plan_id == self.plan_id && permission == self.permission {
            return Err(WorkflowError::PermissionDenied {
                permission,
                plan_id: plan_id.to_string(),
            });
        }
        Ok(())
    }

    async fn display_name(&self, object_id: &str) -> Result<String, WorkflowError> {
        Ok(format!("Plan {object_id}"))
    }
}

/// Grants everything but cannot resolve display names.
pub struct NamelessPlans;

#[async_trait]
impl AuthorizationGuard for NamelessPlans {
    async fn check(
        &self,
        _ctx: &RequestContext,
        _plan_id: &str,
        _permission: Permission,
    ) -> Result<(), WorkflowError> {
        Ok(())
    }

    async fn display_name(&self, _object_id: &str) -> Result<String, WorkflowError> {
        Err(WorkflowError::Collaborator("plan directory offline".to_string()))
    }
}

/// Grants everything, but parks the first check made by `user_id` until the
/// test calls [`Gate::release`]. The parked operation has already read its
/// rows, so whatever the test commits meanwhile lands underneath it.
pub struct Gate {
    user_id: String,
    parked: AtomicBool,
    entered: Notify,
    released: Notify,
}

impl Gate {
    pub fn new(user_id: &str) -> Arc<Self> {
        Arc::new(Self {
            user_id: user_id.to_string(),
            parked: AtomicBool::new(false),
            entered: Notify::new(),
            released: Notify::new(),
        })
    }

    /// Resolves once the gated user's operation is parked.
    pub async fn parked(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

#[async_trait]
impl AuthorizationGuard for Gate {
    async fn check(
        &self,
        ctx: &RequestContext,
        _plan_id: &str,
        _permission: Permission,
    ) -> Result<(), WorkflowError> {
        if ctx.user_id == self.user_id && !self.parked.swap(true, Ordering::SeqCst) {
            self.entered.notify_one();
            self.released.notified().await;
        }
        Ok(())
    }

    async fn display_name(&self, object_id: &str) -> Result<String, WorkflowError> {
        Ok(format!("Plan {object_id}"))
    }
}
