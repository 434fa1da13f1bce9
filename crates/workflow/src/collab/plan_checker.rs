use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use casebook_storage::{CasebookStorage, StorageError};
use tracing::debug;

use super::PlanConsistencyChecker;
use crate::error::{Violation, WorkflowError};

/// Checks plan membership against the `plan_id` stored on each case.
///
/// Reviews are enabled on every plan unless disabled with
/// [`disable_review`](Self::disable_review).
pub struct StoragePlanChecker<S> {
    storage: Arc<S>,
    review_disabled: BTreeSet<String>,
}

impl<S: CasebookStorage> StoragePlanChecker<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            review_disabled: BTreeSet::new(),
        }
    }

    pub fn disable_review(mut self, plan_id: impl Into<String>) -> Self {
        self.review_disabled.insert(plan_id.into());
        self
    }
}

#[async_trait]
impl<S: CasebookStorage> PlanConsistencyChecker for StoragePlanChecker<S> {
    async fn check_cases(&self, plan_id: &str, case_ids: &[String]) -> Result<(), WorkflowError> {
        let mut outside = Vec::new();
        for case_id in case_ids {
            match self.storage.get_case(case_id).await {
                Ok(case) if case.plan_id == plan_id => {}
                Ok(_) | Err(StorageError::NotFound { .. }) => outside.push(case_id.clone()),
                Err(e) => return Err(WorkflowError::Collaborator(e.to_string())),
            }
        }
        if outside.is_empty() {
            return Ok(());
        }
        debug!(plan_id, ?outside, "cases rejected by plan check");
        Err(Violation::CasesOutsidePlan {
            plan_id: plan_id.to_string(),
            case_ids: outside,
        }
        .into())
    }

    async fn review_enabled(&self, plan_id: &str) -> Result<bool, WorkflowError> {
        Ok(!self.review_disabled.contains(plan_id))
    }
}
