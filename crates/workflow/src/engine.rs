use std::sync::Arc;

use casebook_storage::CasebookStorage;
use tracing::warn;

use crate::baseline::BaselineStore;
use crate::collab::{
    ActivityRecorder, AllowAll, AuthorizationGuard, Permission, PlanConsistencyChecker,
    StoragePlanChecker, TracingActivityRecorder, UserDirectory,
};
use crate::config::WorkflowConfig;
use crate::context::RequestContext;
use crate::error::{Violation, WorkflowError};
use crate::ledger::ReviewCaseLedger;
use crate::review::ReviewWorkflow;
use crate::trail::ReviewCaseTrail;

/// Everything an operation needs: the storage backend, the collaborators
/// and the configuration. Shared by every component handle.
pub(crate) struct Services<S> {
    pub(crate) storage: Arc<S>,
    pub(crate) guard: Arc<dyn AuthorizationGuard>,
    pub(crate) plans: Arc<dyn PlanConsistencyChecker>,
    pub(crate) activities: Arc<dyn ActivityRecorder>,
    pub(crate) users: Arc<dyn UserDirectory>,
    pub(crate) config: WorkflowConfig,
}

impl<S: CasebookStorage> Services<S> {
    pub(crate) async fn authorize(
        &self,
        ctx: &RequestContext,
        plan_id: &str,
        permission: Permission,
    ) -> Result<(), WorkflowError> {
        self.guard.check(ctx, plan_id, permission).await
    }

    /// Display name of a plan for activity messages. A failed lookup yields
    /// an empty name: the plan may have been deleted in the meantime.
    pub(crate) async fn plan_label(&self, plan_id: &str) -> String {
        match self.guard.display_name(plan_id).await {
            Ok(name) => name,
            Err(e) => {
                warn!(plan_id, error = %e, "display name lookup failed, using empty name");
                String::new()
            }
        }
    }

    /// Trimmed name, or `InvalidName` if it is empty or too long.
    pub(crate) fn checked_name(&self, name: &str) -> Result<String, WorkflowError> {
        let trimmed = name.trim();
        let max = self.config.max_name_length;
        if trimmed.is_empty() || trimmed.chars().count() > max {
            return Err(Violation::InvalidName { max }.into());
        }
        Ok(trimmed.to_string())
    }

    pub(crate) fn trail(&self) -> ReviewCaseTrail<'_, S> {
        ReviewCaseTrail::new(self.storage.as_ref())
    }
}

/// Entry point of the workflow engine.
///
/// Cheap to clone; every clone shares the same storage and collaborators.
///
/// ```ignore
/// let engine = Engine::builder(Arc::new(MemoryStorage::new())).build();
/// let baseline = engine.baselines().establish(&ctx, &baseline_id).await?;
/// ```
pub struct Engine<S> {
    services: Arc<Services<S>>,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            services: Arc::clone(&self.services),
        }
    }
}

impl<S: CasebookStorage> Engine<S> {
    pub fn builder(storage: Arc<S>) -> EngineBuilder<S> {
        EngineBuilder::new(storage)
    }

    pub fn baselines(&self) -> BaselineStore<S> {
        BaselineStore::new(Arc::clone(&self.services))
    }

    pub fn reviews(&self) -> ReviewWorkflow<S> {
        ReviewWorkflow::new(Arc::clone(&self.services))
    }

    pub fn review_cases(&self) -> ReviewCaseLedger<S> {
        ReviewCaseLedger::new(Arc::clone(&self.services))
    }

    pub fn trail(&self) -> ReviewCaseTrail<'_, S> {
        self.services.trail()
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.services.storage
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.services.config
    }
}

/// Builds an [`Engine`]. Unset collaborators default to permissive ones:
/// [`AllowAll`] for authorization and users, [`StoragePlanChecker`] for plan
/// consistency and [`TracingActivityRecorder`] for activities.
pub struct EngineBuilder<S> {
    storage: Arc<S>,
    guard: Option<Arc<dyn AuthorizationGuard>>,
    plans: Option<Arc<dyn PlanConsistencyChecker>>,
    activities: Option<Arc<dyn ActivityRecorder>>,
    users: Option<Arc<dyn UserDirectory>>,
    config: WorkflowConfig,
}

impl<S: CasebookStorage> EngineBuilder<S> {
    fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            guard: None,
            plans: None,
            activities: None,
            users: None,
            config: WorkflowConfig::default(),
        }
    }

    pub fn guard(mut self, guard: Arc<dyn AuthorizationGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn plans(mut self, plans: Arc<dyn PlanConsistencyChecker>) -> Self {
        self.plans = Some(plans);
        self
    }

    pub fn activities(mut self, activities: Arc<dyn ActivityRecorder>) -> Self {
        self.activities = Some(activities);
        self
    }

    pub fn users(mut self, users: Arc<dyn UserDirectory>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Engine<S> {
        let guard: Arc<dyn AuthorizationGuard> = match self.guard {
            Some(guard) => guard,
            None => Arc::new(AllowAll),
        };
        let plans: Arc<dyn PlanConsistencyChecker> = match self.plans {
            Some(plans) => plans,
            None => Arc::new(StoragePlanChecker::new(Arc::clone(&self.storage))),
        };
        let activities: Arc<dyn ActivityRecorder> = match self.activities {
            Some(activities) => activities,
            None => Arc::new(TracingActivityRecorder),
        };
        let users: Arc<dyn UserDirectory> = match self.users {
            Some(users) => users,
            None => Arc::new(AllowAll),
        };
        Engine {
            services: Arc::new(Services {
                storage: self.storage,
                guard,
                plans,
                activities,
                users,
                config: self.config,
            }),
        }
    }
}
