//! Baseline establishment and case review workflow engine.
//!
//! The engine drives five components over a [`CasebookStorage`] backend:
//!
//! - [`BaselineStore`]: mutable case sets frozen exactly once by `establish`
//! - [`BaselineCaseSnapshotter`]: write-once content copies and case version bumps
//! - [`ReviewWorkflow`]: the review lifecycle (`start`, `end`, `block`, `clone`, `delete`)
//! - [`ReviewCaseLedger`]: per-case decisions, resets and detachment
//! - [`ReviewCaseTrail`]: the append-only audit record of every decision
//!
//! Every mutating operation takes an explicit [`RequestContext`] and runs in
//! a single storage snapshot: all checks happen before the first write, and
//! any error aborts the snapshot.
//!
//! Policy is delegated to collaborators: [`AuthorizationGuard`],
//! [`PlanConsistencyChecker`], [`ActivityRecorder`] and [`UserDirectory`].
//!
//! [`CasebookStorage`]: casebook_storage::CasebookStorage

mod baseline;
mod batch;
pub mod collab;
pub mod config;
mod context;
mod engine;
mod error;
mod ledger;
mod review;
mod snapshotter;
mod stamp;
mod trail;
mod tx;

pub use baseline::BaselineStore;
pub use collab::{
    Activity, ActivityError, ActivityKind, ActivityRecorder, AllowAll, AuthorizationGuard,
    MemoryActivityRecorder, Permission, PlanConsistencyChecker, StaticUsers, StoragePlanChecker,
    TracingActivityRecorder, UserDirectory,
};
pub use config::{read_config, ActivityFailurePolicy, ConfigError, WorkflowConfig};
pub use context::RequestContext;
pub use engine::{Engine, EngineBuilder};
pub use error::{EntityKind, Violation, WorkflowError};
pub use ledger::{CaseDecision, Decision, ResetMode, ReviewCaseLedger};
pub use review::{
    accepts_decisions, next_status, NewReview, Removal, ReviewAction, ReviewUpdate, ReviewWorkflow,
};
pub use snapshotter::BaselineCaseSnapshotter;
pub use trail::ReviewCaseTrail;
