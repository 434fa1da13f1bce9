//! Snapshot completion shared by every mutating operation.
//!
//! An operation does all of its reads, checks and writes against one
//! snapshot and hands back an [`Outcome`]. [`Services::finish`] then aborts
//! on error, or commits and delivers the activities according to the
//! configured [`ActivityFailurePolicy`].

use casebook_storage::CasebookStorage;
use tracing::warn;

use crate::collab::Activity;
use crate::config::ActivityFailurePolicy;
use crate::engine::Services;
use crate::error::WorkflowError;

/// The value an operation returns plus the activities it wants recorded.
pub(crate) struct Outcome<T> {
    pub(crate) value: T,
    pub(crate) activities: Vec<Activity>,
}

impl<T> Outcome<T> {
    pub(crate) fn quiet(value: T) -> Self {
        Self {
            value,
            activities: Vec::new(),
        }
    }

    pub(crate) fn with_activities(value: T, activities: Vec<Activity>) -> Self {
        Self { value, activities }
    }
}

impl<S: CasebookStorage> Services<S> {
    pub(crate) async fn begin(&self) -> Result<S::Snapshot, WorkflowError> {
        Ok(self.storage.begin_snapshot().await?)
    }

    pub(crate) async fn finish<T>(
        &self,
        snapshot: S::Snapshot,
        result: Result<Outcome<T>, WorkflowError>,
    ) -> Result<T, WorkflowError> {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = self.storage.abort_snapshot(snapshot).await;
                return Err(e);
            }
        };

        match self.config.activity_failure {
            ActivityFailurePolicy::Fail => {
                if !outcome.activities.is_empty() {
                    if let Err(e) = self.activities.add_all(outcome.activities).await {
                        let _ = self.storage.abort_snapshot(snapshot).await;
                        return Err(WorkflowError::Activity(e.0));
                    }
                }
                self.storage.commit_snapshot(snapshot).await?;
            }
            ActivityFailurePolicy::Log => {
                self.storage.commit_snapshot(snapshot).await?;
                let count = outcome.activities.len();
                if count > 0 {
                    if let Err(e) = self.activities.add_all(outcome.activities).await {
                        warn!(count, error = %e, "activities not recorded");
                    }
                }
            }
        }
        Ok(outcome.value)
    }
}
