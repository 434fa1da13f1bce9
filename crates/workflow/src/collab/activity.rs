use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ActivityError, ActivityRecorder};

/// What an [`Activity`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    BaselineEstablished,
    CaseReviewed,
    ReviewResultReset,
    ReviewCaseDeleted,
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivityKind::BaselineEstablished => "baseline_established",
            ActivityKind::CaseReviewed => "case_reviewed",
            ActivityKind::ReviewResultReset => "review_result_reset",
            ActivityKind::ReviewCaseDeleted => "review_case_deleted",
        };
        f.write_str(name)
    }
}

/// One audit-log entry handed to an [`ActivityRecorder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub project_id: String,
    pub plan_id: String,
    /// The case the entry is about.
    pub source_id: String,
    pub kind: ActivityKind,
    pub operator_id: String,
    /// Human-readable message.
    pub content: String,
    /// RFC 3339 timestamp string.
    pub created_at: String,
}

/// Keeps every activity in memory, in arrival order.
///
/// `fail_with` turns the recorder into a failing sink, which is how the
/// activity-failure policy is exercised.
#[derive(Debug, Default)]
pub struct MemoryActivityRecorder {
    entries: Mutex<Vec<Activity>>,
    failure: Mutex<Option<String>>,
}

impl MemoryActivityRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `add` fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(message.into());
        }
    }

    /// Make the recorder accept activities again.
    pub fn recover(&self) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = None;
        }
    }

    pub fn entries(&self) -> Vec<Activity> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn entries_of(&self, kind: ActivityKind) -> Vec<Activity> {
        self.entries()
            .into_iter()
            .filter(|a| a.kind == kind)
            .collect()
    }
}

#[async_trait]
impl ActivityRecorder for MemoryActivityRecorder {
    async fn add(&self, activity: Activity) -> Result<(), ActivityError> {
        let failure = self
            .failure
            .lock()
            .map_err(|e| ActivityError(e.to_string()))?
            .clone();
        if let Some(message) = failure {
            return Err(ActivityError(message));
        }
        self.entries
            .lock()
            .map_err(|e| ActivityError(e.to_string()))?
            .push(activity);
        Ok(())
    }
}

/// Emits every activity as a `tracing` event and never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActivityRecorder;

#[async_trait]
impl ActivityRecorder for TracingActivityRecorder {
    async fn add(&self, activity: Activity) -> Result<(), ActivityError> {
        info!(
            target: "casebook::activity",
            kind = %activity.kind,
            plan_id = %activity.plan_id,
            source_id = %activity.source_id,
            operator_id = %activity.operator_id,
            "{}",
            activity.content
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(kind: ActivityKind) -> Activity {
        Activity {
            project_id: "proj-1".to_string(),
            plan_id: "plan-1".to_string(),
            source_id: "case-1".to_string(),
            kind,
            operator_id: "alice".to_string(),
            content: "test".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn memory_recorder_keeps_arrival_order() {
        let recorder = MemoryActivityRecorder::new();
        recorder
            .add_all(vec![
                activity(ActivityKind::CaseReviewed),
                activity(ActivityKind::ReviewResultReset),
            ])
            .await
            .unwrap();
        let kinds: Vec<_> = recorder.entries().iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![ActivityKind::CaseReviewed, ActivityKind::ReviewResultReset]
        );
        assert_eq!(recorder.entries_of(ActivityKind::CaseReviewed).len(), 1);
    }

    #[tokio::test]
    async fn failing_recorder_rejects_until_recovered() {
        let recorder = MemoryActivityRecorder::new();
        recorder.fail_with("sink down");
        let err = recorder
            .add(activity(ActivityKind::CaseReviewed))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "activity sink error: sink down");
        assert!(recorder.entries().is_empty());

        recorder.recover();
        recorder
            .add(activity(ActivityKind::CaseReviewed))
            .await
            .unwrap();
        assert_eq!(recorder.entries().len(), 1);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ActivityKind::ReviewResultReset).unwrap();
        assert_eq!(json, "\"review_result_reset\"");
    }
}
