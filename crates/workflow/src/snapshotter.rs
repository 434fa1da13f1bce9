use casebook_storage::{Baseline, BaselineCaseSnapshot, Case, CasebookStorage};
use tracing::debug;

use crate::error::WorkflowError;

/// Freezes the live content of a baseline's cases.
///
/// For every case in the baseline, one write-once [`BaselineCaseSnapshot`]
/// is written carrying the version the case had before establishment, then
/// every case version is bumped by one.
pub struct BaselineCaseSnapshotter<'s, S> {
    storage: &'s S,
}

impl<'s, S: CasebookStorage> BaselineCaseSnapshotter<'s, S> {
    pub fn new(storage: &'s S) -> Self {
        Self { storage }
    }

    /// Capture `baseline` inside `snapshot`. Returns the captured cases as
    /// they were read, before the version bump.
    pub async fn capture(
        &self,
        snapshot: &mut S::Snapshot,
        baseline: &Baseline,
        captured_at: &str,
    ) -> Result<Vec<Case>, WorkflowError> {
        let case_ids: Vec<String> = baseline.case_ids.iter().cloned().collect();
        let cases = self.storage.get_cases(snapshot, &case_ids).await?;

        for case in &cases {
            self.storage
                .insert_baseline_snapshot(
                    snapshot,
                    BaselineCaseSnapshot {
                        baseline_id: baseline.id.clone(),
                        case_id: case.id.clone(),
                        case_version: case.version,
                        name: case.name.clone(),
                        content: case.content.clone(),
                        captured_at: captured_at.to_string(),
                    },
                )
                .await?;
        }

        let bumped = self
            .storage
            .increment_case_versions(snapshot, &case_ids)
            .await?;
        debug!(baseline_id = %baseline.id, captured = cases.len(), bumped, "baseline cases captured");
        Ok(cases)
    }
}
