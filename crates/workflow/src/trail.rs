//! Append-only audit trail of review decisions.
//!
//! Every decision submission copies the updated review-case into a new
//! [`ReviewCaseRecord`]. Records are never read back for validation and are
//! only removed together with their review-case.

use casebook_storage::{CasebookStorage, ReviewCase, ReviewCaseRecord};

use crate::error::WorkflowError;
use crate::stamp;

pub struct ReviewCaseTrail<'s, S> {
    storage: &'s S,
}

impl<'s, S: CasebookStorage> ReviewCaseTrail<'s, S> {
    pub(crate) fn new(storage: &'s S) -> Self {
        Self { storage }
    }

    /// Append one record copying `row`.
    pub(crate) async fn append(
        &self,
        snapshot: &mut S::Snapshot,
        row: &ReviewCase,
    ) -> Result<ReviewCaseRecord, WorkflowError> {
        let record = ReviewCaseRecord::copy_of(stamp::new_id(), row);
        self.storage
            .insert_review_case_record(snapshot, record.clone())
            .await?;
        Ok(record)
    }

    /// Remove every record owned by the given review-cases.
    pub(crate) async fn purge(
        &self,
        snapshot: &mut S::Snapshot,
        review_case_ids: &[String],
    ) -> Result<usize, WorkflowError> {
        if review_case_ids.is_empty() {
            return Ok(0);
        }
        Ok(self
            .storage
            .delete_review_case_records(snapshot, review_case_ids)
            .await?)
    }

    /// Committed records of one review-case, oldest first.
    pub async fn history(
        &self,
        review_case_id: &str,
    ) -> Result<Vec<ReviewCaseRecord>, WorkflowError> {
        Ok(self
            .storage
            .list_review_case_records(review_case_id)
            .await?)
    }
}
