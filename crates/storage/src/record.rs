use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Table names used in [`StorageError`](crate::StorageError) variants.
pub mod table {
    pub const BASELINE: &str = "baseline";
    pub const BASELINE_CASE_SNAPSHOT: &str = "baseline_case_snapshot";
    pub const CASE: &str = "case";
    pub const REVIEW: &str = "review";
    pub const REVIEW_CASE: &str = "review_case";
    pub const REVIEW_CASE_RECORD: &str = "review_case_record";
}

/// A named set of cases that can be frozen ("established") exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    pub id: String,
    pub project_id: String,
    pub plan_id: String,
    pub name: String,
    pub case_ids: BTreeSet<String>,
    pub established: bool,
    /// RFC 3339 timestamp string. None until established.
    pub established_at: Option<String>,
    pub established_by: Option<String>,
    pub created_by: String,
    /// RFC 3339 timestamp string.
    pub created_at: String,
    /// Optimistic concurrency column.
    pub row_version: i64,
}

/// Write-once copy of a case's content taken when a baseline is established.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineCaseSnapshot {
    pub baseline_id: String,
    pub case_id: String,
    /// The case's version at the moment of capture, before the establish bump.
    pub case_version: i64,
    pub name: String,
    pub content: serde_json::Value,
    /// RFC 3339 timestamp string.
    pub captured_at: String,
}

/// The live test case. Owned by the host system; the engine only reads it,
/// bumps its version and mirrors review results onto it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: String,
    pub project_id: String,
    pub plan_id: String,
    pub name: String,
    pub content: serde_json::Value,
    pub version: i64,
    pub review_status: CaseReviewStatus,
    pub reviewer_id: Option<String>,
    /// RFC 3339 timestamp string.
    pub review_date: Option<String>,
}

/// The review-result fields mirrored from a review-case onto its [`Case`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseReviewMirror {
    pub review_status: CaseReviewStatus,
    pub reviewer_id: Option<String>,
    pub review_date: Option<String>,
}

/// Lifecycle of a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "PENDING",
            ReviewStatus::InProgress => "IN_PROGRESS",
            ReviewStatus::Completed => "COMPLETED",
            ReviewStatus::Blocked => "BLOCKED",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision state of a single case inside a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CaseReviewStatus {
    /// Never reviewed, or reset to the initial state.
    #[default]
    Prepare,
    /// A reviewer has looked at it but not concluded.
    Underway,
    Pass,
    UnPass,
    /// Reopened for another review round.
    Again,
}

impl CaseReviewStatus {
    /// Whether a case in this state still blocks its review from ending.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            CaseReviewStatus::Prepare | CaseReviewStatus::Underway | CaseReviewStatus::Again
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaseReviewStatus::Prepare => "Prepare",
            CaseReviewStatus::Underway => "Underway",
            CaseReviewStatus::Pass => "Pass",
            CaseReviewStatus::UnPass => "UnPass",
            CaseReviewStatus::Again => "Again",
        }
    }
}

impl fmt::Display for CaseReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured approval workflow over a subset of a plan's cases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub project_id: String,
    pub plan_id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub participant_ids: Vec<String>,
    pub status: ReviewStatus,
    pub created_by: String,
    /// RFC 3339 timestamp string.
    pub created_at: String,
    /// RFC 3339 timestamp string.
    pub updated_at: String,
    /// Optimistic concurrency column.
    pub row_version: i64,
}

/// The per-case join row inside a review, carrying the current decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewCase {
    pub id: String,
    pub review_id: String,
    pub plan_id: String,
    pub case_id: String,
    /// Case name at attach time.
    pub case_name: String,
    /// Case version at attach time.
    pub case_version: i64,
    pub review_status: CaseReviewStatus,
    pub reviewer_id: Option<String>,
    /// RFC 3339 timestamp string.
    pub review_date: Option<String>,
    pub remark: Option<String>,
    /// Content of the live case at the moment of the last decision.
    pub reviewed_case_snapshot: Option<serde_json::Value>,
    pub created_by: String,
    /// RFC 3339 timestamp string.
    pub created_at: String,
    /// Optimistic concurrency column.
    pub row_version: i64,
}

/// Append-only audit copy of a [`ReviewCase`], one per decision submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewCaseRecord {
    pub id: String,
    pub review_case_id: String,
    pub review_id: String,
    pub plan_id: String,
    pub case_id: String,
    pub case_name: String,
    pub case_version: i64,
    pub review_status: CaseReviewStatus,
    pub reviewer_id: Option<String>,
    pub review_date: Option<String>,
    pub remark: Option<String>,
    pub reviewed_case_snapshot: Option<serde_json::Value>,
    pub created_by: String,
    pub created_at: String,
    /// The source row's version after the decision was applied.
    pub row_version: i64,
}

impl ReviewCaseRecord {
    /// Copy every field of `source` except its id, which becomes `review_case_id`.
    pub fn copy_of(id: String, source: &ReviewCase) -> Self {
        Self {
            id,
            review_case_id: source.id.clone(),
            review_id: source.review_id.clone(),
            plan_id: source.plan_id.clone(),
            case_id: source.case_id.clone(),
            case_name: source.case_name.clone(),
            case_version: source.case_version,
            review_status: source.review_status,
            reviewer_id: source.reviewer_id.clone(),
            review_date: source.review_date.clone(),
            remark: source.remark.clone(),
            reviewed_case_snapshot: source.reviewed_case_snapshot.clone(),
            created_by: source.created_by.clone(),
            created_at: source.created_at.clone(),
            row_version: source.row_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_statuses() {
        assert!(CaseReviewStatus::Prepare.is_pending());
        assert!(CaseReviewStatus::Underway.is_pending());
        assert!(CaseReviewStatus::Again.is_pending());
        assert!(!CaseReviewStatus::Pass.is_pending());
        assert!(!CaseReviewStatus::UnPass.is_pending());
    }

    #[test]
    fn review_status_serializes_screaming_snake() {
        let json = serde_json::to_string(&ReviewStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        assert_eq!(ReviewStatus::InProgress.to_string(), "IN_PROGRESS");
    }

    #[test]
    fn record_copy_keeps_source_id_as_review_case_id() {
        let source = ReviewCase {
            id: "rc-1".to_string(),
            review_id: "r-1".to_string(),
            plan_id: "p-1".to_string(),
            case_id: "c-1".to_string(),
            case_name: "login".to_string(),
            case_version: 3,
            review_status: CaseReviewStatus::Pass,
            reviewer_id: Some("alice".to_string()),
            review_date: Some("2026-01-01T00:00:00Z".to_string()),
            remark: Some("ok".to_string()),
            reviewed_case_snapshot: Some(serde_json::json!({"steps": []})),
            created_by: "bob".to_string(),
            created_at: "2025-12-31T00:00:00Z".to_string(),
            row_version: 1,
        };
        let record = ReviewCaseRecord::copy_of("rec-1".to_string(), &source);
        assert_eq!(record.id, "rec-1");
        assert_eq!(record.review_case_id, "rc-1");
        assert_eq!(record.review_status, CaseReviewStatus::Pass);
        assert_eq!(record.remark.as_deref(), Some("ok"));
        assert_eq!(record.row_version, 1);
    }
}
