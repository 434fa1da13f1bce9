use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{
    Baseline, BaselineCaseSnapshot, Case, CaseReviewMirror, Review, ReviewCase, ReviewCaseRecord,
};

/// The storage trait for casebook backends.
///
/// A `CasebookStorage` implementation provides transactional storage for
/// baselines, their frozen case snapshots, reviews, review-cases and the
/// review-case audit trail, plus the narrow slice of the case table the
/// workflow engine is allowed to touch.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()`: start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)`: commit and consume the transaction
///    OR `abort_snapshot(snapshot)`: roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, none of its writes may
/// become visible. Reads through a snapshot observe that snapshot's own
/// uncommitted writes.
///
/// ## OCC Conflict Detection
///
/// Baseline, review and review-case rows carry a `row_version`.
/// `update_baseline`, `update_review` and `update_review_case` are
/// conditional on `row_version = expected_version`. If the row moved on,
/// either at update time or by the time the snapshot commits, the backend
/// returns `Err(StorageError::ConcurrentConflict { .. })` and applies none
/// of the snapshot's writes.
///
/// Deletes are version-checked too: deleting a baseline, review or
/// review-case pins the `row_version` the snapshot read, and the commit
/// fails with `ConcurrentConflict` if another snapshot updated the row in
/// between. Children written under that update (baseline snapshots,
/// review-case records) therefore never outlive their parent.
///
/// ## Review Names
///
/// A review name is unique within its project. Besides the in-snapshot
/// check callers make with `find_review_by_name`, `commit_snapshot` rejects
/// a snapshot that writes a review whose `(project_id, name)` is held by a
/// different committed review, returning `StorageError::NameTaken`.
///
/// Case version increments are deltas: two committed snapshots that both
/// bump the same case leave it two versions higher.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so one backend can be
/// shared across request tasks.
#[async_trait]
pub trait CasebookStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations durable.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Baselines (within snapshot) ──────────────────────────────────────────

    /// Insert a new baseline. Returns `AlreadyExists` on id collision.
    async fn insert_baseline(
        &self,
        snapshot: &mut Self::Snapshot,
        baseline: Baseline,
    ) -> Result<(), StorageError>;

    /// Read a baseline for a later conditional update.
    async fn get_baseline_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        id: &str,
    ) -> Result<Baseline, StorageError>;

    /// Read several baselines. Fails with `NotFound` on the first missing id.
    async fn get_baselines_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        ids: &[String],
    ) -> Result<Vec<Baseline>, StorageError>;

    /// Ids of every baseline owned by `plan_id`.
    async fn list_baseline_ids_by_plan(
        &self,
        snapshot: &mut Self::Snapshot,
        plan_id: &str,
    ) -> Result<Vec<String>, StorageError>;

    /// Version-validated write of every mutable baseline field (OCC).
    ///
    /// Returns the new row version on success.
    async fn update_baseline(
        &self,
        snapshot: &mut Self::Snapshot,
        baseline: &Baseline,
        expected_version: i64,
    ) -> Result<i64, StorageError>;

    /// Delete baselines by id. Returns the number of rows removed.
    ///
    /// Each removed row pins its read version for the commit check.
    async fn delete_baselines(
        &self,
        snapshot: &mut Self::Snapshot,
        ids: &[String],
    ) -> Result<usize, StorageError>;

    /// Insert a baseline snapshot row.
    ///
    /// Returns `AlreadyExists` if a row for `(baseline_id, case_id)` exists:
    /// snapshot rows are write-once.
    async fn insert_baseline_snapshot(
        &self,
        snapshot: &mut Self::Snapshot,
        row: BaselineCaseSnapshot,
    ) -> Result<(), StorageError>;

    /// Delete every snapshot row belonging to the given baselines.
    async fn delete_baseline_snapshots(
        &self,
        snapshot: &mut Self::Snapshot,
        baseline_ids: &[String],
    ) -> Result<usize, StorageError>;

    // ── Cases (within snapshot) ──────────────────────────────────────────────

    /// Insert a case. The engine never calls this; hosts use it to seed.
    async fn insert_case(&self, snapshot: &mut Self::Snapshot, case: Case)
        -> Result<(), StorageError>;

    /// Bulk read of full case rows, in the order of `ids`.
    ///
    /// Fails with `NotFound` on the first missing id.
    async fn get_cases(
        &self,
        snapshot: &mut Self::Snapshot,
        ids: &[String],
    ) -> Result<Vec<Case>, StorageError>;

    /// Increment `version` by one on every listed case.
    async fn increment_case_versions(
        &self,
        snapshot: &mut Self::Snapshot,
        ids: &[String],
    ) -> Result<usize, StorageError>;

    /// Overwrite the mirrored review-result fields of one case.
    async fn mirror_case_review(
        &self,
        snapshot: &mut Self::Snapshot,
        case_id: &str,
        mirror: &CaseReviewMirror,
    ) -> Result<(), StorageError>;

    // ── Reviews (within snapshot) ────────────────────────────────────────────

    /// Insert a review. `AlreadyExists` on id collision; a name collision
    /// with a committed review surfaces as `NameTaken` at commit.
    async fn insert_review(
        &self,
        snapshot: &mut Self::Snapshot,
        review: Review,
    ) -> Result<(), StorageError>;

    async fn get_review_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        id: &str,
    ) -> Result<Review, StorageError>;

    /// Look up a review by name within a project.
    async fn find_review_by_name(
        &self,
        snapshot: &mut Self::Snapshot,
        project_id: &str,
        name: &str,
    ) -> Result<Option<Review>, StorageError>;

    async fn list_review_ids_by_plan(
        &self,
        snapshot: &mut Self::Snapshot,
        plan_id: &str,
    ) -> Result<Vec<String>, StorageError>;

    /// Version-validated write of every mutable review field (OCC).
    async fn update_review(
        &self,
        snapshot: &mut Self::Snapshot,
        review: &Review,
        expected_version: i64,
    ) -> Result<i64, StorageError>;

    /// Delete review rows by id. Review-cases are NOT touched.
    ///
    /// Version-checked at commit like `delete_baselines`.
    async fn delete_reviews(
        &self,
        snapshot: &mut Self::Snapshot,
        ids: &[String],
    ) -> Result<usize, StorageError>;

    // ── Review-cases (within snapshot) ───────────────────────────────────────

    async fn insert_review_case(
        &self,
        snapshot: &mut Self::Snapshot,
        row: ReviewCase,
    ) -> Result<(), StorageError>;

    /// Read several review-cases. Fails with `NotFound` on the first missing id.
    async fn get_review_cases_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        ids: &[String],
    ) -> Result<Vec<ReviewCase>, StorageError>;

    /// Every review-case attached to `review_id`.
    async fn list_review_cases_in(
        &self,
        snapshot: &mut Self::Snapshot,
        review_id: &str,
    ) -> Result<Vec<ReviewCase>, StorageError>;

    async fn list_review_case_ids_by_reviews(
        &self,
        snapshot: &mut Self::Snapshot,
        review_ids: &[String],
    ) -> Result<Vec<String>, StorageError>;

    async fn list_review_case_ids_by_case(
        &self,
        snapshot: &mut Self::Snapshot,
        case_id: &str,
    ) -> Result<Vec<String>, StorageError>;

    /// Version-validated write of every mutable review-case field (OCC).
    async fn update_review_case(
        &self,
        snapshot: &mut Self::Snapshot,
        row: &ReviewCase,
        expected_version: i64,
    ) -> Result<i64, StorageError>;

    /// Delete review-cases by id, version-checked at commit.
    async fn delete_review_cases(
        &self,
        snapshot: &mut Self::Snapshot,
        ids: &[String],
    ) -> Result<usize, StorageError>;

    // ── Review-case records (within snapshot) ────────────────────────────────

    /// Append an audit record. Records are never updated.
    async fn insert_review_case_record(
        &self,
        snapshot: &mut Self::Snapshot,
        record: ReviewCaseRecord,
    ) -> Result<(), StorageError>;

    /// The only deletion path for audit records: by owning review-case.
    async fn delete_review_case_records(
        &self,
        snapshot: &mut Self::Snapshot,
        review_case_ids: &[String],
    ) -> Result<usize, StorageError>;

    // ── Query operations (committed data) ────────────────────────────────────

    async fn get_baseline(&self, id: &str) -> Result<Baseline, StorageError>;

    async fn list_baselines(&self, plan_id: &str) -> Result<Vec<Baseline>, StorageError>;

    /// Snapshot rows of one baseline, ordered by case id.
    async fn list_baseline_snapshots(
        &self,
        baseline_id: &str,
    ) -> Result<Vec<BaselineCaseSnapshot>, StorageError>;

    async fn get_case(&self, id: &str) -> Result<Case, StorageError>;

    async fn get_review(&self, id: &str) -> Result<Review, StorageError>;

    async fn list_reviews(&self, plan_id: &str) -> Result<Vec<Review>, StorageError>;

    async fn get_review_case(&self, id: &str) -> Result<ReviewCase, StorageError>;

    async fn list_review_cases(&self, review_id: &str) -> Result<Vec<ReviewCase>, StorageError>;

    /// Audit records of one review-case, oldest first.
    async fn list_review_case_records(
        &self,
        review_case_id: &str,
    ) -> Result<Vec<ReviewCaseRecord>, StorageError>;
}
