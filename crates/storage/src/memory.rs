//! In-memory implementation of `CasebookStorage`.
//!
//! Each snapshot works on a private copy of the committed tables and keeps
//! a write set plus the row versions it expects to still hold. Commit
//! validates those versions under the write lock and then publishes only the
//! rows the snapshot touched, so concurrent snapshots over disjoint rows both
//! succeed while the loser of a same-row race gets `ConcurrentConflict`.
//! All state is lost on drop.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StorageError;
use crate::record::{
    table, Baseline, BaselineCaseSnapshot, Case, CaseReviewMirror, Review, ReviewCase,
    ReviewCaseRecord,
};
use crate::traits::CasebookStorage;

#[derive(Debug, Clone, Default)]
struct Tables {
    baselines: BTreeMap<String, Baseline>,
    baseline_snapshots: BTreeMap<(String, String), BaselineCaseSnapshot>,
    cases: BTreeMap<String, Case>,
    reviews: BTreeMap<String, Review>,
    review_cases: BTreeMap<String, ReviewCase>,
    /// Keyed by (append sequence, id) so iteration is insertion order.
    records: BTreeMap<(u64, String), ReviewCaseRecord>,
}

/// A row identity used for write sets and version expectations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum RowKey {
    Baseline(String),
    BaselineSnapshot(String, String),
    Case(String),
    Review(String),
    ReviewCase(String),
    Record(u64, String),
}

impl RowKey {
    fn describe(&self) -> (&'static str, String) {
        match self {
            RowKey::Baseline(id) => (table::BASELINE, id.clone()),
            RowKey::BaselineSnapshot(b, c) => (table::BASELINE_CASE_SNAPSHOT, format!("{b}/{c}")),
            RowKey::Case(id) => (table::CASE, id.clone()),
            RowKey::Review(id) => (table::REVIEW, id.clone()),
            RowKey::ReviewCase(id) => (table::REVIEW_CASE, id.clone()),
            RowKey::Record(_, id) => (table::REVIEW_CASE_RECORD, id.clone()),
        }
    }
}

impl Tables {
    /// Current `row_version` of a versioned row, if it exists.
    fn row_version(&self, key: &RowKey) -> Option<i64> {
        match key {
            RowKey::Baseline(id) => self.baselines.get(id).map(|b| b.row_version),
            RowKey::Review(id) => self.reviews.get(id).map(|r| r.row_version),
            RowKey::ReviewCase(id) => self.review_cases.get(id).map(|r| r.row_version),
            _ => None,
        }
    }

    /// Copy one row from `source` into `self`, removing it if `source` no longer has it.
    fn publish(&mut self, source: &Tables, key: &RowKey) {
        match key {
            RowKey::Baseline(id) => copy_row(&mut self.baselines, &source.baselines, id),
            RowKey::BaselineSnapshot(b, c) => copy_row(
                &mut self.baseline_snapshots,
                &source.baseline_snapshots,
                &(b.clone(), c.clone()),
            ),
            RowKey::Case(id) => copy_row(&mut self.cases, &source.cases, id),
            RowKey::Review(id) => copy_row(&mut self.reviews, &source.reviews, id),
            RowKey::ReviewCase(id) => copy_row(&mut self.review_cases, &source.review_cases, id),
            RowKey::Record(seq, id) => {
                copy_row(&mut self.records, &source.records, &(*seq, id.clone()))
            }
        }
    }
}

fn copy_row<K: Ord + Clone, V: Clone>(
    target: &mut BTreeMap<K, V>,
    source: &BTreeMap<K, V>,
    key: &K,
) {
    match source.get(key) {
        Some(row) => {
            target.insert(key.clone(), row.clone());
        }
        None => {
            target.remove(key);
        }
    }
}

fn not_found(table: &'static str, id: &str) -> StorageError {
    StorageError::NotFound {
        table,
        id: id.to_string(),
    }
}

fn conflict(table: &'static str, id: &str, expected_version: i64) -> StorageError {
    StorageError::ConcurrentConflict {
        table,
        id: id.to_string(),
        expected_version,
    }
}

/// An in-progress transaction against [`MemoryStorage`].
#[derive(Debug)]
pub struct MemorySnapshot {
    working: Tables,
    /// Rows inserted, replaced or deleted wholesale.
    dirty: BTreeSet<RowKey>,
    /// Versions the committed rows must still carry at commit.
    expected: BTreeMap<RowKey, i64>,
    /// Case version increments, applied as deltas on commit.
    case_increments: BTreeMap<String, i64>,
    /// Cases whose mirrored review fields were overwritten.
    case_mirrors: BTreeMap<String, CaseReviewMirror>,
}

impl MemorySnapshot {
    fn expect(&mut self, key: RowKey, version: i64) {
        // The first read wins: later updates in the same snapshot build on it.
        self.expected.entry(key).or_insert(version);
    }

    /// Pin the version of a row about to be removed and mark it dirty.
    ///
    /// A row this snapshot inserted has nothing committed to pin.
    fn expect_removal(&mut self, key: RowKey, version: i64) {
        if !self.dirty.contains(&key) {
            self.expected.insert(key.clone(), version);
        }
        self.dirty.insert(key);
    }
}

/// A review written by `snapshot` whose (project, name) pair is held by a
/// different committed review the snapshot left alone.
fn taken_review_name<'a>(
    committed: &Tables,
    snapshot: &'a MemorySnapshot,
) -> Option<&'a Review> {
    snapshot.dirty.iter().find_map(|key| {
        let RowKey::Review(id) = key else {
            return None;
        };
        let review = snapshot.working.reviews.get(id)?;
        let clash = committed.reviews.values().any(|other| {
            other.id != review.id
                && other.project_id == review.project_id
                && other.name == review.name
                && !snapshot.dirty.contains(&RowKey::Review(other.id.clone()))
        });
        clash.then_some(review)
    })
}

/// In-memory storage backend.
///
/// Tables live behind a `tokio::sync::RwLock`; snapshots never hold the
/// lock between calls.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    committed: RwLock<Tables>,
    record_seq: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CasebookStorage for MemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        let working = self.committed.read().await.clone();
        Ok(MemorySnapshot {
            working,
            dirty: BTreeSet::new(),
            expected: BTreeMap::new(),
            case_increments: BTreeMap::new(),
            case_mirrors: BTreeMap::new(),
        })
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let mut committed = self.committed.write().await;

        for (key, expected_version) in &snapshot.expected {
            if committed.row_version(key) != Some(*expected_version) {
                let (table, id) = key.describe();
                debug!(table, id = %id, expected_version, "commit rejected by version check");
                return Err(conflict(table, &id, *expected_version));
            }
        }
        if let Some(review) = taken_review_name(&committed, &snapshot) {
            debug!(
                project_id = %review.project_id,
                name = %review.name,
                "commit rejected by review name check"
            );
            return Err(StorageError::NameTaken {
                table: table::REVIEW,
                project_id: review.project_id.clone(),
                name: review.name.clone(),
            });
        }
        for case_id in snapshot
            .case_increments
            .keys()
            .chain(snapshot.case_mirrors.keys())
        {
            let inserted_here = snapshot.dirty.contains(&RowKey::Case(case_id.clone()));
            if !inserted_here && !committed.cases.contains_key(case_id) {
                return Err(not_found(table::CASE, case_id));
            }
        }

        for key in &snapshot.dirty {
            committed.publish(&snapshot.working, key);
        }
        for (case_id, delta) in &snapshot.case_increments {
            if snapshot.dirty.contains(&RowKey::Case(case_id.clone())) {
                continue;
            }
            if let Some(case) = committed.cases.get_mut(case_id) {
                case.version += delta;
            }
        }
        for (case_id, mirror) in &snapshot.case_mirrors {
            if snapshot.dirty.contains(&RowKey::Case(case_id.clone())) {
                continue;
            }
            if let Some(case) = committed.cases.get_mut(case_id) {
                case.review_status = mirror.review_status;
                case.reviewer_id = mirror.reviewer_id.clone();
                case.review_date = mirror.review_date.clone();
            }
        }
        Ok(())
    }

    async fn abort_snapshot(&self, _snapshot: MemorySnapshot) -> Result<(), StorageError> {
        Ok(())
    }

    // ── Baselines ────────────────────────────────────────────────────────────

    async fn insert_baseline(
        &self,
        snapshot: &mut MemorySnapshot,
        baseline: Baseline,
    ) -> Result<(), StorageError> {
        if snapshot.working.baselines.contains_key(&baseline.id) {
            return Err(StorageError::AlreadyExists {
                table: table::BASELINE,
                id: baseline.id,
            });
        }
        snapshot.dirty.insert(RowKey::Baseline(baseline.id.clone()));
        snapshot
            .working
            .baselines
            .insert(baseline.id.clone(), baseline);
        Ok(())
    }

    async fn get_baseline_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        id: &str,
    ) -> Result<Baseline, StorageError> {
        snapshot
            .working
            .baselines
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(table::BASELINE, id))
    }

    async fn get_baselines_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        ids: &[String],
    ) -> Result<Vec<Baseline>, StorageError> {
        ids.iter()
            .map(|id| {
                snapshot
                    .working
                    .baselines
                    .get(id)
                    .cloned()
                    .ok_or_else(|| not_found(table::BASELINE, id))
            })
            .collect()
    }

    async fn list_baseline_ids_by_plan(
        &self,
        snapshot: &mut MemorySnapshot,
        plan_id: &str,
    ) -> Result<Vec<String>, StorageError> {
        Ok(snapshot
            .working
            .baselines
            .values()
            .filter(|b| b.plan_id == plan_id)
            .map(|b| b.id.clone())
            .collect())
    }

    async fn update_baseline(
        &self,
        snapshot: &mut MemorySnapshot,
        baseline: &Baseline,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        let current = snapshot
            .working
            .baselines
            .get(&baseline.id)
            .ok_or_else(|| not_found(table::BASELINE, &baseline.id))?;
        if current.row_version != expected_version {
            return Err(conflict(table::BASELINE, &baseline.id, expected_version));
        }
        let key = RowKey::Baseline(baseline.id.clone());
        snapshot.expect(key.clone(), expected_version);
        snapshot.dirty.insert(key);

        let mut next = baseline.clone();
        next.row_version = expected_version + 1;
        snapshot
            .working
            .baselines
            .insert(baseline.id.clone(), next);
        Ok(expected_version + 1)
    }

    async fn delete_baselines(
        &self,
        snapshot: &mut MemorySnapshot,
        ids: &[String],
    ) -> Result<usize, StorageError> {
        let mut removed = 0;
        for id in ids {
            if let Some(row) = snapshot.working.baselines.remove(id) {
                snapshot.expect_removal(RowKey::Baseline(id.clone()), row.row_version);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn insert_baseline_snapshot(
        &self,
        snapshot: &mut MemorySnapshot,
        row: BaselineCaseSnapshot,
    ) -> Result<(), StorageError> {
        let key = (row.baseline_id.clone(), row.case_id.clone());
        if snapshot.working.baseline_snapshots.contains_key(&key) {
            return Err(StorageError::AlreadyExists {
                table: table::BASELINE_CASE_SNAPSHOT,
                id: format!("{}/{}", key.0, key.1),
            });
        }
        snapshot
            .dirty
            .insert(RowKey::BaselineSnapshot(key.0.clone(), key.1.clone()));
        snapshot.working.baseline_snapshots.insert(key, row);
        Ok(())
    }

    async fn delete_baseline_snapshots(
        &self,
        snapshot: &mut MemorySnapshot,
        baseline_ids: &[String],
    ) -> Result<usize, StorageError> {
        let doomed: Vec<(String, String)> = snapshot
            .working
            .baseline_snapshots
            .keys()
            .filter(|(baseline_id, _)| baseline_ids.contains(baseline_id))
            .cloned()
            .collect();
        for key in &doomed {
            snapshot.working.baseline_snapshots.remove(key);
            snapshot
                .dirty
                .insert(RowKey::BaselineSnapshot(key.0.clone(), key.1.clone()));
        }
        Ok(doomed.len())
    }

    // ── Cases ────────────────────────────────────────────────────────────────

    async fn insert_case(
        &self,
        snapshot: &mut MemorySnapshot,
        case: Case,
    ) -> Result<(), StorageError> {
        if snapshot.working.cases.contains_key(&case.id) {
            return Err(StorageError::AlreadyExists {
                table: table::CASE,
                id: case.id,
            });
        }
        snapshot.dirty.insert(RowKey::Case(case.id.clone()));
        snapshot.working.cases.insert(case.id.clone(), case);
        Ok(())
    }

    async fn get_cases(
        &self,
        snapshot: &mut MemorySnapshot,
        ids: &[String],
    ) -> Result<Vec<Case>, StorageError> {
        ids.iter()
            .map(|id| {
                snapshot
                    .working
                    .cases
                    .get(id)
                    .cloned()
                    .ok_or_else(|| not_found(table::CASE, id))
            })
            .collect()
    }

    async fn increment_case_versions(
        &self,
        snapshot: &mut MemorySnapshot,
        ids: &[String],
    ) -> Result<usize, StorageError> {
        for id in ids {
            let case = snapshot
                .working
                .cases
                .get_mut(id)
                .ok_or_else(|| not_found(table::CASE, id))?;
            case.version += 1;
            *snapshot.case_increments.entry(id.clone()).or_insert(0) += 1;
        }
        Ok(ids.len())
    }

    async fn mirror_case_review(
        &self,
        snapshot: &mut MemorySnapshot,
        case_id: &str,
        mirror: &CaseReviewMirror,
    ) -> Result<(), StorageError> {
        let case = snapshot
            .working
            .cases
            .get_mut(case_id)
            .ok_or_else(|| not_found(table::CASE, case_id))?;
        case.review_status = mirror.review_status;
        case.reviewer_id = mirror.reviewer_id.clone();
        case.review_date = mirror.review_date.clone();
        snapshot
            .case_mirrors
            .insert(case_id.to_string(), mirror.clone());
        Ok(())
    }

    // ── Reviews ──────────────────────────────────────────────────────────────

    async fn insert_review(
        &self,
        snapshot: &mut MemorySnapshot,
        review: Review,
    ) -> Result<(), StorageError> {
        if snapshot.working.reviews.contains_key(&review.id) {
            return Err(StorageError::AlreadyExists {
                table: table::REVIEW,
                id: review.id,
            });
        }
        snapshot.dirty.insert(RowKey::Review(review.id.clone()));
        snapshot.working.reviews.insert(review.id.clone(), review);
        Ok(())
    }

    async fn get_review_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        id: &str,
    ) -> Result<Review, StorageError> {
        snapshot
            .working
            .reviews
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(table::REVIEW, id))
    }

    async fn find_review_by_name(
        &self,
        snapshot: &mut MemorySnapshot,
        project_id: &str,
        name: &str,
    ) -> Result<Option<Review>, StorageError> {
        Ok(snapshot
            .working
            .reviews
            .values()
            .find(|r| r.project_id == project_id && r.name == name)
            .cloned())
    }

    async fn list_review_ids_by_plan(
        &self,
        snapshot: &mut MemorySnapshot,
        plan_id: &str,
    ) -> Result<Vec<String>, StorageError> {
        Ok(snapshot
            .working
            .reviews
            .values()
            .filter(|r| r.plan_id == plan_id)
            .map(|r| r.id.clone())
            .collect())
    }

    async fn update_review(
        &self,
        snapshot: &mut MemorySnapshot,
        review: &Review,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        let current = snapshot
            .working
            .reviews
            .get(&review.id)
            .ok_or_else(|| not_found(table::REVIEW, &review.id))?;
        if current.row_version != expected_version {
            return Err(conflict(table::REVIEW, &review.id, expected_version));
        }
        let key = RowKey::Review(review.id.clone());
        snapshot.expect(key.clone(), expected_version);
        snapshot.dirty.insert(key);

        let mut next = review.clone();
        next.row_version = expected_version + 1;
        snapshot.working.reviews.insert(review.id.clone(), next);
        Ok(expected_version + 1)
    }

    async fn delete_reviews(
        &self,
        snapshot: &mut MemorySnapshot,
        ids: &[String],
    ) -> Result<usize, StorageError> {
        let mut removed = 0;
        for id in ids {
            if let Some(row) = snapshot.working.reviews.remove(id) {
                snapshot.expect_removal(RowKey::Review(id.clone()), row.row_version);
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ── Review-cases ─────────────────────────────────────────────────────────

    async fn insert_review_case(
        &self,
        snapshot: &mut MemorySnapshot,
        row: ReviewCase,
    ) -> Result<(), StorageError> {
        if snapshot.working.review_cases.contains_key(&row.id) {
            return Err(StorageError::AlreadyExists {
                table: table::REVIEW_CASE,
                id: row.id,
            });
        }
        snapshot.dirty.insert(RowKey::ReviewCase(row.id.clone()));
        snapshot.working.review_cases.insert(row.id.clone(), row);
        Ok(())
    }

    async fn get_review_cases_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        ids: &[String],
    ) -> Result<Vec<ReviewCase>, StorageError> {
        ids.iter()
            .map(|id| {
                snapshot
                    .working
                    .review_cases
                    .get(id)
                    .cloned()
                    .ok_or_else(|| not_found(table::REVIEW_CASE, id))
            })
            .collect()
    }

    async fn list_review_cases_in(
        &self,
        snapshot: &mut MemorySnapshot,
        review_id: &str,
    ) -> Result<Vec<ReviewCase>, StorageError> {
        Ok(review_cases_of(&snapshot.working, review_id))
    }

    async fn list_review_case_ids_by_reviews(
        &self,
        snapshot: &mut MemorySnapshot,
        review_ids: &[String],
    ) -> Result<Vec<String>, StorageError> {
        Ok(snapshot
            .working
            .review_cases
            .values()
            .filter(|rc| review_ids.contains(&rc.review_id))
            .map(|rc| rc.id.clone())
            .collect())
    }

    async fn list_review_case_ids_by_case(
        &self,
        snapshot: &mut MemorySnapshot,
        case_id: &str,
    ) -> Result<Vec<String>, StorageError> {
        Ok(snapshot
            .working
            .review_cases
            .values()
            .filter(|rc| rc.case_id == case_id)
            .map(|rc| rc.id.clone())
            .collect())
    }

    async fn update_review_case(
        &self,
        snapshot: &mut MemorySnapshot,
        row: &ReviewCase,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        let current = snapshot
            .working
            .review_cases
            .get(&row.id)
            .ok_or_else(|| not_found(table::REVIEW_CASE, &row.id))?;
        if current.row_version != expected_version {
            return Err(conflict(table::REVIEW_CASE, &row.id, expected_version));
        }
        let key = RowKey::ReviewCase(row.id.clone());
        snapshot.expect(key.clone(), expected_version);
        snapshot.dirty.insert(key);

        let mut next = row.clone();
        next.row_version = expected_version + 1;
        snapshot.working.review_cases.insert(row.id.clone(), next);
        Ok(expected_version + 1)
    }

    async fn delete_review_cases(
        &self,
        snapshot: &mut MemorySnapshot,
        ids: &[String],
    ) -> Result<usize, StorageError> {
        let mut removed = 0;
        for id in ids {
            if let Some(row) = snapshot.working.review_cases.remove(id) {
                snapshot.expect_removal(RowKey::ReviewCase(id.clone()), row.row_version);
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ── Review-case records ──────────────────────────────────────────────────

    async fn insert_review_case_record(
        &self,
        snapshot: &mut MemorySnapshot,
        record: ReviewCaseRecord,
    ) -> Result<(), StorageError> {
        if snapshot.working.records.keys().any(|(_, id)| *id == record.id) {
            return Err(StorageError::AlreadyExists {
                table: table::REVIEW_CASE_RECORD,
                id: record.id,
            });
        }
        let seq = self.record_seq.fetch_add(1, Ordering::Relaxed);
        snapshot
            .dirty
            .insert(RowKey::Record(seq, record.id.clone()));
        snapshot
            .working
            .records
            .insert((seq, record.id.clone()), record);
        Ok(())
    }

    async fn delete_review_case_records(
        &self,
        snapshot: &mut MemorySnapshot,
        review_case_ids: &[String],
    ) -> Result<usize, StorageError> {
        let doomed: Vec<(u64, String)> = snapshot
            .working
            .records
            .iter()
            .filter(|(_, r)| review_case_ids.contains(&r.review_case_id))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            snapshot.working.records.remove(key);
            snapshot
                .dirty
                .insert(RowKey::Record(key.0, key.1.clone()));
        }
        Ok(doomed.len())
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    async fn get_baseline(&self, id: &str) -> Result<Baseline, StorageError> {
        self.committed
            .read()
            .await
            .baselines
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(table::BASELINE, id))
    }

    async fn list_baselines(&self, plan_id: &str) -> Result<Vec<Baseline>, StorageError> {
        Ok(self
            .committed
            .read()
            .await
            .baselines
            .values()
            .filter(|b| b.plan_id == plan_id)
            .cloned()
            .collect())
    }

    async fn list_baseline_snapshots(
        &self,
        baseline_id: &str,
    ) -> Result<Vec<BaselineCaseSnapshot>, StorageError> {
        Ok(self
            .committed
            .read()
            .await
            .baseline_snapshots
            .values()
            .filter(|s| s.baseline_id == baseline_id)
            .cloned()
            .collect())
    }

    async fn get_case(&self, id: &str) -> Result<Case, StorageError> {
        self.committed
            .read()
            .await
            .cases
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(table::CASE, id))
    }

    async fn get_review(&self, id: &str) -> Result<Review, StorageError> {
        self.committed
            .read()
            .await
            .reviews
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(table::REVIEW, id))
    }

    async fn list_reviews(&self, plan_id: &str) -> Result<Vec<Review>, StorageError> {
        Ok(self
            .committed
            .read()
            .await
            .reviews
            .values()
            .filter(|r| r.plan_id == plan_id)
            .cloned()
            .collect())
    }

    async fn get_review_case(&self, id: &str) -> Result<ReviewCase, StorageError> {
        self.committed
            .read()
            .await
            .review_cases
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(table::REVIEW_CASE, id))
    }

    async fn list_review_cases(&self, review_id: &str) -> Result<Vec<ReviewCase>, StorageError> {
        Ok(review_cases_of(&*self.committed.read().await, review_id))
    }

    async fn list_review_case_records(
        &self,
        review_case_id: &str,
    ) -> Result<Vec<ReviewCaseRecord>, StorageError> {
        Ok(self
            .committed
            .read()
            .await
            .records
            .values()
            .filter(|r| r.review_case_id == review_case_id)
            .cloned()
            .collect())
    }
}

fn review_cases_of(tables: &Tables, review_id: &str) -> Vec<ReviewCase> {
    let mut rows: Vec<ReviewCase> = tables
        .review_cases
        .values()
        .filter(|rc| rc.review_id == review_id)
        .cloned()
        .collect();
    rows.sort_by(|a, b| (&a.created_at, &a.id).cmp(&(&b.created_at, &b.id)));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CaseReviewStatus, ReviewStatus};

    fn make_case(id: &str) -> Case {
        Case {
            id: id.to_string(),
            project_id: "proj".to_string(),
            plan_id: "plan".to_string(),
            name: format!("case {id}"),
            content: serde_json::json!({ "steps": [] }),
            version: 0,
            review_status: CaseReviewStatus::Prepare,
            reviewer_id: None,
            review_date: None,
        }
    }

    fn make_review(id: &str) -> Review {
        Review {
            id: id.to_string(),
            project_id: "proj".to_string(),
            plan_id: "plan".to_string(),
            name: id.to_string(),
            description: None,
            owner_id: "owner".to_string(),
            participant_ids: Vec::new(),
            status: ReviewStatus::Pending,
            created_by: "owner".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            row_version: 0,
        }
    }

    async fn seed(storage: &MemoryStorage) {
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage.insert_case(&mut snap, make_case("c1")).await.unwrap();
        storage.insert_review(&mut snap, make_review("r1")).await.unwrap();
        storage.commit_snapshot(snap).await.unwrap();
    }

    #[tokio::test]
    async fn increments_from_two_snapshots_both_land() {
        let storage = MemoryStorage::new();
        seed(&storage).await;

        let mut a = storage.begin_snapshot().await.unwrap();
        let mut b = storage.begin_snapshot().await.unwrap();
        let ids = vec!["c1".to_string()];
        storage.increment_case_versions(&mut a, &ids).await.unwrap();
        storage.increment_case_versions(&mut b, &ids).await.unwrap();
        storage.commit_snapshot(a).await.unwrap();
        storage.commit_snapshot(b).await.unwrap();

        assert_eq!(storage.get_case("c1").await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn mirror_does_not_clobber_concurrent_increment() {
        let storage = MemoryStorage::new();
        seed(&storage).await;

        let mut bump = storage.begin_snapshot().await.unwrap();
        let mut mirror = storage.begin_snapshot().await.unwrap();
        storage
            .increment_case_versions(&mut bump, &["c1".to_string()])
            .await
            .unwrap();
        storage
            .mirror_case_review(
                &mut mirror,
                "c1",
                &CaseReviewMirror {
                    review_status: CaseReviewStatus::Pass,
                    reviewer_id: Some("alice".to_string()),
                    review_date: Some("2026-01-02T00:00:00Z".to_string()),
                },
            )
            .await
            .unwrap();
        storage.commit_snapshot(bump).await.unwrap();
        storage.commit_snapshot(mirror).await.unwrap();

        let case = storage.get_case("c1").await.unwrap();
        assert_eq!(case.version, 1);
        assert_eq!(case.review_status, CaseReviewStatus::Pass);
    }

    #[tokio::test]
    async fn stale_review_update_is_rejected_at_commit() {
        let storage = MemoryStorage::new();
        seed(&storage).await;

        let mut first = storage.begin_snapshot().await.unwrap();
        let mut second = storage.begin_snapshot().await.unwrap();
        let mut review = storage.get_review_for_update(&mut first, "r1").await.unwrap();
        review.status = ReviewStatus::InProgress;
        storage.update_review(&mut first, &review, 0).await.unwrap();
        storage.update_review(&mut second, &review, 0).await.unwrap();

        storage.commit_snapshot(first).await.unwrap();
        let err = storage.commit_snapshot(second).await.unwrap_err();
        assert!(err.is_conflict(), "expected conflict, got {err}");
        assert_eq!(storage.get_review("r1").await.unwrap().row_version, 1);
    }

    #[tokio::test]
    async fn stale_review_delete_is_rejected_at_commit() {
        let storage = MemoryStorage::new();
        seed(&storage).await;

        let mut deleter = storage.begin_snapshot().await.unwrap();
        let mut updater = storage.begin_snapshot().await.unwrap();
        let mut review = storage.get_review_for_update(&mut updater, "r1").await.unwrap();
        review.status = ReviewStatus::InProgress;
        storage.update_review(&mut updater, &review, 0).await.unwrap();
        storage.commit_snapshot(updater).await.unwrap();

        let removed = storage
            .delete_reviews(&mut deleter, &["r1".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let err = storage.commit_snapshot(deleter).await.unwrap_err();
        assert!(err.is_conflict(), "expected conflict, got {err}");
        assert_eq!(
            storage.get_review("r1").await.unwrap().status,
            ReviewStatus::InProgress
        );
    }

    #[tokio::test]
    async fn insert_then_delete_in_one_snapshot_commits() {
        let storage = MemoryStorage::new();
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage.insert_review(&mut snap, make_review("r9")).await.unwrap();
        storage
            .delete_reviews(&mut snap, &["r9".to_string()])
            .await
            .unwrap();
        storage.commit_snapshot(snap).await.unwrap();

        assert!(storage.get_review("r9").await.is_err());
    }

    #[tokio::test]
    async fn same_review_name_from_two_snapshots_keeps_one() {
        let storage = MemoryStorage::new();
        let mut a = storage.begin_snapshot().await.unwrap();
        let mut b = storage.begin_snapshot().await.unwrap();
        let mut first = make_review("ra");
        first.name = "Sprint".to_string();
        let mut second = make_review("rb");
        second.name = "Sprint".to_string();
        storage.insert_review(&mut a, first).await.unwrap();
        storage.insert_review(&mut b, second).await.unwrap();

        storage.commit_snapshot(a).await.unwrap();
        let err = storage.commit_snapshot(b).await.unwrap_err();
        assert!(
            matches!(err, StorageError::NameTaken { ref name, .. } if name == "Sprint"),
            "expected NameTaken, got {err}"
        );
        assert!(storage.get_review("rb").await.is_err());
    }

    #[tokio::test]
    async fn renaming_frees_the_old_name_in_the_same_commit() {
        let storage = MemoryStorage::new();
        seed(&storage).await;

        let mut snap = storage.begin_snapshot().await.unwrap();
        let mut old = storage.get_review_for_update(&mut snap, "r1").await.unwrap();
        old.name = "r1-archived".to_string();
        storage.update_review(&mut snap, &old, 0).await.unwrap();
        let mut fresh = make_review("r2");
        fresh.name = "r1".to_string();
        storage.insert_review(&mut snap, fresh).await.unwrap();
        storage.commit_snapshot(snap).await.unwrap();

        assert_eq!(storage.get_review("r2").await.unwrap().name, "r1");
    }

    #[tokio::test]
    async fn records_list_in_append_order() {
        let storage = MemoryStorage::new();
        let mut snap = storage.begin_snapshot().await.unwrap();
        for (i, id) in ["z", "a", "m"].iter().enumerate() {
            let mut record = ReviewCaseRecord::copy_of(
                id.to_string(),
                &ReviewCase {
                    id: "rc".to_string(),
                    review_id: "r1".to_string(),
                    plan_id: "plan".to_string(),
                    case_id: "c1".to_string(),
                    case_name: "case".to_string(),
                    case_version: 0,
                    review_status: CaseReviewStatus::Pass,
                    reviewer_id: None,
                    review_date: None,
                    remark: None,
                    reviewed_case_snapshot: None,
                    created_by: "u".to_string(),
                    created_at: "2026-01-01T00:00:00Z".to_string(),
                    row_version: 0,
                },
            );
            record.row_version = i as i64;
            storage
                .insert_review_case_record(&mut snap, record)
                .await
                .unwrap();
        }
        storage.commit_snapshot(snap).await.unwrap();

        let ids: Vec<String> = storage
            .list_review_case_records("rc")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }
}
