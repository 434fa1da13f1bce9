//! Backend-agnostic checks every `CasebookStorage` implementation must pass.
//!
//! Categories, in run order:
//!
//! - `error`: missing rows, duplicate inserts and stale versions map to the
//!   right `StorageError` variant
//! - `snapshot`: a snapshot sees its own writes, nobody else does until commit
//! - `commit`: multi-row snapshots land whole or not at all
//! - `version`: `row_version` bookkeeping and optimistic conflict detection
//! - `audit`: baseline snapshots are write-once, review-case records keep
//!   append order
//! - `concurrent`: racing tokio tasks on the same and on disjoint rows
//!
//! A backend crate wires the suite into its own tests with a factory that
//! yields an empty store per check:
//!
//! ```ignore
//! #[tokio::test(flavor = "multi_thread")]
//! async fn sqlite_backend_conforms() {
//!     let report = casebook_storage::conformance::run_conformance_suite(|| async {
//!         SqliteStorage::open_in_memory().await.unwrap()
//!     })
//!     .await;
//!     assert_eq!(report.failed, 0, "{report}");
//! }
//! ```

mod audit;
mod commit;
mod concurrent;
mod error;
mod snapshot;
mod version;

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;

use crate::record::{
    Baseline, Case, CaseReviewStatus, Review, ReviewCase, ReviewCaseRecord, ReviewStatus,
};
use crate::CasebookStorage;

/// Outcome of one named check.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// One of the module-level categories.
    pub category: String,
    pub name: String,
    pub passed: bool,
    /// Why the check failed; `None` on success.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(reason) => (false, Some(reason)),
        };
        TestResult {
            category: category.to_owned(),
            name: name.to_owned(),
            passed,
            message,
        }
    }
}

/// Every [`TestResult`] of a run plus the tallies.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl ConformanceReport {
    fn tally(results: Vec<TestResult>) -> Self {
        let total = results.len();
        let failed = results.iter().filter(|r| !r.passed).count();
        ConformanceReport {
            results,
            passed: total - failed,
            failed,
            total,
        }
    }

    /// Checks that did not pass, in run order.
    pub fn failures(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "casebook storage conformance: {} of {} checks passed",
            self.passed, self.total
        )?;
        for failure in self.failures() {
            let reason = failure.message.as_deref().unwrap_or("no reason given");
            writeln!(f, "  {}::{} failed: {}", failure.category, failure.name, reason)?;
        }
        Ok(())
    }
}

/// Run every category against stores produced by `factory`.
///
/// `factory` is invoked once per check and must return an empty store.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: CasebookStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = error::run_error_tests(&factory).await;
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(commit::run_commit_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(audit::run_audit_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);
    ConformanceReport::tally(results)
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

const T0: &str = "2025-01-01T00:00:00Z";

fn make_baseline(id: &str, plan_id: &str, case_ids: &[&str]) -> Baseline {
    Baseline {
        id: id.to_string(),
        project_id: "test-project".to_string(),
        plan_id: plan_id.to_string(),
        name: format!("baseline {id}"),
        case_ids: case_ids.iter().map(|c| c.to_string()).collect::<BTreeSet<_>>(),
        established: false,
        established_at: None,
        established_by: None,
        created_by: "test-user".to_string(),
        created_at: T0.to_string(),
        row_version: 0,
    }
}

fn make_case(id: &str, plan_id: &str) -> Case {
    Case {
        id: id.to_string(),
        project_id: "test-project".to_string(),
        plan_id: plan_id.to_string(),
        name: format!("case {id}"),
        content: serde_json::json!({ "steps": ["open", "check"] }),
        version: 0,
        review_status: CaseReviewStatus::Prepare,
        reviewer_id: None,
        review_date: None,
    }
}

fn make_review(id: &str, plan_id: &str) -> Review {
    Review {
        id: id.to_string(),
        project_id: "test-project".to_string(),
        plan_id: plan_id.to_string(),
        name: format!("review {id}"),
        description: None,
        owner_id: "test-user".to_string(),
        participant_ids: vec!["test-user".to_string()],
        status: ReviewStatus::Pending,
        created_by: "test-user".to_string(),
        created_at: T0.to_string(),
        updated_at: T0.to_string(),
        row_version: 0,
    }
}

fn make_review_case(id: &str, review_id: &str, case_id: &str) -> ReviewCase {
    ReviewCase {
        id: id.to_string(),
        review_id: review_id.to_string(),
        plan_id: "plan-1".to_string(),
        case_id: case_id.to_string(),
        case_name: format!("case {case_id}"),
        case_version: 0,
        review_status: CaseReviewStatus::Prepare,
        reviewer_id: None,
        review_date: None,
        remark: None,
        reviewed_case_snapshot: None,
        created_by: "test-user".to_string(),
        created_at: T0.to_string(),
        row_version: 0,
    }
}

fn make_record(id: &str, source: &ReviewCase) -> ReviewCaseRecord {
    ReviewCaseRecord::copy_of(id.to_string(), source)
}

/// Seed a plan with one case, one review and one review-case, committed.
async fn seed_review<S: CasebookStorage>(s: &S) -> Result<(), String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_case(&mut snap, make_case("case-1", "plan-1"))
        .await
        .map_err(|e| format!("insert case: {e}"))?;
    s.insert_review(&mut snap, make_review("review-1", "plan-1"))
        .await
        .map_err(|e| format!("insert review: {e}"))?;
    s.insert_review_case(&mut snap, make_review_case("rc-1", "review-1", "case-1"))
        .await
        .map_err(|e| format!("insert review case: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit seed: {e}"))
}

/// Seed one unestablished baseline over two cases, committed.
async fn seed_baseline<S: CasebookStorage>(s: &S) -> Result<(), String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    for id in ["case-1", "case-2"] {
        s.insert_case(&mut snap, make_case(id, "plan-1"))
            .await
            .map_err(|e| format!("insert case: {e}"))?;
    }
    s.insert_baseline(&mut snap, make_baseline("base-1", "plan-1", &["case-1", "case-2"]))
        .await
        .map_err(|e| format!("insert baseline: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit seed: {e}"))
}
