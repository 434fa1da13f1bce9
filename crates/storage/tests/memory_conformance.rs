//! Runs the backend-agnostic conformance suite against `MemoryStorage`.

use casebook_storage::conformance::run_conformance_suite;
use casebook_storage::MemoryStorage;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_storage_passes_conformance() {
    let report = run_conformance_suite(|| async { MemoryStorage::new() }).await;
    assert!(report.total > 0);
    assert_eq!(report.failed, 0, "{report}");
}

#[tokio::test]
async fn report_lists_every_category() {
    let report = run_conformance_suite(|| async { MemoryStorage::new() }).await;
    for category in ["error", "snapshot", "commit", "version", "audit", "concurrent"] {
        assert!(
            report.results.iter().any(|r| r.category == category),
            "missing category {category}"
        );
    }
}
