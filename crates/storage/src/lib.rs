pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{MemorySnapshot, MemoryStorage};
pub use record::{
    table, Baseline, BaselineCaseSnapshot, Case, CaseReviewMirror, CaseReviewStatus, Review,
    ReviewCase, ReviewCaseRecord, ReviewStatus,
};
pub use traits::CasebookStorage;
