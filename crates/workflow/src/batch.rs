//! Batch admission checks shared by the ledger operations.

use std::collections::BTreeSet;

use casebook_storage::ReviewCase;

use crate::error::Violation;

/// The single plan and review a batch of review-cases belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Scope {
    pub(crate) plan_id: String,
    pub(crate) review_id: String,
}

/// Reject an empty batch or one naming the same id twice.
pub(crate) fn reject_duplicates(ids: &[String]) -> Result<(), Violation> {
    if ids.is_empty() {
        return Err(Violation::EmptyBatch);
    }
    let mut seen = BTreeSet::new();
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(Violation::DuplicateTarget { id: id.clone() });
        }
    }
    Ok(())
}

/// Partition `rows` by plan and by review and require exactly one of each.
pub(crate) fn assert_single_scope(rows: &[ReviewCase]) -> Result<Scope, Violation> {
    let plan_ids: BTreeSet<&str> = rows.iter().map(|r| r.plan_id.as_str()).collect();
    let review_ids: BTreeSet<&str> = rows.iter().map(|r| r.review_id.as_str()).collect();

    let plan_id = match plan_ids.len() {
        0 => return Err(Violation::EmptyBatch),
        1 => plan_ids.iter().next().map(|id| id.to_string()),
        _ => {
            return Err(Violation::MixedPlans {
                plan_ids: plan_ids.iter().map(|id| id.to_string()).collect(),
            })
        }
    };
    let review_id = match review_ids.len() {
        1 => review_ids.iter().next().map(|id| id.to_string()),
        _ => {
            return Err(Violation::MixedReviews {
                review_ids: review_ids.iter().map(|id| id.to_string()).collect(),
            })
        }
    };

    match (plan_id, review_id) {
        (Some(plan_id), Some(review_id)) => Ok(Scope { plan_id, review_id }),
        _ => Err(Violation::EmptyBatch),
    }
}
