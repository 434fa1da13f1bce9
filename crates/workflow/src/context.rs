use serde::{Deserialize, Serialize};

/// The caller on whose behalf an operation runs.
///
/// Every engine operation takes the context explicitly; reviewer, operator
/// and creator stamps are taken from `user_id`, name uniqueness is scoped
/// by `project_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: String,
    pub project_id: String,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
        }
    }
}
