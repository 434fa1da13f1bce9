use std::collections::BTreeSet;

use async_trait::async_trait;

use super::{AuthorizationGuard, Permission, UserDirectory};
use crate::context::RequestContext;
use crate::error::WorkflowError;

/// Grants every permission and knows every user.
///
/// Display names resolve to the object id itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl AuthorizationGuard for AllowAll {
    async fn check(
        &self,
        _ctx: &RequestContext,
        _plan_id: &str,
        _permission: Permission,
    ) -> Result<(), WorkflowError> {
        Ok(())
    }

    async fn display_name(&self, object_id: &str) -> Result<String, WorkflowError> {
        Ok(object_id.to_string())
    }
}

#[async_trait]
impl UserDirectory for AllowAll {
    async fn missing_users(&self, _user_ids: &[String]) -> Result<Vec<String>, WorkflowError> {
        Ok(Vec::new())
    }
}

/// A fixed set of known users.
#[derive(Debug, Default, Clone)]
pub struct StaticUsers {
    known: BTreeSet<String>,
}

impl StaticUsers {
    pub fn new<I, T>(users: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            known: users.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl UserDirectory for StaticUsers {
    async fn missing_users(&self, user_ids: &[String]) -> Result<Vec<String>, WorkflowError> {
        let mut missing: Vec<String> = user_ids
            .iter()
            .filter(|id| !self.known.contains(*id))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        Ok(missing)
    }
}
