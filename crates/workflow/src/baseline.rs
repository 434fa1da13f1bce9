//! Baselines: mutable case sets that are frozen exactly once.

use std::collections::BTreeSet;
use std::sync::Arc;

use casebook_storage::{Baseline, BaselineCaseSnapshot, CasebookStorage};
use tracing::{debug, info, instrument};

use crate::collab::{Activity, ActivityKind, Permission};
use crate::context::RequestContext;
use crate::engine::Services;
use crate::error::{Violation, WorkflowError};
use crate::snapshotter::BaselineCaseSnapshotter;
use crate::stamp;
use crate::tx::Outcome;

/// Owns a baseline's case set and its establish/delete lifecycle.
pub struct BaselineStore<S> {
    services: Arc<Services<S>>,
}

impl<S: CasebookStorage> BaselineStore<S> {
    pub(crate) fn new(services: Arc<Services<S>>) -> Self {
        Self { services }
    }

    // ── Mutations ────────────────────────────────────────────────────────────

    /// Create an unestablished baseline on `plan_id`.
    #[instrument(skip_all, fields(plan_id = %plan_id, user = %ctx.user_id))]
    pub async fn create(
        &self,
        ctx: &RequestContext,
        plan_id: &str,
        name: &str,
        case_ids: Vec<String>,
    ) -> Result<Baseline, WorkflowError> {
        let svc = &self.services;
        svc.authorize(ctx, plan_id, Permission::EstablishBaseline)
            .await?;
        let name = svc.checked_name(name)?;
        let case_ids: BTreeSet<String> = case_ids.into_iter().collect();
        if !case_ids.is_empty() {
            let ids: Vec<String> = case_ids.iter().cloned().collect();
            svc.plans.check_cases(plan_id, &ids).await?;
        }

        let baseline = Baseline {
            id: stamp::new_id(),
            project_id: ctx.project_id.clone(),
            plan_id: plan_id.to_string(),
            name,
            case_ids,
            established: false,
            established_at: None,
            established_by: None,
            created_by: ctx.user_id.clone(),
            created_at: stamp::now_rfc3339(),
            row_version: 0,
        };

        let mut snapshot = svc.begin().await?;
        let result = svc
            .storage
            .insert_baseline(&mut snapshot, baseline.clone())
            .await
            .map(|()| Outcome::quiet(baseline))
            .map_err(WorkflowError::from);
        let baseline = svc.finish(snapshot, result).await?;
        info!(baseline_id = %baseline.id, cases = baseline.case_ids.len(), "baseline created");
        Ok(baseline)
    }

    /// Union `case_ids` into the baseline's case set.
    #[instrument(skip_all, fields(baseline_id = %baseline_id, user = %ctx.user_id))]
    pub async fn add_cases(
        &self,
        ctx: &RequestContext,
        baseline_id: &str,
        case_ids: Vec<String>,
    ) -> Result<Baseline, WorkflowError> {
        self.edit_cases(ctx, baseline_id, case_ids, CaseSetEdit::Add)
            .await
    }

    /// Subtract `case_ids` from the baseline's case set.
    #[instrument(skip_all, fields(baseline_id = %baseline_id, user = %ctx.user_id))]
    pub async fn delete_cases(
        &self,
        ctx: &RequestContext,
        baseline_id: &str,
        case_ids: Vec<String>,
    ) -> Result<Baseline, WorkflowError> {
        self.edit_cases(ctx, baseline_id, case_ids, CaseSetEdit::Remove)
            .await
    }

    async fn edit_cases(
        &self,
        ctx: &RequestContext,
        baseline_id: &str,
        case_ids: Vec<String>,
        edit: CaseSetEdit,
    ) -> Result<Baseline, WorkflowError> {
        let svc = &self.services;
        let mut snapshot = svc.begin().await?;
        let result: Result<Outcome<Baseline>, WorkflowError> = async {
            let mut baseline = svc
                .storage
                .get_baseline_for_update(&mut snapshot, baseline_id)
                .await?;
            svc.authorize(ctx, &baseline.plan_id, Permission::EstablishBaseline)
                .await?;
            if baseline.established {
                return Err(Violation::BaselineEstablished {
                    baseline_id: baseline.id.clone(),
                }
                .into());
            }
            if case_ids.is_empty() {
                return Err(Violation::EmptyBatch.into());
            }
            svc.plans.check_cases(&baseline.plan_id, &case_ids).await?;

            match edit {
                CaseSetEdit::Add => baseline.case_ids.extend(case_ids.iter().cloned()),
                CaseSetEdit::Remove => {
                    for id in &case_ids {
                        baseline.case_ids.remove(id);
                    }
                }
            }
            let expected = baseline.row_version;
            baseline.row_version = svc
                .storage
                .update_baseline(&mut snapshot, &baseline, expected)
                .await?;
            Ok(Outcome::quiet(baseline))
        }
        .await;
        let baseline = svc.finish(snapshot, result).await?;
        debug!(baseline_id, cases = baseline.case_ids.len(), ?edit, "baseline case set changed");
        Ok(baseline)
    }

    /// Freeze the baseline: snapshot every case, bump every case version and
    /// flip the established flag, all in one snapshot.
    #[instrument(skip_all, fields(baseline_id = %baseline_id, user = %ctx.user_id))]
    pub async fn establish(
        &self,
        ctx: &RequestContext,
        baseline_id: &str,
    ) -> Result<Baseline, WorkflowError> {
        let svc = &self.services;
        let mut snapshot = svc.begin().await?;
        let result: Result<Outcome<Baseline>, WorkflowError> = async {
            let mut baseline = svc
                .storage
                .get_baseline_for_update(&mut snapshot, baseline_id)
                .await?;
            svc.authorize(ctx, &baseline.plan_id, Permission::EstablishBaseline)
                .await?;
            if baseline.established {
                return Err(Violation::BaselineEstablished {
                    baseline_id: baseline.id.clone(),
                }
                .into());
            }
            if baseline.case_ids.is_empty() {
                return Err(Violation::EmptyBaseline {
                    baseline_id: baseline.id.clone(),
                }
                .into());
            }

            let now = stamp::now_rfc3339();
            let cases = BaselineCaseSnapshotter::new(svc.storage.as_ref())
                .capture(&mut snapshot, &baseline, &now)
                .await?;

            baseline.established = true;
            baseline.established_at = Some(now.clone());
            baseline.established_by = Some(ctx.user_id.clone());
            let expected = baseline.row_version;
            baseline.row_version = svc
                .storage
                .update_baseline(&mut snapshot, &baseline, expected)
                .await?;

            let plan_name = svc.plan_label(&baseline.plan_id).await;
            let activities = cases
                .iter()
                .map(|case| Activity {
                    project_id: baseline.project_id.clone(),
                    plan_id: baseline.plan_id.clone(),
                    source_id: case.id.clone(),
                    kind: ActivityKind::BaselineEstablished,
                    operator_id: ctx.user_id.clone(),
                    content: format!(
                        "baseline '{}' of plan '{}' froze case '{}' at version {}",
                        baseline.name, plan_name, case.name, case.version
                    ),
                    created_at: now.clone(),
                })
                .collect();
            Ok(Outcome::with_activities(baseline, activities))
        }
        .await;
        let baseline = svc.finish(snapshot, result).await?;
        info!(baseline_id, cases = baseline.case_ids.len(), "baseline established");
        Ok(baseline)
    }

    /// Delete baselines and their snapshot rows. The caller needs the
    /// permission on every plan the baselines belong to.
    #[instrument(skip_all, fields(count = baseline_ids.len(), user = %ctx.user_id))]
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        baseline_ids: Vec<String>,
    ) -> Result<usize, WorkflowError> {
        let ids: Vec<String> = baseline_ids
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Err(Violation::EmptyBatch.into());
        }

        let svc = &self.services;
        let mut snapshot = svc.begin().await?;
        let result: Result<Outcome<usize>, WorkflowError> = async {
            let baselines = svc
                .storage
                .get_baselines_for_update(&mut snapshot, &ids)
                .await?;
            let plan_ids: BTreeSet<&str> = baselines.iter().map(|b| b.plan_id.as_str()).collect();
            for plan_id in plan_ids {
                svc.authorize(ctx, plan_id, Permission::EstablishBaseline)
                    .await?;
            }
            let removed = remove_baselines(svc, &mut snapshot, &ids).await?;
            Ok(Outcome::quiet(removed))
        }
        .await;
        let removed = svc.finish(snapshot, result).await?;
        info!(removed, "baselines deleted");
        Ok(removed)
    }

    /// Delete every baseline of a plan, with their snapshot rows.
    #[instrument(skip_all, fields(plan_id = %plan_id, user = %ctx.user_id))]
    pub async fn delete_by_plan(
        &self,
        ctx: &RequestContext,
        plan_id: &str,
    ) -> Result<usize, WorkflowError> {
        let svc = &self.services;
        svc.authorize(ctx, plan_id, Permission::EstablishBaseline)
            .await?;
        let mut snapshot = svc.begin().await?;
        let result: Result<Outcome<usize>, WorkflowError> = async {
            let ids = svc
                .storage
                .list_baseline_ids_by_plan(&mut snapshot, plan_id)
                .await?;
            let removed = remove_baselines(svc, &mut snapshot, &ids).await?;
            Ok(Outcome::quiet(removed))
        }
        .await;
        let removed = svc.finish(snapshot, result).await?;
        info!(plan_id, removed, "plan baselines deleted");
        Ok(removed)
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub async fn get(&self, baseline_id: &str) -> Result<Baseline, WorkflowError> {
        Ok(self.services.storage.get_baseline(baseline_id).await?)
    }

    pub async fn list_by_plan(&self, plan_id: &str) -> Result<Vec<Baseline>, WorkflowError> {
        Ok(self.services.storage.list_baselines(plan_id).await?)
    }

    /// Frozen case rows of an established baseline, ordered by case id.
    pub async fn snapshots(
        &self,
        baseline_id: &str,
    ) -> Result<Vec<BaselineCaseSnapshot>, WorkflowError> {
        let storage = &self.services.storage;
        storage.get_baseline(baseline_id).await?;
        Ok(storage.list_baseline_snapshots(baseline_id).await?)
    }
}

#[derive(Debug, Clone, Copy)]
enum CaseSetEdit {
    Add,
    Remove,
}

async fn remove_baselines<S: CasebookStorage>(
    svc: &Services<S>,
    snapshot: &mut S::Snapshot,
    ids: &[String],
) -> Result<usize, WorkflowError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let snapshots = svc
        .storage
        .delete_baseline_snapshots(snapshot, ids)
        .await?;
    let removed = svc.storage.delete_baselines(snapshot, ids).await?;
    debug!(removed, snapshots, "baseline rows removed");
    Ok(removed)
}
