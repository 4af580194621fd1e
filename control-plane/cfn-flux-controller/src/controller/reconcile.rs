use std::sync::Arc;

use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::crd::{CloudFormationStack, CloudFormationStackStatus, FINALIZER};

use super::engine::FinalizerChange;
use super::status_reducer::{merge_status, should_patch_status};
use super::{ControllerContext, ReconcileErr};

#[instrument(skip_all, fields(ns = %obj.namespace().unwrap_or_default(), name = %obj.name_any()))]
pub async fn reconcile(
    obj: Arc<CloudFormationStack>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    let Some(ns) = obj.namespace() else {
        return Err(ReconcileErr::Spec(
            "CloudFormationStack must be namespaced".into(),
        ));
    };
    let name = obj.name_any();
    let api: Api<CloudFormationStack> =
        Api::namespaced(ctx.client.clone(), &ns);

    let outcome = ctx.engine.reconcile(&obj).await;

    match outcome.finalizer {
        FinalizerChange::Add => add_finalizer(&api, &obj).await?,
        FinalizerChange::Remove => remove_finalizer(&api, &obj).await?,
        FinalizerChange::Keep => {}
    }
    if let Some(desired) = outcome.status {
        persist_status(&api, &name, desired).await?;
    }
    if let Some(err) = outcome.error {
        return Err(err);
    }
    Ok(match outcome.requeue {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    })
}

async fn add_finalizer(
    api: &Api<CloudFormationStack>,
    obj: &CloudFormationStack,
) -> Result<(), ReconcileErr> {
    let mut finals = obj.meta().finalizers.clone().unwrap_or_default();
    finals.push(FINALIZER.to_string());
    let patch = json!({"metadata": {"finalizers": finals}});
    api.patch(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    debug!("added finalizer");
    Ok(())
}

async fn remove_finalizer(
    api: &Api<CloudFormationStack>,
    obj: &CloudFormationStack,
) -> Result<(), ReconcileErr> {
    let finals: Vec<String> = obj
        .meta()
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f != FINALIZER)
        .collect();
    let patch = json!({"metadata": {"finalizers": finals}});
    match api
        .patch(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => {
            info!("removed finalizer");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Re-reads the object and merges the computed status onto whatever is
/// stored now, skipping the write when only timestamps would change.
async fn persist_status(
    api: &Api<CloudFormationStack>,
    name: &str,
    desired: CloudFormationStackStatus,
) -> Result<(), ReconcileErr> {
    let Some(latest) = api.get_opt(name).await? else {
        debug!("object is gone, not persisting status");
        return Ok(());
    };
    let current = latest.status.as_ref();
    let merged = merge_status(current, desired);
    if !should_patch_status(current, &merged) {
        return Ok(());
    }
    let patch = json!({ "status": merged });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
