pub mod dependency;
pub mod engine;
pub mod events;
pub mod fsm;
pub mod identity;
pub mod reconcile;
pub mod status;
pub mod status_reducer;
pub mod working;


use std::sync::Arc;
use std::time::Duration;

use aws_config::SdkConfig;
use futures_util::StreamExt;
use kube::{
    Client, ResourceExt,
    api::Api,
    runtime::{
        Controller,
        controller::{self, Action},
        events::{Recorder, Reporter},
        watcher,
    },
};
use tracing::{error, info, warn};

use crate::artifact::ArtifactLoader;
use crate::cloud::aws::{AwsCloudFormation, S3TemplateStore};
use crate::config::ControllerConfig;
use crate::crd::CloudFormationStack;
use crate::source::KubeSourceProvider;

use dependency::KubeStackLookup;
use engine::{Collaborators, EngineSettings, StackReconciler};
use events::KubeEventSink;
use working::DEFAULT_RETRY_INTERVAL;

pub const CONTROLLER_NAME: &str = "cfn-flux-controller";

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("{message}")]
    Cloud { message: String, requeue: Duration },
    #[error("{message}")]
    Unexpected { message: String, requeue: Duration },
    #[error("invalid object: {0}")]
    Spec(String),
}

impl ReconcileErr {
    /// Delay before the object is retried; `None` waits for a change.
    pub fn requeue(&self) -> Option<Duration> {
        match self {
            ReconcileErr::Kube(_) => Some(DEFAULT_RETRY_INTERVAL),
            ReconcileErr::Cloud { requeue, .. }
            | ReconcileErr::Unexpected { requeue, .. } => Some(*requeue),
            ReconcileErr::Spec(_) => None,
        }
    }
}

pub struct ControllerContext {
    pub client: Client,
    pub cfg: ControllerConfig,
    pub engine: StackReconciler,
}

/// Wires the production collaborators around the engine.
pub fn build_engine(
    client: Client,
    cfg: &ControllerConfig,
    sdk: SdkConfig,
) -> anyhow::Result<StackReconciler> {
    let reporter = Reporter {
        controller: CONTROLLER_NAME.into(),
        instance: Some(cfg.pod_namespace.clone()),
    };
    let collaborators = Collaborators {
        cloud: Arc::new(AwsCloudFormation::new(sdk.clone())),
        templates: Arc::new(S3TemplateStore::new(sdk)),
        sources: Arc::new(KubeSourceProvider::new(client.clone())),
        stacks: Arc::new(KubeStackLookup::new(client.clone())),
        events: Arc::new(KubeEventSink::new(Recorder::new(client, reporter))),
        artifacts: ArtifactLoader::new(cfg.http.clone())?,
    };
    Ok(StackReconciler::new(
        collaborators,
        EngineSettings::from_config(cfg),
    ))
}

pub async fn run_controller(
    client: Client,
    cfg: ControllerConfig,
    sdk: SdkConfig,
) -> anyhow::Result<()> {
    let api: Api<CloudFormationStack> = match cfg.watch_namespace.as_deref() {
        Some(ns) if !ns.trim().is_empty() => {
            Api::namespaced(client.clone(), ns.trim())
        }
        _ => Api::all(client.clone()),
    };
    let engine = build_engine(client.clone(), &cfg, sdk)?;
    let concurrency = cfg.max_concurrent_reconciles.max(1);
    let ctx = Arc::new(ControllerContext {
        client,
        cfg,
        engine,
    });

    info!(concurrency, "starting CloudFormationStack controller");
    Controller::new(api, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile::reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    info!(name = %obj_ref.name, ?action, "reconciled")
                }
                Err(e) => error!(error = %e, "reconcile error"),
            }
        })
        .await;

    Ok(())
}

pub fn error_policy(
    obj: Arc<CloudFormationStack>,
    err: &ReconcileErr,
    _ctx: Arc<ControllerContext>,
) -> Action {
    warn!(name = %obj.name_any(), error = %err, "reconcile failed");
    match err.requeue() {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}
