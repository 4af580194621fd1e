//! One reconcile of a CloudFormationStack against its collaborators.
//!
//! [`StackReconciler`] never touches the API server itself; it returns a
//! [`ReconcileOutcome`] describing the status to persist, the finalizer
//! change and when to run again. `controller::reconcile` applies it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use crate::artifact::ArtifactLoader;
use crate::cloud::{
    CloudError, CloudFormationApi, MAX_INLINE_TEMPLATE_BYTES, StackPhase,
    TemplateSource, TemplateStore,
};
use crate::config::ControllerConfig;
use crate::crd::{
    CloudFormationStack, CloudFormationStackStatus, ConditionStatus, KeyValue,
};
use crate::source::SourceProvider;

use super::ReconcileErr;
use super::dependency::{StackLookup, check_dependencies};
use super::events::{EventSink, StackEvent};
use super::fsm::{self, ChangeSetStep, LifecycleEffect, LifecycleInput, StackStep};
use super::status::{self, Attempt};
use super::working::{Intervals, WorkingStack, WorkingStackInput};

/// Operator-level settings the engine needs.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub default_region: String,
    pub template_bucket: Option<String>,
    pub default_tags: Vec<KeyValue>,
    pub dependency_requeue: Duration,
}

impl EngineSettings {
    pub fn from_config(cfg: &ControllerConfig) -> Self {
        Self {
            default_region: cfg.default_region.clone(),
            template_bucket: cfg.template_bucket().map(str::to_string),
            default_tags: cfg.default_tags(),
            dependency_requeue: cfg.dependency_requeue(),
        }
    }
}

pub struct Collaborators {
    pub cloud: Arc<dyn CloudFormationApi>,
    pub templates: Arc<dyn TemplateStore>,
    pub sources: Arc<dyn SourceProvider>,
    pub stacks: Arc<dyn StackLookup>,
    pub events: Arc<dyn EventSink>,
    pub artifacts: ArtifactLoader,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizerChange {
    Keep,
    Add,
    Remove,
}

#[derive(Debug)]
pub struct ReconcileOutcome {
    /// Status to persist; `None` leaves the stored status untouched.
    pub status: Option<CloudFormationStackStatus>,
    /// `None` waits for the next change to the object.
    pub requeue: Option<Duration>,
    pub finalizer: FinalizerChange,
    /// Returned to the controller runtime after the status is persisted.
    pub error: Option<ReconcileErr>,
}

impl ReconcileOutcome {
    fn idle() -> Self {
        Self {
            status: None,
            requeue: None,
            finalizer: FinalizerChange::Keep,
            error: None,
        }
    }
}

/// State carried through a single reconcile.
struct Pass<'a> {
    obj: &'a CloudFormationStack,
    current: CloudFormationStackStatus,
    attempt: Attempt,
    intervals: Intervals,
    emitted: bool,
}

impl Pass<'_> {
    fn outcome(
        &self,
        status: CloudFormationStackStatus,
        requeue: Option<Duration>,
    ) -> ReconcileOutcome {
        ReconcileOutcome {
            status: Some(status),
            requeue,
            finalizer: FinalizerChange::Keep,
            error: None,
        }
    }

    fn wait(&self, message: impl Into<String>) -> ReconcileOutcome {
        self.outcome(
            status::progressing(&self.current, &self.attempt, message),
            Some(self.intervals.poll),
        )
    }

    fn succeed(&self, message: impl Into<String>) -> ReconcileOutcome {
        self.outcome(
            status::ready(&self.current, &self.attempt, message),
            Some(self.intervals.interval),
        )
    }

    fn fail(&self, reason: &str, message: impl Into<String>) -> ReconcileOutcome {
        self.outcome(
            status::not_ready(&self.current, &self.attempt, reason, message),
            Some(self.intervals.retry),
        )
    }

    fn fail_unexpected(&self, message: String) -> ReconcileOutcome {
        let mut out = self.fail(status::REASON_UNEXPECTED_STATUS, message.clone());
        out.error = Some(ReconcileErr::Unexpected {
            message,
            requeue: self.intervals.retry,
        });
        out
    }

    fn fail_cloud(&self, reason: &str, message: String) -> ReconcileOutcome {
        let mut out = self.fail(reason, message.clone());
        out.error = Some(ReconcileErr::Cloud {
            message,
            requeue: self.intervals.retry,
        });
        out
    }

    fn api_failed(&self, action: &str, err: CloudError) -> ReconcileOutcome {
        warn!(%action, error = %err, "CloudFormation call failed");
        self.fail_cloud(
            status::REASON_API_CALL_FAILED,
            format!("Failed to {action}: {err}"),
        )
    }
}

pub struct StackReconciler {
    cloud: Arc<dyn CloudFormationApi>,
    templates: Arc<dyn TemplateStore>,
    sources: Arc<dyn SourceProvider>,
    stacks: Arc<dyn StackLookup>,
    events: Arc<dyn EventSink>,
    artifacts: ArtifactLoader,
    settings: EngineSettings,
}

impl StackReconciler {
    pub fn new(collaborators: Collaborators, settings: EngineSettings) -> Self {
        Self {
            cloud: collaborators.cloud,
            templates: collaborators.templates,
            sources: collaborators.sources,
            stacks: collaborators.stacks,
            events: collaborators.events,
            artifacts: collaborators.artifacts,
            settings,
        }
    }

    #[instrument(skip_all, fields(ns = %obj.namespace().unwrap_or_default(), name = %obj.name_any()))]
    pub async fn reconcile(&self, obj: &CloudFormationStack) -> ReconcileOutcome {
        let decision = fsm::lifecycle::evaluate(LifecycleInput::of(obj));
        debug!(phase = ?decision.phase, effects = ?decision.effects, "lifecycle");

        if decision.has(LifecycleEffect::AddFinalizer) {
            // The metadata patch triggers the next reconcile.
            return ReconcileOutcome {
                finalizer: FinalizerChange::Add,
                ..ReconcileOutcome::idle()
            };
        }
        if decision.has(LifecycleEffect::RemoveFinalizer) {
            info!("releasing finalizer without deleting the stack");
            return ReconcileOutcome {
                finalizer: FinalizerChange::Remove,
                ..ReconcileOutcome::idle()
            };
        }
        if decision.has(LifecycleEffect::DestroyStack) {
            return self.reconcile_deletion(obj).await;
        }
        if decision.has(LifecycleEffect::Reconcile) {
            return self.reconcile_active(obj).await;
        }
        debug!("nothing to do");
        ReconcileOutcome::idle()
    }

    fn start<'a>(
        &self,
        obj: &'a CloudFormationStack,
        intervals: Intervals,
    ) -> Pass<'a> {
        Pass {
            obj,
            current: obj.status.clone().unwrap_or_default(),
            attempt: Attempt {
                generation: obj.meta().generation,
                stack_name: Some(obj.spec.stack_name.clone()),
                revision: None,
                change_set: None,
                at: Utc::now().to_rfc3339(),
            },
            intervals,
            emitted: false,
        }
    }

    fn region_of(&self, obj: &CloudFormationStack) -> String {
        obj.spec
            .region
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.settings.default_region)
            .to_string()
    }

    async fn emit(&self, pass: &mut Pass<'_>, mut event: StackEvent) {
        if let Some(rev) = &pass.attempt.revision {
            event = event.with("revision", rev.clone());
        }
        if let Some(cs) = &pass.attempt.change_set {
            event = event.with("changeSet", cs.clone());
        }
        pass.emitted = true;
        self.events.emit(pass.obj, event).await;
    }

    /// Emits an event when the Ready condition changed and the branch taken
    /// did not already report it.
    async fn finish(
        &self,
        mut pass: Pass<'_>,
        outcome: ReconcileOutcome,
    ) -> ReconcileOutcome {
        if pass.emitted {
            return outcome;
        }
        let Some(next) = outcome.status.as_ref().and_then(|s| s.ready_condition())
        else {
            return outcome;
        };
        let before = pass
            .obj
            .ready_condition()
            .map(|c| (c.status, c.reason.clone()));
        if before == Some((next.status, next.reason.clone())) {
            return outcome;
        }
        let reason = next.reason.clone().unwrap_or_default();
        let message = next.message.clone().unwrap_or_default();
        let event = if next.status == ConditionStatus::False {
            StackEvent::warning(&reason, message)
        } else {
            StackEvent::info(&reason, message)
        };
        self.emit(&mut pass, event).await;
        outcome
    }

    async fn reconcile_active(&self, obj: &CloudFormationStack) -> ReconcileOutcome {
        let intervals = match Intervals::from_spec(&obj.spec) {
            Ok(i) => i,
            Err(message) => {
                let mut pass = self.start(obj, Intervals::fallback());
                warn!(%message, "invalid spec");
                let next = status::not_ready(
                    &pass.current,
                    &pass.attempt,
                    status::REASON_INVALID_SPEC,
                    message.clone(),
                );
                if obj.ready_condition().and_then(|c| c.reason.as_deref())
                    != Some(status::REASON_INVALID_SPEC)
                {
                    self.emit(
                        &mut pass,
                        StackEvent::warning(status::REASON_INVALID_SPEC, message),
                    )
                    .await;
                }
                return pass.outcome(next, None);
            }
        };
        let mut pass = self.start(obj, intervals);
        let outcome = self.run(&mut pass).await;
        self.finish(pass, outcome).await
    }

    async fn run(&self, pass: &mut Pass<'_>) -> ReconcileOutcome {
        let obj = pass.obj;
        let ns = obj.namespace().unwrap_or_default();
        let name = obj.name_any();

        if pass.current.observed_generation != obj.meta().generation {
            info!(generation = ?obj.meta().generation, "new generation");
            pass.current = status::progressing(
                &pass.current,
                &pass.attempt,
                format!(
                    "Reconciling generation {}",
                    obj.meta().generation.unwrap_or_default()
                ),
            );
        }

        if let Err(blocked) = check_dependencies(self.stacks.as_ref(), obj).await {
            info!(dependency = %blocked.dependency, "dependency not ready");
            self.emit(
                pass,
                StackEvent::info(
                    status::REASON_DEPENDENCY_NOT_READY,
                    blocked.message.clone(),
                ),
            )
            .await;
            return pass.outcome(
                status::not_ready(
                    &pass.current,
                    &pass.attempt,
                    status::REASON_DEPENDENCY_NOT_READY,
                    blocked.message,
                ),
                Some(self.settings.dependency_requeue),
            );
        }

        let src = &obj.spec.source_ref;
        let src_ns = src.namespace.clone().unwrap_or_else(|| ns.clone());
        let artifact = match self
            .sources
            .get_artifact(&src.kind, &src_ns, &src.name)
            .await
        {
            Ok(Some(a)) => a,
            Ok(None) => {
                return pass.fail(
                    status::REASON_ARTIFACT_FAILED,
                    format!(
                        "Source {} {src_ns}/{} has no artifact yet",
                        src.kind, src.name
                    ),
                );
            }
            Err(e) => {
                return pass.fail(status::REASON_ARTIFACT_FAILED, e.to_string());
            }
        };
        pass.attempt.revision = Some(artifact.revision.clone());

        let template_body = match self
            .artifacts
            .load_template(&artifact, &obj.spec.template_path)
            .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, revision = %artifact.revision, "failed to load template");
                return pass.fail(status::REASON_ARTIFACT_FAILED, e.to_string());
            }
        };

        let working = WorkingStack::build(WorkingStackInput {
            object_name: &name,
            object_namespace: &ns,
            spec: &obj.spec,
            generation: obj.meta().generation.unwrap_or_default(),
            revision: &artifact.revision,
            template_body,
            last_attempted: pass.current.last_attempted_change_set.as_deref(),
            default_region: &self.settings.default_region,
            bucket: self.settings.template_bucket.as_deref(),
            default_tags: &self.settings.default_tags,
        });
        pass.attempt.change_set = Some(working.change_set.to_string());
        debug!(
            stack = %working.stack_name,
            region = %working.region,
            change_set = %working.change_set,
            "working stack"
        );

        self.run_stack(pass, &working).await
    }

    async fn run_stack(
        &self,
        pass: &mut Pass<'_>,
        working: &WorkingStack,
    ) -> ReconcileOutcome {
        let stack = match self
            .cloud
            .describe_stack(&working.region, &working.stack_name)
            .await
        {
            Ok(s) => s,
            Err(e) => return pass.api_failed("describe stack", e),
        };

        match fsm::stack::evaluate(stack.as_ref()) {
            StackStep::ChangeSet {
                is_create,
                recovering,
            } => {
                if recovering {
                    let live = stack.as_ref().map(|s| s.status.as_str()).unwrap_or("");
                    self.emit(
                        pass,
                        StackEvent::warning(
                            status::REASON_PROGRESSING,
                            format!(
                                "Stack {} is in failed status {live}, creating a new change set",
                                working.stack_name
                            ),
                        ),
                    )
                    .await;
                }
                self.run_change_set(pass, working, is_create).await
            }
            StackStep::Wait { message } => pass.wait(message),
            StackStep::ContinueRollback => {
                match self
                    .cloud
                    .continue_update_rollback(&working.region, &working.stack_name)
                    .await
                {
                    Ok(()) => pass.fail(
                        status::REASON_ROLLBACK_FAILED,
                        format!(
                            "Stack {} failed to roll back an update, continuing the rollback",
                            working.stack_name
                        ),
                    ),
                    Err(e) => pass.api_failed("continue update rollback", e),
                }
            }
            StackStep::DeleteUnrecoverable { message } => {
                match self
                    .cloud
                    .delete_stack(&working.region, &working.stack_name)
                    .await
                {
                    Ok(()) => pass.fail(status::REASON_UNRECOVERABLE, message),
                    Err(e) => pass.api_failed("delete stack", e),
                }
            }
            StackStep::Unexpected { message } => pass.fail_unexpected(message),
        }
    }

    async fn run_change_set(
        &self,
        pass: &mut Pass<'_>,
        working: &WorkingStack,
        is_create: bool,
    ) -> ReconcileOutcome {
        let desc = match self
            .cloud
            .describe_change_set(&working.region, &working.stack_name, &working.change_set)
            .await
        {
            Ok(d) => d,
            Err(e) => return pass.api_failed("describe change set", e),
        };
        let step = fsm::change_set::evaluate(desc.as_ref());
        let handle = match &desc {
            Some(d) => d.handle.clone(),
            None => working.change_set.clone(),
        };
        if desc.is_some() {
            pass.attempt.change_set = Some(handle.to_string());
        }

        match step {
            ChangeSetStep::Create => self.create_change_set(pass, working, is_create).await,
            ChangeSetStep::DeleteEmpty => {
                if let Err(e) = self
                    .cloud
                    .delete_change_set(&working.region, &working.stack_name, &handle)
                    .await
                {
                    return pass.api_failed("delete empty change set", e);
                }
                info!(change_set = %handle, "template has no changes");
                pass.succeed(format!(
                    "Stack {} is up to date, revision {} has no changes",
                    working.stack_name, working.revision
                ))
            }
            ChangeSetStep::DeleteFailed { message } => {
                if let Err(e) = self
                    .cloud
                    .delete_change_set(&working.region, &working.stack_name, &handle)
                    .await
                {
                    return pass.api_failed("delete failed change set", e);
                }
                self.emit(
                    pass,
                    StackEvent::warning(status::REASON_CHANGE_SET_FAILED, message.clone()),
                )
                .await;
                pass.fail(status::REASON_CHANGE_SET_FAILED, message)
            }
            ChangeSetStep::Wait { message } => pass.wait(message),
            ChangeSetStep::Ready => pass.succeed(format!(
                "Stack {} is up to date with revision {}",
                working.stack_name, working.revision
            )),
            ChangeSetStep::Execute => {
                if let Err(e) = self
                    .cloud
                    .execute_change_set(&working.region, &working.stack_name, &handle)
                    .await
                {
                    return pass.api_failed("execute change set", e);
                }
                let message = format!(
                    "Executing change set {} on stack {}",
                    handle.name, working.stack_name
                );
                self.emit(pass, StackEvent::info(status::REASON_PROGRESSING, message.clone()))
                    .await;
                pass.wait(message)
            }
            ChangeSetStep::Unexpected { message } => {
                self.emit(
                    pass,
                    StackEvent::warning(status::REASON_UNEXPECTED_STATUS, message.clone()),
                )
                .await;
                pass.fail_unexpected(message)
            }
        }
    }

    async fn create_change_set(
        &self,
        pass: &mut Pass<'_>,
        working: &WorkingStack,
        is_create: bool,
    ) -> ReconcileOutcome {
        let template = match working.bucket.as_deref() {
            Some(bucket) => match self
                .templates
                .upload_template(
                    bucket,
                    &working.region,
                    &working.template_key(),
                    working.template_body.as_bytes(),
                )
                .await
            {
                Ok(url) => TemplateSource::Url(url),
                Err(e) => {
                    return pass.fail_cloud(
                        status::REASON_TEMPLATE_UPLOAD_FAILED,
                        format!("Failed to upload template to bucket {bucket}: {e}"),
                    );
                }
            },
            None if working.template_body.len() > MAX_INLINE_TEMPLATE_BYTES => {
                return pass.fail(
                    status::REASON_TEMPLATE_UPLOAD_FAILED,
                    format!(
                        "Template is {} bytes, more than the {MAX_INLINE_TEMPLATE_BYTES} bytes that can be passed inline; configure a template bucket",
                        working.template_body.len()
                    ),
                );
            }
            None => TemplateSource::Body(working.template_body.clone()),
        };

        let request = working.change_set_request(template);
        let (verb, result) = if is_create {
            ("create", self.cloud.create_stack(&request).await)
        } else {
            ("update", self.cloud.update_stack(&request).await)
        };
        match result {
            Ok(handle) => {
                info!(change_set = %handle, %verb, "created change set");
                pass.attempt.change_set = Some(handle.to_string());
                pass.wait(format!(
                    "Created change set {} to {verb} stack {}",
                    handle.name, working.stack_name
                ))
            }
            Err(e) => pass.api_failed(&format!("create change set to {verb} stack"), e),
        }
    }

    async fn reconcile_deletion(&self, obj: &CloudFormationStack) -> ReconcileOutcome {
        let intervals = Intervals::from_spec(&obj.spec).unwrap_or_else(|_| Intervals::fallback());
        let mut pass = self.start(obj, intervals);
        let outcome = self.run_deletion(&mut pass).await;
        self.finish(pass, outcome).await
    }

    async fn run_deletion(&self, pass: &mut Pass<'_>) -> ReconcileOutcome {
        let obj = pass.obj;
        let region = self.region_of(obj);
        let stack_name = obj.spec.stack_name.as_str();

        let stack = match self.cloud.describe_stack(&region, stack_name).await {
            Ok(s) => s,
            Err(e) => return pass.api_failed("describe stack", e),
        };
        let stack = match stack {
            Some(s) if s.status != "DELETE_COMPLETE" => s,
            _ => {
                info!(stack = %stack_name, "stack is gone, releasing finalizer");
                return ReconcileOutcome {
                    finalizer: FinalizerChange::Remove,
                    ..ReconcileOutcome::idle()
                };
            }
        };

        if stack.phase() == StackPhase::InProgress {
            return pass.wait(format!(
                "Waiting for stack {stack_name} to settle before deleting it (status {})",
                stack.status
            ));
        }
        if stack.status == "DELETE_FAILED" {
            self.emit(
                pass,
                StackEvent::warning(
                    status::REASON_UNRECOVERABLE,
                    format!(
                        "Previous deletion of stack {stack_name} failed, retrying: {}",
                        stack.reason()
                    ),
                ),
            )
            .await;
        }
        if let Err(e) = self.cloud.delete_stack(&region, stack_name).await {
            return pass.api_failed("delete stack", e);
        }
        pass.wait(format!("Deleting stack {stack_name}"))
    }
}
