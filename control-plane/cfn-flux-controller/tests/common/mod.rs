#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cfn_flux_controller::artifact::ArtifactLoader;
use cfn_flux_controller::cloud::memory::{MemoryCloudFormation, MemoryTemplateStore};
use cfn_flux_controller::config::ArtifactHttpConfig;
use cfn_flux_controller::controller::dependency::MemoryStackLookup;
use cfn_flux_controller::controller::engine::{
    Collaborators, EngineSettings, FinalizerChange, ReconcileOutcome,
    StackReconciler,
};
use cfn_flux_controller::controller::events::MemoryEventSink;
use cfn_flux_controller::controller::status_reducer::merge_status;
use cfn_flux_controller::crd::{
    CloudFormationStack, CloudFormationStackSpec, Condition, ConditionStatus,
    FINALIZER, SourceReference,
};
use cfn_flux_controller::source::{Artifact, StaticSourceProvider};
use flate2::{Compression, write::GzEncoder};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use sha2::{Digest, Sha256};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const NS: &str = "infra";
pub const REGION: &str = "us-east-1";
pub const STACK_NAME: &str = "app-stack";
pub const SOURCE: &str = "repo";
pub const REVISION: &str = "main@sha1:abc123";

pub const TEMPLATE: &str = r#"AWSTemplateFormatVersion: "2010-09-09"
Resources:
  Topic:
    Type: AWS::SNS::Topic
"#;

/// Gzip tarball holding `files` at the given relative paths.
pub fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (p, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, p, body.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn http_config() -> ArtifactHttpConfig {
    ArtifactHttpConfig {
        source_controller_localhost: None,
        retries: 2,
        timeout_secs: 5,
    }
}

pub fn loader(cfg: ArtifactHttpConfig) -> ArtifactLoader {
    ArtifactLoader::new(cfg)
        .unwrap()
        .with_backoff(Duration::from_millis(10))
}

/// Serves `archive` from the mock source-controller and returns its URL.
pub async fn serve_archive(server: &MockServer, file: &str, archive: Vec<u8>) -> String {
    let route = format!("/gitrepository/{NS}/{SOURCE}/{file}");
    Mock::given(method("GET"))
        .and(path(route.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .mount(server)
        .await;
    format!("{}{route}", server.uri())
}

pub fn stack(name: &str) -> CloudFormationStack {
    let mut obj = CloudFormationStack::new(
        name,
        CloudFormationStackSpec {
            stack_name: STACK_NAME.into(),
            region: Some(REGION.into()),
            template_path: "stack.yaml".into(),
            source_ref: SourceReference {
                kind: "GitRepository".into(),
                name: SOURCE.into(),
                namespace: None,
            },
            interval: "10m".into(),
            ..Default::default()
        },
    );
    obj.metadata.namespace = Some(NS.into());
    obj.metadata.generation = Some(1);
    obj
}

pub fn with_finalizer(mut obj: CloudFormationStack) -> CloudFormationStack {
    obj.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
    obj
}

pub fn mark_deleting(obj: &mut CloudFormationStack) {
    let ts: Time = serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).unwrap();
    obj.metadata.deletion_timestamp = Some(ts);
}

/// Status of a dependency that finished reconciling its current generation.
pub fn mark_ready(obj: &mut CloudFormationStack) {
    let generation = obj.metadata.generation;
    let mut status = obj.status.clone().unwrap_or_default();
    status.observed_generation = generation;
    status.conditions = vec![Condition {
        type_: "Ready".into(),
        status: ConditionStatus::True,
        reason: Some("Succeeded".into()),
        message: None,
        observed_generation: generation,
        last_transition_time: None,
    }];
    obj.status = Some(status);
}

pub fn ready(obj: &CloudFormationStack) -> (ConditionStatus, String) {
    let cond = obj.ready_condition().expect("Ready condition");
    (cond.status, cond.reason.clone().unwrap_or_default())
}

/// The engine wired to in-memory collaborators and a mock source-controller.
pub struct Harness {
    pub cloud: MemoryCloudFormation,
    pub templates: MemoryTemplateStore,
    pub sources: StaticSourceProvider,
    pub stacks: MemoryStackLookup,
    pub events: MemoryEventSink,
    pub server: MockServer,
    pub engine: StackReconciler,
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        default_region: REGION.into(),
        template_bucket: None,
        default_tags: vec![],
        dependency_requeue: Duration::from_secs(30),
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(settings()).await
    }

    pub async fn with_settings(settings: EngineSettings) -> Self {
        let cloud = MemoryCloudFormation::new();
        let templates = MemoryTemplateStore::new();
        let sources = StaticSourceProvider::new();
        let stacks = MemoryStackLookup::new();
        let events = MemoryEventSink::new();
        let engine = StackReconciler::new(
            Collaborators {
                cloud: Arc::new(cloud.clone()),
                templates: Arc::new(templates.clone()),
                sources: Arc::new(sources.clone()),
                stacks: Arc::new(stacks.clone()),
                events: Arc::new(events.clone()),
                artifacts: loader(http_config()),
            },
            settings,
        );
        Self {
            cloud,
            templates,
            sources,
            stacks,
            events,
            server: MockServer::start().await,
            engine,
        }
    }

    /// Publishes a source artifact with `stack.yaml` holding `template`.
    pub async fn publish(&self, revision: &str, template: &str) {
        let archive = tarball(&[("stack.yaml", template)]);
        let digest = format!("sha256:{}", sha256_hex(&archive));
        let file = format!("{}.tar.gz", revision.replace([':', '@'], "-"));
        let url = serve_archive(&self.server, &file, archive).await;
        self.sources
            .insert(
                "GitRepository",
                NS,
                SOURCE,
                Some(Artifact {
                    url,
                    revision: revision.into(),
                    digest: Some(digest),
                    checksum: None,
                }),
            )
            .await;
    }

    /// Runs one reconcile and applies its outcome to `obj` the way the
    /// controller would persist it.
    pub async fn step(&self, obj: &mut CloudFormationStack) -> ReconcileOutcome {
        let outcome = self.engine.reconcile(obj).await;
        match outcome.finalizer {
            FinalizerChange::Add => obj
                .metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(FINALIZER.to_string()),
            FinalizerChange::Remove => {
                if let Some(f) = obj.metadata.finalizers.as_mut() {
                    f.retain(|x| x != FINALIZER);
                }
            }
            FinalizerChange::Keep => {}
        }
        if let Some(status) = &outcome.status {
            obj.status = Some(merge_status(obj.status.as_ref(), status.clone()));
        }
        outcome
    }
}
