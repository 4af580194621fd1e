//! Flux source objects (GitRepository, Bucket, OCIRepository) and the
//! artifacts they publish.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::ApiResource;
use kube::{Api, Client};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

pub const SOURCE_GROUP: &str = "source.toolkit.fluxcd.io";
pub const SOURCE_VERSION: &str = "v1";
pub const SUPPORTED_KINDS: [&str; 3] =
    ["GitRepository", "Bucket", "OCIRepository"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("source {0} not found")]
    NotFound(String),
    #[error("unsupported source kind '{0}'")]
    UnsupportedKind(String),
    #[error("source lookup failed: {0}")]
    Api(String),
    #[error("malformed artifact in {0}: {1}")]
    Decode(String, String),
}

/// The artifact advertised in a source object's `status.artifact`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub url: String,
    #[serde(default)]
    pub revision: String,
    /// `<algorithm>:<hex>`
    #[serde(default)]
    pub digest: Option<String>,
    /// Legacy bare SHA-256 hex.
    #[serde(default)]
    pub checksum: Option<String>,
}

#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// `Err(NotFound)` when the source object is missing and `Ok(None)` when
    /// it exists but has not produced an artifact yet.
    async fn get_artifact(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Artifact>, SourceError>;
}

fn check_kind(kind: &str) -> Result<(), SourceError> {
    if SUPPORTED_KINDS.contains(&kind) {
        Ok(())
    } else {
        Err(SourceError::UnsupportedKind(kind.to_string()))
    }
}

/// Reads source objects through the API server as untyped objects.
#[derive(Clone)]
pub struct KubeSourceProvider {
    client: Client,
}

impl KubeSourceProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Pulls `status.artifact` out of a source object.
pub fn artifact_from_object(
    obj: &DynamicObject,
    display: &str,
) -> Result<Option<Artifact>, SourceError> {
    let Some(raw) = obj.data.get("status").and_then(|s| s.get("artifact"))
    else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let artifact: Artifact = serde_json::from_value(raw.clone())
        .map_err(|e| SourceError::Decode(display.to_string(), e.to_string()))?;
    if artifact.url.is_empty() {
        return Ok(None);
    }
    Ok(Some(artifact))
}

#[async_trait]
impl SourceProvider for KubeSourceProvider {
    async fn get_artifact(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Artifact>, SourceError> {
        check_kind(kind)?;
        let label = format!("{kind} {namespace}/{name}");
        let gvk = GroupVersionKind::gvk(SOURCE_GROUP, SOURCE_VERSION, kind);
        let ar = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &ar);
        let obj = api
            .get_opt(name)
            .await
            .map_err(|e| SourceError::Api(e.to_string()))?
            .ok_or_else(|| SourceError::NotFound(label.clone()))?;
        let artifact = artifact_from_object(&obj, &label)?;
        debug!(source = %label, has_artifact = artifact.is_some(), "resolved source");
        Ok(artifact)
    }
}

/// Fixed set of sources, keyed by `(kind, namespace, name)`.
#[derive(Clone, Default)]
pub struct StaticSourceProvider {
    sources: Arc<RwLock<HashMap<(String, String, String), Option<Artifact>>>>,
}

impl StaticSourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source; `None` models an object without an artifact yet.
    pub async fn insert(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
        artifact: Option<Artifact>,
    ) {
        self.sources.write().await.insert(
            (kind.to_string(), namespace.to_string(), name.to_string()),
            artifact,
        );
    }
}

#[async_trait]
impl SourceProvider for StaticSourceProvider {
    async fn get_artifact(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Artifact>, SourceError> {
        check_kind(kind)?;
        self.sources
            .read()
            .await
            .get(&(kind.to_string(), namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                SourceError::NotFound(format!("{kind} {namespace}/{name}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(status: serde_json::Value) -> DynamicObject {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk(
            SOURCE_GROUP,
            SOURCE_VERSION,
            "GitRepository",
        ));
        let mut obj = DynamicObject::new("repo", &ar).within("flux-system");
        obj.data = json!({ "status": status });
        obj
    }

    #[test]
    fn reads_artifact_from_status() {
        let obj = object(json!({
            "artifact": {
                "url": "http://source-controller.flux-system.svc/gitrepository/flux-system/repo/abc.tar.gz",
                "revision": "main@sha1:abc",
                "digest": "sha256:00ff",
                "lastUpdateTime": "2024-01-01T00:00:00Z"
            }
        }));
        let a = artifact_from_object(&obj, "repo").unwrap().unwrap();
        assert_eq!(a.revision, "main@sha1:abc");
        assert_eq!(a.digest.as_deref(), Some("sha256:00ff"));
        assert_eq!(a.checksum, None);
    }

    #[test]
    fn missing_artifact_is_none() {
        assert_eq!(artifact_from_object(&object(json!({})), "repo"), Ok(None));
        assert_eq!(
            artifact_from_object(&object(json!({"artifact": null})), "repo"),
            Ok(None)
        );
    }

    #[test]
    fn malformed_artifact_is_decode_error() {
        let err =
            artifact_from_object(&object(json!({"artifact": {"url": 5}})), "repo")
                .unwrap_err();
        assert!(matches!(err, SourceError::Decode(..)));
    }

    #[tokio::test]
    async fn static_provider_distinguishes_missing_and_pending() {
        let p = StaticSourceProvider::new();
        p.insert("GitRepository", "ns", "pending", None).await;
        assert_eq!(
            p.get_artifact("GitRepository", "ns", "pending").await,
            Ok(None)
        );
        assert!(matches!(
            p.get_artifact("GitRepository", "ns", "gone").await,
            Err(SourceError::NotFound(_))
        ));
        assert!(matches!(
            p.get_artifact("HelmRepository", "ns", "pending").await,
            Err(SourceError::UnsupportedKind(_))
        ));
    }
}
