use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::{Api, Client, Resource, ResourceExt};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::crd::CloudFormationStack;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct LookupError(pub String);

/// Read access to other CloudFormationStack objects.
#[async_trait]
pub trait StackLookup: Send + Sync {
    async fn get_stack(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CloudFormationStack>, LookupError>;
}

#[derive(Clone)]
pub struct KubeStackLookup {
    client: Client,
}

impl KubeStackLookup {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StackLookup for KubeStackLookup {
    async fn get_stack(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CloudFormationStack>, LookupError> {
        let api: Api<CloudFormationStack> =
            Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| LookupError(e.to_string()))
    }
}

#[derive(Clone, Default)]
pub struct MemoryStackLookup {
    stacks: Arc<RwLock<HashMap<(String, String), CloudFormationStack>>>,
}

impl MemoryStackLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, stack: CloudFormationStack) {
        let key = (stack.namespace().unwrap_or_default(), stack.name_any());
        self.stacks.write().await.insert(key, stack);
    }
}

#[async_trait]
impl StackLookup for MemoryStackLookup {
    async fn get_stack(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CloudFormationStack>, LookupError> {
        Ok(self
            .stacks
            .read()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/// The first unmet dependency of a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyBlocked {
    /// `<namespace>/<name>`
    pub dependency: String,
    pub message: String,
}

/// Whether a dependency has been reconciled at its current generation and is Ready.
pub fn dependency_ready(dep: &CloudFormationStack) -> Result<(), String> {
    let Some(status) = dep.status.as_ref().filter(|s| !s.conditions.is_empty())
    else {
        return Err("has no status conditions yet".into());
    };
    if status.observed_generation != dep.meta().generation {
        return Err(format!(
            "observed generation {} does not match generation {}",
            status.observed_generation.unwrap_or_default(),
            dep.meta().generation.unwrap_or_default()
        ));
    }
    match status.ready_condition() {
        Some(c) if c.is_true() => Ok(()),
        Some(c) => Err(format!(
            "is not Ready: {}",
            c.message.as_deref().unwrap_or("no message")
        )),
        None => Err("has no Ready condition".into()),
    }
}

/// Checks every declared dependency in order and reports the first unmet one.
pub async fn check_dependencies(
    lookup: &dyn StackLookup,
    obj: &CloudFormationStack,
) -> Result<(), DependencyBlocked> {
    let own_ns = obj.namespace().unwrap_or_default();
    let own_name = obj.name_any();
    for dep in &obj.spec.depends_on {
        let ns = dep.namespace.clone().unwrap_or_else(|| own_ns.clone());
        let display = format!("{ns}/{}", dep.name);
        let blocked = |message: String| DependencyBlocked {
            dependency: display.clone(),
            message: format!("dependency '{display}' is not ready: {message}"),
        };

        if ns == own_ns && dep.name == own_name {
            return Err(blocked("a stack cannot depend on itself".into()));
        }
        let found = match lookup.get_stack(&ns, &dep.name).await {
            Ok(Some(found)) => found,
            Ok(None) => return Err(blocked("not found".into())),
            Err(e) => return Err(blocked(format!("lookup failed: {e}"))),
        };
        dependency_ready(&found).map_err(blocked)?;
    }
    Ok(())
}
