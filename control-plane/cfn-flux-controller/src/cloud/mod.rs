//! Contracts for the CloudFormation and template storage collaborators.
//!
//! The reconciler only talks to the provider through [`CloudFormationApi`] and
//! [`TemplateStore`]. Raw provider statuses are folded into the closed
//! [`StackPhase`] and [`ChangeSetPhase`] sets so the state machines can match
//! on them exhaustively.

pub mod aws;
mod error;
pub mod memory;
mod phase;

use std::fmt;

use async_trait::async_trait;

use crate::crd::KeyValue;

pub use error::{CloudError, CloudResult, format_err_chain};
pub use phase::{ChangeSetPhase, StackPhase};

/// Largest template CloudFormation accepts as an inline `TemplateBody`.
pub const MAX_INLINE_TEMPLATE_BYTES: usize = 51_200;

/// A change set, addressed by its provider id (ARN) when known and by name otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeSetHandle {
    pub name: String,
    pub id: Option<String>,
}

impl ChangeSetHandle {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Rebuild a handle from a value persisted in status, which is either an
    /// ARN (`arn:...:changeSet/<name>/<uuid>`) or a bare change set name.
    pub fn parse(stored: &str) -> Self {
        let stored = stored.trim();
        if stored.starts_with("arn:") {
            let name = stored
                .split_once(":changeSet/")
                .and_then(|(_, rest)| rest.split('/').next())
                .unwrap_or(stored);
            return Self::named(name).with_id(stored);
        }
        Self::named(stored)
    }

    /// The value the provider should be called with.
    pub fn reference(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

impl fmt::Display for ChangeSetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reference())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackDescription {
    pub stack_name: String,
    pub stack_id: Option<String>,
    pub status: String,
    pub status_reason: Option<String>,
}

impl StackDescription {
    pub fn phase(&self) -> StackPhase {
        StackPhase::classify(&self.status)
    }

    pub fn reason(&self) -> &str {
        self.status_reason.as_deref().unwrap_or("")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ChangeSummary {
    pub action: Option<String>,
    pub logical_resource_id: Option<String>,
    pub resource_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeSetDescription {
    pub handle: ChangeSetHandle,
    pub status: String,
    pub execution_status: Option<String>,
    pub status_reason: Option<String>,
    pub changes: Vec<ChangeSummary>,
}

impl ChangeSetDescription {
    pub fn execution_status(&self) -> &str {
        self.execution_status.as_deref().unwrap_or("")
    }

    pub fn reason(&self) -> &str {
        self.status_reason.as_deref().unwrap_or("")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TemplateSource {
    Body(String),
    Url(String),
}

/// Everything needed to create a CREATE or UPDATE change set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeSetRequest {
    pub region: String,
    pub stack_name: String,
    pub change_set_name: String,
    pub template: TemplateSource,
    pub parameters: Vec<KeyValue>,
    pub tags: Vec<KeyValue>,
}

#[async_trait]
pub trait CloudFormationApi: Send + Sync {
    /// `Ok(None)` when the stack does not exist.
    async fn describe_stack(
        &self,
        region: &str,
        stack_name: &str,
    ) -> CloudResult<Option<StackDescription>>;

    /// Creates a CREATE change set for a stack that does not exist yet.
    async fn create_stack(
        &self,
        request: &ChangeSetRequest,
    ) -> CloudResult<ChangeSetHandle>;

    /// Creates an UPDATE change set for an existing stack.
    async fn update_stack(
        &self,
        request: &ChangeSetRequest,
    ) -> CloudResult<ChangeSetHandle>;

    async fn delete_stack(&self, region: &str, stack_name: &str)
    -> CloudResult<()>;

    async fn continue_update_rollback(
        &self,
        region: &str,
        stack_name: &str,
    ) -> CloudResult<()>;

    /// `Ok(None)` when the change set does not exist.
    async fn describe_change_set(
        &self,
        region: &str,
        stack_name: &str,
        handle: &ChangeSetHandle,
    ) -> CloudResult<Option<ChangeSetDescription>>;

    async fn execute_change_set(
        &self,
        region: &str,
        stack_name: &str,
        handle: &ChangeSetHandle,
    ) -> CloudResult<()>;

    async fn delete_change_set(
        &self,
        region: &str,
        stack_name: &str,
        handle: &ChangeSetHandle,
    ) -> CloudResult<()>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Stores the template and returns the URL CloudFormation should read it from.
    async fn upload_template(
        &self,
        bucket: &str,
        region: &str,
        key: &str,
        body: &[u8],
    ) -> CloudResult<String>;
}

pub fn template_url(bucket: &str, region: &str, key: &str) -> String {
    format!("https://{bucket}.s3.{region}.amazonaws.com/{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_parses_arn_and_name() {
        let arn = "arn:aws:cloudformation:us-west-2:123456789012:changeSet/flux-3-main-abc/4f2c";
        let h = ChangeSetHandle::parse(arn);
        assert_eq!(h.name, "flux-3-main-abc");
        assert_eq!(h.id.as_deref(), Some(arn));
        assert_eq!(h.reference(), arn);

        let h = ChangeSetHandle::parse("flux-1-main");
        assert_eq!(h.name, "flux-1-main");
        assert_eq!(h.id, None);
        assert_eq!(h.to_string(), "flux-1-main");
    }

    #[test]
    fn template_url_is_virtual_hosted_style() {
        assert_eq!(
            template_url("bkt", "eu-west-1", "a/b.template"),
            "https://bkt.s3.eu-west-1.amazonaws.com/a/b.template"
        );
    }
}
