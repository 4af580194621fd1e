use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const FINALIZER: &str = "finalizers.cloudformation.contrib.fluxcd.io";

/// Type of the condition this controller owns.
pub const READY_CONDITION: &str = "Ready";

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default,
)]
#[kube(
    group = "cloudformation.contrib.fluxcd.io",
    version = "v1alpha1",
    kind = "CloudFormationStack",
    plural = "cloudformationstacks",
    shortname = "cfnstack",
    namespaced,
    status = "CloudFormationStackStatus",
    printcolumn = r#"{"name":"Stack","type":"string","jsonPath":".spec.stackName"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].message"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudFormationStackSpec {
    /// Name of the CloudFormation stack to create and keep in sync
    pub stack_name: String,
    /// AWS region of the stack; controller default region when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Path of the template file, relative to the root of the source artifact
    pub template_path: String,
    /// Flux source (GitRepository, Bucket or OCIRepository) holding the template
    pub source_ref: SourceReference,
    /// How often the stack is reconciled against its template (e.g. "10m")
    pub interval: String,
    /// How often to check on in-flight stack and change set operations (default "5s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,
    /// Delay before retrying after a failed reconciliation (default "1m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_interval: Option<String>,
    /// Stops reconciliation of this object when true
    #[serde(default)]
    pub suspend: bool,
    /// Delete the CloudFormation stack when this object is deleted
    #[serde(default)]
    pub destroy_stack_on_deletion: bool,
    /// Other CloudFormationStack objects that must be Ready before this one is reconciled
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<DependencyReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack_parameters: Vec<KeyValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack_tags: Vec<KeyValue>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceReference {
    /// GitRepository | Bucket | OCIRepository
    pub kind: String,
    pub name: String,
    /// Defaults to the namespace of the referencing stack
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct DependencyReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(
    Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq,
)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudFormationStackStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// K8s-style conditions; the controller owns the Ready condition
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempted_revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_applied_revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempted_change_set: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_applied_change_set: Option<String>,
    /// Stack name as resolved during the latest reconciliation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type; other writers' types are kept verbatim
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq,
)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl Condition {
    pub fn is_ready_type(&self) -> bool {
        self.type_ == READY_CONDITION
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

impl CloudFormationStackStatus {
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.is_ready_type())
    }
}

impl CloudFormationStack {
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.status.as_ref().and_then(|s| s.ready_condition())
    }

    pub fn has_finalizer(&self) -> bool {
        self.meta()
            .finalizers
            .as_ref()
            .map(|f| f.iter().any(|x| x == FINALIZER))
            .unwrap_or(false)
    }

    pub fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }
}
