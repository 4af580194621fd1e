//! Pure transitions of the persisted status.
//!
//! Each transition takes the status read at the start of the reconcile and
//! returns the next one; nothing here talks to the API server.

use crate::crd::{
    CloudFormationStackStatus, Condition, ConditionStatus, READY_CONDITION,
};

use super::status_reducer::upsert_conditions;

pub const REASON_PROGRESSING: &str = "Progressing";
pub const REASON_SUCCEEDED: &str = "Succeeded";
pub const REASON_ARTIFACT_FAILED: &str = "ArtifactFailed";
pub const REASON_TEMPLATE_UPLOAD_FAILED: &str = "TemplateUploadFailed";
pub const REASON_API_CALL_FAILED: &str = "CloudFormationApiCallFailed";
pub const REASON_CHANGE_SET_FAILED: &str = "ChangeSetFailed";
pub const REASON_ROLLBACK_FAILED: &str = "StackRollbackFailed";
pub const REASON_UNRECOVERABLE: &str = "UnrecoverableStackFailure";
pub const REASON_DEPENDENCY_NOT_READY: &str = "DependencyNotReady";
pub const REASON_UNEXPECTED_STATUS: &str = "UnexpectedStatus";
pub const REASON_INVALID_SPEC: &str = "InvalidSpec";

/// What the current reconcile is working on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Attempt {
    pub generation: Option<i64>,
    pub stack_name: Option<String>,
    pub revision: Option<String>,
    pub change_set: Option<String>,
    /// RFC 3339 timestamp used for condition transitions.
    pub at: String,
}

fn apply(
    current: &CloudFormationStackStatus,
    attempt: &Attempt,
    status: ConditionStatus,
    reason: &str,
    message: String,
) -> CloudFormationStackStatus {
    let mut next = current.clone();
    if attempt.generation > next.observed_generation {
        next.observed_generation = attempt.generation;
    }
    if attempt.stack_name.is_some() {
        next.stack_name = attempt.stack_name.clone();
    }
    if attempt.revision.is_some() {
        next.last_attempted_revision = attempt.revision.clone();
    }
    if attempt.change_set.is_some() {
        next.last_attempted_change_set = attempt.change_set.clone();
    }
    let cond = Condition {
        type_: READY_CONDITION.to_string(),
        status,
        reason: Some(reason.to_string()),
        message: Some(message),
        observed_generation: attempt.generation,
        last_transition_time: Some(attempt.at.clone()),
    };
    next.conditions = upsert_conditions(&current.conditions, vec![cond]);
    next
}

/// Ready=Unknown while a remote operation is in flight.
pub fn progressing(
    current: &CloudFormationStackStatus,
    attempt: &Attempt,
    message: impl Into<String>,
) -> CloudFormationStackStatus {
    apply(
        current,
        attempt,
        ConditionStatus::Unknown,
        REASON_PROGRESSING,
        message.into(),
    )
}

pub fn not_ready(
    current: &CloudFormationStackStatus,
    attempt: &Attempt,
    reason: &str,
    message: impl Into<String>,
) -> CloudFormationStackStatus {
    apply(current, attempt, ConditionStatus::False, reason, message.into())
}

/// Ready=True; the attempted revision and change set become the applied ones.
pub fn ready(
    current: &CloudFormationStackStatus,
    attempt: &Attempt,
    message: impl Into<String>,
) -> CloudFormationStackStatus {
    let mut next = apply(
        current,
        attempt,
        ConditionStatus::True,
        REASON_SUCCEEDED,
        message.into(),
    );
    next.last_applied_revision = next.last_attempted_revision.clone();
    next.last_applied_change_set = next.last_attempted_change_set.clone();
    next
}
