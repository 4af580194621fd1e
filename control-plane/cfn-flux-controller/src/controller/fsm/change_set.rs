use crate::cloud::{ChangeSetDescription, ChangeSetPhase};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeSetStep {
    Create,
    /// The template has no changes against the live stack.
    DeleteEmpty,
    DeleteFailed { message: String },
    Wait { message: String },
    Ready,
    Execute,
    Unexpected { message: String },
}

/// `status X, execution status Y, reason Z`
pub fn summary(desc: &ChangeSetDescription) -> String {
    let mut out = format!(
        "status {}, execution status {}",
        desc.status,
        if desc.execution_status().is_empty() {
            "unknown"
        } else {
            desc.execution_status()
        }
    );
    if !desc.reason().is_empty() {
        out.push_str(", reason ");
        out.push_str(desc.reason());
    }
    out
}

pub fn evaluate(desc: Option<&ChangeSetDescription>) -> ChangeSetStep {
    let phase = ChangeSetPhase::classify(desc);
    let Some(desc) = desc else {
        return ChangeSetStep::Create;
    };
    match phase {
        ChangeSetPhase::NotFound => ChangeSetStep::Create,
        ChangeSetPhase::Empty => ChangeSetStep::DeleteEmpty,
        ChangeSetPhase::Failed => ChangeSetStep::DeleteFailed {
            message: format!(
                "Change set {} failed: {}",
                desc.handle.name,
                summary(desc)
            ),
        },
        ChangeSetPhase::InProgress => ChangeSetStep::Wait {
            message: format!(
                "Change set {} is in progress: {}",
                desc.handle.name,
                summary(desc)
            ),
        },
        ChangeSetPhase::Success => ChangeSetStep::Ready,
        ChangeSetPhase::ReadyForExecution => ChangeSetStep::Execute,
        ChangeSetPhase::Unclassified => ChangeSetStep::Unexpected {
            message: format!(
                "Change set {} is in an unexpected state: {}",
                desc.handle.name,
                summary(desc)
            ),
        },
    }
}
