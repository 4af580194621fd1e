use crate::cloud::{StackDescription, StackPhase};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StackStep {
    /// Hand over to the change set machine.
    ChangeSet {
        is_create: bool,
        /// The stack is in a failed state a new change set can recover from.
        recovering: bool,
    },
    Wait { message: String },
    ContinueRollback,
    DeleteUnrecoverable { message: String },
    Unexpected { message: String },
}

pub fn evaluate(stack: Option<&StackDescription>) -> StackStep {
    let Some(stack) = stack else {
        return StackStep::ChangeSet {
            is_create: true,
            recovering: false,
        };
    };
    let with_reason = |prefix: String| {
        if stack.reason().is_empty() {
            prefix
        } else {
            format!("{prefix}: {}", stack.reason())
        }
    };
    match stack.phase() {
        StackPhase::NotCreated => StackStep::ChangeSet {
            is_create: true,
            recovering: false,
        },
        StackPhase::InProgress => StackStep::Wait {
            message: format!(
                "Stack {} is in progress (status {})",
                stack.stack_name, stack.status
            ),
        },
        StackPhase::RollbackContinuationNeeded => StackStep::ContinueRollback,
        StackPhase::UnrecoverableFailure => StackStep::DeleteUnrecoverable {
            message: with_reason(format!(
                "Stack {} is in unrecoverable status {}, deleting it",
                stack.stack_name, stack.status
            )),
        },
        StackPhase::Success => StackStep::ChangeSet {
            is_create: false,
            recovering: false,
        },
        StackPhase::RecoverableFailure => StackStep::ChangeSet {
            is_create: false,
            recovering: true,
        },
        StackPhase::Unclassified => StackStep::Unexpected {
            message: with_reason(format!(
                "Stack {} has unexpected status {}",
                stack.stack_name, stack.status
            )),
        },
    }
}
