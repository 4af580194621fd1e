use super::ChangeSetDescription;

/// What the controller can do with a stack, derived from its raw status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackPhase {
    /// Only a CREATE change set placeholder exists, or the stack is gone.
    NotCreated,
    InProgress,
    Success,
    /// A new change set can be created against the stack.
    RecoverableFailure,
    /// The stack can only be deleted.
    UnrecoverableFailure,
    /// `UPDATE_ROLLBACK_FAILED`: the rollback must be continued first.
    RollbackContinuationNeeded,
    Unclassified,
}

impl StackPhase {
    pub fn classify(status: &str) -> Self {
        match status {
            "REVIEW_IN_PROGRESS" | "DELETE_COMPLETE" => StackPhase::NotCreated,
            "CREATE_COMPLETE" | "UPDATE_COMPLETE" | "IMPORT_COMPLETE" => {
                StackPhase::Success
            }
            "UPDATE_ROLLBACK_COMPLETE"
            | "IMPORT_ROLLBACK_COMPLETE"
            | "UPDATE_FAILED" => StackPhase::RecoverableFailure,
            "UPDATE_ROLLBACK_FAILED" => StackPhase::RollbackContinuationNeeded,
            "CREATE_FAILED"
            | "ROLLBACK_COMPLETE"
            | "ROLLBACK_FAILED"
            | "DELETE_FAILED"
            | "IMPORT_ROLLBACK_FAILED" => StackPhase::UnrecoverableFailure,
            s if s.ends_with("_IN_PROGRESS") => StackPhase::InProgress,
            _ => StackPhase::Unclassified,
        }
    }
}

/// What the controller can do with a change set, derived from its description.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeSetPhase {
    NotFound,
    /// Creation failed because the template produces no changes.
    Empty,
    InProgress,
    Failed,
    /// Created and executed.
    Success,
    ReadyForExecution,
    Unclassified,
}

const EMPTY_CHANGE_SET_REASONS: [&str; 2] = [
    "didn't contain changes",
    "No updates are to be performed",
];

impl ChangeSetPhase {
    pub fn classify(desc: Option<&ChangeSetDescription>) -> Self {
        let Some(desc) = desc else {
            return ChangeSetPhase::NotFound;
        };
        let status = desc.status.as_str();
        let execution = desc.execution_status();

        if status == "DELETE_COMPLETE" {
            return ChangeSetPhase::NotFound;
        }
        if status == "FAILED"
            && EMPTY_CHANGE_SET_REASONS
                .iter()
                .any(|r| desc.reason().contains(r))
        {
            return ChangeSetPhase::Empty;
        }
        if matches!(
            status,
            "CREATE_PENDING"
                | "CREATE_IN_PROGRESS"
                | "DELETE_PENDING"
                | "DELETE_IN_PROGRESS"
        ) || execution == "EXECUTE_IN_PROGRESS"
        {
            return ChangeSetPhase::InProgress;
        }
        if matches!(status, "FAILED" | "DELETE_FAILED")
            || matches!(execution, "EXECUTE_FAILED" | "OBSOLETE")
        {
            return ChangeSetPhase::Failed;
        }
        match (status, execution) {
            ("CREATE_COMPLETE", "EXECUTE_COMPLETE") => ChangeSetPhase::Success,
            ("CREATE_COMPLETE", "AVAILABLE") => {
                ChangeSetPhase::ReadyForExecution
            }
            _ => ChangeSetPhase::Unclassified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::ChangeSetHandle;

    fn cs(
        status: &str,
        execution: Option<&str>,
        reason: Option<&str>,
    ) -> ChangeSetDescription {
        ChangeSetDescription {
            handle: ChangeSetHandle::named("flux-1-main"),
            status: status.into(),
            execution_status: execution.map(str::to_string),
            status_reason: reason.map(str::to_string),
            changes: vec![],
        }
    }

    #[test]
    fn stack_statuses_map_to_phases() {
        use StackPhase::*;
        let table = [
            ("REVIEW_IN_PROGRESS", NotCreated),
            ("DELETE_COMPLETE", NotCreated),
            ("CREATE_IN_PROGRESS", InProgress),
            ("UPDATE_COMPLETE_CLEANUP_IN_PROGRESS", InProgress),
            ("UPDATE_ROLLBACK_IN_PROGRESS", InProgress),
            ("DELETE_IN_PROGRESS", InProgress),
            ("CREATE_COMPLETE", Success),
            ("UPDATE_COMPLETE", Success),
            ("IMPORT_COMPLETE", Success),
            ("UPDATE_ROLLBACK_COMPLETE", RecoverableFailure),
            ("UPDATE_FAILED", RecoverableFailure),
            ("UPDATE_ROLLBACK_FAILED", RollbackContinuationNeeded),
            ("CREATE_FAILED", UnrecoverableFailure),
            ("ROLLBACK_COMPLETE", UnrecoverableFailure),
            ("DELETE_FAILED", UnrecoverableFailure),
            ("SOMETHING_NEW", Unclassified),
            ("", Unclassified),
        ];
        for (status, phase) in table {
            assert_eq!(StackPhase::classify(status), phase, "{status}");
        }
    }

    #[test]
    fn change_set_phases() {
        use ChangeSetPhase::*;
        assert_eq!(ChangeSetPhase::classify(None), NotFound);
        assert_eq!(
            ChangeSetPhase::classify(Some(&cs("DELETE_COMPLETE", None, None))),
            NotFound
        );
        assert_eq!(
            ChangeSetPhase::classify(Some(&cs(
                "FAILED",
                Some("UNAVAILABLE"),
                Some("The submitted information didn't contain changes. Submit different information to create a change set.")
            ))),
            Empty
        );
        assert_eq!(
            ChangeSetPhase::classify(Some(&cs(
                "FAILED",
                None,
                Some("No updates are to be performed.")
            ))),
            Empty
        );
        assert_eq!(
            ChangeSetPhase::classify(Some(&cs(
                "CREATE_PENDING",
                Some("UNAVAILABLE"),
                None
            ))),
            InProgress
        );
        assert_eq!(
            ChangeSetPhase::classify(Some(&cs(
                "CREATE_COMPLETE",
                Some("EXECUTE_IN_PROGRESS"),
                None
            ))),
            InProgress
        );
        assert_eq!(
            ChangeSetPhase::classify(Some(&cs(
                "FAILED",
                Some("UNAVAILABLE"),
                Some("Template format error")
            ))),
            Failed
        );
        assert_eq!(
            ChangeSetPhase::classify(Some(&cs(
                "CREATE_COMPLETE",
                Some("OBSOLETE"),
                None
            ))),
            Failed
        );
        assert_eq!(
            ChangeSetPhase::classify(Some(&cs(
                "CREATE_COMPLETE",
                Some("EXECUTE_COMPLETE"),
                None
            ))),
            Success
        );
        assert_eq!(
            ChangeSetPhase::classify(Some(&cs(
                "CREATE_COMPLETE",
                Some("AVAILABLE"),
                None
            ))),
            ReadyForExecution
        );
        assert_eq!(
            ChangeSetPhase::classify(Some(&cs(
                "CREATE_COMPLETE",
                Some("UNAVAILABLE"),
                None
            ))),
            Unclassified
        );
    }
}
