pub mod cloudformation_stack;

pub use cloudformation_stack::{
    CloudFormationStack, CloudFormationStackSpec, CloudFormationStackStatus,
    Condition, ConditionStatus, DependencyReference, FINALIZER, KeyValue,
    READY_CONDITION, SourceReference,
};
