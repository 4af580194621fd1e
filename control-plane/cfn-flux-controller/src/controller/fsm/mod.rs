//! Decision functions for one reconcile. They look at observed state only
//! and return the step to take; the engine performs the step.

pub mod change_set;
pub mod lifecycle;
pub mod stack;

pub use change_set::ChangeSetStep;
pub use lifecycle::{
    LifecycleDecision, LifecycleEffect, LifecycleInput, LifecyclePhase,
};
pub use stack::StackStep;
