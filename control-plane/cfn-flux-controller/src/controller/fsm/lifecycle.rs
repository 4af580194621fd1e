use crate::crd::CloudFormationStack;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecyclePhase {
    Suspended,
    Active,
    Deleting,
    /// Deleted and no longer holding a finalizer.
    Released,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEffect {
    AddFinalizer,
    Reconcile,
    DestroyStack,
    RemoveFinalizer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LifecycleInput {
    pub is_deleting: bool,
    pub has_finalizer: bool,
    pub suspended: bool,
    pub destroy_on_deletion: bool,
}

impl LifecycleInput {
    pub fn of(obj: &CloudFormationStack) -> Self {
        Self {
            is_deleting: obj.is_deleting(),
            has_finalizer: obj.has_finalizer(),
            suspended: obj.spec.suspend,
            destroy_on_deletion: obj.spec.destroy_stack_on_deletion,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleDecision {
    pub phase: LifecyclePhase,
    pub effects: Vec<LifecycleEffect>,
}

impl LifecycleDecision {
    fn new(phase: LifecyclePhase, effects: Vec<LifecycleEffect>) -> Self {
        Self { phase, effects }
    }

    pub fn has(&self, effect: LifecycleEffect) -> bool {
        self.effects.contains(&effect)
    }
}

pub fn evaluate(input: LifecycleInput) -> LifecycleDecision {
    use LifecycleEffect::*;

    if input.is_deleting {
        if !input.has_finalizer {
            return LifecycleDecision::new(LifecyclePhase::Released, vec![]);
        }
        // Suspended stacks are never touched remotely, not even on deletion.
        if input.suspended || !input.destroy_on_deletion {
            return LifecycleDecision::new(
                LifecyclePhase::Released,
                vec![RemoveFinalizer],
            );
        }
        return LifecycleDecision::new(
            LifecyclePhase::Deleting,
            vec![DestroyStack],
        );
    }

    if input.suspended {
        return LifecycleDecision::new(LifecyclePhase::Suspended, vec![]);
    }
    if !input.has_finalizer {
        return LifecycleDecision::new(
            LifecyclePhase::Active,
            vec![AddFinalizer],
        );
    }
    LifecycleDecision::new(LifecyclePhase::Active, vec![Reconcile])
}
