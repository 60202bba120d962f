//! The staged step pipeline.
//!
//! One [`OperationContext`] carries the live state of one submitted
//! operation: three ordered stage queues, the rollback stack, the result
//! slot tree, the failure slot, and the per-request authorization memo.
//!
//! # Architecture
//!
//! Execution is single-threaded and cooperative. Stages run in order
//! MODEL, RUNTIME, VERIFY; within a stage the front of the queue runs
//! next, and a running step may schedule more work. An `immediate` step
//! is pushed to the front of its stage queue, so it runs before anything
//! already pending but after the step currently executing. That push-
//! front rule is what makes postorder aggregation fall out of a preorder
//! walk: a handler schedules its own assembly step first, then its
//! children (each pushed ahead of the assembly step), and the assembly
//! step drains last.
//!
//! The first step failure halts the pipeline, skips the remaining
//! stages, and unwinds the rollback stack in reverse completion order.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tiller_model::{Operation, PathAddress, Value, keys};
use tracing::{debug, trace, warn};

use crate::access::{AccessEffect, AuthorizationEngine, Caller, Decision};
use crate::config::ControllerConfig;
use crate::controller::Kernel;
use crate::error::{OperationError, OperationResult};
use crate::handlers::OperationHandler;
use crate::pipeline::lock::WriteGuard;
use crate::registry::Registration;
use crate::tree::ResourceTree;

/// Ordered execution phases of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Validation and model mutation. No external side effects.
    Model,
    /// Actions with external impact, applied after the model settles.
    Runtime,
    /// Post-conditions over the final state.
    Verify,
}

impl Stage {
    const ALL: [Self; 3] = [Self::Model, Self::Runtime, Self::Verify];

    const fn index(self) -> usize {
        match self {
            Self::Model => 0,
            Self::Runtime => 1,
            Self::Verify => 2,
        }
    }

    /// Stable lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Runtime => "runtime",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, interior-mutable holder for one step's result.
///
/// The scheduler of a step keeps one handle and the step itself writes
/// through another, which is how an assembly step observes the results
/// of children that ran before it.
#[derive(Clone, Debug, Default)]
pub struct ValueSlot(Rc<RefCell<Value>>);

impl ValueSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current value.
    #[must_use]
    pub fn get(&self) -> Value {
        self.0.borrow().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.borrow_mut() = value;
    }

    #[must_use]
    pub fn is_defined(&self) -> bool {
        self.0.borrow().is_defined()
    }
}

type InlineStep = Box<dyn FnOnce(&mut OperationContext, &Operation) -> OperationResult<()>>;
type RollbackFn = Box<dyn FnOnce(&mut OperationContext)>;

enum StepHandler {
    Registered(Arc<dyn OperationHandler>),
    Inline(InlineStep),
}

struct Step {
    operation: Operation,
    handler: StepHandler,
    slot: ValueSlot,
}

/// Live execution state for one top-level operation.
pub struct OperationContext {
    kernel: Arc<Kernel>,
    auth: AuthorizationEngine,
    stage: Stage,
    queues: [VecDeque<Step>; 3],
    rollbacks: Vec<RollbackFn>,
    failure: Option<OperationError>,
    result: ValueSlot,
    current_slot: ValueSlot,
    current_address: PathAddress,
    guards: Vec<WriteGuard>,
    rolled_back: bool,
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("stage", &self.stage)
            .field("pending", &self.queues.iter().map(VecDeque::len).collect::<Vec<_>>())
            .field("failed", &self.failure.is_some())
            .finish_non_exhaustive()
    }
}

impl OperationContext {
    pub(crate) fn new(kernel: Arc<Kernel>, caller: Caller) -> Self {
        let auth = AuthorizationEngine::new(kernel.policy(), caller);
        Self {
            kernel,
            auth,
            stage: Stage::Model,
            queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            rollbacks: Vec::new(),
            failure: None,
            result: ValueSlot::new(),
            current_slot: ValueSlot::new(),
            current_address: PathAddress::empty(),
            guards: Vec::new(),
            rolled_back: false,
        }
    }

    /// The kernel this context executes against.
    #[must_use]
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// The live resource tree.
    #[must_use]
    pub fn tree(&self) -> &ResourceTree {
        self.kernel.tree()
    }

    /// The root registration node.
    #[must_use]
    pub fn registry(&self) -> &Registration {
        self.kernel.registry()
    }

    /// The controller configuration.
    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        self.kernel.config()
    }

    /// The identity this operation executes as.
    #[must_use]
    pub fn caller(&self) -> &Caller {
        self.auth.caller()
    }

    /// The stage currently executing.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Address of the step currently executing.
    #[must_use]
    pub fn current_address(&self) -> &PathAddress {
        &self.current_address
    }

    /// Raw access check, memoized for the life of this context.
    #[must_use]
    pub fn check_access(&self, address: &PathAddress, effect: AccessEffect) -> Decision {
        self.auth.check(address, effect)
    }

    /// Mandatory check before a step acts on `address`.
    ///
    /// # Errors
    ///
    /// `Unauthorized` naming the operation, address, and effect when the
    /// policy denies.
    pub fn authorize(
        &self,
        operation: &str,
        address: &PathAddress,
        effect: AccessEffect,
    ) -> OperationResult<()> {
        if self.auth.check(address, effect).is_permit() {
            Ok(())
        } else {
            Err(OperationError::Unauthorized {
                operation: operation.to_string(),
                address: address.clone(),
                explanation: format!("caller {} lacks {effect} permission", self.auth.caller()),
            })
        }
    }

    /// Writes the current step's result.
    pub fn set_result(&self, value: Value) {
        self.current_slot.set(value);
    }

    /// Handle on the current step's result slot, for handlers that
    /// delegate the final write to a later assembly step.
    #[must_use]
    pub fn result_slot(&self) -> ValueSlot {
        self.current_slot.clone()
    }

    /// Schedules a registered handler as a step.
    ///
    /// Returns the scheduler's handle on the new step's result slot.
    ///
    /// # Errors
    ///
    /// `Internal` when `stage` has already completed.
    pub fn add_step(
        &mut self,
        operation: Operation,
        handler: Arc<dyn OperationHandler>,
        stage: Stage,
        immediate: bool,
    ) -> OperationResult<ValueSlot> {
        self.enqueue(operation, StepHandler::Registered(handler), stage, immediate)
    }

    /// Schedules a one-shot closure as a step.
    ///
    /// # Errors
    ///
    /// `Internal` when `stage` has already completed.
    pub fn add_inline_step(
        &mut self,
        operation: Operation,
        stage: Stage,
        immediate: bool,
        step: impl FnOnce(&mut OperationContext, &Operation) -> OperationResult<()> + 'static,
    ) -> OperationResult<ValueSlot> {
        self.enqueue(operation, StepHandler::Inline(Box::new(step)), stage, immediate)
    }

    fn enqueue(
        &mut self,
        operation: Operation,
        handler: StepHandler,
        stage: Stage,
        immediate: bool,
    ) -> OperationResult<ValueSlot> {
        if stage < self.stage {
            return Err(OperationError::Internal {
                address: operation.address().clone(),
                message: format!("cannot schedule into completed stage {stage}"),
            });
        }
        trace!(operation = %operation, %stage, immediate, "scheduling step");
        let slot = ValueSlot::new();
        let step = Step {
            operation,
            handler,
            slot: slot.clone(),
        };
        let queue = &mut self.queues[stage.index()];
        if immediate {
            queue.push_front(step);
        } else {
            queue.push_back(step);
        }
        Ok(slot)
    }

    /// Registers an undo action for work the current step has applied.
    ///
    /// Runs if and only if the operation's final outcome is failure, in
    /// reverse registration order.
    pub fn record_rollback(&mut self, rollback: impl FnOnce(&mut OperationContext) + 'static) {
        self.rollbacks.push(Box::new(rollback));
    }

    /// Takes write access for `address`, blocking out concurrent writers
    /// to related subtrees until this context completes.
    ///
    /// # Errors
    ///
    /// `Internal` outside the MODEL stage; `Runtime` if a conflicting
    /// writer still holds the subtree when the lock deadline passes.
    pub fn acquire_write_access(&mut self, address: &PathAddress) -> OperationResult<()> {
        if self.stage != Stage::Model {
            return Err(OperationError::Internal {
                address: address.clone(),
                message: format!("model writes are not valid in {} stage", self.stage),
            });
        }
        // Only a guard that covers the address makes the new one redundant.
        // A merely related guard (a held descendant) does not: the ancestor
        // must be locked too, or an unrelated sibling writer could run.
        if self.guards.iter().any(|g| address.starts_with(g.address())) {
            return Ok(());
        }
        let own: Vec<PathAddress> = self.guards.iter().map(|g| g.address().clone()).collect();
        let timeout = self.kernel.config().lock_timeout();
        let Some(guard) = self.kernel.model_lock().acquire(address.clone(), &own, timeout) else {
            return Err(OperationError::Runtime {
                address: address.clone(),
                message: "timed out waiting for write access to the model subtree".to_string(),
            });
        };
        // Widening: narrower guards this context held are now covered.
        self.guards.retain(|g| !g.address().starts_with(address));
        self.guards.push(guard);
        Ok(())
    }

    /// Executes `operation` in a fresh context with its own rollback
    /// boundary, returning its full response envelope. The nested context
    /// shares the kernel and caller but not this context's failure state.
    #[must_use]
    pub fn execute_nested(&self, operation: Operation) -> Value {
        self.kernel.execute_for(operation, self.auth.caller().clone())
    }

    pub(crate) fn execute_nested_raw(&self, operation: Operation) -> (Value, Option<OperationError>) {
        self.kernel.execute_raw(operation, self.auth.caller().clone())
    }

    /// The first recorded failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&OperationError> {
        self.failure.as_ref()
    }

    /// Records a failure without failing the current step. The first
    /// recorded failure wins; later ones are logged and dropped.
    pub fn record_failure(&mut self, error: OperationError) {
        if self.failure.is_none() {
            self.failure = Some(error);
        } else {
            debug!(%error, "suppressing subsequent failure");
        }
    }

    pub(crate) fn enqueue_root(&mut self, operation: Operation, handler: Arc<dyn OperationHandler>) {
        let step = Step {
            operation,
            handler: StepHandler::Registered(handler),
            slot: self.result.clone(),
        };
        self.queues[Stage::Model.index()].push_back(step);
    }

    pub(crate) fn enqueue_root_inline(
        &mut self,
        operation: Operation,
        step: impl FnOnce(&mut OperationContext, &Operation) -> OperationResult<()> + 'static,
    ) {
        let step = Step {
            operation,
            handler: StepHandler::Inline(Box::new(step)),
            slot: self.result.clone(),
        };
        self.queues[Stage::Model.index()].push_back(step);
    }

    /// Drains the stage queues in order, then unwinds on failure.
    pub(crate) fn run_to_completion(&mut self) {
        for stage in Stage::ALL {
            if self.failure.is_some() {
                break;
            }
            self.stage = stage;
            while let Some(step) = self.queues[stage.index()].pop_front() {
                self.execute_step(step);
                if self.failure.is_some() {
                    break;
                }
            }
        }
        if self.failure.is_some() {
            self.unwind();
        }
        // Write access ends with the operation, success or not.
        self.guards.clear();
    }

    fn execute_step(&mut self, step: Step) {
        let previous_slot = std::mem::replace(&mut self.current_slot, step.slot.clone());
        let previous_address =
            std::mem::replace(&mut self.current_address, step.operation.address().clone());
        trace!(operation = %step.operation, stage = %self.stage, "executing step");
        let outcome = match step.handler {
            StepHandler::Registered(handler) => handler.execute(self, &step.operation),
            StepHandler::Inline(inline) => inline(self, &step.operation),
        };
        if let Err(error) = outcome {
            warn!(operation = %step.operation, %error, "step failed");
            step.slot.set({
                let mut failed = Value::object();
                failed.set(keys::FAILURE_DESCRIPTION, error.failure_description());
                failed
            });
            self.record_failure(error);
        }
        self.current_slot = previous_slot;
        self.current_address = previous_address;
    }

    fn unwind(&mut self) {
        let rollbacks = std::mem::take(&mut self.rollbacks);
        if rollbacks.is_empty() {
            return;
        }
        debug!(count = rollbacks.len(), "rolling back completed steps");
        for rollback in rollbacks.into_iter().rev() {
            rollback(self);
        }
        self.rolled_back = true;
    }

    pub(crate) fn into_outcome(self) -> (Value, Option<OperationError>, bool) {
        (self.result.get(), self.failure, self.rolled_back)
    }
}
