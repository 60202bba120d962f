//! The composite operation coordinator.
//!
//! A composite is an ordered batch of sub-operations executed inside one
//! rollback boundary. With rollback-on-runtime-failure enabled (the
//! default) the sub-operations run as steps of the parent context, so a
//! failure anywhere unwinds every already-applied sibling and the whole
//! batch reports failure. With it disabled each sub-operation runs in an
//! isolated context: RUNTIME failures are recorded per step without
//! touching siblings, while validation and authorization failures still
//! fail the batch, since they indicate a malformed request rather than a
//! runtime fault on one peer.
//!
//! Step results land in the aggregate result under `step-1`, `step-2`, …
//! in submission order.

use tiller_model::{Operation, Value, keys};
use tracing::debug;

use crate::access::AccessEffect;
use crate::controller::Dispatch;
use crate::error::{OperationError, OperationResult};
use crate::handlers::OperationHandler;
use crate::pipeline::{OperationContext, Stage, ValueSlot};

/// Operation name: execute an ordered batch atomically.
pub const COMPOSITE: &str = "composite";

/// Coordinates an ordered batch of sub-operations.
#[derive(Debug, Default)]
pub struct CompositeHandler;

impl OperationHandler for CompositeHandler {
    fn execute(&self, context: &mut OperationContext, operation: &Operation) -> OperationResult<()> {
        let sub_operations = parse_steps(operation)?;
        let rollback = operation.bool_param(
            keys::ROLLBACK_ON_RUNTIME_FAILURE,
            context.config().rollback_on_runtime_failure,
        );
        debug!(steps = sub_operations.len(), rollback, "executing composite");
        if rollback {
            execute_atomic(context, sub_operations)
        } else {
            execute_isolated(context, &sub_operations)
        }
    }
}

fn parse_steps(operation: &Operation) -> OperationResult<Vec<Operation>> {
    let steps = operation.param(keys::STEPS);
    let items = steps.items();
    if items.is_empty() {
        return Err(OperationError::Validation {
            address: operation.address().clone(),
            message: format!("composite requires a non-empty {} list", keys::STEPS),
        });
    }
    items
        .iter()
        .map(|item| {
            Operation::from_value(item).map_err(|error| OperationError::Validation {
                address: operation.address().clone(),
                message: format!("malformed composite step: {error}"),
            })
        })
        .collect()
}

/// Runs the batch as steps of the parent context: one shared rollback
/// stack, first failure unwinds everything.
fn execute_atomic(
    context: &mut OperationContext,
    sub_operations: Vec<Operation>,
) -> OperationResult<()> {
    let count = sub_operations.len();
    let mut slots: Vec<ValueSlot> = Vec::with_capacity(count);

    // The aggregation step goes in first; every sub-step pushed after it
    // lands in front, so aggregation drains once all of them are done.
    let final_slot = context.result_slot();
    let pending: std::rc::Rc<std::cell::RefCell<Vec<ValueSlot>>> =
        std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let to_merge = std::rc::Rc::clone(&pending);
    context.add_inline_step(
        Operation::new("composite-assembly", context.current_address().clone()),
        Stage::Model,
        true,
        move |_context, _operation| {
            let mut aggregate = Value::object();
            for (index, slot) in to_merge.borrow().iter().enumerate() {
                let mut entry = Value::object();
                entry.set(keys::OUTCOME, keys::SUCCESS);
                entry.set(keys::RESULT, slot.get());
                aggregate.set(&keys::step_key(index + 1), entry);
            }
            final_slot.set(aggregate);
            Ok(())
        },
    )?;

    // Push-front scheduling reverses, so submit in reverse to execute in
    // submission order.
    for sub_operation in sub_operations.into_iter().rev() {
        let slot = schedule_sub_step(context, sub_operation)?;
        slots.push(slot);
    }
    slots.reverse();
    *pending.borrow_mut() = slots;
    Ok(())
}

/// Schedules one sub-operation as an immediate MODEL step of the parent
/// context, with its own authorization check.
fn schedule_sub_step(
    context: &mut OperationContext,
    sub_operation: Operation,
) -> OperationResult<ValueSlot> {
    match context.kernel().resolve_dispatch(&sub_operation)? {
        Dispatch::Local(handler, resolved) => context.add_inline_step(
            resolved,
            Stage::Model,
            true,
            move |context, operation| {
                context.authorize(operation.name(), operation.address(), AccessEffect::Address)?;
                context.authorize(operation.name(), operation.address(), AccessEffect::Execute)?;
                handler.execute(context, operation)
            },
        ),
        Dispatch::Remote(proxy, resolved) => {
            let timeout = context.config().proxy_timeout();
            context.add_inline_step(resolved, Stage::Model, true, move |context, operation| {
                let result = proxy.execute(operation, timeout)?;
                context.set_result(result);
                Ok(())
            })
        }
    }
}

/// Runs each sub-operation in its own context so runtime faults on one
/// peer leave the others applied.
fn execute_isolated(
    context: &mut OperationContext,
    sub_operations: &[Operation],
) -> OperationResult<()> {
    let mut aggregate = Value::object();
    for (index, sub_operation) in sub_operations.iter().enumerate() {
        let (envelope, failure) = context.execute_nested_raw(sub_operation.clone());
        match failure {
            Some(error) if !error.is_runtime() => return Err(error),
            _ => {
                aggregate.set(&keys::step_key(index + 1), envelope);
            }
        }
    }
    context.set_result(aggregate);
    Ok(())
}
