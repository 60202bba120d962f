//! Operation handlers.
//!
//! Every management action, built-in or subsystem-provided, implements
//! the one polymorphic capability [`OperationHandler::execute`]. Handlers
//! are selected by registry lookup on (address pattern, operation name);
//! there is no handler hierarchy beyond this trait.

pub mod composite;
pub mod crud;
pub mod describe;

use std::sync::Arc;

use tiller_model::Operation;

use crate::error::OperationResult;
use crate::pipeline::OperationContext;
use crate::registry::{OperationEntry, Registration};

/// One unit of operation logic, invoked as a pipeline step.
///
/// A handler may synchronously mutate the tree (MODEL stage only, with
/// write access), write its result through the context, and schedule
/// further steps for the current or later stages. Returning an error
/// fails the step; the pipeline decides what that means for the overall
/// operation.
pub trait OperationHandler: Send + Sync {
    /// Executes one step against `operation`'s address.
    ///
    /// # Errors
    ///
    /// Any member of the operation error taxonomy; the pipeline records
    /// the first failure and unwinds.
    fn execute(&self, context: &mut OperationContext, operation: &Operation) -> OperationResult<()>;
}

/// Registers the global operations every addressable node supports, as
/// inherited entries on the root registration.
pub fn register_global_operations(root: &mut Registration) {
    root.register_operation(
        crud::ADD,
        OperationEntry::new(Arc::new(crud::AddHandler), false)
            .inherited()
            .described("creates a resource"),
    )
    .register_operation(
        crud::REMOVE,
        OperationEntry::new(Arc::new(crud::RemoveHandler), false)
            .inherited()
            .described("removes a resource and its children"),
    )
    .register_operation(
        crud::WRITE_ATTRIBUTE,
        OperationEntry::new(Arc::new(crud::WriteAttributeHandler), false)
            .inherited()
            .described("writes one attribute"),
    )
    .register_operation(
        crud::READ_ATTRIBUTE,
        OperationEntry::new(Arc::new(crud::ReadAttributeHandler), true)
            .inherited()
            .described("reads one attribute"),
    )
    .register_operation(
        crud::READ_RESOURCE,
        OperationEntry::new(Arc::new(crud::ReadResourceHandler), true)
            .inherited()
            .described("reads a resource's live data"),
    )
    .register_operation(
        crud::READ_CHILDREN_NAMES,
        OperationEntry::new(Arc::new(crud::ReadChildrenNamesHandler), true)
            .inherited()
            .described("lists child instance names of one type"),
    )
    .register_operation(
        describe::READ_RESOURCE_DESCRIPTION,
        OperationEntry::new(Arc::new(describe::ReadResourceDescriptionHandler), true)
            .inherited()
            .described("reads a node's schema description"),
    )
    .register_operation(
        composite::COMPOSITE,
        OperationEntry::new(Arc::new(composite::CompositeHandler), false)
            .described("executes an ordered batch atomically"),
    );
}
