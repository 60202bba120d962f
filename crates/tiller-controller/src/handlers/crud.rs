//! Built-in add/remove/read/write handlers.
//!
//! These are the global operations every addressable node supports. They
//! run as MODEL-stage steps: validation first, then the tree mutation
//! under write access, with an undo action recorded for rollback.

use std::collections::BTreeSet;

use tiller_model::{Operation, Value, keys};
use tracing::warn;

use crate::access::AccessEffect;
use crate::error::{OperationError, OperationResult};
use crate::handlers::OperationHandler;
use crate::pipeline::OperationContext;
use crate::registry::Storage;
use crate::tree::Resource;

/// Operation name: create a resource.
pub const ADD: &str = "add";
/// Operation name: remove a resource and its subtree.
pub const REMOVE: &str = "remove";
/// Operation name: write one attribute.
pub const WRITE_ATTRIBUTE: &str = "write-attribute";
/// Operation name: read one attribute.
pub const READ_ATTRIBUTE: &str = "read-attribute";
/// Operation name: read a resource's live data.
pub const READ_RESOURCE: &str = "read-resource";
/// Operation name: list child instance names of one type.
pub const READ_CHILDREN_NAMES: &str = "read-children-names";

/// Parameter of `read-children-names`: the child type to list.
pub const CHILD_TYPE: &str = "child-type";

/// Creates a resource from the operation parameters.
#[derive(Debug, Default)]
pub struct AddHandler;

impl OperationHandler for AddHandler {
    fn execute(&self, context: &mut OperationContext, operation: &Operation) -> OperationResult<()> {
        let address = operation.address().clone();
        let registration =
            context
                .registry()
                .find(&address)
                .ok_or_else(|| OperationError::Validation {
                    address: address.clone(),
                    message: "no registration covers this address".to_string(),
                })?;
        let known: BTreeSet<String> = registration
            .attribute_names()
            .map(str::to_string)
            .collect();
        let ordered = match address.last() {
            Some(last) => context
                .registry()
                .find(&address.parent())
                .is_some_and(|parent| parent.is_ordered_child_type(last.key())),
            None => false,
        };

        context.authorize(operation.name(), &address, AccessEffect::WriteConfig)?;
        context.acquire_write_access(&address)?;

        let mut attributes = Value::object();
        for (name, value) in operation.params().entries() {
            if !known.contains(name) {
                return Err(OperationError::Validation {
                    address,
                    message: format!("unknown attribute {name}"),
                });
            }
            attributes.set(name, value.clone());
        }
        if ordered && !attributes.has_defined(keys::INDEX) {
            // Ordered collections get an implicit position, appended by
            // default.
            let siblings = match address.last() {
                Some(last) => context
                    .tree()
                    .child_names(&address.parent(), last.key())?
                    .len(),
                None => 0,
            };
            attributes.set(keys::INDEX, siblings as i64);
        }

        context
            .tree()
            .create_child(&address, Resource::with_attributes(attributes))?;
        let undo_address = address.clone();
        context.record_rollback(move |context| {
            if let Err(error) = context.tree().remove_child(&undo_address) {
                warn!(address = %undo_address, %error, "rollback of add failed");
            }
        });
        Ok(())
    }
}

/// Removes a resource and its subtree; rollback restores both.
#[derive(Debug, Default)]
pub struct RemoveHandler;

impl OperationHandler for RemoveHandler {
    fn execute(&self, context: &mut OperationContext, operation: &Operation) -> OperationResult<()> {
        let address = operation.address().clone();
        context.authorize(operation.name(), &address, AccessEffect::WriteConfig)?;
        context.acquire_write_access(&address)?;
        let removed = context.tree().remove_child(&address)?;
        context.record_rollback(move |context| {
            if let Err(error) = context.tree().create_child(&address, removed) {
                warn!(%error, "rollback of remove failed");
            }
        });
        Ok(())
    }
}

/// Writes one attribute; rollback restores the previous value.
#[derive(Debug, Default)]
pub struct WriteAttributeHandler;

impl OperationHandler for WriteAttributeHandler {
    fn execute(&self, context: &mut OperationContext, operation: &Operation) -> OperationResult<()> {
        let address = operation.address().clone();
        let name = required_name(operation)?;
        let descriptor = context
            .registry()
            .find(&address)
            .map(|node| node.attribute_access(&name))
            .unwrap_or_default();
        if !descriptor.access.is_writable() {
            return Err(OperationError::Validation {
                address,
                message: format!("attribute {name} is not writable"),
            });
        }
        let effect = match descriptor.storage {
            Storage::Configuration => AccessEffect::WriteConfig,
            Storage::Runtime => AccessEffect::WriteRuntime,
        };
        context.authorize(operation.name(), &address, effect)?;
        context.acquire_write_access(&address)?;

        let value = operation.param(keys::VALUE).clone();
        let previous = context.tree().set_attribute(&address, &name, value)?;
        context.record_rollback(move |context| {
            if let Err(error) = context.tree().set_attribute(&address, &name, previous) {
                warn!(%error, "rollback of write-attribute failed");
            }
        });
        Ok(())
    }
}

/// Reads one attribute, optionally resolving through enclosing scopes.
#[derive(Debug, Default)]
pub struct ReadAttributeHandler;

impl OperationHandler for ReadAttributeHandler {
    fn execute(&self, context: &mut OperationContext, operation: &Operation) -> OperationResult<()> {
        let address = operation.address();
        let name = required_name(operation)?;
        let descriptor = context
            .registry()
            .find(address)
            .map(|node| node.attribute_access(&name))
            .unwrap_or_default();
        let effect = match descriptor.storage {
            Storage::Configuration => AccessEffect::ReadConfig,
            Storage::Runtime => AccessEffect::ReadRuntime,
        };
        context.authorize(operation.name(), address, effect)?;

        let value = if operation.bool_param(keys::RESOLVE, false) {
            context.tree().resolve_attribute(address, &name)?
        } else {
            context
                .tree()
                .with_resource(address, |resource| resource.attribute(&name).clone())?
        };
        context.set_result(value);
        Ok(())
    }
}

/// Reads a resource's live data, optionally recursively.
#[derive(Debug, Default)]
pub struct ReadResourceHandler;

impl OperationHandler for ReadResourceHandler {
    fn execute(&self, context: &mut OperationContext, operation: &Operation) -> OperationResult<()> {
        let address = operation.address();
        context.authorize(operation.name(), address, AccessEffect::ReadConfig)?;
        let recursive = operation.bool_param(keys::RECURSIVE, false);
        let model = context.tree().read_model(address, recursive)?;
        context.set_result(model);
        Ok(())
    }
}

/// Lists the instance names of one child type.
#[derive(Debug, Default)]
pub struct ReadChildrenNamesHandler;

impl OperationHandler for ReadChildrenNamesHandler {
    fn execute(&self, context: &mut OperationContext, operation: &Operation) -> OperationResult<()> {
        let address = operation.address();
        context.authorize(operation.name(), address, AccessEffect::ReadConfig)?;
        let child_type =
            operation
                .param(CHILD_TYPE)
                .as_str()
                .ok_or_else(|| OperationError::Validation {
                    address: address.clone(),
                    message: format!("required parameter {CHILD_TYPE} is missing"),
                })?;
        let names = context.tree().child_names(address, child_type)?;
        let mut result = Value::list();
        for name in names {
            result.push(name);
        }
        context.set_result(result);
        Ok(())
    }
}

fn required_name(operation: &Operation) -> OperationResult<String> {
    operation
        .param(keys::NAME)
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| OperationError::Validation {
            address: operation.address().clone(),
            message: format!("required parameter {} is missing", keys::NAME),
        })
}
