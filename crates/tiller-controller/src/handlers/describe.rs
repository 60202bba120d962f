//! The recursive resource-description assembler.
//!
//! `read-resource-description` builds a schema document for one node and,
//! when recursing, for every reachable child. The handler schedules its
//! assembly step before the nested child reads; the pipeline's push-front
//! rule then runs every child first, so assembly merges fully-populated
//! child slots (postorder aggregation over a preorder walk).
//!
//! Authorization failures below the target are absorbed rather than
//! propagated: a child the caller may not read contributes an empty
//! entry, and a child the caller may not even address is dropped from the
//! output entirely, exactly as if it had vanished between enumeration and
//! read. A real vanish (a remote child removed concurrently) is signalled
//! by a tagged marker value rather than a shared sentinel instance.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;

use tiller_model::{Operation, PathAddress, PathElement, Value, keys};
use tracing::debug;

use crate::access::AccessEffect;
use crate::error::{OperationError, OperationResult};
use crate::handlers::OperationHandler;
use crate::pipeline::{OperationContext, Stage, ValueSlot};
use crate::pipeline::proxy::ProxyController;
use crate::registry::AccessKind;

/// Operation name: read a node's schema description.
pub const READ_RESOURCE_DESCRIPTION: &str = "read-resource-description";

/// Attribute/operation decoration: whether the entry mutates no state.
const READ_ONLY: &str = "read-only";
/// Marker key tagging a child that vanished between enumeration and read.
const VANISHED: &str = "vanished-resource";

/// Bound on registration-alias redirections while resolving the target.
const MAX_ALIAS_REDIRECTS: usize = 16;

/// How much access-control data the description carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessControlMode {
    /// No access-control data.
    None,
    /// Full description plus access-control data.
    Combined,
    /// Access-control and structure only; detail sections stripped.
    Trim,
}

impl AccessControlMode {
    fn parse(value: &Value, address: &PathAddress) -> OperationResult<Self> {
        match value.as_str() {
            None => Ok(Self::None),
            Some("none") => Ok(Self::None),
            Some("combined") => Ok(Self::Combined),
            Some("trim") => Ok(Self::Trim),
            Some(other) => Err(OperationError::Validation {
                address: address.clone(),
                message: format!("unknown access-control mode {other}"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DescribeFlags {
    recursive: bool,
    depth: i64,
    operations: bool,
    notifications: bool,
    include_aliases: bool,
    proxies: bool,
    inherited: bool,
    mode: AccessControlMode,
}

impl DescribeFlags {
    fn parse(operation: &Operation) -> OperationResult<Self> {
        Ok(Self {
            recursive: operation.bool_param(keys::RECURSIVE, false),
            depth: operation.long_param(keys::RECURSIVE_DEPTH, 0),
            operations: operation.bool_param(keys::OPERATIONS, false),
            notifications: operation.bool_param(keys::NOTIFICATIONS, false),
            include_aliases: operation.bool_param(keys::INCLUDE_ALIASES, false),
            proxies: operation.bool_param(keys::PROXIES, false),
            inherited: operation.bool_param(keys::INHERITED, true),
            mode: AccessControlMode::parse(
                operation.param(keys::ACCESS_CONTROL),
                operation.address(),
            )?,
        })
    }
}

/// Builds the (optionally recursive) schema description of a node.
#[derive(Debug, Default)]
pub struct ReadResourceDescriptionHandler;

impl OperationHandler for ReadResourceDescriptionHandler {
    fn execute(&self, context: &mut OperationContext, operation: &Operation) -> OperationResult<()> {
        describe_node(context, operation)
    }
}

/// One child scheduled for a nested read.
struct ChildRead {
    child_type: String,
    instance: String,
    address: PathAddress,
    proxy: Option<Arc<dyn ProxyController>>,
}

fn describe_node(context: &mut OperationContext, operation: &Operation) -> OperationResult<()> {
    let flags = DescribeFlags::parse(operation)?;
    let address = resolve_target(context, operation.address())?;

    // An undisclosed resource reads exactly like a missing one.
    if !context
        .check_access(&address, AccessEffect::Address)
        .is_permit()
    {
        return Err(OperationError::NoSuchResource {
            address: address.clone(),
        });
    }
    context.authorize(operation.name(), &address, AccessEffect::ReadConfig)?;

    verify_model_consistency(context, &address)?;

    let base = build_base(context, &address, flags);
    let children = if flags.recursive {
        enumerate_children(context, &address, flags)
    } else {
        Vec::new()
    };

    if children.is_empty() {
        let mut document = base;
        finalize(context, &address, flags, &mut document);
        context.set_result(document);
        return Ok(());
    }

    // Assembly goes in first so every child read scheduled below lands
    // ahead of it in the queue.
    let final_slot = context.result_slot();
    let pending: Rc<RefCell<Vec<(String, String, ValueSlot)>>> = Rc::new(RefCell::new(Vec::new()));
    let to_merge = Rc::clone(&pending);
    let assembly_address = address.clone();
    context.add_inline_step(
        Operation::new("describe-assembly", address.clone()),
        Stage::Model,
        true,
        move |context, _operation| {
            let mut document = base;
            for (child_type, instance, slot) in to_merge.borrow().iter() {
                let value = slot.get();
                if is_vanished(&value) {
                    debug!(child_type, instance, "dropping vanished child from description");
                    continue;
                }
                let section = document
                    .get_or_insert(keys::CHILDREN)
                    .get_or_insert(child_type)
                    .get_or_insert(keys::MODEL_DESCRIPTION);
                if !section.is_defined() {
                    *section = Value::object();
                }
                section.set(instance, value);
            }
            finalize(context, &assembly_address, flags, &mut document);
            final_slot.set(document);
            Ok(())
        },
    )?;

    for child in children {
        let slot = schedule_child_read(context, operation, flags, &child)?;
        pending
            .borrow_mut()
            .push((child.child_type, child.instance, slot));
    }
    Ok(())
}

/// Follows registration aliases to the concrete target pattern.
fn resolve_target(
    context: &OperationContext,
    address: &PathAddress,
) -> OperationResult<PathAddress> {
    let mut current = address.clone();
    for _ in 0..MAX_ALIAS_REDIRECTS {
        let node = context
            .registry()
            .find(&current)
            .ok_or_else(|| OperationError::NoSuchResource {
                address: current.clone(),
            })?;
        match node.alias_target() {
            Some(target) => current = target.clone(),
            None => return Ok(current),
        }
    }
    Err(OperationError::Internal {
        address: address.clone(),
        message: "registration alias redirection limit exceeded".to_string(),
    })
}

/// A live child type the registration does not declare breaks the tree's
/// core invariant; surface it as an internal fault, never as data.
fn verify_model_consistency(
    context: &OperationContext,
    address: &PathAddress,
) -> OperationResult<()> {
    if address.is_multi_target() {
        return Ok(());
    }
    let Some(node) = context.registry().find(address) else {
        return Ok(());
    };
    let declared: BTreeSet<String> = node.child_types().map(str::to_string).collect();
    let live = context
        .tree()
        .with_resource(address, |resource| {
            resource.child_types().map(str::to_string).collect::<Vec<_>>()
        })
        .unwrap_or_default();
    for child_type in live {
        if !declared.contains(&child_type) {
            return Err(OperationError::Internal {
                address: address.clone(),
                message: format!("live child type {child_type} has no registration"),
            });
        }
    }
    Ok(())
}

fn build_base(context: &OperationContext, address: &PathAddress, flags: DescribeFlags) -> Value {
    let mut document = Value::object();
    let Some(node) = context.registry().find(address) else {
        return document;
    };
    document.set(keys::DESCRIPTION, node.description());

    let mirror = context.config().role.is_managed_mirror();
    let mut attributes = Value::object();
    for name in node.attribute_names() {
        let descriptor = node.attribute_access(name);
        let mut entry = Value::object();
        if let Some(text) = &descriptor.description {
            entry.set(keys::DESCRIPTION, text.as_str());
        }
        // A managed mirror cannot independently change replicated
        // configuration, so writable CONFIG attributes display read-only
        // there. Runtime storage is exempt as a matter of policy.
        let display_access = if mirror
            && descriptor.storage == crate::registry::Storage::Configuration
            && descriptor.access.is_writable()
        {
            AccessKind::ReadOnly
        } else {
            descriptor.access
        };
        entry.set(keys::ACCESS_TYPE, display_access.as_str());
        entry.set(keys::STORAGE, descriptor.storage.as_str());
        if display_access.is_writable() {
            entry.set(keys::RESTART_REQUIRED, descriptor.restart.as_str());
        }
        attributes.set(name, entry);
    }
    document.set(keys::ATTRIBUTES, attributes);

    if flags.operations {
        let mut operations = Value::object();
        for (name, entry) in context.registry().operations_at(address, flags.inherited) {
            let mut described = Value::object();
            if let Some(text) = &entry.description {
                described.set(keys::DESCRIPTION, text.as_str());
            }
            described.set(READ_ONLY, entry.read_only);
            operations.set(&name, described);
        }
        document.set(keys::OPERATIONS, operations);
    }
    if flags.notifications {
        let mut notifications = Value::object();
        for (name, text) in node.notifications() {
            let mut described = Value::object();
            described.set(keys::DESCRIPTION, text);
            notifications.set(name, described);
        }
        document.set(keys::NOTIFICATIONS, notifications);
    }

    let mut children = Value::object();
    for child_type in node.child_types() {
        if !flags.include_aliases && node.child_type_is_pure_alias(child_type) {
            continue;
        }
        let description = PathElement::wildcard(child_type)
            .ok()
            .and_then(|element| node.child(&element))
            .map(|child| child.description().to_string());
        let mut entry = Value::object();
        if let Some(text) = description {
            entry.set(keys::DESCRIPTION, text);
        }
        entry.set(keys::MODEL_DESCRIPTION, Value::Undefined);
        children.set(child_type, entry);
    }
    document.set(keys::CHILDREN, children);
    document
}

fn enumerate_children(
    context: &OperationContext,
    address: &PathAddress,
    flags: DescribeFlags,
) -> Vec<ChildRead> {
    let Some(node) = context.registry().find(address) else {
        return Vec::new();
    };
    let mut reads = Vec::new();
    for element in node.child_addresses() {
        let Some(child_node) = node.child(&element) else {
            continue;
        };
        if child_node.is_alias() && !flags.include_aliases {
            continue;
        }
        let child_address = address.append(element.clone());
        let proxy = if child_node.is_remote() {
            if !flags.proxies {
                continue;
            }
            let Some((_, proxy)) = context.kernel().proxies().route(&child_address) else {
                debug!(address = %child_address, "remote child has no proxy mount, skipping");
                continue;
            };
            Some(Arc::clone(proxy))
        } else {
            None
        };
        reads.push(ChildRead {
            child_type: element.key().to_string(),
            instance: element.value().to_string(),
            address: child_address,
            proxy,
        });
    }
    reads
}

/// Schedules one nested read. Authorization and existence failures below
/// the target are absorbed here: an unaddressable or vanished child
/// yields the vanish marker, an unreadable one an empty entry.
fn schedule_child_read(
    context: &mut OperationContext,
    operation: &Operation,
    flags: DescribeFlags,
    child: &ChildRead,
) -> OperationResult<ValueSlot> {
    let mut child_op = operation.retarget(child.address.clone());
    if flags.depth == 1 {
        child_op = child_op
            .with_param(keys::RECURSIVE, false)
            .with_param(keys::RECURSIVE_DEPTH, 0_i64);
    } else if flags.depth > 1 {
        child_op = child_op.with_param(keys::RECURSIVE_DEPTH, flags.depth - 1);
    }

    match &child.proxy {
        Some(proxy) => {
            let proxy = Arc::clone(proxy);
            let timeout = context.config().proxy_timeout();
            context.add_inline_step(child_op, Stage::Model, true, move |context, op| {
                match proxy.execute(op, timeout) {
                    Ok(result) => {
                        context.set_result(result);
                        Ok(())
                    }
                    Err(error) if error.is_no_such_resource() => {
                        context.set_result(vanished_marker());
                        Ok(())
                    }
                    Err(error) if error.is_unauthorized() => {
                        context.set_result(Value::object());
                        Ok(())
                    }
                    Err(error) => Err(error),
                }
            })
        }
        None => context.add_inline_step(child_op, Stage::Model, true, move |context, op| {
            match describe_node(context, op) {
                Ok(()) => Ok(()),
                Err(error) if error.is_no_such_resource() => {
                    context.set_result(vanished_marker());
                    Ok(())
                }
                Err(error) if error.is_unauthorized() => {
                    context.set_result(Value::object());
                    Ok(())
                }
                Err(error) => Err(error),
            }
        }),
    }
}

/// Applies access-control decoration and TRIM stripping.
fn finalize(
    context: &OperationContext,
    address: &PathAddress,
    flags: DescribeFlags,
    document: &mut Value,
) {
    if flags.mode != AccessControlMode::None {
        document.set(keys::ACCESS_CONTROL, access_control_section(context, address));
    }
    if flags.mode == AccessControlMode::Trim {
        trim(document);
    }
}

/// The default decision for the queried address plus the per-address
/// decisions that differ from it. Addresses the caller may not even
/// address are left out entirely so the section never leaks their
/// existence.
fn access_control_section(context: &OperationContext, address: &PathAddress) -> Value {
    let default = decision_block(context, &default_scope(address));
    let mut exceptions = Value::object();
    for concrete in expand_concrete(context, address) {
        if !context.check_access(&concrete, AccessEffect::Address).is_permit() {
            continue;
        }
        let block = decision_block(context, &concrete);
        if block != default {
            exceptions.set(&concrete.to_string(), block);
        }
    }
    let mut section = Value::object();
    section.set(keys::DEFAULT, default);
    section.set(keys::EXCEPTIONS, exceptions);
    section
}

/// The address the default decision is evaluated at. A concrete final
/// segment is widened to its type's wildcard so the default reflects the
/// resource type, with the concrete target surfacing as an exception when
/// its decisions differ.
fn default_scope(address: &PathAddress) -> PathAddress {
    match address.last() {
        Some(last) if !last.is_wildcard() => match PathElement::wildcard(last.key()) {
            Ok(wild) => address.parent().append(wild),
            Err(_) => address.clone(),
        },
        _ => address.clone(),
    }
}

fn decision_block(context: &OperationContext, address: &PathAddress) -> Value {
    let mut block = Value::object();
    block.set(
        keys::READ,
        context
            .check_access(address, AccessEffect::ReadConfig)
            .is_permit(),
    );
    block.set(
        keys::WRITE,
        context
            .check_access(address, AccessEffect::WriteConfig)
            .is_permit(),
    );
    block
}

/// Concrete live addresses matching `pattern`, discovered by walking
/// wildcard segments against the tree. Unreadable-but-existing nodes are
/// kept; unresolvable prefixes are dropped silently.
fn expand_concrete(context: &OperationContext, pattern: &PathAddress) -> Vec<PathAddress> {
    let mut frontier = vec![PathAddress::empty()];
    for element in pattern {
        let mut next = Vec::new();
        for prefix in &frontier {
            if element.is_wildcard() {
                let Ok(names) = context.tree().child_names(prefix, element.key()) else {
                    continue;
                };
                for name in names {
                    if let Ok(concrete) = PathElement::new(element.key(), &name) {
                        next.push(prefix.append(concrete));
                    }
                }
            } else {
                let candidate = prefix.append(element.clone());
                if context.tree().exists(&candidate) {
                    next.push(candidate);
                }
            }
        }
        frontier = next;
    }
    frontier
}

/// Strips human-readable and detail sections, keeping structure and
/// access control.
fn trim(document: &mut Value) {
    document.remove(keys::DESCRIPTION);
    document.remove(keys::ATTRIBUTES);
    document.remove(keys::OPERATIONS);
    document.remove(keys::NOTIFICATIONS);
    if let Some(children) = document.get(keys::CHILDREN).cloned().filter(Value::is_defined) {
        let mut trimmed_children = Value::object();
        for (child_type, entry) in children.entries() {
            let mut entry = entry.clone();
            entry.remove(keys::DESCRIPTION);
            trimmed_children.set(child_type, entry);
        }
        document.set(keys::CHILDREN, trimmed_children);
    }
}

fn vanished_marker() -> Value {
    let mut marker = Value::object();
    marker.set(VANISHED, true);
    marker
}

fn is_vanished(value: &Value) -> bool {
    value.field(VANISHED).as_bool() == Some(true)
}
