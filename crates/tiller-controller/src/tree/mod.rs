//! The live resource tree.
//!
//! A [`Resource`] is one node of the management model: an ordered attribute
//! map, an ordered multimap of child type to named children, and the
//! alias/proxy/runtime-only flags. Children are owned exclusively by their
//! parent; an alias resource owns no subtree, only a target address used
//! for redirection.
//!
//! [`ResourceTree`] wraps the root behind an `RwLock`. Resolution walks
//! address elements one level at a time, fails at the first missing
//! concrete element, and follows alias references transparently by
//! substituting the alias target before continuing. Structural writes are
//! serialized per subtree by the pipeline's model lock; the `RwLock` here
//! only guarantees that individual reads see consistent snapshots.

use std::collections::BTreeMap;
use std::sync::RwLock;

use tiller_model::{PathAddress, PathElement, Value};
use tracing::debug;

use crate::error::{OperationError, OperationResult};

/// Upper bound on alias redirections during one resolution, to cut alias
/// cycles short.
const MAX_ALIAS_REDIRECTS: usize = 16;

/// One node of the management model.
#[derive(Debug, Clone, Default)]
pub struct Resource {
    attributes: Value,
    children: BTreeMap<String, BTreeMap<String, Resource>>,
    alias_target: Option<PathAddress>,
    remote: bool,
    runtime_only: bool,
}

impl Resource {
    /// Creates an empty resource.
    #[must_use]
    pub fn new() -> Self {
        Self {
            attributes: Value::object(),
            ..Self::default()
        }
    }

    /// Creates a resource with the given attribute object.
    #[must_use]
    pub fn with_attributes(attributes: Value) -> Self {
        Self {
            attributes,
            ..Self::default()
        }
    }

    /// Creates an alias resource redirecting to `target`. Alias resources
    /// hold a reference to the target address, never an owned subtree.
    #[must_use]
    pub fn alias(target: PathAddress) -> Self {
        Self {
            attributes: Value::object(),
            alias_target: Some(target),
            ..Self::default()
        }
    }

    /// Marks this resource as a remote (proxy) placeholder.
    #[must_use]
    pub fn remote(mut self) -> Self {
        self.remote = true;
        self
    }

    /// Marks this resource runtime-only.
    #[must_use]
    pub fn runtime_only(mut self) -> Self {
        self.runtime_only = true;
        self
    }

    /// The attribute value for `name`, `Undefined` if unset.
    #[must_use]
    pub fn attribute(&self, name: &str) -> &Value {
        self.attributes.field(name)
    }

    /// The whole attribute object.
    #[must_use]
    pub const fn attributes(&self) -> &Value {
        &self.attributes
    }

    /// Sets an attribute, returning the previous value.
    pub fn set_attribute(&mut self, name: &str, value: Value) -> Value {
        std::mem::replace(self.attributes.get_or_insert(name), value)
    }

    /// The alias target, if this resource is an alias.
    #[must_use]
    pub fn alias_target(&self) -> Option<&PathAddress> {
        self.alias_target.as_ref()
    }

    /// Whether this resource is an alias.
    #[must_use]
    pub const fn is_alias(&self) -> bool {
        self.alias_target.is_some()
    }

    /// Whether this resource is a remote placeholder.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        self.remote
    }

    /// Whether this resource is runtime-only.
    #[must_use]
    pub const fn is_runtime_only(&self) -> bool {
        self.runtime_only
    }

    /// The child for `element`, if present.
    #[must_use]
    pub fn child(&self, element: &PathElement) -> Option<&Resource> {
        self.children.get(element.key())?.get(element.value())
    }

    fn child_mut(&mut self, element: &PathElement) -> Option<&mut Resource> {
        self.children
            .get_mut(element.key())?
            .get_mut(element.value())
    }

    /// The child types present on this resource, in order.
    pub fn child_types(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    /// The instance names present for `child_type`, in order.
    #[must_use]
    pub fn child_names(&self, child_type: &str) -> Vec<String> {
        self.children
            .get(child_type)
            .map(|named| named.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Inserts `child` at `element`, failing if one already exists.
    fn insert_child(&mut self, element: &PathElement, child: Resource) -> Result<(), ()> {
        let named = self.children.entry(element.key().to_string()).or_default();
        if named.contains_key(element.value()) {
            return Err(());
        }
        named.insert(element.value().to_string(), child);
        Ok(())
    }

    fn take_child(&mut self, element: &PathElement) -> Option<Resource> {
        let named = self.children.get_mut(element.key())?;
        let removed = named.remove(element.value());
        if named.is_empty() {
            self.children.remove(element.key());
        }
        removed
    }

    /// Renders this resource (and, when `recursive`, its subtree) as a
    /// value tree: attributes inline, then one object per child type
    /// mapping instance names to child models (or `Undefined` stubs when
    /// not recursing).
    #[must_use]
    pub fn to_model(&self, recursive: bool) -> Value {
        let mut model = Value::object();
        for (name, value) in self.attributes.entries() {
            model.set(name, value.clone());
        }
        for (child_type, named) in &self.children {
            let section = model.get_or_insert(child_type);
            *section = Value::object();
            for (name, child) in named {
                if recursive {
                    section.set(name, child.to_model(true));
                } else {
                    section.set(name, Value::Undefined);
                }
            }
        }
        model
    }
}

/// The shared management model of one controller.
#[derive(Debug, Default)]
pub struct ResourceTree {
    root: RwLock<Resource>,
}

/// Outcome of walking one address against a resource snapshot.
enum Walk<'a> {
    Found(&'a Resource),
    Missing(PathAddress),
    Redirect(PathAddress),
}

fn walk<'a>(root: &'a Resource, address: &PathAddress) -> OperationResult<Walk<'a>> {
    let mut node = root;
    for (index, element) in address.iter().enumerate() {
        if element.is_wildcard() {
            return Err(OperationError::Internal {
                address: address.clone(),
                message: "wildcard elements must be expanded before resolution".to_string(),
            });
        }
        match node.child(element) {
            Some(child) if child.is_alias() => {
                let target = child
                    .alias_target()
                    .cloned()
                    .unwrap_or_default()
                    .concat(&address.sub_address(index + 1));
                return Ok(Walk::Redirect(target));
            }
            Some(child) => node = child,
            None => {
                // Name the shortest unresolvable prefix.
                let mut missing = PathAddress::empty();
                for prefix in address.iter().take(index + 1) {
                    missing = missing.append(prefix.clone());
                }
                return Ok(Walk::Missing(missing));
            }
        }
    }
    Ok(Walk::Found(node))
}

fn navigate<'a>(
    root: &'a Resource,
    address: &PathAddress,
    follow_aliases: bool,
) -> OperationResult<&'a Resource> {
    let mut current = address.clone();
    for _ in 0..MAX_ALIAS_REDIRECTS {
        match walk(root, &current)? {
            Walk::Found(resource) => return Ok(resource),
            Walk::Missing(prefix) => return Err(OperationError::NoSuchResource { address: prefix }),
            Walk::Redirect(target) if follow_aliases => {
                debug!(from = %current, to = %target, "following alias");
                current = target;
            }
            Walk::Redirect(_) => {
                return Err(OperationError::NoSuchResource {
                    address: current.clone(),
                })
            }
        }
    }
    Err(OperationError::Internal {
        address: address.clone(),
        message: "alias redirection limit exceeded".to_string(),
    })
}

impl ResourceTree {
    /// Creates a tree with an empty root resource.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against the resolved resource, following aliases.
    ///
    /// # Errors
    ///
    /// `NoSuchResource` naming the shortest unresolvable prefix when the
    /// address does not resolve.
    pub fn with_resource<R>(
        &self,
        address: &PathAddress,
        f: impl FnOnce(&Resource) -> R,
    ) -> OperationResult<R> {
        let root = self.root.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        navigate(&root, address, true).map(f)
    }

    /// Like [`with_resource`](Self::with_resource) but treats alias nodes
    /// as opaque, for callers that must see the alias itself.
    pub fn with_resource_no_alias<R>(
        &self,
        address: &PathAddress,
        f: impl FnOnce(&Resource) -> R,
    ) -> OperationResult<R> {
        let root = self.root.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        // The final element may be an alias; intermediate aliases still
        // redirect.
        match address.last() {
            None => Ok(f(&root)),
            Some(last) => {
                let parent = navigate(&root, &address.parent(), true)?;
                let child = parent
                    .child(last)
                    .ok_or_else(|| OperationError::NoSuchResource {
                        address: address.clone(),
                    })?;
                Ok(f(child))
            }
        }
    }

    /// Returns true if `address` resolves to a live resource.
    #[must_use]
    pub fn exists(&self, address: &PathAddress) -> bool {
        self.with_resource(address, |_| ()).is_ok()
    }

    /// Resolves `address` and returns the concrete address it denotes
    /// after alias substitution.
    ///
    /// # Errors
    ///
    /// `NoSuchResource` when the address does not resolve.
    pub fn canonical_address(&self, address: &PathAddress) -> OperationResult<PathAddress> {
        let root = self.root.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut current = address.clone();
        for _ in 0..MAX_ALIAS_REDIRECTS {
            match walk(&root, &current)? {
                Walk::Found(_) => return Ok(current),
                Walk::Missing(prefix) => {
                    return Err(OperationError::NoSuchResource { address: prefix })
                }
                Walk::Redirect(target) => current = target,
            }
        }
        Err(OperationError::Internal {
            address: address.clone(),
            message: "alias redirection limit exceeded".to_string(),
        })
    }

    /// Creates `child` at `address` (the address of the child itself).
    ///
    /// # Errors
    ///
    /// `NoSuchResource` when the parent does not resolve; `Validation`
    /// when a resource already exists at the address or the address is
    /// empty or wildcard.
    pub fn create_child(&self, address: &PathAddress, child: Resource) -> OperationResult<()> {
        let Some(last) = address.last().cloned() else {
            return Err(OperationError::Validation {
                address: address.clone(),
                message: "cannot create the root resource".to_string(),
            });
        };
        if last.is_wildcard() {
            return Err(OperationError::Validation {
                address: address.clone(),
                message: "cannot create a resource at a wildcard address".to_string(),
            });
        }
        let mut root = self.root.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let parent_address = address.parent();
        let parent = navigate_mut(&mut root, &parent_address)?;
        parent
            .insert_child(&last, child)
            .map_err(|()| OperationError::Validation {
                address: address.clone(),
                message: "a resource already exists at this address".to_string(),
            })?;
        debug!(address = %address, "created resource");
        Ok(())
    }

    /// Removes and returns the resource at `address`, with its subtree.
    ///
    /// # Errors
    ///
    /// `NoSuchResource` when the address does not resolve; `Validation`
    /// for the root address.
    pub fn remove_child(&self, address: &PathAddress) -> OperationResult<Resource> {
        let Some(last) = address.last().cloned() else {
            return Err(OperationError::Validation {
                address: address.clone(),
                message: "cannot remove the root resource".to_string(),
            });
        };
        let mut root = self.root.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let parent = navigate_mut(&mut root, &address.parent())?;
        let removed = parent
            .take_child(&last)
            .ok_or_else(|| OperationError::NoSuchResource {
                address: address.clone(),
            })?;
        debug!(address = %address, "removed resource");
        Ok(removed)
    }

    /// Sets one attribute, returning the previous value.
    ///
    /// # Errors
    ///
    /// `NoSuchResource` when the address does not resolve.
    pub fn set_attribute(
        &self,
        address: &PathAddress,
        name: &str,
        value: Value,
    ) -> OperationResult<Value> {
        let mut root = self.root.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let resource = navigate_mut(&mut root, address)?;
        Ok(resource.set_attribute(name, value))
    }

    /// Atomic value-tree snapshot of the subtree at `address`, for the
    /// persistence collaborator. Holds the tree read lock for the whole
    /// copy, so the snapshot is consistent with respect to concurrent
    /// structural mutation.
    ///
    /// # Errors
    ///
    /// `NoSuchResource` when the address does not resolve.
    pub fn read_model(&self, address: &PathAddress, recursive: bool) -> OperationResult<Value> {
        self.with_resource(address, |resource| resource.to_model(recursive))
    }

    /// Scoped attribute resolution: walks from `address` toward the root
    /// and returns the first defined value of `name`. `Undefined` when no
    /// enclosing scope defines it.
    ///
    /// # Errors
    ///
    /// `NoSuchResource` when `address` itself does not resolve.
    pub fn resolve_attribute(&self, address: &PathAddress, name: &str) -> OperationResult<Value> {
        let root = self.root.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        // The target must exist even when the value comes from an
        // enclosing scope.
        navigate(&root, address, true)?;
        let mut scope = address.clone();
        loop {
            let resource = navigate(&root, &scope, true)?;
            let value = resource.attribute(name);
            if value.is_defined() {
                return Ok(value.clone());
            }
            if scope.is_empty() {
                return Ok(Value::Undefined);
            }
            scope = scope.parent();
        }
    }

    /// The instance names present for `child_type` under `address`.
    ///
    /// # Errors
    ///
    /// `NoSuchResource` when the address does not resolve.
    pub fn child_names(
        &self,
        address: &PathAddress,
        child_type: &str,
    ) -> OperationResult<Vec<String>> {
        self.with_resource(address, |resource| resource.child_names(child_type))
    }
}

fn navigate_mut<'a>(
    root: &'a mut Resource,
    address: &PathAddress,
) -> OperationResult<&'a mut Resource> {
    // Mutable traversal cannot hold intermediate borrows across an alias
    // restart, so canonicalize first against the same snapshot.
    let mut current = address.clone();
    for _ in 0..MAX_ALIAS_REDIRECTS {
        match walk(root, &current)? {
            Walk::Found(_) => break,
            Walk::Missing(prefix) => return Err(OperationError::NoSuchResource { address: prefix }),
            Walk::Redirect(target) => current = target,
        }
    }
    let mut node = root;
    for element in &current {
        node = node
            .child_mut(element)
            .ok_or_else(|| OperationError::NoSuchResource {
                address: current.clone(),
            })?;
    }
    Ok(node)
}
