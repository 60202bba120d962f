//! Registration registry: schema metadata indexed by address pattern.
//!
//! The registry mirrors the *type* shape of the management tree, one
//! [`Registration`] node per wildcard-or-concrete address pattern,
//! independent of live data. Registrations are built once at subsystem
//! registration time, then frozen behind an `Arc` and read concurrently;
//! they are never mutated during request processing.
//!
//! Pattern matching: a concrete path segment matches an exact registration
//! for that instance name first, falling back to the wildcard registration
//! for the type; a wildcard segment matches the wildcard registration.

mod descriptors;

use std::collections::{BTreeMap, BTreeSet};

pub use descriptors::{
    AccessKind, AttributeDescriptor, OperationEntry, RestartRequired, Storage,
};
use tiller_model::{PathAddress, PathElement};

/// Redirection metadata of an alias registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasEntry {
    target: PathAddress,
}

impl AliasEntry {
    /// Creates an alias entry redirecting to `target`.
    #[must_use]
    pub const fn new(target: PathAddress) -> Self {
        Self { target }
    }

    /// The address the alias redirects to.
    #[must_use]
    pub const fn target(&self) -> &PathAddress {
        &self.target
    }
}

#[derive(Debug, Default)]
struct ChildRegistrations {
    wildcard: Option<Registration>,
    concrete: BTreeMap<String, Registration>,
}

/// Schema metadata for one address pattern.
#[derive(Debug, Default)]
pub struct Registration {
    description: String,
    attributes: BTreeMap<String, AttributeDescriptor>,
    operations: BTreeMap<String, OperationEntry>,
    notifications: BTreeMap<String, String>,
    capabilities: BTreeSet<String>,
    children: BTreeMap<String, ChildRegistrations>,
    alias: Option<AliasEntry>,
    remote: bool,
    runtime_only: bool,
    ordered_child_types: BTreeSet<String>,
}

impl Registration {
    /// Creates a registration with a human-readable description.
    #[must_use]
    pub fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
            ..Self::default()
        }
    }

    // ------------------------------------------------------------------
    // Construction (registration time only)
    // ------------------------------------------------------------------

    /// Registers an attribute descriptor.
    pub fn register_attribute(&mut self, name: &str, descriptor: AttributeDescriptor) -> &mut Self {
        self.attributes.insert(name.to_string(), descriptor);
        self
    }

    /// Registers an operation entry.
    pub fn register_operation(&mut self, name: &str, entry: OperationEntry) -> &mut Self {
        self.operations.insert(name.to_string(), entry);
        self
    }

    /// Registers a notification description.
    pub fn register_notification(&mut self, name: &str, description: &str) -> &mut Self {
        self.notifications
            .insert(name.to_string(), description.to_string());
        self
    }

    /// Declares a capability provided by resources of this pattern.
    pub fn register_capability(&mut self, name: &str) -> &mut Self {
        self.capabilities.insert(name.to_string());
        self
    }

    /// Registers a child pattern and returns it for further building.
    /// A wildcard element registers the type's wildcard pattern; a
    /// concrete element registers an exact-instance pattern.
    pub fn register_child(
        &mut self,
        element: &PathElement,
        registration: Registration,
    ) -> &mut Registration {
        use std::collections::btree_map::Entry;

        let slot = self.children.entry(element.key().to_string()).or_default();
        if element.is_wildcard() {
            return slot.wildcard.insert(registration);
        }
        match slot.concrete.entry(element.value().to_string()) {
            Entry::Occupied(mut occupied) => {
                occupied.insert(registration);
                occupied.into_mut()
            }
            Entry::Vacant(vacant) => vacant.insert(registration),
        }
    }

    /// Marks this registration as an alias redirecting to `target`.
    pub fn set_alias(&mut self, target: PathAddress) -> &mut Self {
        self.alias = Some(AliasEntry::new(target));
        self
    }

    /// Marks this registration as remote: its authoritative data lives in
    /// another process.
    pub fn set_remote(&mut self) -> &mut Self {
        self.remote = true;
        self
    }

    /// Marks this registration runtime-only.
    pub fn set_runtime_only(&mut self) -> &mut Self {
        self.runtime_only = true;
        self
    }

    /// Declares a child type as an ordered collection; adds to it carry an
    /// implicit `index` attribute.
    pub fn set_ordered_child_type(&mut self, child_type: &str) -> &mut Self {
        self.ordered_child_types.insert(child_type.to_string());
        self
    }

    // ------------------------------------------------------------------
    // Node queries
    // ------------------------------------------------------------------

    /// The human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The registered attribute names, in order.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// The explicit descriptor for `name`, if registered.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.get(name)
    }

    /// The *effective* descriptor for `name`: the explicit one, or the
    /// read-only configuration default when none is registered. An
    /// attribute cannot be writable without a registered descriptor.
    #[must_use]
    pub fn attribute_access(&self, name: &str) -> AttributeDescriptor {
        self.attributes.get(name).cloned().unwrap_or_default()
    }

    /// The locally registered operations, in name order.
    pub fn operations(&self) -> impl Iterator<Item = (&str, &OperationEntry)> {
        self.operations.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The registered notifications, in name order.
    pub fn notifications(&self) -> impl Iterator<Item = (&str, &str)> {
        self.notifications.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The declared capabilities.
    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        self.capabilities.iter().map(String::as_str)
    }

    /// Whether this registration is an alias.
    #[must_use]
    pub const fn is_alias(&self) -> bool {
        self.alias.is_some()
    }

    /// The alias redirection target, if this is an alias.
    #[must_use]
    pub fn alias_target(&self) -> Option<&PathAddress> {
        self.alias.as_ref().map(AliasEntry::target)
    }

    /// Whether this registration is a remote (proxy) node.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        self.remote
    }

    /// Whether this registration is runtime-only.
    #[must_use]
    pub const fn is_runtime_only(&self) -> bool {
        self.runtime_only
    }

    /// Whether `child_type` is an ordered collection type.
    #[must_use]
    pub fn is_ordered_child_type(&self, child_type: &str) -> bool {
        self.ordered_child_types.contains(child_type)
    }

    /// The declared child types, in order.
    pub fn child_types(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    /// The child registration matched by `element`: an exact instance
    /// registration first, then the type's wildcard registration.
    #[must_use]
    pub fn child(&self, element: &PathElement) -> Option<&Registration> {
        let slot = self.children.get(element.key())?;
        if element.is_wildcard() {
            return slot.wildcard.as_ref();
        }
        slot.concrete
            .get(element.value())
            .or(slot.wildcard.as_ref())
    }

    /// One element per declared child pattern: the wildcard element of
    /// each type that has one, plus every exact-instance element.
    #[must_use]
    pub fn child_addresses(&self) -> Vec<PathElement> {
        let mut out = Vec::new();
        for (child_type, slot) in &self.children {
            if slot.wildcard.is_some() {
                if let Ok(e) = PathElement::wildcard(child_type) {
                    out.push(e);
                }
            }
            for name in slot.concrete.keys() {
                if let Ok(e) = PathElement::new(child_type, name) {
                    out.push(e);
                }
            }
        }
        out
    }

    /// Returns true if every registration of `child_type` is an alias, so
    /// the whole type vanishes from descriptions that exclude aliases.
    #[must_use]
    pub fn child_type_is_pure_alias(&self, child_type: &str) -> bool {
        let Some(slot) = self.children.get(child_type) else {
            return false;
        };
        let mut found = false;
        if let Some(wildcard) = &slot.wildcard {
            if !wildcard.is_alias() {
                return false;
            }
            found = true;
        }
        for registration in slot.concrete.values() {
            if !registration.is_alias() {
                return false;
            }
            found = true;
        }
        found
    }

    // ------------------------------------------------------------------
    // Path queries (called on the root registration)
    // ------------------------------------------------------------------

    /// Finds the registration matching `address`, walking pattern by
    /// pattern from this node.
    #[must_use]
    pub fn find(&self, address: &PathAddress) -> Option<&Registration> {
        let mut node = self;
        for element in address {
            node = node.child(element)?;
        }
        Some(node)
    }

    /// The chain of registrations from this node down to the match for
    /// `address`, inclusive on both ends.
    #[must_use]
    pub fn node_chain(&self, address: &PathAddress) -> Option<Vec<&Registration>> {
        let mut chain = vec![self];
        let mut node = self;
        for element in address {
            node = node.child(element)?;
            chain.push(node);
        }
        Some(chain)
    }

    /// Resolves the operation entry for `name` at `address`: a local entry
    /// on the matched registration first, otherwise the nearest ancestor
    /// entry marked inherited.
    #[must_use]
    pub fn operation_entry(&self, address: &PathAddress, name: &str) -> Option<&OperationEntry> {
        let chain = self.node_chain(address)?;
        let (target, ancestors) = chain.split_last()?;
        if let Some(entry) = target.operations.get(name) {
            return Some(entry);
        }
        ancestors
            .iter()
            .rev()
            .find_map(|node| node.operations.get(name).filter(|entry| entry.inherited))
    }

    /// All operations visible at `address`: local entries plus, when
    /// `include_inherited`, ancestor entries marked inherited. Local
    /// entries shadow inherited ones of the same name.
    #[must_use]
    pub fn operations_at(
        &self,
        address: &PathAddress,
        include_inherited: bool,
    ) -> Vec<(String, &OperationEntry)> {
        let Some(chain) = self.node_chain(address) else {
            return Vec::new();
        };
        let Some((target, ancestors)) = chain.split_last() else {
            return Vec::new();
        };
        let mut out: BTreeMap<String, &OperationEntry> = target
            .operations
            .iter()
            .map(|(name, entry)| (name.clone(), entry))
            .collect();
        if include_inherited {
            for node in ancestors.iter().rev() {
                for (name, entry) in &node.operations {
                    if entry.inherited {
                        out.entry(name.clone()).or_insert(entry);
                    }
                }
            }
        }
        out.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tiller_model::Operation;

    use super::*;
    use crate::error::OperationResult;
    use crate::handlers::OperationHandler;
    use crate::pipeline::OperationContext;

    struct NoopHandler;

    impl OperationHandler for NoopHandler {
        fn execute(&self, _ctx: &mut OperationContext, _op: &Operation) -> OperationResult<()> {
            Ok(())
        }
    }

    fn entry(read_only: bool) -> OperationEntry {
        OperationEntry::new(Arc::new(NoopHandler), read_only)
    }

    fn wildcard(key: &str) -> PathElement {
        PathElement::wildcard(key).unwrap()
    }

    fn element(key: &str, value: &str) -> PathElement {
        PathElement::new(key, value).unwrap()
    }

    fn addr(s: &str) -> PathAddress {
        PathAddress::parse(s).unwrap()
    }

    fn sample_root() -> Registration {
        let mut root = Registration::new("the root");
        root.register_operation("query", entry(true).inherited());
        let host = root.register_child(&wildcard("host"), Registration::new("a host"));
        host.register_attribute(
            "port",
            AttributeDescriptor::read_write("listen port", RestartRequired::NoServices),
        );
        host.register_operation("restart", entry(false));
        host.register_child(&wildcard("server"), Registration::new("a server"));
        root
    }

    #[test]
    fn test_find_by_pattern() {
        let root = sample_root();
        assert!(root.find(&PathAddress::empty()).is_some());
        // Concrete segments fall back to the wildcard pattern.
        let host = root.find(&addr("/host=alpha")).unwrap();
        assert_eq!(host.description(), "a host");
        assert!(root.find(&addr("/host=alpha/server=web")).is_some());
        assert!(root.find(&addr("/unknown=x")).is_none());
    }

    #[test]
    fn test_exact_registration_shadows_wildcard() {
        let mut root = sample_root();
        root.register_child(&element("host", "primary"), Registration::new("the primary"));
        assert_eq!(root.find(&addr("/host=primary")).unwrap().description(), "the primary");
        assert_eq!(root.find(&addr("/host=other")).unwrap().description(), "a host");
        assert_eq!(root.find(&addr("/host=*")).unwrap().description(), "a host");
    }

    #[test]
    fn test_effective_access_defaults_to_read_only_config() {
        let root = sample_root();
        let host = root.find(&addr("/host=alpha")).unwrap();
        let undeclared = host.attribute_access("mystery");
        assert_eq!(undeclared.access, AccessKind::ReadOnly);
        assert_eq!(undeclared.storage, Storage::Configuration);
        let declared = host.attribute_access("port");
        assert!(declared.access.is_writable());
    }

    #[test]
    fn test_inherited_operation_resolution() {
        let root = sample_root();
        let server = addr("/host=alpha/server=web");
        // "query" is inherited from the root.
        assert!(root.operation_entry(&server, "query").is_some());
        // "restart" is local to host registrations, not inherited.
        assert!(root.operation_entry(&addr("/host=alpha"), "restart").is_some());
        assert!(root.operation_entry(&server, "restart").is_none());

        let names: Vec<String> = root
            .operations_at(&server, true)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["query".to_string()]);
        assert!(root.operations_at(&server, false).is_empty());
    }

    #[test]
    fn test_child_addresses_and_pure_alias() {
        let mut root = sample_root();
        root.register_child(&wildcard("shortcut"), {
            let mut alias = Registration::new("alias to host");
            alias.set_alias(addr("/host=alpha"));
            alias
        });
        let elements: Vec<String> = root
            .child_addresses()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(elements, vec!["host=*".to_string(), "shortcut=*".to_string()]);
        assert!(root.child_type_is_pure_alias("shortcut"));
        assert!(!root.child_type_is_pure_alias("host"));
        assert!(!root.child_type_is_pure_alias("absent"));
    }

    #[test]
    fn test_ordered_child_type_flag() {
        let mut root = sample_root();
        root.set_ordered_child_type("interceptor");
        assert!(root.is_ordered_child_type("interceptor"));
        assert!(!root.is_ordered_child_type("host"));
    }

    #[test]
    fn test_declared_metadata_is_queryable() {
        let mut node = Registration::new("a datasource");
        node.register_notification("pool-exhausted", "connection pool ran dry")
            .register_capability("org.tiller.datasource")
            .set_runtime_only();
        assert!(node.is_runtime_only());
        assert_eq!(
            node.notifications().collect::<Vec<_>>(),
            vec![("pool-exhausted", "connection pool ran dry")]
        );
        assert_eq!(node.capabilities().collect::<Vec<_>>(), vec!["org.tiller.datasource"]);
    }
}
