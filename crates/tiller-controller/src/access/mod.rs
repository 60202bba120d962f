//! Authorization for management operations and attributes.
//!
//! Every effect an operation can have is named by an [`AccessEffect`]:
//! addressability of a resource, reading or writing its configuration,
//! reading or writing runtime state, and executing an operation on it.
//! A [`PolicyDecider`] turns a `(caller, address, effect)` triple into a
//! [`Decision`]; the [`AuthorizationEngine`] fronts the decider with a
//! per-request memo so a recursive read authorizes each node once.
//!
//! Denied `Address` checks are the strongest form: a caller that may not
//! address a resource must not be able to learn that it exists, so the
//! kernel maps that denial to the same error shape as a missing resource.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tiller_model::PathAddress;
use tracing::trace;

/// One checkable effect of an operation against one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessEffect {
    /// Learn that the resource exists at all.
    Address,
    /// Read persistent configuration.
    ReadConfig,
    /// Write persistent configuration.
    WriteConfig,
    /// Read runtime state.
    ReadRuntime,
    /// Write runtime state.
    WriteRuntime,
    /// Execute a named operation.
    Execute,
}

impl AccessEffect {
    /// Stable lower-case name, as rendered in access-control metadata.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::ReadConfig => "read-config",
            Self::WriteConfig => "write-config",
            Self::ReadRuntime => "read-runtime",
            Self::WriteRuntime => "write-runtime",
            Self::Execute => "execute",
        }
    }
}

impl fmt::Display for AccessEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one access check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Decision {
    #[default]
    Permit,
    Deny,
}

impl Decision {
    #[must_use]
    pub const fn is_permit(&self) -> bool {
        matches!(self, Self::Permit)
    }
}

/// Pluggable policy seam. Implementations must be cheap and pure: the
/// engine memoizes per request, not across requests.
pub trait PolicyDecider: Send + Sync {
    fn decide(&self, caller: &Caller, address: &PathAddress, effect: AccessEffect) -> Decision;
}

/// Identity on whose behalf an operation executes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Caller {
    name: String,
}

impl Caller {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The anonymous in-process caller used for internal operations.
    #[must_use]
    pub fn internal() -> Self {
        Self::new("internal")
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Decider that permits everything. The default for standalone use.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermitAll;

impl PolicyDecider for PermitAll {
    fn decide(&self, _: &Caller, _: &PathAddress, _: AccessEffect) -> Decision {
        Decision::Permit
    }
}

/// Table-driven decider: denies exactly the listed triples, permits the
/// rest. Rule addresses match by prefix so a denial covers a subtree.
#[derive(Debug, Default)]
pub struct DenyRules {
    rules: Vec<(String, PathAddress, AccessEffect)>,
}

impl DenyRules {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Denies `effect` for `caller` on `address` and everything below it.
    #[must_use]
    pub fn deny(mut self, caller: &str, address: PathAddress, effect: AccessEffect) -> Self {
        self.rules.push((caller.to_string(), address, effect));
        self
    }
}

impl PolicyDecider for DenyRules {
    fn decide(&self, caller: &Caller, address: &PathAddress, effect: AccessEffect) -> Decision {
        let denied = self.rules.iter().any(|(who, prefix, what)| {
            who == caller.name() && *what == effect && address.starts_with(prefix)
        });
        if denied {
            Decision::Deny
        } else {
            Decision::Permit
        }
    }
}

/// Memoized front for one request's access checks.
///
/// One cache lives for the duration of one operation pipeline, so a deep
/// recursive read asks the decider once per `(address, effect)` pair. The
/// caller is fixed at construction.
pub struct AuthorizationEngine {
    decider: Arc<dyn PolicyDecider>,
    caller: Caller,
    memo: Mutex<HashMap<(PathAddress, AccessEffect), Decision>>,
}

impl fmt::Debug for AuthorizationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationEngine")
            .field("caller", &self.caller)
            .finish_non_exhaustive()
    }
}

impl AuthorizationEngine {
    #[must_use]
    pub fn new(decider: Arc<dyn PolicyDecider>, caller: Caller) -> Self {
        Self {
            decider,
            caller,
            memo: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn caller(&self) -> &Caller {
        &self.caller
    }

    /// Checks one effect, consulting the memo first.
    #[must_use]
    pub fn check(&self, address: &PathAddress, effect: AccessEffect) -> Decision {
        let key = (address.clone(), effect);
        let mut memo = self
            .memo
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(decision) = memo.get(&key) {
            return *decision;
        }
        let decision = self.decider.decide(&self.caller, address, effect);
        trace!(caller = %self.caller, address = %address, effect = %effect, ?decision, "access check");
        memo.insert(key, decision);
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn addr(s: &str) -> PathAddress {
        PathAddress::parse(s).unwrap()
    }

    struct Counting {
        inner: DenyRules,
        calls: AtomicUsize,
    }

    impl PolicyDecider for Counting {
        fn decide(&self, caller: &Caller, address: &PathAddress, effect: AccessEffect) -> Decision {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.inner.decide(caller, address, effect)
        }
    }

    #[test]
    fn test_permit_all_permits() {
        let engine = AuthorizationEngine::new(Arc::new(PermitAll), Caller::internal());
        assert!(engine.check(&addr("/host=a"), AccessEffect::WriteConfig).is_permit());
    }

    #[test]
    fn test_deny_rules_match_by_prefix() {
        let rules = DenyRules::new().deny("bob", addr("/host=a"), AccessEffect::ReadConfig);
        let engine = AuthorizationEngine::new(Arc::new(rules), Caller::new("bob"));
        assert_eq!(
            engine.check(&addr("/host=a/server=web"), AccessEffect::ReadConfig),
            Decision::Deny
        );
        assert_eq!(engine.check(&addr("/host=b"), AccessEffect::ReadConfig), Decision::Permit);
        // A different effect on the denied subtree is still permitted.
        assert_eq!(engine.check(&addr("/host=a"), AccessEffect::Address), Decision::Permit);
    }

    #[test]
    fn test_engine_memoizes_per_pair() {
        let decider = Arc::new(Counting {
            inner: DenyRules::new(),
            calls: AtomicUsize::new(0),
        });
        let engine = AuthorizationEngine::new(decider.clone(), Caller::internal());
        let a = addr("/host=a");
        for _ in 0..3 {
            let _ = engine.check(&a, AccessEffect::ReadConfig);
        }
        let _ = engine.check(&a, AccessEffect::WriteConfig);
        assert_eq!(decider.calls.load(Ordering::Relaxed), 2);
    }
}
