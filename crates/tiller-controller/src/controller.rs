//! The model controller: operation intake, dispatch, and the response
//! envelope.
//!
//! # Architecture
//!
//! [`ModelController`] is the process-facing surface: it accepts an
//! [`Operation`] plus a [`Caller`] and returns a response envelope with
//! `outcome`, `result` or `failure-description`, and the rolled-back
//! marker. Internally a shared [`Kernel`] owns the immutable registration
//! root, the live tree, the policy decider, the hierarchical write lock,
//! and the proxy routing table; every submitted operation gets a fresh
//! [`OperationContext`] over that kernel.
//!
//! Dispatch resolution follows registration aliases (bounded, to cut
//! cycles) and routes addresses under a remote mount point through the
//! proxy transport instead of the local pipeline.

use std::sync::Arc;
use std::thread;

use tiller_model::{Operation, PathAddress, Value, keys};
use tracing::{debug, info, warn};

use crate::access::{AccessEffect, Caller, PermitAll, PolicyDecider};
use crate::config::ControllerConfig;
use crate::error::{OperationError, OperationResult};
use crate::handlers::OperationHandler;
use crate::pipeline::boot::{BootHandle, boot_handoff};
use crate::pipeline::context::OperationContext;
use crate::pipeline::lock::ModelLock;
use crate::pipeline::proxy::{ProxyController, ProxyTable};
use crate::registry::Registration;
use crate::tree::ResourceTree;

/// Bound on registration-alias redirections during dispatch.
const MAX_ALIAS_REDIRECTS: usize = 16;

/// Shared immutable-after-build state behind every operation context.
pub struct Kernel {
    registry: Registration,
    tree: Arc<ResourceTree>,
    policy: Arc<dyn PolicyDecider>,
    lock: Arc<ModelLock>,
    proxies: ProxyTable,
    config: ControllerConfig,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.config)
            .field("proxies", &self.proxies)
            .finish_non_exhaustive()
    }
}

pub(crate) enum Dispatch {
    Local(Arc<dyn OperationHandler>, Operation),
    Remote(Arc<dyn ProxyController>, Operation),
}

impl Kernel {
    /// The live resource tree.
    #[must_use]
    pub fn tree(&self) -> &ResourceTree {
        &self.tree
    }

    /// The root registration node.
    #[must_use]
    pub fn registry(&self) -> &Registration {
        &self.registry
    }

    /// The controller configuration.
    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub(crate) fn policy(&self) -> Arc<dyn PolicyDecider> {
        Arc::clone(&self.policy)
    }

    pub(crate) fn model_lock(&self) -> &Arc<ModelLock> {
        &self.lock
    }

    pub(crate) fn proxies(&self) -> &ProxyTable {
        &self.proxies
    }

    /// Looks up the dispatch target for `operation`, following
    /// registration aliases and remote mounts.
    pub(crate) fn resolve_dispatch(&self, operation: &Operation) -> OperationResult<Dispatch> {
        let mut op = operation.clone();
        for _ in 0..MAX_ALIAS_REDIRECTS {
            if let Some((prefix, proxy)) = self.proxies.route(op.address()) {
                debug!(operation = %op, mount = %prefix, "dispatching to remote controller");
                return Ok(Dispatch::Remote(Arc::clone(proxy), op));
            }
            if let Some(redirected) = self.alias_redirect(op.address()) {
                op = op.retarget(redirected);
                continue;
            }
            if let Some(node) = self.registry.find(op.address()) {
                if node.is_remote() {
                    return Err(OperationError::Internal {
                        address: op.address().clone(),
                        message: "remote registration has no proxy mount".to_string(),
                    });
                }
            }
            let entry = self
                .registry
                .operation_entry(op.address(), op.name())
                .ok_or_else(|| OperationError::Validation {
                    address: op.address().clone(),
                    message: format!("no handler registered for operation {}", op.name()),
                })?;
            return Ok(Dispatch::Local(Arc::clone(&entry.handler), op));
        }
        Err(OperationError::Internal {
            address: operation.address().clone(),
            message: "registration alias redirection limit exceeded".to_string(),
        })
    }

    /// If some prefix of `address` is an alias registration, the address
    /// with that prefix substituted by the alias target.
    fn alias_redirect(&self, address: &PathAddress) -> Option<PathAddress> {
        let chain = self.registry.node_chain(address)?;
        for (depth, node) in chain.iter().enumerate() {
            if let Some(target) = node.alias_target() {
                return Some(target.clone().concat(&address.sub_address(depth)));
            }
        }
        None
    }

    /// Executes `operation` as `caller` and returns the full response
    /// envelope. Never panics or errors at this boundary: every failure
    /// is encoded in the envelope.
    pub(crate) fn execute_for(self: &Arc<Self>, operation: Operation, caller: Caller) -> Value {
        self.execute_raw(operation, caller).0
    }

    /// Like [`execute_for`](Self::execute_for) but also yields the typed
    /// failure, for coordinators that branch on the failure kind.
    pub(crate) fn execute_raw(
        self: &Arc<Self>,
        operation: Operation,
        caller: Caller,
    ) -> (Value, Option<OperationError>) {
        match self.resolve_dispatch(&operation) {
            Err(error) => (failed_envelope(&error, false), Some(error)),
            Ok(Dispatch::Remote(proxy, op)) => {
                match proxy.execute(&op, self.config.proxy_timeout()) {
                    Ok(result) => (success_envelope(result), None),
                    Err(error) => (failed_envelope(&error, false), Some(error)),
                }
            }
            Ok(Dispatch::Local(handler, op)) => {
                let mut context = OperationContext::new(Arc::clone(self), caller);
                let authorized = context
                    .authorize(op.name(), op.address(), AccessEffect::Address)
                    .and_then(|()| context.authorize(op.name(), op.address(), AccessEffect::Execute));
                if let Err(error) = authorized {
                    warn!(operation = %op, %error, "operation rejected");
                    return (failed_envelope(&error, false), Some(error));
                }
                context.enqueue_root(op, handler);
                context.run_to_completion();
                let (result, failure, rolled_back) = context.into_outcome();
                match failure {
                    None => (success_envelope(result), None),
                    Some(error) => (failed_envelope(&error, rolled_back), Some(error)),
                }
            }
        }
    }
}

fn success_envelope(result: Value) -> Value {
    let mut envelope = Value::object();
    envelope.set(keys::OUTCOME, keys::SUCCESS);
    envelope.set(keys::RESULT, result);
    envelope
}

fn failed_envelope(error: &OperationError, rolled_back: bool) -> Value {
    let mut envelope = Value::object();
    envelope.set(keys::OUTCOME, keys::FAILED);
    envelope.set(keys::FAILURE_DESCRIPTION, error.failure_description());
    envelope.set(keys::ROLLED_BACK, rolled_back);
    envelope
}

/// Assembles a [`ModelController`].
pub struct ControllerBuilder {
    registry: Registration,
    config: ControllerConfig,
    policy: Arc<dyn PolicyDecider>,
    proxies: ProxyTable,
}

impl ControllerBuilder {
    #[must_use]
    pub fn new(registry: Registration) -> Self {
        Self {
            registry,
            config: ControllerConfig::default(),
            policy: Arc::new(PermitAll),
            proxies: ProxyTable::new(),
        }
    }

    #[must_use]
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: Arc<dyn PolicyDecider>) -> Self {
        self.policy = policy;
        self
    }

    /// Mounts a remote controller under `prefix`.
    #[must_use]
    pub fn mount_proxy(mut self, prefix: PathAddress, proxy: Arc<dyn ProxyController>) -> Self {
        self.proxies.mount(prefix, proxy);
        self
    }

    #[must_use]
    pub fn build(self) -> ModelController {
        info!(role = %self.config.role, "model controller ready");
        ModelController {
            kernel: Arc::new(Kernel {
                registry: self.registry,
                tree: Arc::new(ResourceTree::new()),
                policy: self.policy,
                lock: Arc::new(ModelLock::new()),
                proxies: self.proxies,
                config: self.config,
            }),
        }
    }
}

/// Process-facing operation surface over one shared kernel.
#[derive(Clone, Debug)]
pub struct ModelController {
    kernel: Arc<Kernel>,
}

impl ModelController {
    /// Starts assembling a controller over `registry`.
    #[must_use]
    pub fn builder(registry: Registration) -> ControllerBuilder {
        ControllerBuilder::new(registry)
    }

    /// The shared kernel, for collaborators that seed model state.
    #[must_use]
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// Executes one operation as `caller`, returning the response
    /// envelope (`outcome`, then `result` or `failure-description`).
    #[must_use]
    pub fn execute(&self, operation: Operation, caller: Caller) -> Value {
        self.kernel.execute_for(operation, caller)
    }

    /// Executes one operation as the internal in-process caller.
    #[must_use]
    pub fn execute_internal(&self, operation: Operation) -> Value {
        self.execute(operation, Caller::internal())
    }

    /// Atomic value-tree snapshot of a subtree, for the persistence
    /// collaborator.
    ///
    /// # Errors
    ///
    /// `NoSuchResource` when the address does not resolve.
    pub fn read_model(&self, address: &PathAddress, recursive: bool) -> OperationResult<Value> {
        self.kernel.tree.read_model(address, recursive)
    }

    /// Boot-time bridge: runs `scan` on a worker thread and returns the
    /// handle the synchronous boot caller blocks on. If the scan yields
    /// an operation, it executes through the normal pipeline and its
    /// terminal outcome is published through the second hand-off.
    #[must_use]
    pub fn spawn_boot_scan<F>(&self, caller: Caller, scan: F) -> BootHandle
    where
        F: FnOnce() -> Option<Operation> + Send + 'static,
    {
        let (scan_handle, boot_handle) = boot_handoff();
        let controller = self.clone();
        let spawned = thread::Builder::new()
            .name("boot-scan".to_string())
            .spawn(move || match scan() {
                None => scan_handle.no_work(),
                Some(operation) => {
                    let completion = scan_handle.work_found();
                    let address = operation.address().clone();
                    let envelope = controller.execute(operation, caller);
                    completion.finish(envelope_outcome(&envelope, address));
                }
            });
        if let Err(error) = spawned {
            warn!(%error, "failed to spawn boot scan thread");
        }
        boot_handle
    }
}

fn envelope_outcome(envelope: &Value, address: PathAddress) -> OperationResult<Value> {
    if envelope.field(keys::OUTCOME).as_str() == Some(keys::SUCCESS) {
        Ok(envelope.field(keys::RESULT).clone())
    } else {
        Err(OperationError::Runtime {
            address,
            message: envelope
                .field(keys::FAILURE_DESCRIPTION)
                .as_str()
                .unwrap_or("boot work failed")
                .to_string(),
        })
    }
}
