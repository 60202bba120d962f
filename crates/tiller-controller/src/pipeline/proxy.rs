//! Dispatch to remote controller processes.
//!
//! A subtree whose authoritative data lives in another process is
//! registered as remote; operations addressed below its mount point are
//! forwarded through a [`ProxyController`] instead of running locally.
//! The forwarding step blocks on the remote terminal outcome, with a
//! deadline: a silent remote fails the step rather than hanging the
//! pipeline.

use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tiller_model::{Operation, PathAddress, Value};
use tracing::{debug, warn};

use crate::error::{OperationError, OperationResult};

/// Transport seam to one remote controller.
pub trait ProxyController: Send + Sync {
    /// Executes `operation` remotely and blocks for its terminal outcome,
    /// at most `timeout`.
    ///
    /// # Errors
    ///
    /// `Runtime` on transport failure or deadline expiry; otherwise the
    /// remote outcome mapped onto the local error taxonomy.
    fn execute(&self, operation: &Operation, timeout: Duration) -> OperationResult<Value>;
}

/// Routing table from mount-point prefixes to proxy transports.
#[derive(Default)]
pub struct ProxyTable {
    routes: Vec<(PathAddress, Arc<dyn ProxyController>)>,
}

impl fmt::Debug for ProxyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyTable")
            .field("mounts", &self.routes.iter().map(|(p, _)| p).collect::<Vec<_>>())
            .finish()
    }
}

impl ProxyTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts `proxy` at `prefix`. Later mounts shadow earlier equal ones.
    pub fn mount(&mut self, prefix: PathAddress, proxy: Arc<dyn ProxyController>) {
        self.routes.retain(|(p, _)| *p != prefix);
        self.routes.push((prefix, proxy));
    }

    /// Longest-prefix route for `address`, if any mount covers it.
    #[must_use]
    pub fn route(&self, address: &PathAddress) -> Option<(&PathAddress, &Arc<dyn ProxyController>)> {
        self.routes
            .iter()
            .filter(|(prefix, _)| address.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, proxy)| (prefix, proxy))
    }
}

/// In-process proxy transport over a request channel.
///
/// Each request carries its own reply channel; the worker thread serving
/// the far end answers at its own pace and the caller enforces the
/// deadline with a timed receive.
pub struct ChannelProxy {
    requests: Mutex<Sender<ProxyRequest>>,
}

/// One forwarded operation awaiting a reply.
pub struct ProxyRequest {
    pub operation: Operation,
    pub reply: Sender<OperationResult<Value>>,
}

impl ChannelProxy {
    /// Spawns a worker thread running `serve` over forwarded operations
    /// and returns the transport handle. The worker exits when the
    /// transport is dropped.
    #[must_use]
    pub fn spawn<F>(name: &str, mut serve: F) -> Arc<Self>
    where
        F: FnMut(&Operation) -> OperationResult<Value> + Send + 'static,
    {
        let (tx, rx): (Sender<ProxyRequest>, Receiver<ProxyRequest>) = mpsc::channel();
        let thread_name = format!("proxy-{name}");
        let _ = thread::Builder::new().name(thread_name).spawn(move || {
            while let Ok(request) = rx.recv() {
                let outcome = serve(&request.operation);
                // A caller that timed out dropped its receiver already.
                let _ = request.reply.send(outcome);
            }
        });
        Arc::new(Self {
            requests: Mutex::new(tx),
        })
    }
}

impl ProxyController for ChannelProxy {
    fn execute(&self, operation: &Operation, timeout: Duration) -> OperationResult<Value> {
        let (reply_tx, reply_rx) = mpsc::channel();
        let send_result = {
            let requests = self
                .requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            requests.send(ProxyRequest {
                operation: operation.clone(),
                reply: reply_tx,
            })
        };
        if send_result.is_err() {
            return Err(OperationError::Runtime {
                address: operation.address().clone(),
                message: "remote controller is no longer reachable".to_string(),
            });
        }
        debug!(operation = %operation, "forwarded to remote controller");
        match reply_rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                warn!(operation = %operation, ?timeout, "remote controller timed out");
                Err(OperationError::Runtime {
                    address: operation.address().clone(),
                    message: format!("remote controller did not respond within {timeout:?}"),
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(OperationError::Runtime {
                address: operation.address().clone(),
                message: "remote controller dropped the request".to_string(),
            }),
        }
    }
}
