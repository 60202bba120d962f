//! End-to-end pipeline behavior: envelope shape, validation
//! short-circuiting, and rollback ordering over the shared tree.

mod common;

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use common::{addr, assert_failed, assert_success, result, sample_controller, sample_registry, seed};
use tiller_controller::config::ControllerConfig;
use tiller_controller::error::{OperationError, OperationResult};
use tiller_controller::pipeline::{OperationContext, Stage};
use tiller_controller::registry::OperationEntry;
use tiller_controller::{ModelController, OperationHandler};
use tiller_model::{Operation, PathAddress, Value, keys};

#[test]
fn test_add_then_read_attribute() {
    let controller = sample_controller();
    let op = Operation::new("add", addr("/group=main")).with_param("timeout", 30_i64);
    assert_success(&controller.execute_internal(op));

    let read = Operation::new("read-attribute", addr("/group=main")).with_param(keys::NAME, "timeout");
    let envelope = controller.execute_internal(read);
    assert_success(&envelope);
    assert_eq!(result(&envelope).as_long(), Some(30));
}

#[test]
fn test_unknown_operation_fails_cleanly() {
    let controller = sample_controller();
    let envelope = controller.execute_internal(Operation::new("frobnicate", addr("/group=main")));
    assert_failed(&envelope);
    assert!(
        envelope
            .field(keys::FAILURE_DESCRIPTION)
            .as_str()
            .unwrap()
            .contains("frobnicate")
    );
}

#[test]
fn test_validation_failure_leaves_no_trace() {
    let controller = sample_controller();
    let op = Operation::new("add", addr("/group=main")).with_param("bogus", true);
    let envelope = controller.execute_internal(op);
    assert_failed(&envelope);
    assert_eq!(envelope.field(keys::ROLLED_BACK).as_bool(), Some(false));

    // The tree must not contain the half-created resource.
    let read = Operation::new("read-resource", addr("/group=main"));
    assert_failed(&controller.execute_internal(read));
}

#[test]
fn test_duplicate_add_is_rejected() {
    let controller = sample_controller();
    seed(&controller);
    let envelope = controller.execute_internal(Operation::new("add", addr("/group=main")));
    assert_failed(&envelope);
}

#[test]
fn test_remove_rollback_restores_subtree() {
    // A remove that succeeds followed by a failing sibling step inside
    // one composite must restore the removed subtree wholesale.
    let log = Arc::new(Mutex::new(Vec::new()));
    let controller = controller_with_probes(&log);
    seed(&controller);

    let mut steps = Value::list();
    steps.push(Operation::new("remove", addr("/group=main")).to_value());
    steps.push(Operation::new("probe-fail", addr("/")).to_value());
    let composite =
        Operation::new("composite", addr("/")).with_param(keys::STEPS, steps);
    let envelope = controller.execute_internal(composite);
    assert_failed(&envelope);
    assert_eq!(envelope.field(keys::ROLLED_BACK).as_bool(), Some(true));

    // The whole subtree is back, grandchildren included.
    let read = Operation::new("read-resource", addr("/group=main/server=web"));
    assert_success(&controller.execute_internal(read));
}

#[test]
fn test_rollbacks_run_in_reverse_completion_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let controller = controller_with_probes(&log);

    let mut steps = Value::list();
    steps.push(
        Operation::new("probe", addr("/"))
            .with_param("tag", "first")
            .to_value(),
    );
    steps.push(
        Operation::new("probe", addr("/"))
            .with_param("tag", "second")
            .to_value(),
    );
    steps.push(Operation::new("probe-fail", addr("/")).to_value());
    let composite = Operation::new("composite", addr("/")).with_param(keys::STEPS, steps);
    assert_failed(&controller.execute_internal(composite));

    let order = log.lock().unwrap().clone();
    assert_eq!(order, vec!["second".to_string(), "first".to_string()]);
}

#[test]
fn test_rollback_handlers_do_not_run_on_success() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let controller = controller_with_probes(&log);
    let probe = Operation::new("probe", addr("/")).with_param("tag", "only");
    assert_success(&controller.execute_internal(probe));
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_stages_run_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let controller = controller_with_probes(&log);
    assert_success(&controller.execute_internal(Operation::new("staged", addr("/"))));
    let order = log.lock().unwrap().clone();
    assert_eq!(
        order,
        vec!["model".to_string(), "runtime".to_string(), "verify".to_string()]
    );
}

#[test]
fn test_model_failure_prevents_runtime_execution() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let controller = controller_with_probes(&log);

    let mut steps = Value::list();
    steps.push(Operation::new("staged", addr("/")).to_value());
    steps.push(
        Operation::new("add", addr("/group=bad"))
            .with_param("bogus", true)
            .to_value(),
    );
    let composite = Operation::new("composite", addr("/")).with_param(keys::STEPS, steps);
    assert_failed(&controller.execute_internal(composite));

    // The model step ran, but its scheduled runtime work never did.
    let order = log.lock().unwrap().clone();
    assert_eq!(order, vec!["model".to_string()]);
}

/// `probe` records its tag on rollback; `probe-fail` fails at once.
struct ProbeHandler {
    log: Arc<Mutex<Vec<String>>>,
}

impl OperationHandler for ProbeHandler {
    fn execute(&self, context: &mut OperationContext, operation: &Operation) -> OperationResult<()> {
        let tag = operation.param("tag").as_str().unwrap_or("untagged").to_string();
        let log = Arc::clone(&self.log);
        context.record_rollback(move |_context| {
            log.lock().unwrap().push(tag);
        });
        Ok(())
    }
}

/// Touches all three stages, logging each visit.
struct StagedHandler {
    log: Arc<Mutex<Vec<String>>>,
}

impl OperationHandler for StagedHandler {
    fn execute(&self, context: &mut OperationContext, operation: &Operation) -> OperationResult<()> {
        self.log.lock().unwrap().push("model".to_string());
        let runtime_log = Arc::clone(&self.log);
        context.add_inline_step(
            operation.clone(),
            Stage::Runtime,
            false,
            move |_context, _operation| {
                runtime_log.lock().unwrap().push("runtime".to_string());
                Ok(())
            },
        )?;
        let verify_log = Arc::clone(&self.log);
        context.add_inline_step(
            operation.clone(),
            Stage::Verify,
            false,
            move |_context, _operation| {
                verify_log.lock().unwrap().push("verify".to_string());
                Ok(())
            },
        )?;
        Ok(())
    }
}

struct FailingHandler;

impl OperationHandler for FailingHandler {
    fn execute(&self, _context: &mut OperationContext, operation: &Operation) -> OperationResult<()> {
        Err(OperationError::Runtime {
            address: operation.address().clone(),
            message: "probe failure".to_string(),
        })
    }
}

fn controller_with_probes(log: &Arc<Mutex<Vec<String>>>) -> ModelController {
    let mut registry = sample_registry();
    registry.register_operation(
        "probe",
        OperationEntry::new(
            Arc::new(ProbeHandler {
                log: Arc::clone(log),
            }),
            false,
        ),
    );
    registry.register_operation("probe-fail", OperationEntry::new(Arc::new(FailingHandler), false));
    registry.register_operation(
        "staged",
        OperationEntry::new(
            Arc::new(StagedHandler {
                log: Arc::clone(log),
            }),
            false,
        ),
    );
    ModelController::builder(registry).build()
}

/// Acquires the configured write addresses in order, then parks until
/// the test releases it, keeping its guards held mid-pipeline.
struct HoldAndPark {
    addresses: Vec<PathAddress>,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl OperationHandler for HoldAndPark {
    fn execute(&self, context: &mut OperationContext, _operation: &Operation) -> OperationResult<()> {
        for address in &self.addresses {
            context.acquire_write_access(address)?;
        }
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv();
        Ok(())
    }
}

fn parking_controller(
    addresses: &[&str],
    lock_timeout_ms: u64,
) -> (ModelController, mpsc::Receiver<()>, mpsc::Sender<()>) {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let mut registry = sample_registry();
    registry.register_operation(
        "hold",
        OperationEntry::new(
            Arc::new(HoldAndPark {
                addresses: addresses.iter().map(|s| addr(s)).collect(),
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
            }),
            false,
        ),
    );
    let config = ControllerConfig {
        lock_timeout_ms,
        ..ControllerConfig::default()
    };
    let controller = ModelController::builder(registry).config(config).build();
    (controller, entered_rx, release_tx)
}

#[test]
fn test_widened_ancestor_lock_excludes_sibling_writers() {
    // A context that locked a server and then its group must hold the
    // group against every other writer underneath it, not just its own
    // server.
    let (controller, entered, release) =
        parking_controller(&["/group=a/server=x", "/group=a"], 30_000);
    assert_success(&controller.execute_internal(Operation::new("add", addr("/group=a"))));

    let holder = controller.clone();
    let holding = thread::spawn(move || holder.execute_internal(Operation::new("hold", addr("/"))));
    entered.recv_timeout(Duration::from_secs(2)).unwrap();

    let writer = controller.clone();
    let (done_tx, done_rx) = mpsc::channel();
    let writing = thread::spawn(move || {
        let envelope = writer.execute_internal(Operation::new("add", addr("/group=a/server=y")));
        done_tx.send(()).unwrap();
        envelope
    });
    assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

    release.send(()).unwrap();
    assert_success(&holding.join().unwrap());
    done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_success(&writing.join().unwrap());
}

#[test]
fn test_contended_write_fails_after_lock_deadline() {
    let (controller, entered, release) = parking_controller(&["/group=a"], 50);
    assert_success(&controller.execute_internal(Operation::new("add", addr("/group=a"))));

    let holder = controller.clone();
    let holding = thread::spawn(move || holder.execute_internal(Operation::new("hold", addr("/"))));
    entered.recv_timeout(Duration::from_secs(2)).unwrap();

    let envelope = controller.execute_internal(Operation::new("add", addr("/group=a/server=y")));
    assert_failed(&envelope);
    assert!(
        envelope
            .field(keys::FAILURE_DESCRIPTION)
            .as_str()
            .unwrap_or_default()
            .contains("timed out")
    );

    release.send(()).unwrap();
    assert_success(&holding.join().unwrap());
}

#[test]
fn test_global_operations_are_inherited_by_descendants() {
    let registry = sample_registry();
    assert!(registry.operation_entry(&addr("/group=x"), "read-resource").is_some());
    assert!(
        registry
            .operation_entry(&addr("/group=x/server=y"), "write-attribute")
            .is_some()
    );
    // composite is a root-only operation.
    assert!(registry.operation_entry(&addr("/group=x"), "composite").is_none());
}
