//! Shared fixtures: a small management schema (groups containing
//! servers) with the global operations registered, plus envelope helpers.
#![allow(dead_code)]

use std::sync::Arc;

use tiller_controller::access::Caller;
use tiller_controller::registry::{AttributeDescriptor, Registration, RestartRequired};
use tiller_controller::{ModelController, register_global_operations};
use tiller_model::{Operation, PathAddress, PathElement, Value, keys};

/// Route `RUST_LOG`-filtered tracing output to the test harness. Safe to
/// call from every test; only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn addr(s: &str) -> PathAddress {
    PathAddress::parse(s).unwrap()
}

pub fn wildcard(key: &str) -> PathElement {
    PathElement::wildcard(key).unwrap()
}

/// Root with a `timeout` attribute, `group=*` children, and `server=*`
/// grandchildren, all carrying a writable `timeout`.
pub fn sample_registry() -> Registration {
    let mut root = Registration::new("the management root");
    root.register_attribute(
        "timeout",
        AttributeDescriptor::read_write("default request timeout", RestartRequired::NoServices),
    );
    let group = root.register_child(&wildcard("group"), Registration::new("a server group"));
    group.register_attribute(
        "timeout",
        AttributeDescriptor::read_write("group request timeout", RestartRequired::NoServices),
    );
    let server = group.register_child(&wildcard("server"), Registration::new("a managed server"));
    server.register_attribute(
        "timeout",
        AttributeDescriptor::read_write("server request timeout", RestartRequired::NoServices),
    );
    register_global_operations(&mut root);
    root
}

pub fn sample_controller() -> ModelController {
    init_tracing();
    ModelController::builder(sample_registry()).build()
}

/// Creates `/group=main` and `/group=main/server=web`.
pub fn seed(controller: &ModelController) {
    for address in ["/group=main", "/group=main/server=web"] {
        let envelope = controller.execute_internal(Operation::new("add", addr(address)));
        assert_success(&envelope);
    }
}

pub fn assert_success(envelope: &Value) {
    assert_eq!(
        envelope.field(keys::OUTCOME).as_str(),
        Some(keys::SUCCESS),
        "expected success, got {envelope}"
    );
}

pub fn assert_failed(envelope: &Value) {
    assert_eq!(
        envelope.field(keys::OUTCOME).as_str(),
        Some(keys::FAILED),
        "expected failure, got {envelope}"
    );
}

pub fn result<'a>(envelope: &'a Value) -> &'a Value {
    envelope.field(keys::RESULT)
}

pub fn as_caller(name: &str) -> Caller {
    Caller::new(name)
}

pub fn arc<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
