//! Scoped attribute resolution across root, group, and server scopes,
//! plus ordered child collections and snapshot idempotence.

mod common;

use common::{addr, assert_success, result, sample_controller, sample_registry, seed, wildcard};
use tiller_controller::ModelController;
use tiller_controller::registry::Registration;
use tiller_model::{Operation, PathAddress, Value, keys};

fn write_timeout(address: &str, value: Value) -> Operation {
    Operation::new("write-attribute", addr(address))
        .with_param(keys::NAME, "timeout")
        .with_param(keys::VALUE, value)
}

fn resolve_timeout(controller: &ModelController, address: &str) -> Value {
    let envelope = controller.execute_internal(
        Operation::new("read-attribute", addr(address))
            .with_param(keys::NAME, "timeout")
            .with_param(keys::RESOLVE, true),
    );
    assert_success(&envelope);
    result(&envelope).clone()
}

#[test]
fn test_group_override_shadows_root_and_reverts_on_removal() {
    let controller = sample_controller();
    seed(&controller);

    // Root scope sets the default.
    assert_success(&controller.execute_internal(write_timeout("/", Value::Long(30))));
    assert_eq!(
        resolve_timeout(&controller, "/group=main/server=web").as_long(),
        Some(30)
    );

    // A group-scope override shadows it for servers under that group.
    assert_success(&controller.execute_internal(write_timeout("/group=main", Value::Long(5))));
    assert_eq!(
        resolve_timeout(&controller, "/group=main/server=web").as_long(),
        Some(5)
    );

    // Removing the override reverts visible reads without any
    // server-level write.
    assert_success(&controller.execute_internal(write_timeout("/group=main", Value::Undefined)));
    assert_eq!(
        resolve_timeout(&controller, "/group=main/server=web").as_long(),
        Some(30)
    );
}

#[test]
fn test_unresolved_read_sees_only_the_local_scope() {
    let controller = sample_controller();
    seed(&controller);
    assert_success(&controller.execute_internal(write_timeout("/", Value::Long(30))));

    let envelope = controller.execute_internal(
        Operation::new("read-attribute", addr("/group=main/server=web"))
            .with_param(keys::NAME, "timeout"),
    );
    assert_success(&envelope);
    assert!(!result(&envelope).is_defined());
}

#[test]
fn test_read_resource_snapshots_are_idempotent() {
    let controller = sample_controller();
    seed(&controller);
    assert_success(&controller.execute_internal(write_timeout("/group=main", Value::Long(5))));

    let read = Operation::new("read-resource", addr("/")).with_param(keys::RECURSIVE, true);
    let first = controller.execute_internal(read.clone());
    let second = controller.execute_internal(read);
    assert_success(&first);
    assert_eq!(first.to_json(), second.to_json());
}

#[test]
fn test_read_model_exposes_the_whole_subtree() {
    let controller = sample_controller();
    seed(&controller);
    assert_success(&controller.execute_internal(write_timeout("/group=main", Value::Long(5))));

    let model = controller.read_model(&PathAddress::empty(), true).unwrap();
    assert_eq!(
        model.field_path(&["group", "main", "timeout"]).as_long(),
        Some(5)
    );
    assert!(model.field_path(&["group", "main", "server"]).has("web"));
}

#[test]
fn test_ordered_children_receive_implicit_indices() {
    let mut registry = sample_registry();
    registry.register_child(&wildcard("interceptor"), Registration::new("an interceptor"));
    registry.set_ordered_child_type("interceptor");
    let controller = ModelController::builder(registry).build();

    assert_success(&controller.execute_internal(Operation::new("add", addr("/interceptor=auth"))));
    assert_success(&controller.execute_internal(Operation::new("add", addr("/interceptor=audit"))));

    let index_of = |name: &str| {
        let envelope = controller.execute_internal(
            Operation::new("read-attribute", addr(&format!("/interceptor={name}")))
                .with_param(keys::NAME, keys::INDEX),
        );
        assert_success(&envelope);
        result(&envelope).as_long()
    };
    assert_eq!(index_of("auth"), Some(0));
    assert_eq!(index_of("audit"), Some(1));
}
