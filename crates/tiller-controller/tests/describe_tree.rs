//! Recursive description assembly: postorder child merging, alias
//! exclusion, TRIM stripping, access-control exceptions, and partial
//! visibility for callers with uneven permissions.

mod common;

use std::sync::Arc;

use common::{addr, as_caller, assert_success, result, sample_registry, seed, wildcard};
use tiller_controller::access::{AccessEffect, DenyRules};
use tiller_controller::config::{ControllerConfig, ProcessRole};
use tiller_controller::registry::Registration;
use tiller_controller::ModelController;
use tiller_model::{Operation, PathElement, Value, keys};

fn describe(address: &str) -> Operation {
    Operation::new("read-resource-description", addr(address)).with_param(keys::RECURSIVE, true)
}

#[test]
fn test_recursive_description_reaches_grandchildren() {
    let controller = ModelController::builder(sample_registry()).build();
    seed(&controller);
    let envelope = controller.execute_internal(describe("/"));
    assert_success(&envelope);

    let document = result(&envelope);
    assert_eq!(
        document.field(keys::DESCRIPTION).as_str(),
        Some("the management root")
    );
    let group = document.field_path(&[keys::CHILDREN, "group", keys::MODEL_DESCRIPTION, "*"]);
    assert!(group.field(keys::ATTRIBUTES).has("timeout"));
    let server = group.field_path(&[keys::CHILDREN, "server", keys::MODEL_DESCRIPTION, "*"]);
    assert!(server.field(keys::ATTRIBUTES).has("timeout"));
}

#[test]
fn test_depth_one_stops_at_children() {
    let controller = ModelController::builder(sample_registry()).build();
    let envelope = controller.execute_internal(describe("/").with_param(keys::RECURSIVE_DEPTH, 1_i64));
    assert_success(&envelope);
    let group = result(&envelope).field_path(&[keys::CHILDREN, "group", keys::MODEL_DESCRIPTION, "*"]);
    // The group itself is described in full.
    assert!(group.field(keys::ATTRIBUTES).has("timeout"));
    // Depth ran out at the group level, so servers carry no model.
    let server_model = group.field_path(&[keys::CHILDREN, "server", keys::MODEL_DESCRIPTION]);
    assert!(!server_model.is_defined());
}

#[test]
fn test_pure_alias_child_type_is_excluded_by_default() {
    let mut registry = sample_registry();
    registry.register_child(&wildcard("shortcut"), {
        let mut alias = Registration::new("alias to the main group");
        alias.set_alias(addr("/group=main"));
        alias
    });
    let controller = ModelController::builder(registry).build();
    seed(&controller);

    let envelope = controller.execute_internal(describe("/"));
    assert_success(&envelope);
    let children = result(&envelope).field(keys::CHILDREN);
    assert!(children.has("group"));
    assert!(!children.has("shortcut"));

    let with_aliases =
        controller.execute_internal(describe("/").with_param(keys::INCLUDE_ALIASES, true));
    assert_success(&with_aliases);
    let children = result(&with_aliases).field(keys::CHILDREN).clone();
    assert!(children.has("shortcut"));
    // The alias read resolved to its target's description.
    assert!(
        children
            .field_path(&["shortcut", keys::MODEL_DESCRIPTION, "*", keys::ATTRIBUTES])
            .has("timeout")
    );
}

#[test]
fn test_trim_keeps_structure_and_access_control_only() {
    let controller = ModelController::builder(sample_registry()).build();
    seed(&controller);
    let envelope =
        controller.execute_internal(describe("/").with_param(keys::ACCESS_CONTROL, "trim"));
    assert_success(&envelope);
    let document = result(&envelope);
    assert!(!document.has_defined(keys::DESCRIPTION));
    assert!(!document.has_defined(keys::ATTRIBUTES));
    assert!(document.has_defined(keys::CHILDREN));
    assert!(document.has_defined(keys::ACCESS_CONTROL));
    // Nested levels are stripped too.
    let group = document.field_path(&[keys::CHILDREN, "group", keys::MODEL_DESCRIPTION, "*"]);
    assert!(!group.has_defined(keys::ATTRIBUTES));
    assert!(group.has_defined(keys::ACCESS_CONTROL));
}

#[test]
fn test_access_control_exceptions_list_only_differing_addresses() {
    let rules = DenyRules::new().deny("bob", addr("/group=other"), AccessEffect::WriteConfig);
    let controller = ModelController::builder(sample_registry())
        .policy(Arc::new(rules))
        .build();
    seed(&controller);
    assert_success(&controller.execute_internal(Operation::new("add", addr("/group=other"))));

    let envelope = controller.execute(
        Operation::new("read-resource-description", addr("/group=*"))
            .with_param(keys::ACCESS_CONTROL, "combined"),
        as_caller("bob"),
    );
    assert_success(&envelope);
    let section = result(&envelope).field(keys::ACCESS_CONTROL);
    assert_eq!(section.field_path(&[keys::DEFAULT, keys::WRITE]).as_bool(), Some(true));

    let exceptions = section.field(keys::EXCEPTIONS);
    // Only the address whose decisions differ from the default appears.
    assert!(exceptions.has("/group=other"));
    assert!(!exceptions.has("/group=main"));
    assert_eq!(
        exceptions.field_path(&["/group=other", keys::WRITE]).as_bool(),
        Some(false)
    );
    assert_eq!(
        exceptions.field_path(&["/group=other", keys::READ]).as_bool(),
        Some(true)
    );
}

#[test]
fn test_unaddressable_resource_never_appears_in_exceptions() {
    // Denying WriteConfig alone would surface /group=hidden as an
    // exception; the Address denial must win and keep it out entirely.
    let rules = DenyRules::new()
        .deny("bob", addr("/group=hidden"), AccessEffect::Address)
        .deny("bob", addr("/group=hidden"), AccessEffect::WriteConfig);
    let controller = ModelController::builder(sample_registry())
        .policy(Arc::new(rules))
        .build();
    seed(&controller);
    assert_success(&controller.execute_internal(Operation::new("add", addr("/group=hidden"))));

    let envelope = controller.execute(
        Operation::new("read-resource-description", addr("/group=*"))
            .with_param(keys::ACCESS_CONTROL, "combined"),
        as_caller("bob"),
    );
    assert_success(&envelope);
    let exceptions = result(&envelope).field_path(&[keys::ACCESS_CONTROL, keys::EXCEPTIONS]);
    assert!(!exceptions.has("/group=hidden"));
    assert!(!exceptions.has("/group=main"));
}

#[test]
fn test_concrete_target_defaults_come_from_its_type_scope() {
    let rules = DenyRules::new().deny("bob", addr("/group=main"), AccessEffect::WriteConfig);
    let controller = ModelController::builder(sample_registry())
        .policy(Arc::new(rules))
        .build();
    seed(&controller);

    let envelope = controller.execute(
        Operation::new("read-resource-description", addr("/group=main"))
            .with_param(keys::ACCESS_CONTROL, "combined"),
        as_caller("bob"),
    );
    assert_success(&envelope);
    let section = result(&envelope).field(keys::ACCESS_CONTROL);
    // The default reflects the group type, not the denied instance.
    assert_eq!(section.field_path(&[keys::DEFAULT, keys::WRITE]).as_bool(), Some(true));
    assert_eq!(
        section
            .field_path(&[keys::EXCEPTIONS, "/group=main", keys::WRITE])
            .as_bool(),
        Some(false)
    );
}

#[test]
fn test_unreadable_child_stays_structural_and_read_succeeds() {
    let mut registry = sample_registry();
    registry.register_child(
        &PathElement::new("group", "secret").unwrap(),
        Registration::new("a restricted group"),
    );
    let rules = DenyRules::new().deny("bob", addr("/group=secret"), AccessEffect::ReadConfig);
    let controller = ModelController::builder(registry).policy(Arc::new(rules)).build();
    seed(&controller);

    let envelope = controller.execute(describe("/"), as_caller("bob"));
    assert_success(&envelope);
    let section = result(&envelope).field_path(&[keys::CHILDREN, "group", keys::MODEL_DESCRIPTION]);
    // Present structurally, but contributes no attribute detail.
    assert!(section.has("secret"));
    assert!(!section.field("secret").has_defined(keys::ATTRIBUTES));
    // The readable pattern entry is intact.
    assert!(section.field("*").has_defined(keys::ATTRIBUTES));
}

#[test]
fn test_unaddressable_child_is_dropped_entirely() {
    let mut registry = sample_registry();
    registry.register_child(
        &PathElement::new("group", "hidden").unwrap(),
        Registration::new("an undisclosed group"),
    );
    let rules = DenyRules::new().deny("bob", addr("/group=hidden"), AccessEffect::Address);
    let controller = ModelController::builder(registry).policy(Arc::new(rules)).build();
    seed(&controller);

    let envelope = controller.execute(describe("/"), as_caller("bob"));
    assert_success(&envelope);
    let section = result(&envelope).field_path(&[keys::CHILDREN, "group", keys::MODEL_DESCRIPTION]);
    assert!(!section.has("hidden"));
    assert!(section.has("*"));
}

#[test]
fn test_managed_mirror_displays_writable_config_as_read_only() {
    let config = ControllerConfig {
        role: ProcessRole::ManagedMirror,
        ..ControllerConfig::default()
    };
    let controller = ModelController::builder(sample_registry()).config(config).build();
    let envelope = controller.execute_internal(Operation::new(
        "read-resource-description",
        addr("/group=*"),
    ));
    assert_success(&envelope);
    let attribute = result(&envelope).field_path(&[keys::ATTRIBUTES, "timeout"]);
    assert_eq!(attribute.field(keys::ACCESS_TYPE).as_str(), Some("read-only"));
    assert_eq!(attribute.field(keys::STORAGE).as_str(), Some("configuration"));
}

#[test]
fn test_read_only_reads_are_byte_for_byte_idempotent() {
    let controller = ModelController::builder(sample_registry()).build();
    seed(&controller);
    let first = controller.execute_internal(describe("/"));
    let second = controller.execute_internal(describe("/"));
    assert_success(&first);
    assert_eq!(first.to_json(), second.to_json());
}

#[test]
fn test_nonrecursive_read_lists_declared_child_types_without_models() {
    let controller = ModelController::builder(sample_registry()).build();
    let envelope = controller
        .execute_internal(Operation::new("read-resource-description", addr("/")));
    assert_success(&envelope);
    let group = result(&envelope).field_path(&[keys::CHILDREN, "group"]);
    assert_eq!(group.field(keys::DESCRIPTION).as_str(), Some("a server group"));
    assert!(!group.field(keys::MODEL_DESCRIPTION).is_defined());
}
