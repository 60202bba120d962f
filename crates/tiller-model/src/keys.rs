//! Wire key constants for response envelopes and description documents.
//!
//! Both sides of every process boundary agree on these strings, so they
//! live in the model crate rather than with any one handler.

/// Response envelope: overall outcome field.
pub const OUTCOME: &str = "outcome";
/// Outcome value for a successful operation.
pub const SUCCESS: &str = "success";
/// Outcome value for a failed operation.
pub const FAILED: &str = "failed";
/// Response envelope: the result payload on success.
pub const RESULT: &str = "result";
/// Response envelope: the failure description on failure.
pub const FAILURE_DESCRIPTION: &str = "failure-description";
/// Response envelope: set when failure caused model rollback.
pub const ROLLED_BACK: &str = "rolled-back";

/// Operation request: operation name.
pub const OP: &str = "operation";
/// Operation request: target address.
pub const OP_ADDR: &str = "address";

/// Description document: human-readable description text.
pub const DESCRIPTION: &str = "description";
/// Description document: attribute section.
pub const ATTRIBUTES: &str = "attributes";
/// Description document: operation section.
pub const OPERATIONS: &str = "operations";
/// Description document: notification section.
pub const NOTIFICATIONS: &str = "notifications";
/// Description document: child-type section.
pub const CHILDREN: &str = "children";
/// Description document: nested model description under a child type.
pub const MODEL_DESCRIPTION: &str = "model-description";
/// Attribute decoration: effective access type.
pub const ACCESS_TYPE: &str = "access-type";
/// Attribute decoration: storage class.
pub const STORAGE: &str = "storage";
/// Attribute decoration: restart requirement of a writable attribute.
pub const RESTART_REQUIRED: &str = "restart-required";

/// Access-control section of a description.
pub const ACCESS_CONTROL: &str = "access-control";
/// Access-control: the default decision block.
pub const DEFAULT: &str = "default";
/// Access-control: per-address decisions differing from the default.
pub const EXCEPTIONS: &str = "exceptions";
/// Access-control: read permission flag.
pub const READ: &str = "read";
/// Access-control: write permission flag.
pub const WRITE: &str = "write";

/// Composite operations: list of sub-operations.
pub const STEPS: &str = "steps";
/// Composite operations: rollback policy parameter.
pub const ROLLBACK_ON_RUNTIME_FAILURE: &str = "rollback-on-runtime-failure";

/// Common operation parameters.
pub const NAME: &str = "name";
/// Write-attribute parameter: the new value.
pub const VALUE: &str = "value";
/// Read parameters: recurse into children.
pub const RECURSIVE: &str = "recursive";
/// Read parameters: bound on recursion depth (0 means unbounded).
pub const RECURSIVE_DEPTH: &str = "recursive-depth";
/// Read parameters: include remote (proxy) children.
pub const PROXIES: &str = "proxies";
/// Read parameters: include alias children.
pub const INCLUDE_ALIASES: &str = "include-aliases";
/// Description parameters: include operations inherited from ancestors.
pub const INHERITED: &str = "inherited";
/// Read-attribute parameter: resolve through enclosing scopes.
pub const RESOLVE: &str = "resolve";
/// Implicit attribute carrying the position of an ordered child.
pub const INDEX: &str = "index";

/// Formats the aggregate-result key for composite sub-operation `n`
/// (1-based).
#[must_use]
pub fn step_key(n: usize) -> String {
    format!("step-{n}")
}
