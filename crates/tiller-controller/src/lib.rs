//! tiller-controller - The control-plane kernel of the tiller runtime
//! manager.
//!
//! A hierarchy of controller processes exposes one unified management
//! model; this crate is the engine each of them runs. Clients submit
//! named operations against addressable nodes and get back a response
//! envelope with all-or-nothing semantics, fine-grained authorization,
//! and deep recursive introspection in one call.
//!
//! # Architecture
//!
//! - [`registry`]: immutable schema metadata, one node per address
//!   pattern
//! - [`tree`]: the live resource tree with alias-transparent resolution
//! - [`access`]: the authorization decision layer and its per-request
//!   memo
//! - [`pipeline`]: the staged step pipeline, hierarchical write lock,
//!   remote dispatch, and the boot-time bridge
//! - [`handlers`]: built-in operations, the composite coordinator, and
//!   the recursive description assembler
//! - [`controller`]: operation intake, dispatch resolution, and the
//!   response envelope
//!
//! Operations execute in three ordered stages (MODEL, RUNTIME, VERIFY).
//! A running step may schedule further steps; `immediate` scheduling
//! pushes to the front of the stage queue, which is what makes postorder
//! result assembly fall out of a preorder traversal. Failures unwind a
//! rollback stack in reverse completion order.

pub mod access;
pub mod config;
pub mod controller;
pub mod error;
pub mod handlers;
pub mod pipeline;
pub mod registry;
pub mod tree;

pub use access::{AccessEffect, Caller, Decision, DenyRules, PermitAll, PolicyDecider};
pub use config::{ControllerConfig, ProcessRole};
pub use controller::{ControllerBuilder, ModelController};
pub use error::{OperationError, OperationResult};
pub use handlers::{OperationHandler, register_global_operations};
pub use pipeline::{OperationContext, Stage, ValueSlot};
pub use registry::{AccessKind, AttributeDescriptor, OperationEntry, Registration, RestartRequired, Storage};
pub use tree::{Resource, ResourceTree};
