//! tiller-model - Value tree and address model for the tiller management
//! kernel.
//!
//! This crate holds the data model shared by every tiller process: the
//! generic, insertion-ordered value tree ([`Value`]) used for operation
//! parameters, results and resource descriptions; the hierarchical address
//! model ([`PathAddress`] / [`PathElement`]) that names nodes in the
//! management tree; the immutable [`Operation`] request type; and the wire
//! key constants used in response envelopes and description documents.
//!
//! # Modules
//!
//! - [`value`]: typed, tree-shaped generic values with deterministic JSON
//!   rendering
//! - [`address`]: ordered (type, instance) path addresses with wildcard
//!   support
//! - [`operation`]: the immutable operation request
//! - [`keys`]: wire key constants

pub mod address;
pub mod keys;
pub mod operation;
pub mod value;

pub use address::{AddressError, PathAddress, PathElement, WILDCARD};
pub use operation::Operation;
pub use value::Value;
