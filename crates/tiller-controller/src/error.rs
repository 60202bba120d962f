//! Operation failure taxonomy.
//!
//! Every failure carries a human-readable description and the originating
//! address. Only [`OperationError::Runtime`] implies that earlier model
//! effects were applied and need undoing; the pipeline reacts accordingly.

use thiserror::Error;
use tiller_model::{PathAddress, Value};

/// Result alias for operation execution.
pub type OperationResult<T> = Result<T, OperationError>;

/// Errors raised by operation step handlers and the pipeline itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum OperationError {
    /// A parameter or precondition violation, detected in the model stage
    /// before any external side effect.
    #[error("validation failed for {address}: {message}")]
    Validation {
        /// The address the operation targeted.
        address: PathAddress,
        /// Why validation failed.
        message: String,
    },

    /// A runtime-stage action failed after earlier model-stage effects were
    /// applied; triggers rollback of prior completed steps.
    #[error("runtime failure at {address}: {message}")]
    Runtime {
        /// The address the failing step targeted.
        address: PathAddress,
        /// What went wrong.
        message: String,
    },

    /// The caller is not permitted to perform the attempted action.
    #[error("unauthorized to perform {operation} at {address}: {explanation}")]
    Unauthorized {
        /// The attempted operation name.
        operation: String,
        /// The address the operation targeted.
        address: PathAddress,
        /// Why the action was denied.
        explanation: String,
    },

    /// The primary target address does not resolve to a resource. The
    /// address names the shortest unresolvable prefix.
    #[error("no resource at {address}")]
    NoSuchResource {
        /// The shortest address prefix that failed to resolve.
        address: PathAddress,
    },

    /// An internal consistency invariant was violated; not recoverable by
    /// the caller.
    #[error("internal consistency failure at {address}: {message}")]
    Internal {
        /// The address where the inconsistency was observed.
        address: PathAddress,
        /// The violated invariant.
        message: String,
    },
}

impl OperationError {
    /// The address the failure originates from.
    #[must_use]
    pub const fn address(&self) -> &PathAddress {
        match self {
            Self::Validation { address, .. }
            | Self::Runtime { address, .. }
            | Self::Unauthorized { address, .. }
            | Self::NoSuchResource { address }
            | Self::Internal { address, .. } => address,
        }
    }

    /// Returns true for authorization failures.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Returns true for missing-resource failures.
    #[must_use]
    pub const fn is_no_such_resource(&self) -> bool {
        matches!(self, Self::NoSuchResource { .. })
    }

    /// Returns true for runtime-stage failures, the only member that
    /// implies applied effects needing undo.
    #[must_use]
    pub const fn is_runtime(&self) -> bool {
        matches!(self, Self::Runtime { .. })
    }

    /// Renders this failure as a failure-description value.
    #[must_use]
    pub fn failure_description(&self) -> Value {
        Value::from(self.to_string())
    }
}
