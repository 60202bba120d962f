//! Attribute and operation descriptor metadata.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::handlers::OperationHandler;

/// Where an attribute's value lives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum Storage {
    /// Persistent configuration, part of the managed model.
    #[default]
    Configuration,
    /// Runtime state, derived from the running process.
    Runtime,
}

impl Storage {
    /// Returns the string representation of this storage class.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Runtime => "runtime",
        }
    }
}

impl std::fmt::Display for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether an attribute may be written.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum AccessKind {
    /// The attribute can only be read.
    #[default]
    ReadOnly,
    /// The attribute can be read and written.
    ReadWrite,
}

impl AccessKind {
    /// Returns the string representation of this access kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::ReadWrite => "read-write",
        }
    }

    /// Returns true if writes are permitted.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

impl std::fmt::Display for AccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a write to an attribute requires before taking effect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum RestartRequired {
    /// The write takes effect immediately.
    #[default]
    NoServices,
    /// Every service must restart.
    AllServices,
    /// Only the services of the owning resource must restart.
    ResourceServices,
    /// The whole process must restart.
    Jvm,
}

impl RestartRequired {
    /// Returns the string representation of this restart requirement.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoServices => "no-services",
            Self::AllServices => "all-services",
            Self::ResourceServices => "resource-services",
            Self::Jvm => "jvm",
        }
    }
}

impl std::fmt::Display for RestartRequired {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Schema metadata for one attribute of a registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct AttributeDescriptor {
    /// Storage class of the attribute value.
    pub storage: Storage,
    /// Whether the attribute may be written.
    pub access: AccessKind,
    /// Restart requirement of a writable attribute.
    pub restart: RestartRequired,
    /// Whether the value is sensitive (access constraint metadata).
    pub sensitive: bool,
    /// Human-readable description.
    pub description: Option<String>,
}

impl AttributeDescriptor {
    /// A read-only configuration attribute, the effective default when a
    /// registration carries no explicit descriptor for an attribute name.
    #[must_use]
    pub fn read_only(description: &str) -> Self {
        Self {
            description: Some(description.to_string()),
            ..Self::default()
        }
    }

    /// A read-write configuration attribute with the given restart
    /// requirement.
    #[must_use]
    pub fn read_write(description: &str, restart: RestartRequired) -> Self {
        Self {
            access: AccessKind::ReadWrite,
            restart,
            description: Some(description.to_string()),
            ..Self::default()
        }
    }

    /// A read-only runtime attribute.
    #[must_use]
    pub fn runtime(description: &str) -> Self {
        Self {
            storage: Storage::Runtime,
            description: Some(description.to_string()),
            ..Self::default()
        }
    }

    /// Marks the attribute sensitive.
    #[must_use]
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

/// One registered operation: the handler plus its metadata.
#[derive(Clone)]
#[non_exhaustive]
pub struct OperationEntry {
    /// The handler executed as the first model-stage step.
    pub handler: Arc<dyn OperationHandler>,
    /// Whether the operation mutates no state.
    pub read_only: bool,
    /// Whether the entry is visible to descendant registrations.
    pub inherited: bool,
    /// Human-readable description.
    pub description: Option<String>,
}

impl OperationEntry {
    /// Creates an entry local to one registration.
    #[must_use]
    pub fn new(handler: Arc<dyn OperationHandler>, read_only: bool) -> Self {
        Self {
            handler,
            read_only,
            inherited: false,
            description: None,
        }
    }

    /// Marks the entry as inherited by descendant registrations.
    #[must_use]
    pub fn inherited(mut self) -> Self {
        self.inherited = true;
        self
    }

    /// Attaches a description.
    #[must_use]
    pub fn described(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

impl std::fmt::Debug for OperationEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationEntry")
            .field("read_only", &self.read_only)
            .field("inherited", &self.inherited)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
