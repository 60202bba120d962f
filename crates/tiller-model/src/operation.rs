//! The operation request type.

use std::fmt;

use crate::address::{AddressError, PathAddress};
use crate::keys;
use crate::value::Value;

/// A management operation request: a name, a target address, and a
/// parameter value tree. Immutable once submitted to a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    name: String,
    address: PathAddress,
    params: Value,
}

impl Operation {
    /// Creates an operation with no parameters.
    #[must_use]
    pub fn new(name: &str, address: PathAddress) -> Self {
        Self {
            name: name.to_string(),
            address,
            params: Value::object(),
        }
    }

    /// Creates an operation with the given parameter tree.
    #[must_use]
    pub fn with_params(name: &str, address: PathAddress, params: Value) -> Self {
        Self {
            name: name.to_string(),
            address,
            params,
        }
    }

    /// The operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The target address.
    #[must_use]
    pub fn address(&self) -> &PathAddress {
        &self.address
    }

    /// The full parameter tree.
    #[must_use]
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// A single parameter, `Undefined` if absent.
    #[must_use]
    pub fn param(&self, key: &str) -> &Value {
        self.params.field(key)
    }

    /// A boolean parameter with a default for absent values.
    #[must_use]
    pub fn bool_param(&self, key: &str, default: bool) -> bool {
        self.param(key).as_bool().unwrap_or(default)
    }

    /// An integer parameter with a default for absent values.
    #[must_use]
    pub fn long_param(&self, key: &str, default: i64) -> i64 {
        self.param(key).as_long().unwrap_or(default)
    }

    /// Returns a copy of this operation retargeted at `address`, keeping
    /// the name and parameters. Used when an operation descends to a child
    /// or is redirected through an alias.
    #[must_use]
    pub fn retarget(&self, address: PathAddress) -> Self {
        Self {
            name: self.name.clone(),
            address,
            params: self.params.clone(),
        }
    }

    /// Returns a copy with one parameter replaced.
    #[must_use]
    pub fn with_param(&self, key: &str, value: impl Into<Value>) -> Self {
        let mut params = self.params.clone();
        params.set(key, value);
        Self {
            name: self.name.clone(),
            address: self.address.clone(),
            params,
        }
    }

    /// Renders the request as a value tree (`operation`, `address`, plus
    /// the parameters inline).
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut v = Value::object();
        v.set(keys::OP, self.name.as_str());
        v.set(keys::OP_ADDR, self.address.to_value());
        for (key, value) in self.params.entries() {
            v.set(key, value.clone());
        }
        v
    }

    /// Reads a request back from its value-tree form.
    ///
    /// # Errors
    ///
    /// Returns an error if the `operation` field is missing or the address
    /// is malformed.
    pub fn from_value(value: &Value) -> Result<Self, AddressError> {
        let name = value
            .field(keys::OP)
            .as_str()
            .ok_or(AddressError::MalformedValue)?
            .to_string();
        let address = PathAddress::from_value(value.field(keys::OP_ADDR))?;
        let mut params = Value::object();
        for (key, field) in value.entries() {
            if key != keys::OP && key != keys::OP_ADDR {
                params.set(key, field.clone());
            }
        }
        Ok(Self {
            name,
            address,
            params,
        })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.name, self.address)
    }
}
