//! Hierarchical resource addresses.
//!
//! A [`PathAddress`] is an ordered sequence of [`PathElement`]s, each a
//! (type key, instance name) pair. An address of length `n` names a path
//! through `n` nested tree levels; the empty address names the root. The
//! instance name may be the wildcard sentinel `*`, denoting all instances
//! of the type at that position; wildcard elements never resolve directly
//! and must be expanded into concrete instance names by the caller.

use std::fmt;

use thiserror::Error;

use crate::value::Value;

/// The wildcard instance-name sentinel.
pub const WILDCARD: &str = "*";

/// Errors from address construction and parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AddressError {
    /// A type key was empty.
    #[error("address element has an empty type key")]
    EmptyKey,

    /// An instance name was empty.
    #[error("address element for type {key} has an empty instance name")]
    EmptyName {
        /// The type key of the offending element.
        key: String,
    },

    /// A key or name contained a reserved character.
    #[error("address segment {segment:?} contains a reserved character ('/' or '=')")]
    ReservedCharacter {
        /// The offending segment.
        segment: String,
    },

    /// A textual address could not be parsed.
    #[error("cannot parse address {input:?}: {reason}")]
    Parse {
        /// The input that failed to parse.
        input: String,
        /// Why it failed.
        reason: String,
    },

    /// A value-tree address had the wrong shape.
    #[error("address value must be a list of single-field objects")]
    MalformedValue,
}

fn check_segment(segment: &str) -> Result<(), AddressError> {
    if segment.contains('/') || segment.contains('=') {
        return Err(AddressError::ReservedCharacter {
            segment: segment.to_string(),
        });
    }
    Ok(())
}

/// One (type key, instance name) address segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathElement {
    key: String,
    value: String,
}

impl PathElement {
    /// Creates a concrete element.
    ///
    /// # Errors
    ///
    /// Returns an error if the key or name is empty or contains a reserved
    /// character. A name of `*` produces a wildcard element.
    pub fn new(key: &str, value: &str) -> Result<Self, AddressError> {
        if key.is_empty() {
            return Err(AddressError::EmptyKey);
        }
        if value.is_empty() {
            return Err(AddressError::EmptyName {
                key: key.to_string(),
            });
        }
        check_segment(key)?;
        check_segment(value)?;
        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Creates a wildcard element for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or contains a reserved
    /// character.
    pub fn wildcard(key: &str) -> Result<Self, AddressError> {
        Self::new(key, WILDCARD)
    }

    /// The type key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The instance name, possibly the wildcard sentinel.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if the instance name is the wildcard sentinel.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.value == WILDCARD
    }

    /// Returns true if this element matches `other`: keys are equal and
    /// either the names are equal or this element is a wildcard.
    #[must_use]
    pub fn matches(&self, other: &PathElement) -> bool {
        self.key == other.key && (self.is_wildcard() || self.value == other.value)
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// An ordered sequence of address elements naming a tree node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct PathAddress {
    elements: Vec<PathElement>,
}

impl PathAddress {
    /// The empty address, naming the root.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            elements: Vec::new(),
        }
    }

    /// Builds an address from elements.
    #[must_use]
    pub fn new(elements: Vec<PathElement>) -> Self {
        Self { elements }
    }

    /// Parses a textual address of the form `/key=value/key=value`.
    ///
    /// `/` parses to the empty address; a `*` instance name parses to a
    /// wildcard element.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed segments.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == "/" {
            return Ok(Self::empty());
        }
        let body = trimmed.strip_prefix('/').unwrap_or(trimmed);
        let mut elements = Vec::new();
        for segment in body.split('/') {
            let (key, value) = segment.split_once('=').ok_or_else(|| AddressError::Parse {
                input: input.to_string(),
                reason: format!("segment {segment:?} is not of the form key=value"),
            })?;
            elements.push(PathElement::new(key, value)?);
        }
        Ok(Self { elements })
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns true for the empty (root) address.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The last element, if any.
    #[must_use]
    pub fn last(&self) -> Option<&PathElement> {
        self.elements.last()
    }

    /// The address of the parent node; the root is its own parent.
    #[must_use]
    pub fn parent(&self) -> Self {
        match self.elements.split_last() {
            Some((_, rest)) => Self {
                elements: rest.to_vec(),
            },
            None => Self::empty(),
        }
    }

    /// Returns a new address with `element` appended.
    #[must_use]
    pub fn append(&self, element: PathElement) -> Self {
        let mut elements = self.elements.clone();
        elements.push(element);
        Self { elements }
    }

    /// Returns a new address with all of `suffix` appended.
    #[must_use]
    pub fn concat(&self, suffix: &PathAddress) -> Self {
        let mut elements = self.elements.clone();
        elements.extend(suffix.elements.iter().cloned());
        Self { elements }
    }

    /// The sub-address starting at element `from`.
    #[must_use]
    pub fn sub_address(&self, from: usize) -> Self {
        Self {
            elements: self.elements.get(from..).unwrap_or(&[]).to_vec(),
        }
    }

    /// Returns true if `prefix` is a (not necessarily proper) prefix of
    /// this address, by exact element equality.
    #[must_use]
    pub fn starts_with(&self, prefix: &PathAddress) -> bool {
        self.elements.len() >= prefix.elements.len()
            && self.elements[..prefix.elements.len()] == prefix.elements[..]
    }

    /// Returns true if the two addresses name nodes on one root-to-leaf
    /// line: equal, ancestor, or descendant. Used for write-lock conflict
    /// detection.
    #[must_use]
    pub fn is_related(&self, other: &PathAddress) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// Returns true if any element is a wildcard.
    #[must_use]
    pub fn is_multi_target(&self) -> bool {
        self.elements.iter().any(PathElement::is_wildcard)
    }

    /// Returns true if this (possibly wildcard) address matches the fully
    /// concrete address `concrete`, element by element.
    #[must_use]
    pub fn matches(&self, concrete: &PathAddress) -> bool {
        self.elements.len() == concrete.elements.len()
            && self
                .elements
                .iter()
                .zip(&concrete.elements)
                .all(|(pattern, element)| pattern.matches(element))
    }

    /// Iterates over the elements in order.
    pub fn iter(&self) -> std::slice::Iter<'_, PathElement> {
        self.elements.iter()
    }

    /// Renders this address as a value tree: a list of single-field
    /// objects, one per element.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut list = Value::list();
        for element in &self.elements {
            let mut pair = Value::object();
            pair.set(element.key(), element.value());
            list.push(pair);
        }
        list
    }

    /// Reads an address back from its value-tree form.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a list of single-field objects
    /// with string values, or if any segment is malformed. An undefined
    /// value reads as the empty address.
    pub fn from_value(value: &Value) -> Result<Self, AddressError> {
        if !value.is_defined() {
            return Ok(Self::empty());
        }
        let Value::List(items) = value else {
            return Err(AddressError::MalformedValue);
        };
        let mut elements = Vec::with_capacity(items.len());
        for item in items {
            let fields = item.entries();
            let [(key, name)] = fields else {
                return Err(AddressError::MalformedValue);
            };
            let name = name.as_str().ok_or(AddressError::MalformedValue)?;
            elements.push(PathElement::new(key, name)?);
        }
        Ok(Self { elements })
    }
}

impl fmt::Display for PathAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.elements.is_empty() {
            return f.write_str("/");
        }
        for element in &self.elements {
            write!(f, "/{element}")?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a PathAddress {
    type Item = &'a PathElement;
    type IntoIter = std::slice::Iter<'a, PathElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<PathElement> for PathAddress {
    fn from_iter<T: IntoIterator<Item = PathElement>>(iter: T) -> Self {
        Self {
            elements: iter.into_iter().collect(),
        }
    }
}
