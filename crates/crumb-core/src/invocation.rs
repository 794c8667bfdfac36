//! Invocation and identifier types

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, MalformedToken};
use crate::value::{Mapping, Value};

/// Longest identifier accepted, leaving room for values in the Compact shape
pub const MAX_IDENTIFIER_LEN: usize = 48;

/// Prefix reserved for meta keys inside argument blocks
pub const META_PREFIX: char = '_';

/// Name of a callback action
///
/// Restricted to `[A-Za-z0-9_.-]` so it never contains a marker, separator
/// or delimiter of any wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Validate and wrap an identifier
    pub fn new(name: impl Into<String>) -> Result<Self, MalformedToken> {
        let name = name.into();
        if Self::is_valid(&name) {
            Ok(Self(name))
        } else {
            Err(MalformedToken::InvalidIdentifier(name))
        }
    }

    /// Check the identifier alphabet and length
    pub fn is_valid(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= MAX_IDENTIFIER_LEN
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for Identifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identifier {
    type Error = MalformedToken;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identifier::new(value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl PartialEq<str> for Identifier {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Identifier {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// One decoded action: identifier, declared arguments, passthrough extras
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub identifier: Identifier,
    /// Arguments declared by the schema, in declaration order once bound
    pub arguments: Mapping,
    /// Undeclared keys carried through unchanged
    pub extra: Mapping,
}

impl Invocation {
    /// Create an invocation with no arguments
    pub fn new(identifier: impl Into<String>) -> Result<Self, CodecError> {
        Ok(Self::with_identifier(Identifier::new(identifier)?))
    }

    pub fn with_identifier(identifier: Identifier) -> Self {
        Self {
            identifier,
            arguments: Mapping::new(),
            extra: Mapping::new(),
        }
    }

    /// Add an argument
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Add a passthrough extra
    pub fn extra(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// Look up an argument, then an extra
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name).or_else(|| self.extra.get(name))
    }

    /// Reject reserved names and keys present in both mappings
    pub(crate) fn validate_keys(&self) -> Result<(), CodecError> {
        for key in self.arguments.keys().chain(self.extra.keys()) {
            if key.starts_with(META_PREFIX) {
                return Err(CodecError::Unrepresentable(format!(
                    "argument name '{key}' uses the reserved '{META_PREFIX}' prefix"
                )));
            }
        }
        if let Some(key) = self.extra.keys().find(|k| self.arguments.contains_key(*k)) {
            return Err(CodecError::Unrepresentable(format!(
                "'{key}' is both an argument and an extra"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.arguments.iter().chain(self.extra.iter());
        match crate::literal::render_mapping(entries) {
            Ok(block) => write!(f, "{}{}", self.identifier, block),
            Err(_) => write!(f, "{}{{..}}", self.identifier),
        }
    }
}
