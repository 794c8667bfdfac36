//! Callback schemas
//!
//! A schema names the fields an identifier expects. Field order is the
//! positional order of the Compact shape, so reordering fields changes the
//! wire format: bump `version` when doing so.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, SchemaMismatch};
use crate::invocation::{Identifier, Invocation, META_PREFIX};
use crate::value::{Mapping, Value};

/// Meta key carrying the schema version in the Full shape
pub const VERSION_KEY: &str = "_v";

/// Declared type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Int,
    Float,
    Bool,
    Str,
    /// Any representable value; never positional
    #[default]
    Any,
}

impl FieldKind {
    pub fn name(self) -> &'static str {
        match self {
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
            FieldKind::Str => "str",
            FieldKind::Any => "any",
        }
    }

    /// Whether a value fits this kind. Null fits any optional field.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (FieldKind::Any, _) => true,
            (FieldKind::Int, Value::Int(_)) => true,
            (FieldKind::Float, Value::Float(_)) => true,
            (FieldKind::Bool, Value::Bool(_)) => true,
            (FieldKind::Str, Value::Str(_)) => true,
            _ => false,
        }
    }

    /// Parse the plain positional form of a Compact value
    pub fn parse_plain(self, raw: &str) -> Option<Value> {
        match self {
            FieldKind::Int => raw.parse().ok().map(Value::Int),
            FieldKind::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::Float),
            FieldKind::Bool => match raw {
                "0" => Some(Value::Bool(false)),
                "1" => Some(Value::Bool(true)),
                _ => None,
            },
            FieldKind::Str => Some(Value::Str(raw.to_string())),
            FieldKind::Any => None,
        }
    }
}

/// One declared field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// Expected shape of one callback identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub identifier: Identifier,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a schema with no fields
    pub fn new(identifier: impl Into<String>) -> Result<Self, CodecError> {
        Ok(Self {
            identifier: Identifier::new(identifier)?,
            version: 0,
            fields: Vec::new(),
        })
    }

    /// Declare a required field
    pub fn field(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.push_field(name.into(), kind, true)
    }

    /// Declare an optional field
    pub fn optional(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.push_field(name.into(), kind, false)
    }

    /// Set the wire version
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    fn push_field(mut self, name: String, kind: FieldKind, required: bool) -> Self {
        self.fields.push(Field {
            name,
            kind,
            required,
        });
        self
    }

    pub fn field_named(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check field names for reserved prefixes and duplicates
    pub fn validate(&self) -> Result<(), CodecError> {
        for (idx, field) in self.fields.iter().enumerate() {
            if field.name.starts_with(META_PREFIX) || field.name.is_empty() {
                return Err(CodecError::Unrepresentable(format!(
                    "field name '{}' is reserved",
                    field.name
                )));
            }
            if self.fields[..idx].iter().any(|f| f.name == field.name) {
                return Err(CodecError::Unrepresentable(format!(
                    "field '{}' declared twice",
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Meta entries to emit in the Full shape
    pub(crate) fn meta_entries(&self) -> Vec<(String, Value)> {
        if self.version > 0 {
            vec![(VERSION_KEY.to_string(), Value::Int(self.version as i64))]
        } else {
            Vec::new()
        }
    }

    /// Bind a raw decoded mapping to this schema.
    ///
    /// Meta keys are stripped and checked first. Declared fields land in
    /// `arguments` in declaration order, everything else in `extra` in
    /// wire order.
    pub fn bind(&self, identifier: &Identifier, raw: Mapping) -> Result<Invocation, SchemaMismatch> {
        if identifier != &self.identifier {
            return Err(SchemaMismatch::Identifier {
                expected: self.identifier.to_string(),
                found: identifier.to_string(),
            });
        }

        let mut values = Mapping::with_capacity(raw.len());
        let mut version = None;
        for (key, value) in raw {
            if key == VERSION_KEY {
                version = Some(
                    value
                        .as_i64()
                        .and_then(|v| u32::try_from(v).ok())
                        .ok_or_else(|| SchemaMismatch::FieldType {
                            field: VERSION_KEY.to_string(),
                            expected: "u32".to_string(),
                        })?,
                );
            } else if !key.starts_with(META_PREFIX) {
                values.insert(key, value);
            }
        }
        self.check_version(version)?;

        let mut invocation = Invocation::with_identifier(identifier.clone());
        for field in &self.fields {
            match values.shift_remove(&field.name) {
                Some(value) => {
                    let optional_null = !field.required && value.is_null();
                    if !optional_null && !field.kind.accepts(&value) {
                        return Err(SchemaMismatch::FieldType {
                            field: field.name.clone(),
                            expected: field.kind.name().to_string(),
                        });
                    }
                    invocation.arguments.insert(field.name.clone(), value);
                }
                None if field.required => {
                    return Err(SchemaMismatch::MissingField(field.name.clone()));
                }
                None => {}
            }
        }
        invocation.extra = values;
        Ok(invocation)
    }

    /// Check that an invocation will bind back to itself after encoding.
    ///
    /// Every argument must be declared and well typed, every required field
    /// present, and no extra may reuse a declared name.
    pub fn check(&self, invocation: &Invocation) -> Result<(), SchemaMismatch> {
        if invocation.identifier != self.identifier {
            return Err(SchemaMismatch::Identifier {
                expected: self.identifier.to_string(),
                found: invocation.identifier.to_string(),
            });
        }
        if let Some(key) = invocation.arguments.keys().find(|k| self.field_named(k).is_none()) {
            return Err(SchemaMismatch::UndeclaredField(key.clone()));
        }
        if let Some(key) = invocation.extra.keys().find(|k| self.field_named(k).is_some()) {
            return Err(SchemaMismatch::ShadowedField(key.clone()));
        }
        for field in &self.fields {
            match invocation.arguments.get(&field.name) {
                Some(value) => {
                    let optional_null = !field.required && value.is_null();
                    if !optional_null && !field.kind.accepts(value) {
                        return Err(SchemaMismatch::FieldType {
                            field: field.name.clone(),
                            expected: field.kind.name().to_string(),
                        });
                    }
                }
                None if field.required => {
                    return Err(SchemaMismatch::MissingField(field.name.clone()));
                }
                None => {}
            }
        }
        Ok(())
    }

    pub(crate) fn check_version(&self, found: Option<u32>) -> Result<(), SchemaMismatch> {
        let matches = match found {
            Some(v) => v == self.version,
            None => self.version == 0,
        };
        if matches {
            Ok(())
        } else {
            Err(SchemaMismatch::Version {
                expected: self.version,
                found,
            })
        }
    }
}

/// Schemas indexed by identifier
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<Identifier, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema, replacing any previous one for the identifier
    pub fn register(&mut self, schema: Schema) -> Result<(), CodecError> {
        schema.validate()?;
        self.schemas.insert(schema.identifier.clone(), schema);
        Ok(())
    }

    /// Builder-style register
    pub fn with(mut self, schema: Schema) -> Result<Self, CodecError> {
        self.register(schema)?;
        Ok(self)
    }

    pub fn get(&self, identifier: &str) -> Option<&Schema> {
        self.schemas.get(identifier)
    }

    /// Look up a schema or report the identifier as unknown
    pub fn require(&self, identifier: &Identifier) -> Result<&Schema, SchemaMismatch> {
        self.schemas
            .get(identifier)
            .ok_or_else(|| SchemaMismatch::UnknownIdentifier(identifier.to_string()))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.values()
    }
}

impl FromIterator<Schema> for SchemaRegistry {
    fn from_iter<T: IntoIterator<Item = Schema>>(iter: T) -> Self {
        Self {
            schemas: iter
                .into_iter()
                .map(|schema| (schema.identifier.clone(), schema))
                .collect(),
        }
    }
}
