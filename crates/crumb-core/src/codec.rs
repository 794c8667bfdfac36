//! Callback codec
//!
//! Turns an [`Invocation`] plus its [`History`] into a token that fits the
//! size budget, and back. Oversized chains are handed to a [`Compactor`],
//! which swaps them for a short reference.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::chain::{self, History};
use crate::error::{CodecError, MalformedToken, SchemaMismatch};
use crate::invocation::{Identifier, Invocation};
use crate::literal::{self, render_plain};
use crate::schema::{FieldKind, Schema, SchemaRegistry};
use crate::token::{
    COMPACT_DELIMITER, FULL_MARKER, HASHED_TOKEN_LEN, MAX_TOKEN_LEN, Reference, Token, TokenShape,
    VERSION_MARKER,
};
use crate::value::{Mapping, Value};

/// How urgently a new compaction record must reach durable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persistence {
    /// Write through before returning
    #[default]
    Immediate,
    /// Keep in the in-process cache until the next flush
    Deferred,
}

/// Store that swaps oversized payloads for short references
///
/// Implementations must be safe to share between threads; the probe and
/// insert in `compact` have to happen under one lock.
pub trait Compactor: Send + Sync {
    /// Return the reference for `payload`, creating a record if needed
    fn compact(&self, payload: &str, persistence: Persistence) -> Result<Reference, CodecError>;

    /// Return the payload behind `reference`, refreshing its last-touched time
    fn expand(&self, reference: &Reference) -> Result<String, CodecError>;
}

/// Codec settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Maximum token length in bytes
    pub token_budget: usize,
    /// Persistence used by `encode` for overflow records
    pub persistence: Persistence,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            token_budget: MAX_TOKEN_LEN,
            persistence: Persistence::Immediate,
        }
    }
}

impl CodecConfig {
    /// Check that a Hashed token fits in the budget
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.token_budget < HASHED_TOKEN_LEN {
            return Err(CodecError::EncodingTooLarge {
                len: HASHED_TOKEN_LEN,
                budget: self.token_budget,
            });
        }
        Ok(())
    }
}

/// Result of decoding a token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decoded {
    pub invocation: Invocation,
    pub history: History,
}

/// Schema-free structural view of a token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub shape: TokenShape,
    pub reference: Option<Reference>,
    /// The token after reference resolution
    pub payload: String,
    /// Chain elements, oldest first; the last one is current
    pub elements: Vec<ElementInfo>,
}

/// One element of an inspected token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub identifier: Identifier,
    /// Named values for Full elements, positional indexes for Compact ones
    pub values: Mapping,
}

/// Encoder/decoder for callback tokens
#[derive(Clone)]
pub struct CallbackCodec {
    config: CodecConfig,
    schemas: Arc<SchemaRegistry>,
    compactor: Arc<dyn Compactor>,
}

impl std::fmt::Debug for CallbackCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackCodec")
            .field("config", &self.config)
            .field("schemas", &self.schemas.len())
            .finish()
    }
}

impl CallbackCodec {
    /// Create a codec with the default budget
    pub fn new(schemas: Arc<SchemaRegistry>, compactor: Arc<dyn Compactor>) -> Self {
        Self {
            config: CodecConfig::default(),
            schemas,
            compactor,
        }
    }

    /// Create a codec with explicit settings
    pub fn with_config(
        config: CodecConfig,
        schemas: Arc<SchemaRegistry>,
        compactor: Arc<dyn Compactor>,
    ) -> Result<Self, CodecError> {
        config.validate()?;
        Ok(Self {
            config,
            schemas,
            compactor,
        })
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Encode `invocation` after `history` in Full shape, compacting if needed
    pub fn encode(&self, invocation: &Invocation, history: &History) -> Result<Token, CodecError> {
        self.encode_with(invocation, history, self.config.persistence)
    }

    /// Like [`encode`](Self::encode) with an explicit persistence urgency
    pub fn encode_with(
        &self,
        invocation: &Invocation,
        history: &History,
        persistence: Persistence,
    ) -> Result<Token, CodecError> {
        let element = self.full_element(invocation)?;
        self.finish(history.join(&element), persistence)
    }

    /// Encode in the positional Compact shape.
    ///
    /// Fails rather than truncating when the result would exceed the budget.
    pub fn encode_compact(&self, invocation: &Invocation) -> Result<Token, CodecError> {
        invocation.validate_keys()?;
        let schema = self.schemas.require(&invocation.identifier)?;
        if !invocation.extra.is_empty() {
            return Err(CodecError::not_compactable("passthrough extras present"));
        }
        if let Some(key) = invocation
            .arguments
            .keys()
            .find(|k| schema.field_named(k).is_none())
        {
            return Err(CodecError::not_compactable(format!("'{key}' is not declared")));
        }

        let mut out = invocation.identifier.to_string();
        if schema.version > 0 {
            out.push(VERSION_MARKER);
            out.push_str(&schema.version.to_string());
        }
        for field in &schema.fields {
            let value = invocation
                .arguments
                .get(&field.name)
                .ok_or_else(|| CodecError::not_compactable(format!("'{}' is absent", field.name)))?;
            if field.kind == FieldKind::Any {
                return Err(CodecError::not_compactable(format!(
                    "'{}' has no positional kind",
                    field.name
                )));
            }
            if !value.is_scalar() || value.is_null() {
                return Err(CodecError::not_compactable(format!(
                    "'{}' holds a {} value",
                    field.name,
                    value.kind_name()
                )));
            }
            if !field.kind.accepts(value) {
                return Err(SchemaMismatch::FieldType {
                    field: field.name.clone(),
                    expected: field.kind.name().to_string(),
                }
                .into());
            }
            let plain = render_plain(value)?;
            if plain.contains(COMPACT_DELIMITER) {
                return Err(CodecError::not_compactable(format!(
                    "'{}' contains the '{COMPACT_DELIMITER}' delimiter",
                    field.name
                )));
            }
            out.push(COMPACT_DELIMITER);
            out.push_str(&plain);
        }

        if out.len() > self.config.token_budget {
            return Err(CodecError::EncodingTooLarge {
                len: out.len(),
                budget: self.config.token_budget,
            });
        }
        Ok(Token::Compact(out))
    }

    /// Decode a token, looking up the schema by identifier
    pub fn decode(&self, token: &str) -> Result<Decoded, CodecError> {
        self.decode_inner(token, None)
    }

    /// Decode a token that must belong to `schema`
    pub fn decode_as(&self, token: &str, schema: &Schema) -> Result<Decoded, CodecError> {
        self.decode_inner(token, Some(schema))
    }

    /// Expand a Hashed token; other shapes pass through unchanged
    pub fn resolve(&self, token: &str) -> Result<String, CodecError> {
        match Token::parse(token, self.config.token_budget)? {
            Token::Hashed(reference) => {
                let payload = self.compactor.expand(&reference)?;
                trace!(reference = %reference, len = payload.len(), "Resolved reference");
                Ok(payload)
            }
            Token::Compact(s) | Token::Full(s) => Ok(s),
        }
    }

    /// The history a new element appended after `token` would carry
    pub fn history_from_token(&self, token: &str) -> Result<History, CodecError> {
        let text = self.resolve(token)?;
        match self.classify_resolved(&text)? {
            TokenShape::Compact => {
                let invocation = self.decode_compact(&text, None)?;
                let mut history = History::new();
                history.push(self.full_element(&invocation)?)?;
                Ok(history)
            }
            _ => {
                let (mut history, current) = chain::split(&text)?;
                history.push(current)?;
                Ok(history)
            }
        }
    }

    /// Encode `invocation` as the next step after `chain_token`
    pub fn append(&self, chain_token: &str, invocation: &Invocation) -> Result<Token, CodecError> {
        let history = self.history_from_token(chain_token)?;
        self.encode(invocation, &history)
    }

    /// Drop the current element.
    ///
    /// Returns the token for the remaining chain (`None` when the history
    /// was empty) and the invocation that was removed.
    pub fn pop(&self, token: &str) -> Result<(Option<Token>, Invocation), CodecError> {
        let Decoded {
            invocation,
            mut history,
        } = self.decode(token)?;
        let remaining = match history.pop() {
            Some(last) => Some(self.finish(history.join(&last), self.config.persistence)?),
            None => None,
        };
        Ok((remaining, invocation))
    }

    /// Structural view of a token without schema validation
    pub fn inspect(&self, token: &str) -> Result<TokenInfo, CodecError> {
        let parsed = Token::parse(token, self.config.token_budget)?;
        let reference = match &parsed {
            Token::Hashed(reference) => Some(reference.clone()),
            _ => None,
        };
        let payload = self.resolve(token)?;
        let shape = self.classify_resolved(&payload)?;

        let elements = match shape {
            TokenShape::Compact => {
                let mut parts = payload.split(COMPACT_DELIMITER);
                let (identifier, _) = split_version(parts.next().unwrap_or_default())?;
                let values = parts
                    .enumerate()
                    .map(|(idx, raw)| (idx.to_string(), Value::from(raw)))
                    .collect();
                vec![ElementInfo { identifier, values }]
            }
            _ => {
                let (history, current) = chain::split(&payload)?;
                history
                    .iter()
                    .chain(std::iter::once(current.as_str()))
                    .map(|element| {
                        chain::parse_element(element)
                            .map(|(identifier, values)| ElementInfo { identifier, values })
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(TokenInfo {
            shape: parsed.shape(),
            reference,
            payload,
            elements,
        })
    }

    fn decode_inner(&self, token: &str, expected: Option<&Schema>) -> Result<Decoded, CodecError> {
        let text = self.resolve(token)?;
        match self.classify_resolved(&text)? {
            TokenShape::Compact => Ok(Decoded {
                invocation: self.decode_compact(&text, expected)?,
                history: History::new(),
            }),
            _ => {
                let (history, current) = chain::split(&text)?;
                let (identifier, raw) = chain::parse_element(&current)?;
                let schema = match expected {
                    Some(schema) => schema,
                    None => self.schemas.require(&identifier)?,
                };
                let invocation = schema.bind(&identifier, raw)?;
                trace!(identifier = %identifier, depth = history.len(), "Decoded chain");
                Ok(Decoded {
                    invocation,
                    history,
                })
            }
        }
    }

    /// Classify text that has already been through reference resolution
    fn classify_resolved(&self, text: &str) -> Result<TokenShape, MalformedToken> {
        match TokenShape::classify(text, self.config.token_budget)? {
            // a reference never expands to another reference
            TokenShape::Hashed => Err(MalformedToken::UnknownShape),
            shape => Ok(shape),
        }
    }

    fn decode_compact(&self, text: &str, expected: Option<&Schema>) -> Result<Invocation, CodecError> {
        let mut parts = text.split(COMPACT_DELIMITER);
        let (identifier, version) = split_version(parts.next().unwrap_or_default())?;
        let schema = match expected {
            Some(schema) => schema,
            None => self.schemas.require(&identifier)?,
        };
        if schema.identifier != identifier {
            return Err(SchemaMismatch::Identifier {
                expected: schema.identifier.to_string(),
                found: identifier.to_string(),
            }
            .into());
        }
        schema.check_version(version)?;

        let values: Vec<&str> = parts.collect();
        if values.len() != schema.fields.len() {
            return Err(SchemaMismatch::FieldCount {
                expected: schema.fields.len(),
                found: values.len(),
            }
            .into());
        }

        let mut invocation = Invocation::with_identifier(identifier);
        for (field, raw) in schema.fields.iter().zip(values) {
            let value = field.kind.parse_plain(raw).ok_or_else(|| SchemaMismatch::FieldType {
                field: field.name.clone(),
                expected: field.kind.name().to_string(),
            })?;
            invocation.arguments.insert(field.name.clone(), value);
        }
        Ok(invocation)
    }

    /// Render one invocation as a Full-shape element
    fn full_element(&self, invocation: &Invocation) -> Result<String, CodecError> {
        invocation.validate_keys()?;
        let schema = self.schemas.require(&invocation.identifier)?;
        schema.check(invocation)?;
        let meta = schema.meta_entries();
        let entries = meta
            .iter()
            .map(|(k, v)| (k, v))
            .chain(invocation.arguments.iter())
            .chain(invocation.extra.iter());
        let block = literal::render_mapping(entries)?;

        let mut out = String::with_capacity(1 + block.len() + invocation.identifier.as_str().len());
        out.push(FULL_MARKER);
        out.push_str(&block);
        out.push_str(invocation.identifier.as_str());
        Ok(out)
    }

    /// Apply the size budget to a finished chain string
    fn finish(&self, chain: String, persistence: Persistence) -> Result<Token, CodecError> {
        if chain.len() <= self.config.token_budget {
            return Ok(Token::Full(chain));
        }
        debug!(
            len = chain.len(),
            budget = self.config.token_budget,
            "Chain exceeds budget, compacting"
        );
        let reference = self.compactor.compact(&chain, persistence)?;
        Ok(Token::Hashed(reference))
    }
}

fn split_version(head: &str) -> Result<(Identifier, Option<u32>), MalformedToken> {
    match head.split_once(VERSION_MARKER) {
        Some((name, version)) => {
            let version = version
                .parse::<u32>()
                .map_err(|_| MalformedToken::literal(name.len() + 1, "bad version marker"))?;
            Ok((Identifier::new(name)?, Some(version)))
        }
        None => Ok((Identifier::new(head)?, None)),
    }
}
