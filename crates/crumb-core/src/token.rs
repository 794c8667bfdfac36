//! Wire shapes of a callback token
//!
//! A token is one of three disjoint shapes:
//!
//! - **Hashed**: `<<` + 16-char reference + `>>`, expanded through a compaction store
//! - **Compact**: `identifier[@version][:value]*`, positional scalars
//! - **Full**: `~{block}identifier`, optionally chained with `;`

use serde::{Deserialize, Serialize};

use crate::error::MalformedToken;

/// Hard upper bound on token length imposed by the UI layer
pub const MAX_TOKEN_LEN: usize = 64;

/// Prefix of every Full-shape element
pub const FULL_MARKER: char = '~';

/// Separator between chain elements
pub const CHAIN_SEPARATOR: char = ';';

/// Delimiter between Compact values
pub const COMPACT_DELIMITER: char = ':';

/// Separates identifier and schema version in the Compact shape
pub const VERSION_MARKER: char = '@';

pub const REFERENCE_OPEN: &str = "<<";
pub const REFERENCE_CLOSE: &str = ">>";

/// Fixed length of a compaction reference
pub const REFERENCE_LEN: usize = 16;

/// Rendered length of a Hashed token
pub const HASHED_TOKEN_LEN: usize = REFERENCE_OPEN.len() + REFERENCE_LEN + REFERENCE_CLOSE.len();

/// Short collision-resistant key into a compaction store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reference(String);

impl Reference {
    /// Validate a bare reference (no brackets)
    pub fn new(value: impl Into<String>) -> Result<Self, MalformedToken> {
        let value = value.into();
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(MalformedToken::BadReference(value))
        }
    }

    /// Parse a bracketed `<<...>>` token
    pub fn from_token(token: &str) -> Result<Self, MalformedToken> {
        token
            .strip_prefix(REFERENCE_OPEN)
            .and_then(|rest| rest.strip_suffix(REFERENCE_CLOSE))
            .filter(|inner| Self::is_valid(inner))
            .map(|inner| Self(inner.to_string()))
            .ok_or_else(|| MalformedToken::BadReference(token.to_string()))
    }

    /// URL-safe base64 alphabet, fixed length
    pub fn is_valid(value: &str) -> bool {
        value.len() == REFERENCE_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render as a Hashed token
    pub fn to_token(&self) -> String {
        format!("{REFERENCE_OPEN}{}{REFERENCE_CLOSE}", self.0)
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Reference {
    type Error = MalformedToken;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Reference::new(value)
    }
}

impl From<Reference> for String {
    fn from(value: Reference) -> Self {
        value.0
    }
}

/// Which shape a raw string has, by the decode priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenShape {
    Hashed,
    Compact,
    Full,
}

impl TokenShape {
    /// Classify a raw token.
    ///
    /// References win first because they always expand to Full shape. A short
    /// string without the Full marker defaults to Compact rather than being
    /// tried as Full.
    pub fn classify(raw: &str, budget: usize) -> Result<Self, MalformedToken> {
        if raw.is_empty() {
            return Err(MalformedToken::UnknownShape);
        }
        if raw.starts_with(REFERENCE_OPEN) {
            Reference::from_token(raw)?;
            return Ok(TokenShape::Hashed);
        }
        if !raw.starts_with(FULL_MARKER) && raw.len() <= budget {
            return Ok(TokenShape::Compact);
        }
        if raw.starts_with(FULL_MARKER) {
            return Ok(TokenShape::Full);
        }
        Err(MalformedToken::UnknownShape)
    }
}

/// An encoded callback token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    Hashed(Reference),
    Compact(String),
    Full(String),
}

impl Token {
    /// Classify and wrap a raw string without decoding its contents
    pub fn parse(raw: &str, budget: usize) -> Result<Self, MalformedToken> {
        Ok(match TokenShape::classify(raw, budget)? {
            TokenShape::Hashed => Token::Hashed(Reference::from_token(raw)?),
            TokenShape::Compact => Token::Compact(raw.to_string()),
            TokenShape::Full => Token::Full(raw.to_string()),
        })
    }

    pub fn shape(&self) -> TokenShape {
        match self {
            Token::Hashed(_) => TokenShape::Hashed,
            Token::Compact(_) => TokenShape::Compact,
            Token::Full(_) => TokenShape::Full,
        }
    }

    /// The wire string
    pub fn into_string(self) -> String {
        match self {
            Token::Hashed(reference) => reference.to_token(),
            Token::Compact(s) | Token::Full(s) => s,
        }
    }

    /// Length of the wire string in bytes
    pub fn len(&self) -> usize {
        match self {
            Token::Hashed(_) => HASHED_TOKEN_LEN,
            Token::Compact(s) | Token::Full(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Hashed(reference) => {
                write!(f, "{REFERENCE_OPEN}{reference}{REFERENCE_CLOSE}")
            }
            Token::Compact(s) | Token::Full(s) => f.write_str(s),
        }
    }
}

impl From<Token> for String {
    fn from(value: Token) -> Self {
        value.into_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REF: &str = "AbCdEfGh012345-_";

    #[test]
    fn test_reference_shape() {
        assert!(Reference::new(REF).is_ok());
        assert!(Reference::new("short").is_err());
        assert!(Reference::new("AbCdEfGh012345+/").is_err());

        let token = format!("<<{REF}>>");
        assert_eq!(token.len(), HASHED_TOKEN_LEN);
        let reference = Reference::from_token(&token).unwrap();
        assert_eq!(reference.to_token(), token);
        assert!(Reference::from_token(REF).is_err());
        assert!(Reference::from_token(&format!("<<{REF}>")).is_err());
    }

    #[test]
    fn test_classify_priority() {
        let hashed = format!("<<{REF}>>");
        assert_eq!(TokenShape::classify(&hashed, 64), Ok(TokenShape::Hashed));
        assert_eq!(TokenShape::classify("open:2", 64), Ok(TokenShape::Compact));
        assert_eq!(TokenShape::classify("~{page:2}open", 64), Ok(TokenShape::Full));
        assert_eq!(TokenShape::classify("", 64), Err(MalformedToken::UnknownShape));

        let long = "x".repeat(65);
        assert_eq!(TokenShape::classify(&long, 64), Err(MalformedToken::UnknownShape));
    }

    #[test]
    fn test_bad_reference_is_malformed() {
        assert!(matches!(
            TokenShape::classify("<<nope>>", 64),
            Err(MalformedToken::BadReference(_))
        ));
    }

    #[test]
    fn test_token_rendering() {
        let token = Token::parse(&format!("<<{REF}>>"), 64).unwrap();
        assert_eq!(token.shape(), TokenShape::Hashed);
        assert_eq!(token.len(), 20);
        assert_eq!(token.to_string(), format!("<<{REF}>>"));

        let token = Token::parse("menu:1", 64).unwrap();
        assert_eq!(token, Token::Compact("menu:1".into()));
        assert_eq!(String::from(token), "menu:1");
    }
}
