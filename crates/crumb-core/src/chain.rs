//! Navigation chains
//!
//! A chain is the history of prior Full-shape elements followed by the
//! current one, joined with [`CHAIN_SEPARATOR`]:
//!
//! ```text
//! ~{page:2}open_menu;~{v:5}set_value
//! ```
//!
//! Every element is itself a valid token, so dropping the last element
//! always leaves a valid chain behind.

use serde::{Deserialize, Serialize};

use crate::error::MalformedToken;
use crate::invocation::Identifier;
use crate::literal;
use crate::scanner::find_block_end;
use crate::token::{CHAIN_SEPARATOR, FULL_MARKER};
use crate::value::Mapping;

/// Prior Full-shape elements, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    entries: Vec<String>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a history from encoded elements, validating each one
    pub fn from_entries<I, S>(entries: I) -> Result<Self, MalformedToken>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut history = Self::new();
        for entry in entries {
            history.push(entry)?;
        }
        Ok(history)
    }

    /// Append an encoded element, adding the Full marker if missing
    pub fn push(&mut self, entry: impl Into<String>) -> Result<(), MalformedToken> {
        let mut entry = entry.into();
        if !entry.starts_with(FULL_MARKER) {
            entry.insert(0, FULL_MARKER);
        }
        let (rest, _) = split(&entry)?;
        if !rest.is_empty() {
            return Err(MalformedToken::literal(0, "history entry holds more than one element"));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Remove and return the newest element
    pub fn pop(&mut self) -> Option<String> {
        self.entries.pop()
    }

    pub fn last(&self) -> Option<&str> {
        self.entries.last().map(String::as_str)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Join the history with a current element into one chain string
    pub fn join(&self, current: &str) -> String {
        join(&self.entries, current)
    }
}

/// Concatenate elements with the chain separator, marker-prefixing each
pub fn join<S: AsRef<str>>(history: &[S], current: &str) -> String {
    let capacity = history.iter().map(|e| e.as_ref().len() + 2).sum::<usize>() + current.len() + 1;
    let mut out = String::with_capacity(capacity);
    for entry in history {
        push_element(&mut out, entry.as_ref());
        out.push(CHAIN_SEPARATOR);
    }
    push_element(&mut out, current);
    out
}

fn push_element(out: &mut String, element: &str) {
    if !element.starts_with(FULL_MARKER) {
        out.push(FULL_MARKER);
    }
    out.push_str(element);
}

/// Split a chain into its history and its current element.
///
/// Each element's block is skipped with the scanner before looking for the
/// separator, so a separator inside a quoted value never splits. Every block
/// must also parse as a literal mapping.
pub fn split(text: &str) -> Result<(History, String), MalformedToken> {
    let mut entries = Vec::new();
    let mut start = 0;
    loop {
        if !text[start..].starts_with(FULL_MARKER) {
            return Err(MalformedToken::MissingMarker { at: start });
        }
        let block_end = find_block_end(text, start + FULL_MARKER.len_utf8())?;
        let tail = block_end + 1;
        match text[tail..].find(CHAIN_SEPARATOR) {
            Some(offset) => {
                let sep = tail + offset;
                check_identifier(&text[tail..sep])?;
                check_block(&text[start + FULL_MARKER.len_utf8()..=block_end])?;
                entries.push(text[start..sep].to_string());
                start = sep + CHAIN_SEPARATOR.len_utf8();
            }
            None => {
                check_identifier(&text[tail..])?;
                check_block(&text[start + FULL_MARKER.len_utf8()..=block_end])?;
                return Ok((History { entries }, text[start..].to_string()));
            }
        }
    }
}

fn check_identifier(raw: &str) -> Result<(), MalformedToken> {
    if Identifier::is_valid(raw) {
        Ok(())
    } else {
        Err(MalformedToken::InvalidIdentifier(raw.to_string()))
    }
}

fn check_block(block: &str) -> Result<(), MalformedToken> {
    literal::parse_mapping(block).map(|_| ())
}

/// Parse one Full-shape element into its identifier and raw mapping
pub fn parse_element(element: &str) -> Result<(Identifier, Mapping), MalformedToken> {
    if !element.starts_with(FULL_MARKER) {
        return Err(MalformedToken::MissingMarker { at: 0 });
    }
    let open = FULL_MARKER.len_utf8();
    let block_end = find_block_end(element, open)?;
    let identifier = Identifier::new(&element[block_end + 1..])?;
    let mapping = literal::parse_mapping(&element[open..=block_end])?;
    Ok((identifier, mapping))
}
