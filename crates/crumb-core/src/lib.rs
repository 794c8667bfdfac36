//! # Crumb Core
//!
//! Callback token codec for Crumb.
//!
//! UI elements carry an opaque action payload of at most 64 bytes. This crate
//! turns an invocation (identifier + arguments) and the navigation history
//! that led to it into such a payload, and back.
//!
//! ## Features
//!
//! - **Full shape**: `~{page:2}open_menu`, self-describing, chainable with `;`
//! - **Compact shape**: `open_menu:2`, positional values in schema order
//! - **Hashed shape**: `<<reference>>`, resolved through a [`Compactor`]
//! - **Chains**: history + current invocation, with `append` and `pop`
//! - **Router**: probe-and-dispatch over schema-bound handlers
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use crumb_core::{CallbackCodec, FieldKind, History, Invocation, Schema, SchemaRegistry};
//!
//! let schemas = SchemaRegistry::new()
//!     .with(Schema::new("open_menu")?.field("page", FieldKind::Int))?;
//! let codec = CallbackCodec::new(Arc::new(schemas), store);
//!
//! let token = codec.encode(&Invocation::new("open_menu")?.arg("page", 2), &History::new())?;
//! assert_eq!(token.to_string(), "~{page:2}open_menu");
//!
//! let decoded = codec.decode(&token.to_string())?;
//! assert_eq!(decoded.invocation.arguments["page"], 2.into());
//! ```

pub mod chain;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod invocation;
pub mod literal;
pub mod scanner;
pub mod schema;
pub mod token;
pub mod value;

// Re-exports
pub use chain::History;
pub use codec::{CallbackCodec, CodecConfig, Compactor, Decoded, ElementInfo, Persistence, TokenInfo};
pub use dispatch::Router;
pub use error::{CodecError, MalformedToken, SchemaMismatch};
pub use invocation::{Identifier, Invocation};
pub use schema::{Field, FieldKind, Schema, SchemaRegistry};
pub use token::{MAX_TOKEN_LEN, Reference, Token, TokenShape};
pub use value::{Mapping, Value};
