//! Operator CLI for Crumb: encode, decode and inspect callback tokens, and
//! maintain a compaction store.

pub mod commands;
pub mod config;
