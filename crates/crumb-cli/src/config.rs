use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use crumb_core::{CodecConfig, Schema, SchemaRegistry};
use crumb_logging::LogConfig;
use crumb_storage::StoreConfig;
use serde::{Deserialize, Serialize};

/// Everything the CLI reads from its TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrumbConfig {
    pub codec: CodecConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
    pub schemas: Vec<Schema>,
}

impl Default for CrumbConfig {
    fn default() -> Self {
        Self {
            codec: CodecConfig::default(),
            store: StoreConfig::default(),
            log: LogConfig::cli(),
            schemas: Vec::new(),
        }
    }
}

impl CrumbConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::from_toml(&raw)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Validate and index the configured schemas
    pub fn registry(&self) -> anyhow::Result<SchemaRegistry> {
        let mut registry = SchemaRegistry::new();
        for schema in &self.schemas {
            registry
                .register(schema.clone())
                .with_context(|| format!("Invalid schema '{}'", schema.identifier))?;
        }
        Ok(registry)
    }
}

#[derive(Parser)]
#[command(name = "crumb", about = "Encode, decode and maintain callback tokens")]
pub struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Database path, overriding the config file
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Load the config file (if any) and apply command-line overrides
    pub fn resolve_config(&self) -> anyhow::Result<CrumbConfig> {
        let mut config = match &self.config {
            Some(path) => CrumbConfig::load(path)?,
            None => CrumbConfig::default(),
        };
        if let Some(db) = &self.db {
            config.store.db_path = Some(db.clone());
        }
        if let Some(level) = &self.log_level {
            config.log.default_level = level.clone();
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Encode an invocation into a token
    Encode {
        /// Callback identifier
        identifier: String,
        /// Declared argument, parsed as a literal or else taken as a string
        #[arg(long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,
        /// Passthrough extra
        #[arg(long = "extra", value_name = "KEY=VALUE")]
        extras: Vec<String>,
        /// Token to append this invocation to
        #[arg(long)]
        history: Option<String>,
        /// Use the positional Compact shape
        #[arg(long, conflicts_with = "history")]
        compact: bool,
    },
    /// Decode a token against the configured schemas
    Decode {
        token: String,
    },
    /// Show a token's structure without schema validation
    Inspect {
        token: String,
    },
    /// Drop the newest element of a chain
    Pop {
        token: String,
    },
    /// Remove records not touched in the given number of days
    Sweep {
        #[arg(long)]
        older_than_days: u32,
    },
    /// Show store counters
    Stats,
}
