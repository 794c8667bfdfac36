//! Command execution against one opened store

use std::sync::Arc;

use anyhow::{Context, bail};
use crumb_core::literal::parse_value;
use crumb_core::{CallbackCodec, History, Invocation, Value};
use crumb_storage::CompactionStore;
use serde_json::json;
use tracing::info;

use crate::config::{Command, CrumbConfig};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Codec plus the store it compacts into
pub struct Session {
    codec: CallbackCodec,
    store: Arc<CompactionStore>,
}

impl Session {
    pub fn open(config: &CrumbConfig) -> anyhow::Result<Self> {
        let mut store_config = config.store.clone();
        store_config.token_budget = config.codec.token_budget;
        let store = Arc::new(
            CompactionStore::open(store_config).context("Failed to open compaction store")?,
        );
        let codec = CallbackCodec::with_config(
            config.codec.clone(),
            Arc::new(config.registry()?),
            store.clone(),
        )?;
        Ok(Self { codec, store })
    }

    pub fn codec(&self) -> &CallbackCodec {
        &self.codec
    }

    /// Run one command and return what to print
    pub fn run(&self, command: &Command) -> anyhow::Result<String> {
        match command {
            Command::Encode {
                identifier,
                args,
                extras,
                history,
                compact,
            } => {
                let mut invocation = Invocation::new(identifier.as_str())?;
                for raw in args {
                    let (key, value) = parse_pair(raw)?;
                    invocation.arguments.insert(key, value);
                }
                for raw in extras {
                    let (key, value) = parse_pair(raw)?;
                    invocation.extra.insert(key, value);
                }

                let token = match (history, compact) {
                    (_, true) => self.codec.encode_compact(&invocation)?,
                    (Some(chain), false) => self.codec.append(chain, &invocation)?,
                    (None, false) => self.codec.encode(&invocation, &History::new())?,
                };
                Ok(token.to_string())
            }

            Command::Decode { token } => {
                let decoded = self.codec.decode(token)?;
                Ok(serde_json::to_string_pretty(&decoded)?)
            }

            Command::Inspect { token } => {
                let info = self.codec.inspect(token)?;
                Ok(serde_json::to_string_pretty(&info)?)
            }

            Command::Pop { token } => {
                let (remaining, popped) = self.codec.pop(token)?;
                let out = json!({
                    "remaining": remaining.map(|t| t.to_string()),
                    "popped": popped,
                });
                Ok(serde_json::to_string_pretty(&out)?)
            }

            Command::Sweep { older_than_days } => {
                if !self.store.is_durable() {
                    bail!("Sweep needs a database path (--db or [store] db_path)");
                }
                let cutoff =
                    chrono::Utc::now().timestamp_millis() - i64::from(*older_than_days) * MILLIS_PER_DAY;
                let removed = self.store.sweep(cutoff)?;
                info!(removed, cutoff, "Sweep finished");
                Ok(format!("Removed {} stale records", removed))
            }

            Command::Stats => {
                let stats = self.store.stats()?;
                Ok(serde_json::to_string_pretty(&stats)?)
            }
        }
    }

    /// Flush pending records
    pub fn close(self) -> anyhow::Result<usize> {
        Ok(self.store.flush().context("Failed to flush compaction store")?)
    }
}

/// Parse `key=value`, reading the value as a literal and falling back to a string
pub fn parse_pair(raw: &str) -> anyhow::Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("Expected KEY=VALUE, got '{}'", raw);
    };
    if key.is_empty() {
        bail!("Empty key in '{}'", raw);
    }
    let value = parse_value(value).unwrap_or_else(|_| Value::from(value));
    Ok((key.to_string(), value))
}
