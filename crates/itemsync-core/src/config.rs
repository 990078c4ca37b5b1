//! Runtime configuration.
//!
//! Configuration is a single JSON document. Every field has a default, so an
//! empty object (or no file at all) yields the stock setup: ten items, one
//! mutation per second, a hub cycle every four seconds and two clients, one
//! of which keeps dropping its connection.
//!
//! ```json
//! {
//!   "itemCount": 10,
//!   "clock": "logical",
//!   "notifyIntervalMs": 500,
//!   "clients": [
//!     { "connection": { "mode": "persistent" } },
//!     { "connection": { "mode": "intermittent",
//!                       "connectedMs": { "min": 1000, "max": 3000 },
//!                       "offlineMs": { "min": 500, "max": 1500 } } }
//!   ]
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Read error: {0}")]
    ReadError(#[from] std::io::Error),

    /// The configuration file is not valid JSON for [`SyncConfig`].
    #[error("Invalid data: {0}")]
    InvalidData(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("Invalid setting {field}: {reason}")]
    InvalidSetting {
        field: &'static str,
        reason: String,
    },
}

/// Which clock stamps store mutations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockKind {
    /// Wall time in nanoseconds, forced strictly increasing.
    #[default]
    Wall,
    /// Mutation counter.
    Logical,
}

/// Inclusive range of milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MillisRange {
    pub min: u64,
    pub max: u64,
}

impl MillisRange {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn min_duration(&self) -> Duration {
        Duration::from_millis(self.min)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max)
    }
}

/// How a client treats its live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ConnectionPolicy {
    /// Stay subscribed until the hub closes the queue or the process stops.
    Persistent,
    /// Stay connected for a random span in `connected_ms`, go offline for a
    /// random span in `offline_ms`, then catch up and reconnect.
    #[serde(rename_all = "camelCase")]
    Intermittent {
        connected_ms: MillisRange,
        offline_ms: MillisRange,
    },
}

impl ConnectionPolicy {
    /// The intermittent profile of the stock setup: connected 5 to 12
    /// seconds, offline 2 to 6 seconds.
    pub const fn flaky() -> Self {
        ConnectionPolicy::Intermittent {
            connected_ms: MillisRange::new(5_000, 12_000),
            offline_ms: MillisRange::new(2_000, 6_000),
        }
    }
}

/// Per-client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientProfile {
    /// Connection behaviour.
    pub connection: ConnectionPolicy,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Number of items created at start-up (keys `0..itemCount`).
    pub item_count: u32,

    /// Clock used to stamp mutations.
    pub clock: ClockKind,

    /// Delay between two mutator edits.
    pub mutate_interval_ms: u64,

    /// Upper bound (exclusive) for values written by the mutator.
    pub mutation_value_max: i64,

    /// Delay between two hub cycles.
    pub notify_interval_ms: u64,

    /// Capacity of each subscription queue, in batches.
    pub queue_capacity: usize,

    /// Stop after this many seconds. Runs until interrupted when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_for_secs: Option<u64>,

    /// Simulated clients.
    pub clients: Vec<ClientProfile>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            item_count: 10,
            clock: ClockKind::Wall,
            mutate_interval_ms: 1_000,
            mutation_value_max: 1_000,
            notify_interval_ms: 4_000,
            queue_capacity: 10,
            run_for_secs: None,
            clients: vec![
                ClientProfile {
                    connection: ConnectionPolicy::Persistent,
                },
                ClientProfile {
                    connection: ConnectionPolicy::flaky(),
                },
            ],
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Check every setting is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mutate_interval_ms == 0 {
            return Err(invalid("mutateIntervalMs", "must be greater than zero"));
        }
        if self.notify_interval_ms == 0 {
            return Err(invalid("notifyIntervalMs", "must be greater than zero"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queueCapacity", "must be greater than zero"));
        }
        if self.mutation_value_max <= 0 {
            return Err(invalid("mutationValueMax", "must be greater than zero"));
        }

        for (index, profile) in self.clients.iter().enumerate() {
            if let ConnectionPolicy::Intermittent {
                connected_ms,
                offline_ms,
            } = profile.connection
            {
                if connected_ms.min > connected_ms.max {
                    return Err(invalid(
                        "connectedMs",
                        format!(
                            "client {index}: min {} exceeds max {}",
                            connected_ms.min, connected_ms.max
                        ),
                    ));
                }
                if connected_ms.max == 0 {
                    return Err(invalid(
                        "connectedMs",
                        format!("client {index}: connection span must be greater than zero"),
                    ));
                }
                if offline_ms.min > offline_ms.max {
                    return Err(invalid(
                        "offlineMs",
                        format!(
                            "client {index}: min {} exceeds max {}",
                            offline_ms.min, offline_ms.max
                        ),
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn mutate_interval(&self) -> Duration {
        Duration::from_millis(self.mutate_interval_ms)
    }

    pub fn notify_interval(&self) -> Duration {
        Duration::from_millis(self.notify_interval_ms)
    }

    pub fn run_for(&self) -> Option<Duration> {
        self.run_for_secs.map(Duration::from_secs)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidSetting {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = SyncConfig::from_json("{}").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.item_count, 10);
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.notify_interval(), Duration::from_secs(4));
        assert_eq!(config.clients.len(), 2);
        assert_eq!(config.clients[1].connection, ConnectionPolicy::flaky());
    }

    #[test]
    fn test_parse_full_document() {
        let json = r#"{
            "itemCount": 25,
            "clock": "logical",
            "mutateIntervalMs": 50,
            "notifyIntervalMs": 200,
            "queueCapacity": 4,
            "runForSecs": 30,
            "clients": [
                { "connection": { "mode": "persistent" } },
                { "connection": { "mode": "intermittent",
                                  "connectedMs": { "min": 100, "max": 300 },
                                  "offlineMs": { "min": 50, "max": 80 } } }
            ]
        }"#;

        let config = SyncConfig::from_json(json).unwrap();
        assert_eq!(config.item_count, 25);
        assert_eq!(config.clock, ClockKind::Logical);
        assert_eq!(config.mutate_interval(), Duration::from_millis(50));
        assert_eq!(config.mutation_value_max, 1_000);
        assert_eq!(config.run_for(), Some(Duration::from_secs(30)));
        assert_eq!(
            config.clients[1].connection,
            ConnectionPolicy::Intermittent {
                connected_ms: MillisRange::new(100, 300),
                offline_ms: MillisRange::new(50, 80),
            }
        );
    }

    #[test]
    fn test_reject_zero_capacity() {
        let err = SyncConfig::from_json(r#"{ "queueCapacity": 0 }"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting {
                field: "queueCapacity",
                ..
            }
        ));
    }

    #[test]
    fn test_reject_inverted_range() {
        let json = r#"{ "clients": [ { "connection": { "mode": "intermittent",
            "connectedMs": { "min": 10, "max": 5 },
            "offlineMs": { "min": 1, "max": 2 } } } ] }"#;
        let err = SyncConfig::from_json(json).unwrap_err();
        assert!(err.to_string().contains("client 0"));
    }

    #[test]
    fn test_reject_malformed_json() {
        let err = SyncConfig::from_json("{ itemCount: ").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidData(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SyncConfig::load("/nonexistent/itemsync.json").unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }

    #[test]
    fn test_serialize_round_trip_keeps_policy_tag() {
        let json = serde_json::to_value(SyncConfig::default()).unwrap();
        assert_eq!(json["clients"][0]["connection"]["mode"], "persistent");
        assert_eq!(json["clients"][1]["connection"]["mode"], "intermittent");
        assert_eq!(json["clients"][1]["connection"]["connectedMs"]["max"], 12_000);
    }
}
