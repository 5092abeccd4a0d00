//! Connection options.

use crate::changes::DEFAULT_SYSTEM_PREFIX;
use crate::error::{Result, SubscriptionError};
use crate::policy::AckTimeoutPolicy;
use crate::types::ConnectionId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do when the subscription is already held by another client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpeningStrategy {
    /// Fail if another client holds it.
    #[default]
    OpenIfFree,
    /// Wait until the current holder releases it.
    WaitForFree,
    /// Take it over and refuse later takeovers.
    ForceAndKeep,
    /// Take it over from the current holder.
    TakeOver,
}

/// Batching parameters forwarded to the server on open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Max documents per pulled batch.
    /// Default: 4096
    pub max_doc_count: usize,

    /// Max batch size in bytes (None = server default).
    pub max_size: Option<u64>,

    /// How long the server waits for an acknowledgment before re-sending a batch.
    /// Default: 1 minute
    #[serde(with = "duration_ms")]
    pub acknowledgment_timeout: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_doc_count: 4096,
            max_size: None,
            acknowledgment_timeout: Duration::from_secs(60),
        }
    }
}

/// Configuration of one subscription connection. Never mutated after open.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionOptions {
    pub strategy: OpeningStrategy,

    /// Identifies this client to the server. Default: random uuid.
    pub connection_id: ConnectionId,

    /// Idle time before a client-alive ping is sent.
    /// Default: 2 minutes
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,

    /// Delay between reconnect attempts after a transient failure.
    /// Default: 15 seconds
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,

    /// Keep going when an observer fails.
    pub ignore_subscriber_errors: bool,

    pub ack_timeout: AckTimeoutPolicy,

    pub batch: BatchOptions,

    /// Puts of keys with this prefix do not wake the puller.
    pub system_key_prefix: String,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            strategy: OpeningStrategy::OpenIfFree,
            connection_id: ConnectionId::generate(),
            heartbeat_interval: Duration::from_secs(120),
            retry_delay: Duration::from_secs(15),
            ignore_subscriber_errors: false,
            ack_timeout: AckTimeoutPolicy::TreatAsApplied,
            batch: BatchOptions::default(),
            system_key_prefix: DEFAULT_SYSTEM_PREFIX.to_string(),
        }
    }
}

impl SubscriptionOptions {
    /// Load options from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(SubscriptionError::Config(
                "heartbeat_interval must be positive".into(),
            ));
        }
        if self.batch.max_doc_count == 0 {
            return Err(SubscriptionError::Config(
                "batch.max_doc_count must be positive".into(),
            ));
        }
        if self.connection_id.as_str().is_empty() {
            return Err(SubscriptionError::Config(
                "connection_id must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Durations as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SubscriptionOptions::default();
        assert_eq!(options.strategy, OpeningStrategy::OpenIfFree);
        assert_eq!(options.heartbeat_interval, Duration::from_secs(120));
        assert_eq!(options.retry_delay, Duration::from_secs(15));
        assert!(!options.ignore_subscriber_errors);
        assert_eq!(options.batch.max_doc_count, 4096);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = SubscriptionOptions::default();
        let b = SubscriptionOptions::default();
        assert_ne!(a.connection_id, b.connection_id);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let options = SubscriptionOptions::from_json(
            r#"{
                "strategy": "wait_for_free",
                "connection_id": "worker-1",
                "heartbeat_interval": 500,
                "batch": { "max_doc_count": 10 }
            }"#,
        )
        .unwrap();

        assert_eq!(options.strategy, OpeningStrategy::WaitForFree);
        assert_eq!(options.connection_id.as_str(), "worker-1");
        assert_eq!(options.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(options.retry_delay, Duration::from_secs(15));
        assert_eq!(options.batch.max_doc_count, 10);
        assert_eq!(options.batch.acknowledgment_timeout, Duration::from_secs(60));
        assert_eq!(options.ack_timeout, AckTimeoutPolicy::TreatAsApplied);
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        assert!(matches!(
            SubscriptionOptions::from_json(r#"{ "heartbeat_interval": 0 }"#),
            Err(SubscriptionError::Config(_))
        ));
        assert!(matches!(
            SubscriptionOptions::from_json(r#"{ "strategy": "sometimes" }"#),
            Err(SubscriptionError::Config(_))
        ));
    }
}
