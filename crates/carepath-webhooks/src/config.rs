//! Webhook subsystem configuration.

use std::env;
use std::time::Duration;

use crate::crypto::parse_encryption_key;
use crate::error::ConfigError;
use crate::retry::{BackoffStrategy, MAX_RETRY_DELAY_SECONDS};
use crate::scheduler::SchedulerConfig;
use crate::validation::UrlPolicy;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_CLAIM_LEASE_SECS: u64 = 300;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_SUBSCRIPTIONS: i64 = 25;

/// Everything the publisher, dispatcher, scheduler and admin services need.
#[derive(Clone)]
pub struct WebhookConfig {
    /// AES-256 key protecting signing secrets at rest.
    pub encryption_key: Vec<u8>,
    pub request_timeout: Duration,
    pub url_policy: UrlPolicy,
    pub max_subscriptions_per_tenant: i64,
    pub scheduler: SchedulerConfig,
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("encryption_key", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .field("url_policy", &self.url_policy)
            .field(
                "max_subscriptions_per_tenant",
                &self.max_subscriptions_per_tenant,
            )
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl WebhookConfig {
    /// Defaults for everything except the encryption key.
    pub fn new(encryption_key: Vec<u8>) -> Self {
        Self {
            encryption_key,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            url_policy: UrlPolicy::default(),
            max_subscriptions_per_tenant: DEFAULT_MAX_SUBSCRIPTIONS,
            scheduler: SchedulerConfig::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `WEBHOOK_ENCRYPTION_KEY`: 64 hex characters (32 bytes)
    ///
    /// Optional:
    /// - `WEBHOOK_POLL_INTERVAL_SECS` (default 5)
    /// - `WEBHOOK_BATCH_SIZE` (default 50)
    /// - `WEBHOOK_CONCURRENCY` (default 8)
    /// - `WEBHOOK_CLAIM_LEASE_SECS` (default 300)
    /// - `WEBHOOK_REQUEST_TIMEOUT_SECS` (default 10)
    /// - `WEBHOOK_BACKOFF`: `fixed` (default) or `exponential`
    /// - `WEBHOOK_MAX_BACKOFF_SECS` (default 86400, exponential only)
    /// - `WEBHOOK_ALLOW_HTTP` (default false)
    /// - `WEBHOOK_ALLOW_PRIVATE_TARGETS` (default false)
    /// - `WEBHOOK_MAX_SUBSCRIPTIONS` (default 25)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Same as [`Self::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key_hex = lookup("WEBHOOK_ENCRYPTION_KEY")
            .ok_or_else(|| ConfigError::missing("WEBHOOK_ENCRYPTION_KEY"))?;
        let encryption_key = parse_encryption_key(&key_hex)
            .map_err(|e| ConfigError::invalid("WEBHOOK_ENCRYPTION_KEY", e.to_string()))?;

        let poll_interval = parse_or(&lookup, "WEBHOOK_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        let batch_size = parse_or(&lookup, "WEBHOOK_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        let concurrency = parse_or(&lookup, "WEBHOOK_CONCURRENCY", DEFAULT_CONCURRENCY)?;
        let claim_lease = parse_or(&lookup, "WEBHOOK_CLAIM_LEASE_SECS", DEFAULT_CLAIM_LEASE_SECS)?;
        let request_timeout =
            parse_or(&lookup, "WEBHOOK_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;

        for (var, value) in [
            ("WEBHOOK_POLL_INTERVAL_SECS", poll_interval),
            ("WEBHOOK_CLAIM_LEASE_SECS", claim_lease),
            ("WEBHOOK_REQUEST_TIMEOUT_SECS", request_timeout),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(var, "must be greater than zero"));
            }
        }
        if batch_size == 0 {
            return Err(ConfigError::invalid("WEBHOOK_BATCH_SIZE", "must be greater than zero"));
        }
        if concurrency == 0 {
            return Err(ConfigError::invalid("WEBHOOK_CONCURRENCY", "must be greater than zero"));
        }
        // A lease shorter than the request timeout would let another worker
        // reclaim a delivery that is still in flight.
        if claim_lease <= request_timeout {
            return Err(ConfigError::invalid(
                "WEBHOOK_CLAIM_LEASE_SECS",
                "must exceed WEBHOOK_REQUEST_TIMEOUT_SECS",
            ));
        }

        let max_backoff: u32 = parse_or(&lookup, "WEBHOOK_MAX_BACKOFF_SECS", MAX_RETRY_DELAY_SECONDS)?;
        let backoff = match lookup("WEBHOOK_BACKOFF").as_deref().map(str::trim) {
            None | Some("") | Some("fixed") => BackoffStrategy::Fixed,
            Some("exponential") => BackoffStrategy::Exponential {
                max_delay_seconds: max_backoff.max(1),
            },
            Some(other) => {
                return Err(ConfigError::invalid(
                    "WEBHOOK_BACKOFF",
                    format!("expected 'fixed' or 'exponential', got '{other}'"),
                ))
            }
        };

        let url_policy = UrlPolicy {
            allow_http: parse_bool(&lookup, "WEBHOOK_ALLOW_HTTP")?,
            allow_private_targets: parse_bool(&lookup, "WEBHOOK_ALLOW_PRIVATE_TARGETS")?,
        };

        let max_subscriptions_per_tenant =
            parse_or(&lookup, "WEBHOOK_MAX_SUBSCRIPTIONS", DEFAULT_MAX_SUBSCRIPTIONS)?;
        if max_subscriptions_per_tenant < 1 {
            return Err(ConfigError::invalid("WEBHOOK_MAX_SUBSCRIPTIONS", "must be at least 1"));
        }

        Ok(Self {
            encryption_key,
            request_timeout: Duration::from_secs(request_timeout),
            url_policy,
            max_subscriptions_per_tenant,
            scheduler: SchedulerConfig {
                poll_interval: Duration::from_secs(poll_interval),
                batch_size,
                concurrency,
                claim_lease: Duration::from_secs(claim_lease),
                backoff,
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(var, e.to_string())),
        _ => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, var: &str) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("false") | Some("0") | Some("no") => Ok(false),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some(other) => Err(ConfigError::invalid(var, format!("not a boolean: {other}"))),
    }
}
