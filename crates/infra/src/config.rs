//! Runtime configuration read from the environment once at startup.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Outbox dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub max_attempts: u32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            batch_size: 20,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Postgres connection string. The worker refuses to start without one.
    pub database_url: Option<String>,
    pub outbox: OutboxConfig,
    pub realtime_channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            outbox: OutboxConfig::default(),
            realtime_channel_capacity: 256,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();

        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());

        let poll_ms = parse_positive(
            &lookup,
            "OUTBOX_POLL_INTERVAL_MS",
            defaults.outbox.poll_interval.as_millis() as u64,
        )?;
        let batch_size =
            parse_positive(&lookup, "OUTBOX_BATCH_SIZE", defaults.outbox.batch_size as u64)?;
        let max_attempts = parse_positive(
            &lookup,
            "OUTBOX_MAX_ATTEMPTS",
            u64::from(defaults.outbox.max_attempts),
        )?;
        let capacity = parse_positive(
            &lookup,
            "REALTIME_CHANNEL_CAPACITY",
            defaults.realtime_channel_capacity as u64,
        )?;

        Ok(Self {
            database_url,
            outbox: OutboxConfig {
                poll_interval: Duration::from_millis(poll_ms),
                batch_size: to_usize("OUTBOX_BATCH_SIZE", batch_size)?,
                max_attempts: u32::try_from(max_attempts).map_err(|_| ConfigError::Invalid {
                    key: "OUTBOX_MAX_ATTEMPTS",
                    reason: "too large".to_string(),
                })?,
            },
            realtime_channel_capacity: to_usize("REALTIME_CHANNEL_CAPACITY", capacity)?,
        })
    }

    /// The connection string, or an error naming the missing key.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid {
                key: "DATABASE_URL",
                reason: "required by the outbox worker".to_string(),
            })
    }
}

fn parse_positive<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };

    let value: u64 = raw.trim().parse().map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("{raw:?} is not a number ({e})"),
    })?;

    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            reason: "must be greater than zero".to_string(),
        });
    }

    Ok(value)
}

fn to_usize(key: &'static str, value: u64) -> Result<usize, ConfigError> {
    usize::try_from(value).map_err(|_| ConfigError::Invalid {
        key,
        reason: "too large".to_string(),
    })
}
