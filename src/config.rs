//! Sync engine tuning, loaded from environment variables.

use std::time::Duration;

pub const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 700;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2500;
pub const DEFAULT_PERSIST_RETRIES: u32 = 2;
pub const DEFAULT_PERSIST_RETRY_BASE_MS: u64 = 400;
pub const DEFAULT_PERSIST_RETRY_JITTER_MS: u64 = 120;
pub const DEFAULT_SNAPSHOT_EVERY: u32 = 25;
pub const DEFAULT_PRESENCE_STALE_MS: i64 = 15_000;
pub const DEFAULT_PRESENCE_HEARTBEAT_MS: u64 = 5_000;
pub const DEFAULT_ROLE_RECHECK: bool = true;

/// Per-session tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Quiet period before a debounced save fires, in milliseconds.
    pub save_debounce_ms: u64,
    /// Event feed poll period, in milliseconds.
    pub poll_interval_ms: u64,
    /// Retries after the first attempt for each save step.
    pub persist_retries: u32,
    /// First backoff delay; doubles per retry.
    pub persist_retry_base_ms: u64,
    /// Upper bound of random jitter added to each backoff delay.
    pub persist_retry_jitter_ms: u64,
    /// Successful saves between snapshot checkpoints.
    pub snapshot_every: u32,
    /// Presence records older than this are excluded from peer lists.
    pub presence_stale_ms: i64,
    /// Keep-alive period for re-sending the last cursor.
    pub presence_heartbeat_ms: u64,
    /// Refresh the cached role on each poll and before each save.
    pub role_recheck: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            save_debounce_ms: DEFAULT_SAVE_DEBOUNCE_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            persist_retries: DEFAULT_PERSIST_RETRIES,
            persist_retry_base_ms: DEFAULT_PERSIST_RETRY_BASE_MS,
            persist_retry_jitter_ms: DEFAULT_PERSIST_RETRY_JITTER_MS,
            snapshot_every: DEFAULT_SNAPSHOT_EVERY,
            presence_stale_ms: DEFAULT_PRESENCE_STALE_MS,
            presence_heartbeat_ms: DEFAULT_PRESENCE_HEARTBEAT_MS,
            role_recheck: DEFAULT_ROLE_RECHECK,
        }
    }
}

impl SyncConfig {
    /// Build config from environment variables, falling back to defaults.
    ///
    /// - `SYNC_SAVE_DEBOUNCE_MS`: default 700
    /// - `SYNC_POLL_INTERVAL_MS`: default 2500
    /// - `SYNC_PERSIST_RETRIES`: default 2
    /// - `SYNC_PERSIST_RETRY_BASE_MS`: default 400
    /// - `SYNC_PERSIST_RETRY_JITTER_MS`: default 120
    /// - `SYNC_SNAPSHOT_EVERY`: default 25
    /// - `SYNC_PRESENCE_STALE_MS`: default 15000
    /// - `SYNC_PRESENCE_HEARTBEAT_MS`: default 5000
    /// - `SYNC_ROLE_RECHECK`: default true
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            save_debounce_ms: env_parse("SYNC_SAVE_DEBOUNCE_MS", DEFAULT_SAVE_DEBOUNCE_MS),
            poll_interval_ms: env_parse("SYNC_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS).max(1),
            persist_retries: env_parse("SYNC_PERSIST_RETRIES", DEFAULT_PERSIST_RETRIES),
            persist_retry_base_ms: env_parse("SYNC_PERSIST_RETRY_BASE_MS", DEFAULT_PERSIST_RETRY_BASE_MS),
            persist_retry_jitter_ms: env_parse("SYNC_PERSIST_RETRY_JITTER_MS", DEFAULT_PERSIST_RETRY_JITTER_MS),
            snapshot_every: env_parse("SYNC_SNAPSHOT_EVERY", DEFAULT_SNAPSHOT_EVERY),
            presence_stale_ms: env_parse("SYNC_PRESENCE_STALE_MS", DEFAULT_PRESENCE_STALE_MS),
            presence_heartbeat_ms: env_parse("SYNC_PRESENCE_HEARTBEAT_MS", DEFAULT_PRESENCE_HEARTBEAT_MS).max(1),
            role_recheck: env_parse("SYNC_ROLE_RECHECK", DEFAULT_ROLE_RECHECK),
        }
    }

    #[must_use]
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn presence_heartbeat(&self) -> Duration {
        Duration::from_millis(self.presence_heartbeat_ms)
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
