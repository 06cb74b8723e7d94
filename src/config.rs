//! Configuration loading from `.env` files.

use std::{collections::HashSet, env, time::Duration};

use anyhow::{Context, Result};

use crate::keys::HexKey;

/// Limits and switches for a [`GraphStore`](crate::store::GraphStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Check ids and Schnorr signatures of events not marked as verified.
    pub verify_signatures: bool,
    /// Messages kept per channel by the message sweep.
    pub channel_message_cap: usize,
    /// Messages kept per private room whose newest message is recent.
    pub dm_room_cap: usize,
    /// How recent a room's newest message must be to keep the full cap.
    pub dm_room_recent_secs: u64,
    pub spam_recent_capacity: usize,
    pub spam_offender_capacity: usize,
    /// Debounce window for new/deleted note batches.
    pub bundle_delay: Duration,
    pub relay_hint_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            verify_signatures: true,
            channel_message_cap: 500,
            dm_room_cap: 100,
            dm_room_recent_secs: 7 * 24 * 60 * 60,
            spam_recent_capacity: 2000,
            spam_offender_capacity: 1000,
            bundle_delay: Duration::from_millis(500),
            relay_hint_capacity: 10_000,
        }
    }
}

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Enable Schnorr signature verification on ingest.
    pub verify_sig: bool,
    pub channel_message_cap: usize,
    pub dm_room_cap: usize,
    /// Recency window for private rooms, in days.
    pub dm_room_recent_days: u64,
    pub spam_recent_capacity: usize,
    pub spam_offender_capacity: usize,
    pub bundle_delay_ms: u64,
    /// Accounts whose own notes and mentions survive reply pruning.
    pub logged_in_accounts: HashSet<HexKey>,
    /// Authors removed by the hidden-author sweep.
    pub hidden_authors: HashSet<HexKey>,
}

impl Default for Settings {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            verify_sig: store.verify_signatures,
            channel_message_cap: store.channel_message_cap,
            dm_room_cap: store.dm_room_cap,
            dm_room_recent_days: store.dm_room_recent_secs / 86_400,
            spam_recent_capacity: store.spam_recent_capacity,
            spam_offender_capacity: store.spam_offender_capacity,
            bundle_delay_ms: store.bundle_delay.as_millis() as u64,
            logged_in_accounts: HashSet::new(),
            hidden_authors: HashSet::new(),
        }
    }
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let defaults = Self::default();
        let verify_sig = env::var("VERIFY_SIG")
            .map(|v| v.trim() == "1")
            .unwrap_or(defaults.verify_sig);
        Ok(Self {
            verify_sig,
            channel_message_cap: number("CHANNEL_MESSAGE_CAP", defaults.channel_message_cap)?,
            dm_room_cap: number("DM_ROOM_CAP", defaults.dm_room_cap)?,
            dm_room_recent_days: number("DM_ROOM_RECENT_DAYS", defaults.dm_room_recent_days)?,
            spam_recent_capacity: number("SPAM_RECENT_CAPACITY", defaults.spam_recent_capacity)?,
            spam_offender_capacity: number(
                "SPAM_OFFENDER_CAPACITY",
                defaults.spam_offender_capacity,
            )?,
            bundle_delay_ms: number("BUNDLE_DELAY_MS", defaults.bundle_delay_ms)?,
            logged_in_accounts: csv_strings(env::var("LOGGED_IN_ACCOUNTS").unwrap_or_default())
                .into_iter()
                .collect(),
            hidden_authors: csv_strings(env::var("HIDDEN_AUTHORS").unwrap_or_default())
                .into_iter()
                .collect(),
        })
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            verify_signatures: self.verify_sig,
            channel_message_cap: self.channel_message_cap,
            dm_room_cap: self.dm_room_cap,
            dm_room_recent_secs: self.dm_room_recent_days.saturating_mul(86_400),
            spam_recent_capacity: self.spam_recent_capacity,
            spam_offender_capacity: self.spam_offender_capacity,
            bundle_delay: Duration::from_millis(self.bundle_delay_ms),
            ..StoreConfig::default()
        }
    }
}

/// Read a numeric variable; absent or blank falls back to `default`.
fn number<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .with_context(|| format!("parsing {key}")),
        _ => Ok(default),
    }
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}
