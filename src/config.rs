//! Configuration management for duet

use std::path::PathBuf;
use std::time::Duration;

use crate::client::ReconnectPolicy;
use crate::network::NetworkOptions;
use crate::{Error, Result};

/// Default port the room server listens on
pub const DEFAULT_PORT: u16 = 18_791;

/// Where room rosters are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistenceMode {
    /// Rosters live only as long as the process
    Memory,
    /// Rosters are written to JSON files under the data directory
    #[default]
    Files,
}

/// Duet configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on
    pub port: u16,

    /// Path to data directory (room rosters)
    pub data_dir: PathBuf,

    /// How room rosters are persisted
    pub persistence: PersistenceMode,

    /// How long an outbound request waits for its response
    pub request_timeout: Duration,

    /// Client reconnect schedule
    pub reconnect: ReconnectPolicy,

    /// Client keepalive ping period, disabled when `None`
    pub ping_interval: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: default_data_dir(),
            persistence: PersistenceMode::default(),
            request_timeout: crate::pending::DEFAULT_REQUEST_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            ping_interval: None,
        }
    }
}

impl Config {
    /// Load configuration from `DUET_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set but cannot be parsed
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let port = env_parse("DUET_PORT")?
            .or(env_parse("PORT")?)
            .unwrap_or(defaults.port);

        let data_dir = std::env::var("DUET_DATA_DIR")
            .ok()
            .map_or(defaults.data_dir, PathBuf::from);

        let persistence = match std::env::var("DUET_PERSISTENCE").ok().as_deref() {
            None | Some("files" | "file") => PersistenceMode::Files,
            Some("memory") => PersistenceMode::Memory,
            Some(other) => {
                return Err(Error::Config(format!(
                    "DUET_PERSISTENCE must be 'files' or 'memory', got '{other}'"
                )));
            }
        };

        let request_timeout = env_parse("DUET_REQUEST_TIMEOUT_MS")?
            .map_or(defaults.request_timeout, Duration::from_millis);

        let reconnect = ReconnectPolicy {
            base_delay: env_parse("DUET_RECONNECT_BASE_MS")?
                .map_or(defaults.reconnect.base_delay, Duration::from_millis),
            max_attempts: env_parse("DUET_RECONNECT_MAX_ATTEMPTS")?
                .unwrap_or(defaults.reconnect.max_attempts),
        };

        // 0 disables keepalive
        let ping_interval = env_parse::<u64>("DUET_PING_INTERVAL_MS")?
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        Ok(Self {
            port,
            data_dir,
            persistence,
            request_timeout,
            reconnect,
            ping_interval,
        })
    }

    /// Registry options derived from this config
    #[must_use]
    pub const fn network_options(&self) -> NetworkOptions {
        NetworkOptions {
            request_timeout: self.request_timeout,
        }
    }

    /// Directory holding one roster file per room
    #[must_use]
    pub fn rooms_dir(&self) -> PathBuf {
        self.data_dir.join("rooms")
    }
}

/// Default data directory (~/.local/share/duet on Linux)
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "omni", "duet")
        .map_or_else(|| PathBuf::from(".duet"), |d| d.data_dir().to_path_buf())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid {name}='{raw}': {e}"))),
        Err(_) => Ok(None),
    }
}
