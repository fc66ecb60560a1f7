//! Application-level configuration loading: timing constants of the room engine.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_ROOMS_CONFIG_PATH";

const DEFAULT_OWNER_GRACE: Duration = Duration::from_secs(10 * 60);
const DEFAULT_PLAY_LEAD_TIME: Duration = Duration::from_millis(1500);
const DEFAULT_BUZZ_COOLDOWN: Duration = Duration::from_secs(5);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;
const DEFAULT_CORRECT_ANSWER_POINTS: i64 = 1;

/// Immutable runtime configuration shared across the application.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// How long a room survives its owner being disconnected.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "owner_grace_ms")]
    pub owner_grace: Duration,
    /// Delay added to a scheduled play start so every client begins in unison.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "play_lead_time_ms")]
    pub play_lead_time: Duration,
    /// Window during which a player who answered wrong cannot buzz again.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "buzz_cooldown_ms")]
    pub buzz_cooldown: Duration,
    /// Maximum silence on a socket before the connection is torn down.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "idle_timeout_ms")]
    pub idle_timeout: Duration,
    /// Capacity of each subscriber queue on a room hub.
    pub subscriber_buffer: usize,
    /// Points awarded by a correct buzz resolution.
    pub correct_answer_points: i64,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        owner_grace_ms = config.owner_grace.as_millis() as u64,
                        play_lead_time_ms = config.play_lead_time.as_millis() as u64,
                        buzz_cooldown_ms = config.buzz_cooldown.as_millis() as u64,
                        "loaded room engine config"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            owner_grace: DEFAULT_OWNER_GRACE,
            play_lead_time: DEFAULT_PLAY_LEAD_TIME,
            buzz_cooldown: DEFAULT_BUZZ_COOLDOWN,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            correct_answer_points: DEFAULT_CORRECT_ANSWER_POINTS,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
