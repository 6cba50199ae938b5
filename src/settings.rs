use once_cell::sync::Lazy;
use std::{env, path::PathBuf, time::Duration};

/// Holds all tunables, read-once from ENV with fallbacks.
pub struct Settings {
    pub mpd_host: String,
    pub mpd_port: u16,
    pub command_timeout: Duration,
    pub max_backoff: Duration,
    pub recent_limit: usize,
    pub state_path: Option<PathBuf>,
}

impl Settings {
    fn from_env() -> Self {
        // optionally load .env
        let _ = dotenvy::dotenv();

        // helper to parse usize
        fn parse_usize(var: &str, default: usize) -> usize {
            env::var(var)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        // helper to parse a port number
        fn parse_u16(var: &str, default: u16) -> u16 {
            env::var(var)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        // helper to parse seconds into Duration
        fn parse_secs(var: &str, default_secs: u64) -> Duration {
            env::var(var)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_secs(default_secs))
        }

        Settings {
            mpd_host: env::var("JUKEBOX_MPD_HOST").unwrap_or_else(|_| "localhost".to_string()),
            mpd_port: parse_u16("JUKEBOX_MPD_PORT", 6600),
            command_timeout: parse_secs("JUKEBOX_COMMAND_TIMEOUT_SECS", 10),
            max_backoff: parse_secs("JUKEBOX_MAX_BACKOFF_SECS", 60),
            recent_limit: parse_usize("JUKEBOX_REMEMBER_RECENT", 10),
            state_path: env::var("JUKEBOX_STATE_PATH").ok().map(PathBuf::from),
        }
    }
}

/// Global settings instance
pub static SETTINGS: Lazy<Settings> = Lazy::new(Settings::from_env);
