//! Server configuration loaded from the environment (and `.env`).

use crate::timer::{parse_preset, DEFAULT_PRESET_SECONDS};
use crate::types::DEFAULT_PREPARING_SIZE;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// External ranking persistence endpoint (None = submissions disabled)
    pub ranking_url: Option<String>,
    pub ranking_timeout: Duration,
    /// Global default timer preset in seconds
    pub default_timer_seconds: u32,
    /// Lookahead size of the `preparing` partition
    pub preparing_size: usize,
    /// Whether new boxes use time as secondary ranking criterion
    pub use_time_tiebreak: bool,
    /// Where box state is saved on shutdown and restored at startup
    pub snapshot_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            ranking_url: None,
            ranking_timeout: Duration::from_secs(10),
            default_timer_seconds: DEFAULT_PRESET_SECONDS,
            preparing_size: DEFAULT_PREPARING_SIZE,
            use_time_tiebreak: false,
            snapshot_path: None,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let default_timer_seconds = match non_empty_var("ESCALADA_DEFAULT_TIMER") {
            Some(raw) => parse_preset(&raw).unwrap_or_else(|| {
                tracing::warn!(
                    "ESCALADA_DEFAULT_TIMER={} is not seconds or m:ss, using {}",
                    raw,
                    defaults.default_timer_seconds
                );
                defaults.default_timer_seconds
            }),
            None => defaults.default_timer_seconds,
        };

        Self {
            port: non_empty_var("ESCALADA_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            ranking_url: non_empty_var("ESCALADA_RANKING_URL"),
            ranking_timeout: non_empty_var("ESCALADA_RANKING_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.ranking_timeout),
            default_timer_seconds,
            preparing_size: non_empty_var("ESCALADA_PREPARING_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.preparing_size),
            use_time_tiebreak: non_empty_var("ESCALADA_TIME_TIEBREAK")
                .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(defaults.use_time_tiebreak),
            snapshot_path: non_empty_var("ESCALADA_SNAPSHOT_PATH").map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "ESCALADA_PORT",
        "ESCALADA_RANKING_URL",
        "ESCALADA_RANKING_TIMEOUT",
        "ESCALADA_DEFAULT_TIMER",
        "ESCALADA_PREPARING_SIZE",
        "ESCALADA_TIME_TIEBREAK",
        "ESCALADA_SNAPSHOT_PATH",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        clear_env();
        let config = AppConfig::from_env();
        assert_eq!(config.port, 8000);
        assert!(config.ranking_url.is_none());
        assert_eq!(config.default_timer_seconds, DEFAULT_PRESET_SECONDS);
        assert_eq!(config.preparing_size, DEFAULT_PREPARING_SIZE);
        assert!(!config.use_time_tiebreak);
    }

    #[test]
    #[serial]
    fn test_reads_env() {
        clear_env();
        std::env::set_var("ESCALADA_PORT", "9100");
        std::env::set_var("ESCALADA_RANKING_URL", " http://ranking.local/save ");
        std::env::set_var("ESCALADA_DEFAULT_TIMER", "4:00");
        std::env::set_var("ESCALADA_PREPARING_SIZE", "2");
        std::env::set_var("ESCALADA_TIME_TIEBREAK", "on");

        let config = AppConfig::from_env();
        assert_eq!(config.port, 9100);
        assert_eq!(
            config.ranking_url.as_deref(),
            Some("http://ranking.local/save")
        );
        assert_eq!(config.default_timer_seconds, 240);
        assert_eq!(config.preparing_size, 2);
        assert!(config.use_time_tiebreak);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_bad_timer_falls_back() {
        clear_env();
        std::env::set_var("ESCALADA_DEFAULT_TIMER", "soon");
        let config = AppConfig::from_env();
        assert_eq!(config.default_timer_seconds, DEFAULT_PRESET_SECONDS);
        clear_env();
    }
}
