// src/config.rs

//! Host configuration, read from the environment after `.env` is loaded.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

pub const DEFAULT_SERVER_ADDRESS: &str = "ws://127.0.0.1:12345";
pub const DEFAULT_CLIENT_NAME: &str = "{AppName} - {GameName} ({BuildConfiguration})";
pub const APP_NAME: &str = "Buttplug Session";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub server_address: String,
    /// Client name template, see [`format_client_name`].
    pub client_name: String,
    pub game_name: String,
    pub bind_address: String,
    pub tick_interval: Duration,
    pub scan_duration: Duration,
    /// `None` disables reconnecting.
    pub reconnect_delay: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_SERVER_ADDRESS.to_string(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            game_name: env!("CARGO_PKG_NAME").to_string(),
            bind_address: "127.0.0.1:5441".to_string(),
            tick_interval: Duration::from_millis(100),
            scan_duration: Duration::from_secs(3),
            reconnect_delay: Some(Duration::from_secs(5)),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup. Missing or invalid values keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str, default: String| {
            lookup(key).filter(|value| !value.trim().is_empty()).unwrap_or(default)
        };

        let tick_ms = parse_or(&lookup, "TICK_INTERVAL_MS", 100u64);
        let scan_secs = parse_or(&lookup, "SCAN_DURATION_SECS", 3u64);
        let reconnect_secs = parse_or(&lookup, "RECONNECT_DELAY_SECS", 5u64);

        Self {
            server_address: text("BUTTPLUG_SERVER_ADDRESS", defaults.server_address),
            client_name: text("BUTTPLUG_CLIENT_NAME", defaults.client_name),
            game_name: text("BUTTPLUG_GAME_NAME", defaults.game_name),
            bind_address: text("BIND_ADDRESS", defaults.bind_address),
            tick_interval: Duration::from_millis(tick_ms.max(1)),
            scan_duration: Duration::from_secs(scan_secs),
            reconnect_delay: (reconnect_secs > 0).then(|| Duration::from_secs(reconnect_secs)),
        }
    }

    pub fn resolved_client_name(&self) -> String {
        format_client_name(&self.client_name, APP_NAME, &self.game_name)
    }
}

fn parse_or<T: FromStr + Copy>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        None => default,
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}", key, value);
            default
        }),
    }
}

/// Substitutes `{AppName}`, `{GameName}` and `{BuildConfiguration}` in a
/// client name template.
pub fn format_client_name(template: &str, app_name: &str, game_name: &str) -> String {
    let template = if template.trim().is_empty() {
        warn!("Empty client name, using {:?}", DEFAULT_CLIENT_NAME);
        DEFAULT_CLIENT_NAME
    } else {
        template
    };
    let build = if cfg!(debug_assertions) { "Debug" } else { "Release" };
    template
        .replace("{AppName}", app_name)
        .replace("{GameName}", game_name)
        .replace("{BuildConfiguration}", build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(Config::from_lookup(lookup(&[])), Config::default());
    }

    #[test]
    fn values_are_read_from_the_environment() {
        let config = Config::from_lookup(lookup(&[
            ("BUTTPLUG_SERVER_ADDRESS", "ws://10.0.0.2:12345"),
            ("TICK_INTERVAL_MS", "16"),
            ("RECONNECT_DELAY_SECS", "0"),
        ]));
        assert_eq!(config.server_address, "ws://10.0.0.2:12345");
        assert_eq!(config.tick_interval, Duration::from_millis(16));
        assert_eq!(config.reconnect_delay, None);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = Config::from_lookup(lookup(&[("SCAN_DURATION_SECS", "soon")]));
        assert_eq!(config.scan_duration, Duration::from_secs(3));
    }

    #[test]
    fn client_name_tokens_are_substituted() {
        let build = if cfg!(debug_assertions) { "Debug" } else { "Release" };
        assert_eq!(
            format_client_name(DEFAULT_CLIENT_NAME, "App", "Game"),
            format!("App - Game ({})", build)
        );
        assert_eq!(format_client_name("Fixed", "App", "Game"), "Fixed");
        assert_eq!(
            format_client_name("  ", "App", "Game"),
            format!("App - Game ({})", build)
        );
    }
}
