//! Runtime configuration read from the environment.

use std::env;
use std::time::Duration;

use thiserror::Error;
use tictactoe_core::RatingDeltas;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid value `{value}` for {var}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

/// Per-match parameters, copied into a coordinator when the match is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchConfig {
    /// How long a disconnected player is held before forfeiting.
    pub grace_period: Duration,
    /// Per-move allowance in timed mode.
    pub move_budget: Duration,
    /// How long a finished match accepts rematch votes before it is dropped.
    pub rematch_window: Duration,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(300),
            move_budget: Duration::from_millis(30_000),
            rematch_window: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub matches: MatchConfig,
    pub rating: RatingDeltas,
    pub max_connections: u32,
    /// Inbound messages allowed per connection per second.
    pub rate_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: "sqlite:tictactoe.db?mode=rwc".to_string(),
            matches: MatchConfig::default(),
            rating: RatingDeltas::default(),
            max_connections: 100,
            rate_limit: 20,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup; unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(host) = lookup("TTT_HOST") {
            cfg.host = host;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            cfg.database_url = url;
        }
        cfg.port = parse_or(&lookup, "PORT", cfg.port)?;

        let grace = parse_or(&lookup, "TTT_GRACE_SECS", cfg.matches.grace_period.as_secs())?;
        cfg.matches.grace_period = Duration::from_secs(grace);
        let budget = parse_or(
            &lookup,
            "TTT_MOVE_BUDGET_MS",
            cfg.matches.move_budget.as_millis() as u64,
        )?;
        cfg.matches.move_budget = Duration::from_millis(budget);
        let window = parse_or(
            &lookup,
            "TTT_REMATCH_WINDOW_SECS",
            cfg.matches.rematch_window.as_secs(),
        )?;
        cfg.matches.rematch_window = Duration::from_secs(window);

        cfg.rating.win = parse_or(&lookup, "TTT_WIN_DELTA", cfg.rating.win)?;
        cfg.rating.loss = parse_or(&lookup, "TTT_LOSS_DELTA", cfg.rating.loss)?;
        cfg.rating.draw = parse_or(&lookup, "TTT_DRAW_DELTA", cfg.rating.draw)?;
        cfg.max_connections = parse_or(&lookup, "TTT_MAX_CONNECTIONS", cfg.max_connections)?;
        cfg.rate_limit = parse_or(&lookup, "TTT_RATE_LIMIT", cfg.rate_limit)?;

        info!(
            host = %cfg.host,
            port = cfg.port,
            grace_secs = cfg.matches.grace_period.as_secs(),
            move_budget_ms = cfg.matches.move_budget.as_millis() as u64,
            "loaded server configuration"
        );
        Ok(cfg)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError { var, value: raw }),
    }
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
    fn defaults_when_nothing_set() {
        let cfg = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, ServerConfig::default());
        assert_eq!(cfg.matches.grace_period, Duration::from_secs(300));
        assert_eq!(cfg.matches.move_budget, Duration::from_millis(30_000));
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = ServerConfig::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("TTT_GRACE_SECS", "5"),
            ("TTT_WIN_DELTA", "20"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.matches.grace_period, Duration::from_secs(5));
        assert_eq!(cfg.rating.win, 20);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn bad_value_names_the_variable() {
        let err = ServerConfig::from_lookup(lookup(&[("TTT_MOVE_BUDGET_MS", "soon")])).unwrap_err();
        assert_eq!(err.var, "TTT_MOVE_BUDGET_MS");
        assert_eq!(err.to_string(), "invalid value `soon` for TTT_MOVE_BUDGET_MS");
    }
}
