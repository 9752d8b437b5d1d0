/*
[INPUT]:  YAML configuration file and TICKER_FEED_* environment variables
[OUTPUT]: Parsed ticker feed configuration
[POS]:    Configuration layer - connection and simulation setup
[UPDATE]: When adding new configuration options
*/

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use ticker_feed_adapter::{Endpoint, FeedEnvironment, FeedError};

pub const ENV_ENVIRONMENT: &str = "TICKER_FEED_ENV";
pub const ENV_TOKEN: &str = "TICKER_FEED_TOKEN";
pub const ENV_SIMULATE: &str = "TICKER_FEED_SIMULATE";

/// Configuration for the ticker feed manager
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FeedConfig {
    /// Which endpoint to connect to
    #[serde(default)]
    pub environment: FeedEnvironment,
    #[serde(default = "default_development_url")]
    pub development_url: String,
    #[serde(default = "default_production_url")]
    pub production_url: String,
    /// Token used outside production when no auth token is set
    #[serde(default = "default_development_token")]
    pub development_token: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Generate synthetic ticks locally instead of connecting
    #[serde(default)]
    pub simulate: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_simulation_interval_ms")]
    pub simulation_interval_ms: u64,
    /// Largest random-walk step per synthetic tick, in basis points
    #[serde(default = "default_simulation_max_step_bps")]
    pub simulation_max_step_bps: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            environment: FeedEnvironment::default(),
            development_url: default_development_url(),
            production_url: default_production_url(),
            development_token: default_development_token(),
            auth_token: None,
            simulate: false,
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            simulation_interval_ms: default_simulation_interval_ms(),
            simulation_max_step_bps: default_simulation_max_step_bps(),
        }
    }
}

fn default_development_url() -> String {
    "ws://127.0.0.1:8765/ws/ticker".to_string()
}

fn default_production_url() -> String {
    "wss://ticker.invest.example.com/ws/ticker".to_string()
}

fn default_development_token() -> Option<String> {
    Some("dev-token".to_string())
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_simulation_interval_ms() -> u64 {
    2_000
}

fn default_simulation_max_step_bps() -> u32 {
    50
}

impl FeedConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("parse config yaml")?;
        Ok(config)
    }

    /// Apply `TICKER_FEED_*` overrides from the process environment.
    pub fn apply_env(self) -> anyhow::Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        if let Some(environment) = lookup(ENV_ENVIRONMENT) {
            self.environment = environment
                .parse::<FeedEnvironment>()
                .with_context(|| format!("invalid {ENV_ENVIRONMENT}"))?;
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|token| !token.is_empty()) {
            self.auth_token = Some(token);
        }
        if let Some(simulate) = lookup(ENV_SIMULATE) {
            self.simulate = parse_flag(&simulate)
                .with_context(|| format!("invalid {ENV_SIMULATE}: {simulate}"))?;
        }
        Ok(self)
    }

    /// Check URLs and timings before the manager starts.
    pub fn validate(&self) -> Result<(), FeedError> {
        self.endpoint()?;
        let timings = [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("reconnect_delay_ms", self.reconnect_delay_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("simulation_interval_ms", self.simulation_interval_ms),
        ];
        for (name, value) in timings {
            if value == 0 {
                return Err(FeedError::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Result<Endpoint, FeedError> {
        Ok(
            Endpoint::new(self.environment, &self.development_url, &self.production_url)?
                .with_development_token(self.development_token.clone()),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn simulation_interval(&self) -> Duration {
        Duration::from_millis(self.simulation_interval_ms)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
