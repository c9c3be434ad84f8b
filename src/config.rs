use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::error::{AppError, AppResult};

#[derive(Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub settlement_url: String,
    pub custody_secret: String,
    pub sweep_interval_secs: u64,
    pub per_plan_timers: bool,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Self::load().map_err(|e| AppError::Config(e.to_string()))
    }

    fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("database_url", "postgresql://localhost/autosave")?
            .set_default("database_max_connections", 10)?
            .set_default("settlement_url", "http://localhost:8545")?
            .set_default("sweep_interval_secs", 3600)?
            .set_default("per_plan_timers", true)?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

// Keeps credentials out of startup logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &redact_url(&self.database_url))
            .field("database_max_connections", &self.database_max_connections)
            .field("settlement_url", &self.settlement_url)
            .field("custody_secret", &"<redacted>")
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("per_plan_timers", &self.per_plan_timers)
            .finish()
    }
}

fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}<redacted>{}", &url[..scheme_end + 3], &url[at..])
        }
        _ => url.to_string(),
    }
}
