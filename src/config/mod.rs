//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The database URL is wrapped in secrecy::SecretString to keep
//! credentials out of logs. Engine tuning lives in a TOML policy file
//! (see [`EnginePolicy`]); AC ranking in a JSON priority map.

pub mod policy;
pub mod priority;

pub use policy::EnginePolicy;
pub use priority::PriorityMap;

use std::path::PathBuf;

use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub policy_path: Option<PathBuf>,
    pub ac_priority_path: Option<PathBuf>,
    pub recording_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            policy_path: std::env::var("SURVEYQ_POLICY").ok().map(PathBuf::from),
            ac_priority_path: std::env::var("SURVEYQ_AC_PRIORITY").ok().map(PathBuf::from),
            recording_dir: std::env::var("SURVEYQ_RECORDING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("recordings")),
        })
    }

    /// Engine policy from `SURVEYQ_POLICY`, or defaults when unset.
    pub fn load_policy(&self) -> Result<EnginePolicy> {
        match &self.policy_path {
            Some(path) => EnginePolicy::load(path),
            None => Ok(EnginePolicy::default()),
        }
    }

    /// AC priority map from `SURVEYQ_AC_PRIORITY`, or empty when unset.
    pub fn load_priorities(&self) -> Result<PriorityMap> {
        match &self.ac_priority_path {
            Some(path) => PriorityMap::load(path),
            None => Ok(PriorityMap::default()),
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
