use anyhow::{bail, Context};
use std::path::PathBuf;
use std::time::Duration;

use crate::session::DEFAULT_RECOMMENDED_KCAL;

pub const DEFAULT_API_BASE: &str = "http://localhost:8000/api";
pub const DEFAULT_SESSION_FILE: &str = ".meal_tracker_session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_base: String,
    pub session_file: PathBuf,
    pub http_timeout: Option<Duration>,
    pub default_kcal: f64,
    pub log_format: LogFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            session_file: PathBuf::from(DEFAULT_SESSION_FILE),
            http_timeout: None,
            default_kcal: DEFAULT_RECOMMENDED_KCAL,
            log_format: LogFormat::Pretty,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset or blank keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let http_timeout = match get("FOOD_HTTP_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().with_context(|| {
                    format!("FOOD_HTTP_TIMEOUT_SECS must be whole seconds, got '{}'", raw)
                })?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        let default_kcal = match get("FOOD_DEFAULT_KCAL") {
            Some(raw) => {
                let kcal: f64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("FOOD_DEFAULT_KCAL must be a number, got '{}'", raw))?;
                if !(kcal > 0.0) {
                    bail!("FOOD_DEFAULT_KCAL must be positive, got {}", kcal);
                }
                kcal
            }
            None => defaults.default_kcal,
        };

        let log_format = match get("LOG_FORMAT").map(|f| f.trim().to_ascii_lowercase()) {
            Some(format) if format == "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            api_base: get("FOOD_API_BASE").unwrap_or(defaults.api_base),
            session_file: get("FOOD_SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_file),
            http_timeout,
            default_kcal,
            log_format,
        })
    }
}
