use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cosmos::host::Personality;
use crate::cosmos::images::{DEFAULT_BASE_URL, DEFAULT_IMAGE_MODEL};
use crate::cosmos::preloader::{PreloadPolicy, UnknownPolicy};
use crate::cosmos::{LevelConfig, LevelConfigError, FACTS_PER_LEVEL, QUIZ_INTERVAL};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{key} must be a number, got {value:?}")]
    NotANumber { key: &'static str, value: String },
    #[error("{key} must be true or false, got {value:?}")]
    NotAFlag { key: &'static str, value: String },
    #[error("unknown host {0:?}; expected doctor or commander")]
    UnknownHost(String),
    #[error(transparent)]
    Policy(#[from] UnknownPolicy),
    #[error(transparent)]
    Level(#[from] LevelConfigError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub image_model: String,
    pub images: bool,
    pub host: Personality,
    pub preload: PreloadPolicy,
    pub level: LevelConfig,
    /// Pause between "End Session" and the difficulty menu.
    pub reset_delay: Duration,
    pub timeout: Duration,
    /// SQLite file for dialogues; in-memory when unset.
    pub storage: Option<PathBuf>,
}

impl Config {
    /// Loads `.env` if there is one, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if dotenv::dotenv().is_err() {
            log::debug!("No .env file, using the process environment");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_key = get("CHATGPT_API_KEY").ok_or(ConfigError::Missing("CHATGPT_API_KEY"))?;

        let host = match get("COSMOQUEST_HOST") {
            Some(name) => Personality::from_name(&name).ok_or(ConfigError::UnknownHost(name))?,
            None => Personality::DrSagan,
        };

        let preload = match get("COSMOQUEST_PRELOAD") {
            Some(policy) => PreloadPolicy::from_str(&policy)?,
            None => PreloadPolicy::Lookahead,
        };

        let level = LevelConfig::new(
            number(&get, "COSMOQUEST_FACTS_PER_LEVEL", FACTS_PER_LEVEL as u64)? as usize,
            number(&get, "COSMOQUEST_QUIZ_INTERVAL", QUIZ_INTERVAL as u64)? as usize,
        )?;

        let images = match get("COSMOQUEST_IMAGES") {
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::NotAFlag {
                        key: "COSMOQUEST_IMAGES",
                        value,
                    })
                }
            },
            None => true,
        };

        Ok(Self {
            api_key,
            base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            image_model: get("COSMOQUEST_IMAGE_MODEL")
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            images,
            host,
            preload,
            level,
            reset_delay: Duration::from_secs(number(&get, "COSMOQUEST_RESET_DELAY_SECS", 5)?),
            timeout: Duration::from_secs(number(&get, "COSMOQUEST_TIMEOUT_SECS", 60)?),
            storage: get("COSMOQUEST_STORAGE").map(PathBuf::from),
        })
    }
}

fn number(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match get(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::NotANumber { key, value }),
        None => Ok(default),
    }
}
