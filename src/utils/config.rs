use crate::error::{ConfigError, Result};
use std::env;

const DEFAULT_ATTRIBUTION_API_URL: &str = "https://api.arkm.com";
const DEFAULT_DB_PATH: &str = "chain_sentry.db";
const DEFAULT_BLOCK_CHECK_INTERVAL_SECS: u64 = 12;
const DEFAULT_SCAN_BATCH_SIZE: u64 = 10;

/// Runtime configuration resolved once at startup. Everything here is
/// env-driven; a missing credential is a fatal startup error, not a
/// mid-run surprise.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub attribution_api_url: String,
    pub attribution_api_key: String,
    pub db_path: String,
    pub block_check_interval_secs: u64,
    pub scan_batch_size: u64,
    pub confirmation_depth: u64,
}

fn validate_http_url(name: &str, raw: &str) -> Result<()> {
    let parsed = raw.parse::<reqwest::Url>().map_err(|e| {
        ConfigError::Invalid(format!("{name} must be a valid URL, got `{raw}`: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid(format!(
            "{name} must use http(s) scheme, got `{other}`"
        ))
        .into()),
    }
}

fn load_api_key_from_file() -> Option<String> {
    let path = env::var("SENTRY_API_KEY_FILE").unwrap_or_else(|_| "API-Key".to_string());
    std::fs::read_to_string(path)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

pub fn load_block_check_interval_secs() -> u64 {
    env::var("BLOCK_CHECK_INTERVAL_SECS")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|v| (1..=3_600).contains(v))
        .unwrap_or(DEFAULT_BLOCK_CHECK_INTERVAL_SECS)
}

pub fn load_scan_batch_size() -> u64 {
    env::var("SCAN_BATCH_SIZE")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|v| (1..=1_000).contains(v))
        .unwrap_or(DEFAULT_SCAN_BATCH_SIZE)
}

pub fn load_confirmation_depth() -> u64 {
    env::var("SCAN_CONFIRMATION_DEPTH")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|v| *v <= 64)
        .unwrap_or(0)
}

impl MonitorConfig {
    pub fn load() -> Result<Self> {
        let attribution_api_key = env::var("SENTRY_API_KEY")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .or_else(load_api_key_from_file)
            .ok_or_else(|| {
                ConfigError::Missing(
                    "SENTRY_API_KEY must be set (env or API-Key file)".to_string(),
                )
            })?;

        let attribution_api_url = env::var("SENTRY_API_URL")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .unwrap_or_else(|| DEFAULT_ATTRIBUTION_API_URL.to_string());
        validate_http_url("SENTRY_API_URL", &attribution_api_url)?;

        let db_path = env::var("SENTRY_DB_PATH")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        Ok(Self {
            attribution_api_url,
            attribution_api_key,
            db_path,
            block_check_interval_secs: load_block_check_interval_secs(),
            scan_batch_size: load_scan_batch_size(),
            confirmation_depth: load_confirmation_depth(),
        })
    }
}
