use crate::error::{Error, Result};
use chrono::FixedOffset;
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub public_base_url: String,
    pub public_rps: u32,
    pub integration_rps: u32,
    pub org_offset: FixedOffset,
    pub booking_token_ttl_hours: i64,
    pub token_cleanup_cron: String,
    pub sync: SyncConfig,
    pub mirror_api_url: Option<String>,
    pub mirror_api_token: Option<String>,
    pub calendar_api_url: Option<String>,
    pub calendar_api_token: Option<String>,
    pub notification_webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub openai_api_key: Option<String>,
    pub collaboration_webhook_url: Option<String>,
}

/// Knobs for the external mirror sync worker.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub debounce: Duration,
    pub inter_task_delay: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub max_queue_len: usize,
    pub document_id: String,
    pub key_column: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(2000),
            inter_task_delay: Duration::from_millis(1000),
            max_retries: 3,
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(60_000),
            max_queue_len: 10_000,
            document_id: "candidate-pipeline".to_string(),
            key_column: "Key".to_string(),
        }
    }
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let offset_minutes: i32 = get_env_parse_or("ORG_UTC_OFFSET_MINUTES", 540)?;
        let org_offset = FixedOffset::east_opt(offset_minutes * 60).ok_or_else(|| {
            Error::Config(format!(
                "Invalid value for ORG_UTC_OFFSET_MINUTES: {}",
                offset_minutes
            ))
        })?;

        let defaults = SyncConfig::default();
        let sync = SyncConfig {
            debounce: Duration::from_millis(get_env_parse_or("SYNC_DEBOUNCE_MS", 2000)?),
            inter_task_delay: Duration::from_millis(get_env_parse_or(
                "SYNC_INTER_TASK_DELAY_MS",
                1000,
            )?),
            max_retries: get_env_parse_or("SYNC_MAX_RETRIES", defaults.max_retries)?,
            backoff_base: Duration::from_millis(get_env_parse_or("SYNC_BACKOFF_BASE_MS", 1000)?),
            backoff_cap: Duration::from_millis(get_env_parse_or("SYNC_BACKOFF_CAP_MS", 60_000)?),
            max_queue_len: get_env_parse_or("SYNC_MAX_QUEUE", defaults.max_queue_len)?,
            document_id: get_env_opt("MIRROR_DOCUMENT_ID").unwrap_or(defaults.document_id),
            key_column: get_env_opt("MIRROR_KEY_COLUMN").unwrap_or(defaults.key_column),
        };

        let public_base_url = get_env_opt("PUBLIC_BASE_URL")
            .unwrap_or_else(|| "http://localhost:3000".to_string());
        url::Url::parse(&public_base_url)
            .map_err(|e| Error::Config(format!("Invalid value for PUBLIC_BASE_URL: {}", e)))?;

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            database_max_connections: get_env_parse_or("DATABASE_MAX_CONNECTIONS", 20)?,
            public_base_url,
            public_rps: get_env_parse_or("PUBLIC_RPS", 20)?,
            integration_rps: get_env_parse_or("INTEGRATION_RPS", 100)?,
            org_offset,
            booking_token_ttl_hours: get_env_parse_or("BOOKING_TOKEN_TTL_HOURS", 24)?,
            token_cleanup_cron: get_env_opt("TOKEN_CLEANUP_CRON")
                .unwrap_or_else(|| "0 0 * * * *".to_string()),
            sync,
            mirror_api_url: get_env_opt("MIRROR_API_URL"),
            mirror_api_token: get_env_opt("MIRROR_API_TOKEN"),
            calendar_api_url: get_env_opt("CALENDAR_API_URL"),
            calendar_api_token: get_env_opt("CALENDAR_API_TOKEN"),
            notification_webhook_url: get_env_opt("NOTIFICATION_WEBHOOK_URL"),
            webhook_secret: get_env_opt("WEBHOOK_SECRET"),
            openai_api_key: get_env_opt("OPENAI_API_KEY"),
            collaboration_webhook_url: get_env_opt("COLLABORATION_WEBHOOK_URL"),
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

/// Unset and blank variables are both treated as absent.
fn get_env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get_env_opt(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        None => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_or_falls_back_when_unset() {
        let value: u32 = get_env_parse_or("INTERVIEW_PIPELINE_SURELY_UNSET", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn parse_or_reports_the_variable_name() {
        env::set_var("INTERVIEW_PIPELINE_BAD_NUMBER", "seven");
        let err = get_env_parse_or::<u32>("INTERVIEW_PIPELINE_BAD_NUMBER", 7).unwrap_err();
        assert!(err.to_string().contains("INTERVIEW_PIPELINE_BAD_NUMBER"));
    }
}
