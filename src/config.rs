//! Service configuration.
//!
//! Every field has a default so tests and local runs work with an empty
//! environment; `ServiceConfig::from_env` overlays whatever is set.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const DEFAULT_GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
pub const DEFAULT_DRIVE_API_BASE: &str = "https://www.googleapis.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub google_client_id: String,
    #[serde(skip_serializing)]
    pub google_client_secret: String,
    pub google_redirect_uri: String,
    pub google_auth_url: String,
    pub google_token_url: String,
    pub sheets_api_base: String,
    pub drive_api_base: String,
    #[serde(skip_serializing)]
    pub cron_secret: Option<String>,
    pub app_base_url: String,
    pub bind_addr: String,
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing)]
    pub token_encryption_key: Option<String>,
    pub http_timeout_secs: u64,
    pub sync_concurrency: usize,
    pub sync_window_days: u32,
    pub auto_sync_interval_secs: Option<u64>,
    pub report_by_platform: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            google_client_id: String::new(),
            google_client_secret: String::new(),
            google_redirect_uri: "http://localhost:3000/api/integrations/google/callback".to_string(),
            google_auth_url: DEFAULT_GOOGLE_AUTH_URL.to_string(),
            google_token_url: DEFAULT_GOOGLE_TOKEN_URL.to_string(),
            sheets_api_base: DEFAULT_SHEETS_API_BASE.to_string(),
            drive_api_base: DEFAULT_DRIVE_API_BASE.to_string(),
            cron_secret: None,
            app_base_url: "http://localhost:3000".to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
            data_dir: None,
            token_encryption_key: None,
            http_timeout_secs: 15,
            sync_concurrency: 4,
            sync_window_days: 30,
            auto_sync_interval_secs: None,
            report_by_platform: false,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            google_client_id: env_string("GOOGLE_CLIENT_ID").unwrap_or(defaults.google_client_id),
            google_client_secret: env_string("GOOGLE_CLIENT_SECRET")
                .unwrap_or(defaults.google_client_secret),
            google_redirect_uri: env_string("GOOGLE_REDIRECT_URI")
                .unwrap_or(defaults.google_redirect_uri),
            google_auth_url: env_string("GOOGLE_AUTH_URL").unwrap_or(defaults.google_auth_url),
            google_token_url: env_string("GOOGLE_TOKEN_URL").unwrap_or(defaults.google_token_url),
            sheets_api_base: env_string("GOOGLE_SHEETS_API_BASE").unwrap_or(defaults.sheets_api_base),
            drive_api_base: env_string("GOOGLE_DRIVE_API_BASE").unwrap_or(defaults.drive_api_base),
            cron_secret: env_string("CRON_SECRET"),
            app_base_url: env_string("APP_BASE_URL").unwrap_or(defaults.app_base_url),
            bind_addr: env_string("BIND_ADDR").unwrap_or(defaults.bind_addr),
            data_dir: env_string("DATA_DIR").map(PathBuf::from),
            token_encryption_key: env_string("TOKEN_ENCRYPTION_KEY"),
            http_timeout_secs: env_u64("HTTP_TIMEOUT_SECS", defaults.http_timeout_secs).max(1),
            sync_concurrency: env_usize("SYNC_CONCURRENCY", defaults.sync_concurrency).max(1),
            sync_window_days: env_u64("SYNC_WINDOW_DAYS", u64::from(defaults.sync_window_days))
                .clamp(1, 365) as u32,
            auto_sync_interval_secs: env_string("AUTO_SYNC_INTERVAL_SECS")
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|secs| *secs > 0),
            report_by_platform: env_bool("REPORT_BY_PLATFORM", defaults.report_by_platform),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn database_path(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.join("pnl-sync.sqlite"),
            None => PathBuf::from("pnl-sync.sqlite"),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}
