//! Google OAuth and Sheets/Drive access.
//!
//! Provider clients never hold a credential: every call takes the access
//! token it should use, so one client instance serves all tenants without
//! state bleeding between them.

#[cfg(any(test, feature = "test-support"))]
pub mod fake;
pub mod oauth;
pub mod sheets;

use crate::models::OAuthCredential;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;

pub use oauth::GoogleOAuthClient;
pub use sheets::GoogleSheetsClient;

pub const OAUTH_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive.file",
];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("credential rejected by provider: {0}")]
    Unauthorized(String),
    #[error("provider returned {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("provider request failed: {0}")]
    Transport(String),
}

/// Token endpoint response, before it is bound to a stored credential.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenGrant {
    /// Binds the grant to a credential, keeping `previous_refresh` when the
    /// provider did not rotate the refresh token.
    pub fn into_credential(self, previous_refresh: Option<&str>, issued_at: DateTime<Utc>) -> Option<OAuthCredential> {
        let refresh_token = self
            .refresh_token
            .filter(|value| !value.is_empty())
            .or_else(|| previous_refresh.map(ToString::to_string))?;
        Some(OAuthCredential {
            access_token: self.access_token,
            refresh_token,
            expires_at: self.expires_in.map(|secs| issued_at + Duration::seconds(secs)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSpreadsheet {
    pub title: String,
    pub tab_title: String,
    pub locale: String,
    pub time_zone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSpreadsheet {
    pub spreadsheet_id: String,
    pub spreadsheet_url: String,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn authorization_url(&self, state: &str) -> crate::errors::AppResult<String>;
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError>;
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError>;
}

#[async_trait]
pub trait SheetsApi: Send + Sync {
    async fn create_spreadsheet(
        &self,
        access_token: &str,
        new_sheet: &NewSpreadsheet,
    ) -> Result<CreatedSpreadsheet, ProviderError>;

    async fn batch_update(
        &self,
        access_token: &str,
        spreadsheet_id: &str,
        requests: &[serde_json::Value],
    ) -> Result<(), ProviderError>;

    async fn update_values(
        &self,
        access_token: &str,
        spreadsheet_id: &str,
        range: &str,
        rows: &[Vec<String>],
    ) -> Result<(), ProviderError>;

    async fn clear_values(&self, access_token: &str, spreadsheet_id: &str, range: &str) -> Result<(), ProviderError>;

    async fn share_with_writer(&self, access_token: &str, file_id: &str, email: &str) -> Result<(), ProviderError>;
}
