//! Per-client OAuth credential lifecycle.

use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::google::{OAuthProvider, ProviderError, TokenGrant};
use crate::locks::KeyedLocks;
use crate::models::OAuthCredential;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;

#[derive(Clone)]
pub struct CredentialStore {
    db: Arc<Database>,
    oauth: Arc<dyn OAuthProvider>,
    refresh_locks: KeyedLocks,
}

impl CredentialStore {
    pub fn new(db: Arc<Database>, oauth: Arc<dyn OAuthProvider>) -> Self {
        Self {
            db,
            oauth,
            refresh_locks: KeyedLocks::new(),
        }
    }

    /// Consent URL for `client_id`; the id travels back as OAuth `state`.
    pub fn authorization_url(&self, client_id: &str) -> AppResult<String> {
        if client_id.trim().is_empty() {
            return Err(AppError::Invalid("clientId is required".to_string()));
        }
        self.oauth.authorization_url(client_id)
    }

    pub async fn exchange_code(&self, code: &str) -> AppResult<OAuthCredential> {
        self.exchange(code)
            .await?
            .into_credential(None, Utc::now())
            .ok_or_else(|| AppError::AuthExchange("provider did not return a refresh token".to_string()))
    }

    /// Exchanges `code` and stores the resulting tokens on the client. A grant
    /// without a refresh token keeps the one already stored, if any.
    pub async fn complete_authorization(&self, client_id: &str, code: &str) -> AppResult<()> {
        if code.trim().is_empty() {
            return Err(AppError::Invalid("authorization code is required".to_string()));
        }
        self.db.require_client(client_id)?;

        let grant = self.exchange(code).await?;

        let _guard = self.refresh_locks.acquire(client_id).await;
        let previous = self.db.require_client(client_id)?.refresh_token;
        let credential = grant
            .into_credential(previous.as_deref(), Utc::now())
            .ok_or_else(|| AppError::AuthExchange("provider did not return a refresh token".to_string()))?;
        self.db.store_credential(client_id, &credential)?;
        tracing::info!(client_id = %client_id, "stored delegated Google credential");
        Ok(())
    }

    /// True iff both tokens are stored. Expiry is irrelevant: an expired
    /// access token is refreshable.
    pub fn is_authenticated(&self, client_id: &str) -> AppResult<bool> {
        Ok(self
            .db
            .get_client(client_id)?
            .map(|client| client.has_tokens())
            .unwrap_or(false))
    }

    /// Returns a credential whose access token is not expired, refreshing
    /// and persisting it first when needed.
    pub async fn live_credential(&self, client_id: &str) -> AppResult<OAuthCredential> {
        let credential = self.stored_credential(client_id)?;
        if !credential.is_expired(Utc::now()) {
            return Ok(credential);
        }
        self.refresh(client_id, None).await
    }

    /// Runs `call` with a live access token. A provider 401 triggers one
    /// forced refresh and a single retry; any other failure goes through
    /// `map_err` unchanged.
    pub async fn authorized<T, F, Fut, E>(&self, client_id: &str, mut call: F, map_err: E) -> AppResult<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
        E: Fn(ProviderError) -> AppError,
    {
        let credential = self.live_credential(client_id).await?;
        let rejected_token = credential.access_token.clone();
        match call(credential.access_token).await {
            Ok(value) => Ok(value),
            Err(ProviderError::Unauthorized(reason)) => {
                tracing::info!(client_id = %client_id, reason = %reason, "access token rejected; refreshing once");
                let refreshed = self.refresh(client_id, Some(&rejected_token)).await?;
                call(refreshed.access_token).await.map_err(map_err)
            }
            Err(error) => Err(map_err(error)),
        }
    }

    async fn exchange(&self, code: &str) -> AppResult<TokenGrant> {
        self.oauth.exchange_code(code).await.map_err(|error| {
            tracing::warn!(error = %error, "authorization code exchange rejected");
            AppError::AuthExchange(error.to_string())
        })
    }

    fn stored_credential(&self, client_id: &str) -> AppResult<OAuthCredential> {
        self.db.require_client(client_id)?.credential().ok_or_else(|| {
            AppError::NotAuthenticated(format!("client {client_id} has not authorized Google access"))
        })
    }

    /// Refresh under the client's lock. The stored credential is re-read
    /// after the lock is taken so a caller that waited reuses the token the
    /// previous holder obtained instead of refreshing again.
    async fn refresh(&self, client_id: &str, rejected_token: Option<&str>) -> AppResult<OAuthCredential> {
        let _guard = self.refresh_locks.acquire(client_id).await;

        let current = self.stored_credential(client_id)?;
        let now = Utc::now();
        let still_usable = match rejected_token {
            Some(rejected) => current.access_token != rejected && !current.is_expired(now),
            None => !current.is_expired(now),
        };
        if still_usable {
            return Ok(current);
        }

        let grant = self
            .oauth
            .refresh_access_token(&current.refresh_token)
            .await
            .map_err(|error| refresh_error(client_id, error))?;
        let refreshed = grant
            .into_credential(Some(&current.refresh_token), now)
            .ok_or_else(|| AppError::Refresh("refresh response carried no usable token".to_string()))?;
        self.db.store_credential(client_id, &refreshed)?;
        tracing::debug!(client_id = %client_id, "refreshed access token");
        Ok(refreshed)
    }
}

/// Only a definitive answer from Google ends the grant. Timeouts and 5xx
/// leave the stored tokens usable for the next attempt.
fn refresh_error(client_id: &str, error: ProviderError) -> AppError {
    match error {
        ProviderError::Transport(_) | ProviderError::Rejected { status: 500..=599, .. } => {
            tracing::warn!(client_id = %client_id, error = %error, "token refresh did not complete");
            AppError::Unavailable(error.to_string())
        }
        ProviderError::Unauthorized(_) | ProviderError::Rejected { .. } => {
            tracing::warn!(client_id = %client_id, error = %error, "token refresh rejected");
            AppError::Refresh(format!("{error}; client must re-authorize"))
        }
    }
}
