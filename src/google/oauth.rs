use super::{OAuthProvider, ProviderError, TokenGrant, OAUTH_SCOPES};
use crate::config::ServiceConfig;
use crate::errors::{AppError, AppResult};
use crate::redaction::Redactor;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

pub struct GoogleOAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    auth_url: String,
    token_url: String,
    redactor: Redactor,
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

impl GoogleOAuthClient {
    pub fn new(config: &ServiceConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|error| AppError::Internal(format!("failed to build OAuth HTTP client: {error}")))?;
        Ok(Self {
            http,
            client_id: config.google_client_id.clone(),
            client_secret: config.google_client_secret.clone(),
            redirect_uri: config.google_redirect_uri.clone(),
            auth_url: config.google_auth_url.clone(),
            token_url: config.google_token_url.clone(),
            redactor: Redactor::new(true),
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant, ProviderError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|error| ProviderError::Transport(self.redactor.scrub(&error.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<TokenErrorBody>(&body) {
                Ok(TokenErrorBody {
                    error: Some(error),
                    error_description,
                }) => match error_description {
                    Some(description) => format!("{error}: {description}"),
                    None => error,
                },
                _ => self.redactor.scrub(&body),
            };
            return Err(match status {
                StatusCode::UNAUTHORIZED => ProviderError::Unauthorized(message),
                _ => ProviderError::Rejected {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|error| ProviderError::Transport(format!("invalid token response: {error}")))
    }
}

#[async_trait]
impl OAuthProvider for GoogleOAuthClient {
    fn authorization_url(&self, state: &str) -> AppResult<String> {
        let scope = OAUTH_SCOPES.join(" ");
        let url = reqwest::Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("include_granted_scopes", "true"),
                ("state", state),
            ],
        )
        .map_err(|error| AppError::Internal(format!("invalid OAuth authorization URL: {error}")))?;
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("redirect_uri", &self.redirect_uri),
        ])
        .await
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ])
        .await
    }
}
