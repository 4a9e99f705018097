use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("AUTH_EXCHANGE_FAILED: {0}")]
    AuthExchange(String),
    #[error("NOT_AUTHENTICATED: {0}")]
    NotAuthenticated(String),
    #[error("REFRESH_FAILED: {0}")]
    Refresh(String),
    /// Google could not be reached or answered with a 5xx; the stored
    /// credential is still good and a later attempt may succeed.
    #[error("PROVIDER_UNAVAILABLE: {0}")]
    Unavailable(String),
    #[error("NOT_PROVISIONED: {0}")]
    NotProvisioned(String),
    #[error("PROVISION_FAILED: {0}")]
    Provision(String),
    #[error("SYNC_WRITE_FAILED: {0}")]
    SyncWrite(String),
    #[error("INVALID_REQUEST: {0}")]
    Invalid(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable error kind reported to API callers and batch summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthExchange(_) => "AuthExchangeError",
            Self::NotAuthenticated(_) => "NotAuthenticatedError",
            Self::Refresh(_) => "RefreshError",
            Self::Unavailable(_) => "ProviderUnavailableError",
            Self::NotProvisioned(_) => "NotProvisionedError",
            Self::Provision(_) => "ProvisionError",
            Self::SyncWrite(_) => "SyncWriteError",
            Self::Invalid(_) => "InvalidRequestError",
            Self::NotFound(_) => "NotFoundError",
            Self::Io(_) => "IoError",
            Self::Internal(_) => "InternalError",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::AuthExchange(message)
            | Self::NotAuthenticated(message)
            | Self::Refresh(message)
            | Self::Unavailable(message)
            | Self::NotProvisioned(message)
            | Self::Provision(message)
            | Self::SyncWrite(message)
            | Self::Invalid(message)
            | Self::NotFound(message)
            | Self::Io(message)
            | Self::Internal(message) => message,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        Self::Io(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
