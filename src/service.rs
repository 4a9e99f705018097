//! Wires the store, Google clients and sync components into the operations
//! the HTTP layer and the auto-sync loop call.

use crate::batch::BatchRunner;
use crate::config::ServiceConfig;
use crate::credentials::CredentialStore;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::google::{GoogleOAuthClient, GoogleSheetsClient, OAuthProvider, SheetsApi};
use crate::metrics::MetricsAggregator;
use crate::models::{
    BatchSummary, ClientView, CreateSheetPayload, DailyMetric, DailyMetricPayload, DerivedRow, FinancialProfile,
    NewClientPayload, ProvisionedSheet, SyncOutcome, SyncPayload, SyncStatus,
};
use crate::policy::RequestPolicy;
use crate::provisioner::SpreadsheetProvisioner;
use crate::report::ReportLayout;
use crate::secrets::TokenCipher;
use crate::sync::SyncEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct PnlService {
    db: Arc<Database>,
    config: ServiceConfig,
    policy: RequestPolicy,
    layout: ReportLayout,
    credentials: CredentialStore,
    aggregator: MetricsAggregator,
    provisioner: SpreadsheetProvisioner,
    engine: SyncEngine,
    batch: BatchRunner,
}

impl PnlService {
    /// Production wiring: SQLite under the data dir and real Google clients.
    pub fn from_config(config: ServiceConfig) -> AppResult<Arc<Self>> {
        if let Some(dir) = &config.data_dir {
            std::fs::create_dir_all(dir)?;
        }
        let cipher = TokenCipher::load_or_create(config.token_encryption_key.as_deref())?;
        let db = Arc::new(Database::new(&config.database_path(), cipher)?);
        let oauth: Arc<dyn OAuthProvider> = Arc::new(GoogleOAuthClient::new(&config)?);
        let sheets: Arc<dyn SheetsApi> = Arc::new(GoogleSheetsClient::new(&config)?);
        Ok(Self::with_providers(config, db, oauth, sheets))
    }

    pub fn with_providers(
        config: ServiceConfig,
        db: Arc<Database>,
        oauth: Arc<dyn OAuthProvider>,
        sheets: Arc<dyn SheetsApi>,
    ) -> Arc<Self> {
        let layout = ReportLayout::from_flag(config.report_by_platform);
        let policy = RequestPolicy::new(config.sync_window_days);
        let credentials = CredentialStore::new(db.clone(), oauth);
        let aggregator = MetricsAggregator::new(db.clone());
        let provisioner = SpreadsheetProvisioner::new(db.clone(), credentials.clone(), sheets.clone(), layout);
        let engine = SyncEngine::new(db.clone(), credentials.clone(), aggregator.clone(), sheets);
        let batch = BatchRunner::new(
            db.clone(),
            engine.clone(),
            config.sync_concurrency,
            policy.default_window_days(),
        );

        Arc::new(Self {
            db,
            config,
            policy,
            layout,
            credentials,
            aggregator,
            provisioner,
            engine,
            batch,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn authorization_url(&self, client_id: Option<&str>) -> AppResult<String> {
        let client_id = self.policy.client_id(client_id)?;
        self.db.require_client(client_id)?;
        self.credentials.authorization_url(client_id)
    }

    pub async fn complete_authorization(&self, client_id: &str, code: &str) -> AppResult<()> {
        let client_id = self.policy.client_id(Some(client_id))?;
        self.credentials.complete_authorization(client_id, code).await
    }

    pub async fn create_sheet(&self, client_id: &str, payload: CreateSheetPayload) -> AppResult<ProvisionedSheet> {
        let title = self.policy.sheet_title(payload.sheet_title.as_deref())?;
        self.provisioner.create(client_id, title.as_deref()).await
    }

    pub async fn sync_client(&self, client_id: &str, payload: SyncPayload) -> AppResult<SyncOutcome> {
        let days = self.policy.window_days(payload.days)?;
        self.engine.sync(client_id, days).await
    }

    pub async fn run_batch(&self) -> AppResult<BatchSummary> {
        self.batch.run().await
    }

    pub fn sync_status(&self, client_id: &str) -> AppResult<SyncStatus> {
        let client = self.db.require_client(client_id)?;
        Ok(SyncStatus {
            authenticated: client.has_tokens(),
            spreadsheet_id: client.sheet.as_ref().map(|sheet| sheet.sheet_id.clone()),
            spreadsheet_url: client.sheet.as_ref().map(|sheet| sheet.sheet_url.clone()),
            last_synced_at: client.last_synced_at,
            auto_sync_enabled: client.auto_sync_enabled,
            client_id: client.id,
        })
    }

    /// Derived rows for the window without touching the spreadsheet, in the
    /// layout of the client's sheet (or the configured one before provisioning).
    pub fn preview(&self, client_id: &str, days: Option<u32>) -> AppResult<Vec<DerivedRow>> {
        let days = self.policy.window_days(days)?;
        let client = self.db.require_client(client_id)?;
        let layout = client.sheet.map(|sheet| sheet.layout).unwrap_or(self.layout);
        self.aggregator.compute(client_id, days, layout)
    }

    pub fn create_client(&self, payload: NewClientPayload) -> AppResult<ClientView> {
        self.policy.new_client(&payload)?;
        if let Some(id) = payload.id.as_deref() {
            if self.db.get_client(id.trim())?.is_some() {
                return Err(AppError::Invalid(format!("client {} already exists", id.trim())));
            }
        }
        let payload = NewClientPayload {
            id: payload.id.map(|id| id.trim().to_string()),
            email: payload
                .email
                .map(|email| email.trim().to_string())
                .filter(|email| !email.is_empty()),
            ..payload
        };
        let client = self.db.create_client(payload)?;
        tracing::info!(client_id = %client.id, "created client");
        Ok(ClientView::from(&client))
    }

    pub fn list_clients(&self) -> AppResult<Vec<ClientView>> {
        Ok(self.db.list_clients()?.iter().map(ClientView::from).collect())
    }

    pub fn get_client(&self, client_id: &str) -> AppResult<ClientView> {
        Ok(ClientView::from(&self.db.require_client(client_id)?))
    }

    pub fn save_financial_profile(&self, client_id: &str, profile: FinancialProfile) -> AppResult<()> {
        self.policy.financial_profile(&profile)?;
        self.db.require_client(client_id)?;
        self.db.save_financial_profile(client_id, &profile)
    }

    pub fn record_daily_metrics(&self, client_id: &str, metrics: Vec<DailyMetricPayload>) -> AppResult<usize> {
        self.db.require_client(client_id)?;
        let metrics: Vec<DailyMetric> = metrics
            .into_iter()
            .map(|metric| metric.into_metric(client_id))
            .collect();
        for metric in &metrics {
            self.policy.daily_metric(metric)?;
        }
        for metric in &metrics {
            self.db.upsert_daily_metric(metric)?;
        }
        Ok(metrics.len())
    }

    pub fn set_auto_sync(&self, client_id: &str, enabled: bool) -> AppResult<()> {
        self.db.set_auto_sync(client_id, enabled)
    }

    /// Constant-time comparison of an `Authorization` header against
    /// `Bearer <CRON_SECRET>`. Always false when no secret is configured.
    pub fn cron_authorized(&self, authorization: Option<&str>) -> bool {
        let Some(secret) = self.config.cron_secret.as_deref().filter(|secret| !secret.is_empty()) else {
            return false;
        };
        let Some(presented) = authorization else {
            return false;
        };
        let expected = format!("Bearer {secret}");
        constant_time_eq(presented.as_bytes(), expected.as_bytes())
    }

    /// Runs the batch on a fixed interval when `AUTO_SYNC_INTERVAL_SECS` is set.
    pub fn start_auto_sync(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let period = Duration::from_secs(self.config.auto_sync_interval_secs?);
        let service = self.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately; skip it so startup does not sync.
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(error) = service.run_batch().await {
                    tracing::warn!(error = %error, "scheduled batch sync failed");
                }
            }
        }))
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter().zip(right).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

#[cfg(test)]
mod tests {
    use super::{constant_time_eq, PnlService};
    use crate::config::ServiceConfig;
    use crate::db::Database;
    use crate::errors::AppError;
    use crate::google::fake::FakeGoogle;
    use crate::models::{NewClientPayload, SyncPayload};
    use crate::secrets::TokenCipher;
    use std::sync::Arc;

    fn service(cron_secret: Option<&str>) -> (tempfile::TempDir, Arc<PnlService>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(
            Database::new(&dir.path().join("svc.sqlite"), TokenCipher::from_key([2u8; 32])).expect("db"),
        );
        let fake = Arc::new(FakeGoogle::new());
        let config = ServiceConfig {
            cron_secret: cron_secret.map(ToString::to_string),
            ..ServiceConfig::default()
        };
        (dir, PnlService::with_providers(config, db, fake.clone(), fake))
    }

    #[test]
    fn cron_secret_must_match_exactly() {
        let (_dir, service) = service(Some("s3cret"));
        assert!(service.cron_authorized(Some("Bearer s3cret")));
        assert!(!service.cron_authorized(Some("Bearer s3cre")));
        assert!(!service.cron_authorized(Some("s3cret")));
        assert!(!service.cron_authorized(None));
    }

    #[test]
    fn unconfigured_cron_secret_rejects_everything() {
        let (_dir, service) = service(None);
        assert!(!service.cron_authorized(Some("Bearer ")));
        assert!(!service.cron_authorized(Some("Bearer anything")));
    }

    #[test]
    fn constant_time_eq_handles_lengths() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn status_reflects_unprovisioned_client() {
        let (_dir, service) = service(None);
        let client = service
            .create_client(NewClientPayload {
                id: Some("acme".to_string()),
                name: "Acme".to_string(),
                email: Some(" owner@acme.test ".to_string()),
                auto_sync_enabled: true,
            })
            .expect("client");
        assert_eq!(client.email.as_deref(), Some("owner@acme.test"));

        let status = service.sync_status("acme").expect("status");
        assert!(!status.authenticated);
        assert!(status.spreadsheet_id.is_none());
        assert!(status.last_synced_at.is_none());

        let duplicate = service.create_client(NewClientPayload {
            id: Some("acme".to_string()),
            name: "Acme again".to_string(),
            email: None,
            auto_sync_enabled: true,
        });
        assert!(matches!(duplicate, Err(AppError::Invalid(_))));
    }

    #[test]
    fn list_returns_every_client_in_creation_order() {
        let (_dir, service) = service(None);
        assert!(service.list_clients().expect("empty list").is_empty());
        for (id, auto_sync) in [("acme", true), ("globex", false)] {
            service
                .create_client(NewClientPayload {
                    id: Some(id.to_string()),
                    name: id.to_uppercase(),
                    email: None,
                    auto_sync_enabled: auto_sync,
                })
                .expect("client");
        }

        let clients = service.list_clients().expect("list");
        let ids: Vec<&str> = clients.iter().map(|client| client.id.as_str()).collect();
        assert_eq!(ids, vec!["acme", "globex"]);
        assert!(!clients[1].auto_sync_enabled);
        assert!(clients.iter().all(|client| client.spreadsheet_url.is_none()));
    }

    #[tokio::test]
    async fn sync_rejects_out_of_range_window_before_any_work() {
        let (_dir, service) = service(None);
        let error = service
            .sync_client("missing", SyncPayload { days: Some(0) })
            .await
            .expect_err("invalid");
        assert!(matches!(error, AppError::Invalid(_)));
    }

    #[test]
    fn authorization_url_requires_known_client() {
        let (_dir, service) = service(None);
        assert!(matches!(service.authorization_url(None), Err(AppError::Invalid(_))));
        assert!(matches!(service.authorization_url(Some("ghost")), Err(AppError::NotFound(_))));
    }
}
