//! One-time creation of a client's report spreadsheet.

use crate::credentials::CredentialStore;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::google::{NewSpreadsheet, ProviderError, SheetsApi};
use crate::models::{ProvisionedSheet, SheetRef};
use crate::report::{default_sheet_title, ReportLayout, REPORT_LOCALE, REPORT_TAB_TITLE, REPORT_TIME_ZONE};
use std::sync::Arc;

#[derive(Clone)]
pub struct SpreadsheetProvisioner {
    db: Arc<Database>,
    credentials: CredentialStore,
    sheets: Arc<dyn SheetsApi>,
    layout: ReportLayout,
}

fn provision_error(step: &'static str) -> impl Fn(ProviderError) -> AppError {
    move |error| AppError::Provision(format!("{step} failed: {error}"))
}

/// Every provisioning failure surfaces as `Provision`, except a missing
/// authorization, which callers handle by sending the client to consent.
fn as_provision_error(error: AppError) -> AppError {
    match error {
        AppError::Provision(_) | AppError::NotAuthenticated(_) => error,
        other => AppError::Provision(other.to_string()),
    }
}

impl SpreadsheetProvisioner {
    pub fn new(
        db: Arc<Database>,
        credentials: CredentialStore,
        sheets: Arc<dyn SheetsApi>,
        layout: ReportLayout,
    ) -> Self {
        Self {
            db,
            credentials,
            sheets,
            layout,
        }
    }

    /// Creates, formats and shares a new report sheet. The client's sheet
    /// reference is written only after every step succeeded; an earlier
    /// failure leaves the client untouched.
    pub async fn create(&self, client_id: &str, title: Option<&str>) -> AppResult<ProvisionedSheet> {
        let client = self.db.require_client(client_id)?;
        if !client.has_tokens() {
            return Err(AppError::NotAuthenticated(format!(
                "client {client_id} has not authorized Google access"
            )));
        }

        let new_sheet = NewSpreadsheet {
            title: title
                .map(str::trim)
                .filter(|title| !title.is_empty())
                .map(ToString::to_string)
                .unwrap_or_else(|| default_sheet_title(&client.name)),
            tab_title: REPORT_TAB_TITLE.to_string(),
            locale: REPORT_LOCALE.to_string(),
            time_zone: REPORT_TIME_ZONE.to_string(),
        };

        let sheets = &self.sheets;
        let created = self
            .credentials
            .authorized(
                client_id,
                |token| {
                    let new_sheet = &new_sheet;
                    async move { sheets.create_spreadsheet(&token, new_sheet).await }
                },
                provision_error("spreadsheet create"),
            )
            .await
            .map_err(as_provision_error)?;
        let spreadsheet_id = created.spreadsheet_id.as_str();

        if let Err(error) = self.finish(client_id, spreadsheet_id, client.email.as_deref()).await {
            tracing::error!(
                client_id = %client_id,
                spreadsheet_id = %spreadsheet_id,
                error = %error,
                "provisioning failed after the spreadsheet was created; it is left orphaned"
            );
            return Err(as_provision_error(error));
        }

        self.db.set_sheet(
            client_id,
            &SheetRef {
                sheet_id: created.spreadsheet_id.clone(),
                sheet_url: created.spreadsheet_url.clone(),
                layout: self.layout,
            },
        )?;
        tracing::info!(client_id = %client_id, spreadsheet_id = %created.spreadsheet_id, "provisioned report spreadsheet");

        Ok(ProvisionedSheet {
            spreadsheet_id: created.spreadsheet_id,
            spreadsheet_url: created.spreadsheet_url,
        })
    }

    async fn finish(&self, client_id: &str, spreadsheet_id: &str, email: Option<&str>) -> AppResult<()> {
        let sheets = &self.sheets;
        let header_range = self.layout.header_range();
        let header = vec![self.layout.header_row()];
        self.credentials
            .authorized(
                client_id,
                |token| {
                    let (range, header) = (&header_range, &header);
                    async move { sheets.update_values(&token, spreadsheet_id, range, header).await }
                },
                provision_error("header write"),
            )
            .await?;

        let requests = self.layout.formatting_requests();
        self.credentials
            .authorized(
                client_id,
                |token| {
                    let requests = &requests;
                    async move { sheets.batch_update(&token, spreadsheet_id, requests).await }
                },
                provision_error("formatting"),
            )
            .await?;

        match email.map(str::trim).filter(|email| !email.is_empty()) {
            Some(email) => {
                self.credentials
                    .authorized(
                        client_id,
                        |token| async move { sheets.share_with_writer(&token, spreadsheet_id, email).await },
                        provision_error("share"),
                    )
                    .await?;
            }
            None => {
                tracing::info!(client_id = %client_id, "client has no email; report sheet not shared");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SpreadsheetProvisioner;
    use crate::credentials::CredentialStore;
    use crate::db::Database;
    use crate::errors::AppError;
    use crate::google::fake::{FakeGoogle, FakeOp};
    use crate::google::ProviderError;
    use crate::models::{NewClientPayload, OAuthCredential};
    use crate::report::ReportLayout;
    use crate::secrets::TokenCipher;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    struct Harness {
        _dir: tempfile::TempDir,
        db: Arc<Database>,
        fake: Arc<FakeGoogle>,
        provisioner: SpreadsheetProvisioner,
    }

    fn harness(email: Option<&str>, authorized: bool) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(
            Database::new(&dir.path().join("p.sqlite"), TokenCipher::from_key([5u8; 32])).expect("db"),
        );
        db.create_client(NewClientPayload {
            id: Some("client-1".to_string()),
            name: "Acme".to_string(),
            email: email.map(ToString::to_string),
            auto_sync_enabled: true,
        })
        .expect("client");
        if authorized {
            db.store_credential(
                "client-1",
                &OAuthCredential {
                    access_token: "access".to_string(),
                    refresh_token: "refresh".to_string(),
                    expires_at: Some(Utc::now() + Duration::hours(1)),
                },
            )
            .expect("credential");
        }
        let fake = Arc::new(FakeGoogle::new());
        let credentials = CredentialStore::new(db.clone(), fake.clone());
        let provisioner = SpreadsheetProvisioner::new(db.clone(), credentials, fake.clone(), ReportLayout::Daily);
        Harness {
            _dir: dir,
            db,
            fake,
            provisioner,
        }
    }

    #[tokio::test]
    async fn creates_formats_shares_and_persists() {
        let h = harness(Some("owner@acme.test"), true);

        let sheet = h.provisioner.create("client-1", None).await.expect("provision");

        let remote = h.fake.spreadsheet(&sheet.spreadsheet_id).expect("remote sheet");
        assert_eq!(remote.title, "Acme - Daily P&L");
        assert_eq!(remote.tab_title, "Daily P&L");
        assert_eq!(remote.rows, vec![ReportLayout::Daily.header_row()]);
        assert_eq!(remote.formatting.len(), 5);
        assert_eq!(remote.shared_with, vec!["owner@acme.test".to_string()]);

        let stored = h.db.require_client("client-1").expect("client").sheet.expect("sheet ref");
        assert_eq!(stored.sheet_id, sheet.spreadsheet_id);
        assert_eq!(stored.sheet_url, sheet.spreadsheet_url);
        assert_eq!(stored.layout, ReportLayout::Daily);
    }

    #[tokio::test]
    async fn refresh_failure_before_create_is_provision_error() {
        let h = harness(Some("owner@acme.test"), false);
        h.db.store_credential(
            "client-1",
            &OAuthCredential {
                access_token: "stale".to_string(),
                refresh_token: "refresh".to_string(),
                expires_at: Some(Utc::now() - Duration::hours(1)),
            },
        )
        .expect("expired credential");
        h.fake.revoke_refresh_token("refresh");

        let error = h.provisioner.create("client-1", None).await.expect_err("refresh fails");

        assert!(matches!(error, AppError::Provision(_)), "{error}");
        assert!(error.message().contains("REFRESH_FAILED"));
        assert_eq!(h.fake.count(FakeOp::Create), 0);
        assert!(h.db.require_client("client-1").expect("client").sheet.is_none());
    }

    #[tokio::test]
    async fn refresh_failure_after_create_is_provision_error() {
        let h = harness(Some("owner@acme.test"), true);
        h.fake.fail_next(FakeOp::UpdateValues, ProviderError::Unauthorized("token revoked".to_string()));
        h.fake.revoke_refresh_token("refresh");

        let error = h.provisioner.create("client-1", None).await.expect_err("header write fails");

        assert!(matches!(error, AppError::Provision(_)), "{error}");
        assert_eq!(h.fake.spreadsheet_count(), 1);
        assert!(h.db.require_client("client-1").expect("client").sheet.is_none());
    }

    #[tokio::test]
    async fn custom_title_is_used() {
        let h = harness(Some("owner@acme.test"), true);
        let sheet = h.provisioner.create("client-1", Some("Q3 numbers")).await.expect("provision");
        assert_eq!(h.fake.spreadsheet(&sheet.spreadsheet_id).expect("sheet").title, "Q3 numbers");
    }

    #[tokio::test]
    async fn requires_authorization() {
        let h = harness(Some("owner@acme.test"), false);
        let error = h.provisioner.create("client-1", None).await.expect_err("unauthorized");
        assert!(matches!(error, AppError::NotAuthenticated(_)));
        assert_eq!(h.fake.count(FakeOp::Create), 0);
    }

    #[tokio::test]
    async fn share_failure_leaves_client_unprovisioned() {
        let h = harness(Some("owner@acme.test"), true);
        h.fake.fail_next(
            FakeOp::Share,
            ProviderError::Rejected {
                status: 403,
                message: "The caller does not have permission".to_string(),
            },
        );

        let error = h.provisioner.create("client-1", None).await.expect_err("share fails");

        assert!(matches!(error, AppError::Provision(_)));
        assert!(h.db.require_client("client-1").expect("client").sheet.is_none());
        assert_eq!(h.fake.spreadsheet_count(), 1);
    }

    #[tokio::test]
    async fn formatting_failure_leaves_client_unprovisioned() {
        let h = harness(Some("owner@acme.test"), true);
        h.fake.fail_next(
            FakeOp::BatchUpdate,
            ProviderError::Transport("timed out".to_string()),
        );
        let error = h.provisioner.create("client-1", None).await.expect_err("format fails");
        assert!(matches!(error, AppError::Provision(_)));
        assert!(h.db.require_client("client-1").expect("client").sheet.is_none());
    }

    #[tokio::test]
    async fn missing_email_skips_sharing() {
        let h = harness(None, true);
        let sheet = h.provisioner.create("client-1", None).await.expect("provision");
        assert_eq!(h.fake.count(FakeOp::Share), 0);
        assert!(h.fake.spreadsheet(&sheet.spreadsheet_id).expect("sheet").shared_with.is_empty());
    }
}
