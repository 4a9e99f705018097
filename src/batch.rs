use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{BatchSummary, ClientSyncResult, SyncOutcome};
use crate::sync::SyncEngine;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Syncs every auto-sync client that has a report sheet. Clients run in
/// parallel up to `concurrency`; one client's failure is recorded in the
/// summary and never stops the others.
#[derive(Clone)]
pub struct BatchRunner {
    db: Arc<Database>,
    engine: SyncEngine,
    concurrency: usize,
    window_days: u32,
}

impl BatchRunner {
    pub fn new(db: Arc<Database>, engine: SyncEngine, concurrency: usize, window_days: u32) -> Self {
        Self {
            db,
            engine,
            concurrency: concurrency.max(1),
            window_days,
        }
    }

    pub async fn run(&self) -> AppResult<BatchSummary> {
        // Ids only: each task loads its own client, so one unreadable row
        // fails that client alone.
        let client_ids = self.db.list_sync_eligible_client_ids()?;
        tracing::info!(clients = client_ids.len(), "starting batch sync");

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for (index, client_id) in client_ids.iter().cloned().enumerate() {
            let engine = self.engine.clone();
            let permits = permits.clone();
            let window_days = self.window_days;
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let outcome = engine.sync(&client_id, window_days).await;
                (index, client_result(client_id, outcome))
            });
        }

        let mut slots: Vec<Option<ClientSyncResult>> = vec![None; client_ids.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(error) => tracing::error!(error = %error, "batch sync task aborted"),
            }
        }

        let results: Vec<ClientSyncResult> = slots
            .into_iter()
            .zip(client_ids)
            .map(|(slot, client_id)| {
                slot.unwrap_or_else(|| {
                    client_result(client_id, Err(AppError::Internal("sync task aborted".to_string())))
                })
            })
            .collect();

        let success_count = results.iter().filter(|result| result.success).count();
        let summary = BatchSummary {
            total: results.len(),
            success_count,
            failure_count: results.len() - success_count,
            results,
        };
        tracing::info!(
            total = summary.total,
            succeeded = summary.success_count,
            failed = summary.failure_count,
            "batch sync finished"
        );
        Ok(summary)
    }
}

fn client_result(client_id: String, outcome: AppResult<SyncOutcome>) -> ClientSyncResult {
    match outcome {
        Ok(outcome) => ClientSyncResult {
            client_id,
            success: true,
            rows_written: Some(outcome.rows_written),
            error_kind: None,
            message: None,
        },
        Err(error) => {
            tracing::warn!(client_id = %client_id, error = %error, "client sync failed");
            ClientSyncResult {
                client_id,
                success: false,
                rows_written: None,
                error_kind: Some(error.kind().to_string()),
                message: Some(error.message().to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BatchRunner;
    use crate::credentials::CredentialStore;
    use crate::db::Database;
    use crate::google::fake::{FakeGoogle, FakeOp};
    use crate::google::{NewSpreadsheet, ProviderError, SheetsApi};
    use crate::metrics::MetricsAggregator;
    use crate::models::{DailyMetric, FinancialProfile, NewClientPayload, OAuthCredential, Platform, SheetRef};
    use crate::report::ReportLayout;
    use crate::secrets::TokenCipher;
    use crate::sync::SyncEngine;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn runner(db: &Arc<Database>, fake: &Arc<FakeGoogle>, concurrency: usize) -> BatchRunner {
        let engine = SyncEngine::new(
            db.clone(),
            CredentialStore::new(db.clone(), fake.clone()),
            MetricsAggregator::new(db.clone()),
            fake.clone(),
        );
        BatchRunner::new(db.clone(), engine, concurrency, 30)
    }

    async fn provisioned_client(db: &Database, fake: &FakeGoogle, id: &str, auto_sync: bool) -> String {
        db.create_client(NewClientPayload {
            id: Some(id.to_string()),
            name: id.to_string(),
            email: None,
            auto_sync_enabled: auto_sync,
        })
        .expect("client");
        db.store_credential(
            id,
            &OAuthCredential {
                access_token: format!("{id}-access"),
                refresh_token: format!("{id}-refresh"),
                expires_at: Some(Utc::now() + Duration::hours(1)),
            },
        )
        .expect("credential");
        db.save_financial_profile(
            id,
            &FinancialProfile {
                cogs_percentage: dec!(30),
                payment_processing_fee_percentage: dec!(3),
                merchant_account_fee_flat: dec!(0.30),
                shipping_cost_per_order: dec!(5),
                fulfillment_cost_per_order: dec!(2),
                target_margin_percentage: dec!(20),
            },
        )
        .expect("profile");
        db.upsert_daily_metric(&DailyMetric {
            client_id: id.to_string(),
            date: Utc::now().date_naive(),
            platform: Platform::Meta,
            revenue: dec!(1000),
            orders: 10,
            ad_spend: dec!(200),
            impressions: 5000,
            clicks: 120,
        })
        .expect("metric");
        let created = fake
            .create_spreadsheet(
                &format!("{id}-access"),
                &NewSpreadsheet {
                    title: id.to_string(),
                    tab_title: "Daily P&L".to_string(),
                    locale: "en_US".to_string(),
                    time_zone: "America/New_York".to_string(),
                },
            )
            .await
            .expect("sheet");
        db.set_sheet(
            id,
            &SheetRef {
                sheet_id: created.spreadsheet_id.clone(),
                sheet_url: created.spreadsheet_url,
                layout: ReportLayout::Daily,
            },
        )
        .expect("sheet ref");
        created.spreadsheet_id
    }

    #[tokio::test]
    async fn one_failing_client_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(
            Database::new(&dir.path().join("b.sqlite"), TokenCipher::from_key([8u8; 32])).expect("db"),
        );
        let fake = Arc::new(FakeGoogle::new());
        provisioned_client(&db, &fake, "alpha", true).await;
        let failing = provisioned_client(&db, &fake, "bravo", true).await;
        provisioned_client(&db, &fake, "charlie", true).await;
        provisioned_client(&db, &fake, "opted-out", false).await;
        fake.fail_always(
            FakeOp::UpdateValues,
            &failing,
            ProviderError::Rejected {
                status: 500,
                message: "Internal error encountered.".to_string(),
            },
        );

        let summary = runner(&db, &fake, 2).run().await.expect("batch");

        assert_eq!(summary.total, 3);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.failure_count, 1);
        let failure = summary
            .results
            .iter()
            .find(|result| !result.success)
            .expect("failure");
        assert_eq!(failure.client_id, "bravo");
        assert_eq!(failure.error_kind.as_deref(), Some("SyncWriteError"));
        assert!(failure.message.as_deref().unwrap_or_default().contains("Internal error"));
        assert!(summary
            .results
            .iter()
            .all(|result| result.client_id != "opted-out"));
        assert!(db.require_client("alpha").expect("alpha").last_synced_at.is_some());
        assert!(db.require_client("bravo").expect("bravo").last_synced_at.is_none());
    }

    #[tokio::test]
    async fn empty_batch_reports_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(
            Database::new(&dir.path().join("e.sqlite"), TokenCipher::from_key([8u8; 32])).expect("db"),
        );
        let fake = Arc::new(FakeGoogle::new());
        let summary = runner(&db, &fake, 4).run().await.expect("batch");
        assert_eq!(summary.total, 0);
        assert!(summary.results.is_empty());
    }

    #[tokio::test]
    async fn unreadable_tokens_fail_only_that_client() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("k.sqlite");
        let db = Arc::new(Database::new(&path, TokenCipher::from_key([8u8; 32])).expect("db"));
        let fake = Arc::new(FakeGoogle::new());
        provisioned_client(&db, &fake, "alpha", true).await;
        provisioned_client(&db, &fake, "bravo", true).await;

        // bravo's tokens are rewritten under a key this process does not hold.
        let foreign = Database::new(&path, TokenCipher::from_key([1u8; 32])).expect("foreign db");
        foreign
            .store_credential(
                "bravo",
                &OAuthCredential {
                    access_token: "sealed-access".to_string(),
                    refresh_token: "sealed-refresh".to_string(),
                    expires_at: Some(Utc::now() + Duration::hours(1)),
                },
            )
            .expect("foreign credential");

        let summary = runner(&db, &fake, 2).run().await.expect("batch still runs");

        assert_eq!(summary.total, 2);
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.failure_count, 1);
        let bravo = summary
            .results
            .iter()
            .find(|result| result.client_id == "bravo")
            .expect("bravo");
        assert_eq!(bravo.error_kind.as_deref(), Some("NotAuthenticatedError"));
        assert!(db.require_client("alpha").expect("alpha").last_synced_at.is_some());
    }

    #[tokio::test]
    async fn revoked_grant_is_reported_as_refresh_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(
            Database::new(&dir.path().join("r.sqlite"), TokenCipher::from_key([8u8; 32])).expect("db"),
        );
        let fake = Arc::new(FakeGoogle::new());
        provisioned_client(&db, &fake, "alpha", true).await;
        let revoked = provisioned_client(&db, &fake, "bravo", true).await;
        provisioned_client(&db, &fake, "charlie", true).await;
        db.store_credential(
            "bravo",
            &OAuthCredential {
                access_token: "bravo-stale".to_string(),
                refresh_token: "bravo-refresh".to_string(),
                expires_at: Some(Utc::now() - Duration::minutes(5)),
            },
        )
        .expect("expired credential");
        fake.revoke_refresh_token("bravo-refresh");

        let summary = runner(&db, &fake, 3).run().await.expect("batch");

        assert_eq!(summary.total, 3);
        assert_eq!(summary.success_count, 2);
        let bravo = summary
            .results
            .iter()
            .find(|result| result.client_id == "bravo")
            .expect("bravo");
        assert!(!bravo.success);
        assert_eq!(bravo.error_kind.as_deref(), Some("RefreshError"));
        assert_eq!(bravo.rows_written, None);
        assert!(fake.spreadsheet(&revoked).expect("sheet").rows.is_empty());
        assert!(db.require_client("charlie").expect("charlie").last_synced_at.is_some());
    }
}
