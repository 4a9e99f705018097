//! Clear-and-rewrite sync of derived rows into a client's report sheet.

use crate::credentials::CredentialStore;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::google::{ProviderError, SheetsApi};
use crate::locks::KeyedLocks;
use crate::metrics::MetricsAggregator;
use crate::models::SyncOutcome;
use chrono::Utc;
use std::sync::Arc;

pub const DEFAULT_WINDOW_DAYS: u32 = 30;

#[derive(Clone)]
pub struct SyncEngine {
    db: Arc<Database>,
    credentials: CredentialStore,
    aggregator: MetricsAggregator,
    sheets: Arc<dyn SheetsApi>,
    sync_locks: KeyedLocks,
}

fn write_error(step: &'static str) -> impl Fn(ProviderError) -> AppError {
    move |error| AppError::SyncWrite(format!("{step} failed: {error}"))
}

impl SyncEngine {
    pub fn new(
        db: Arc<Database>,
        credentials: CredentialStore,
        aggregator: MetricsAggregator,
        sheets: Arc<dyn SheetsApi>,
    ) -> Self {
        Self {
            db,
            credentials,
            aggregator,
            sheets,
            sync_locks: KeyedLocks::new(),
        }
    }

    /// Replaces every data row of the client's report with freshly computed
    /// rows, in the column layout the sheet was provisioned with. Calls for
    /// the same client run one at a time. `lastSyncedAt` moves only when the
    /// clear and the write both succeeded.
    pub async fn sync(&self, client_id: &str, window_days: u32) -> AppResult<SyncOutcome> {
        let client = self.db.require_client(client_id)?;
        if !client.has_tokens() {
            return Err(AppError::NotAuthenticated(format!(
                "client {client_id} has not authorized Google access"
            )));
        }
        if client.sheet.is_none() {
            return Err(AppError::NotProvisioned(format!(
                "client {client_id} has no report spreadsheet"
            )));
        }

        let _guard = self.sync_locks.acquire(client_id).await;

        // Re-read under the lock: a re-provision may have swapped the sheet.
        let sheet = self.db.require_client(client_id)?.sheet.ok_or_else(|| {
            AppError::NotProvisioned(format!("client {client_id} has no report spreadsheet"))
        })?;
        let layout = sheet.layout;
        let rows = self.aggregator.compute(client_id, window_days, layout)?;
        let values = layout.render_rows(&rows);

        let sheets = &self.sheets;
        let spreadsheet_id = sheet.sheet_id.as_str();
        let clear_range = layout.data_clear_range();
        self.credentials
            .authorized(
                client_id,
                |token| {
                    let range = &clear_range;
                    async move { sheets.clear_values(&token, spreadsheet_id, range).await }
                },
                write_error("clear"),
            )
            .await?;

        if !values.is_empty() {
            let start_range = layout.data_start_range();
            let written = self
                .credentials
                .authorized(
                    client_id,
                    |token| {
                        let (range, values) = (&start_range, &values);
                        async move { sheets.update_values(&token, spreadsheet_id, range, values).await }
                    },
                    write_error("write"),
                )
                .await;
            if let Err(error) = written {
                tracing::warn!(
                    client_id = %client_id,
                    spreadsheet_id = %spreadsheet_id,
                    error = %error,
                    "report cleared but rows were not written; sync must be retried"
                );
                return Err(error);
            }
        }

        let synced_at = Utc::now();
        self.db.mark_synced(client_id, synced_at)?;
        tracing::info!(client_id = %client_id, rows = values.len(), "synced report");

        Ok(SyncOutcome {
            rows_written: values.len(),
            spreadsheet_url: sheet.sheet_url,
            synced_at,
        })
    }
}
