use crate::errors::{AppError, AppResult};
use crate::models::{Client, DailyMetric, FinancialProfile, NewClientPayload, OAuthCredential, Platform, SheetRef};
use crate::report::ReportLayout;
use crate::secrets::TokenCipher;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");
const DATE_FORMAT: &str = "%Y-%m-%d";

const CLIENT_COLUMNS: &str = "id, name, email, google_access_token, google_refresh_token, google_token_expiry,
     google_sheet_id, google_sheet_url, auto_sync_enabled, last_synced_at, created_at, updated_at,
     google_sheet_layout";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    cipher: TokenCipher,
    db_path: PathBuf,
}

struct ClientRow {
    id: String,
    name: String,
    email: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_expiry: Option<String>,
    sheet_id: Option<String>,
    sheet_url: Option<String>,
    auto_sync_enabled: bool,
    last_synced_at: Option<String>,
    created_at: String,
    updated_at: String,
    sheet_layout: Option<String>,
}

impl Database {
    pub fn new(path: &Path, cipher: TokenCipher) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;
        ensure_schema_extensions(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn create_client(&self, payload: NewClientPayload) -> AppResult<Client> {
        let name = payload.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Invalid("Client name is required".to_string()));
        }
        let id = payload.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();

        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO clients (id, name, email, auto_sync_enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, name, payload.email, payload.auto_sync_enabled, now.to_rfc3339()],
        )?;

        Ok(Client {
            id,
            name,
            email: payload.email,
            access_token: None,
            refresh_token: None,
            token_expiry: None,
            sheet: None,
            auto_sync_enabled: payload.auto_sync_enabled,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_client(&self, client_id: &str) -> AppResult<Option<Client>> {
        let raw = {
            let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
            conn.query_row(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?1"),
                [client_id],
                read_client_row,
            )
            .optional()?
        };
        raw.map(|row| self.hydrate_client(row)).transpose()
    }

    pub fn require_client(&self, client_id: &str) -> AppResult<Client> {
        self.get_client(client_id)?
            .ok_or_else(|| AppError::NotFound(format!("Client {} not found", client_id)))
    }

    pub fn list_clients(&self) -> AppResult<Vec<Client>> {
        let rows = {
            let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {CLIENT_COLUMNS} FROM clients ORDER BY created_at ASC, id ASC"
            ))?;
            let mapped = stmt.query_map([], read_client_row)?;
            let mut rows = Vec::new();
            for row in mapped {
                rows.push(row?);
            }
            rows
        };
        rows.into_iter().map(|row| self.hydrate_client(row)).collect()
    }

    /// Ids of the clients the batch runner should sync: auto sync on and a
    /// provisioned sheet. Tokens are not read here; each client is loaded by
    /// its own sync so one unreadable row cannot fail the whole selection.
    pub fn list_sync_eligible_client_ids(&self) -> AppResult<Vec<String>> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT id FROM clients
             WHERE auto_sync_enabled = 1 AND google_sheet_id IS NOT NULL AND google_sheet_id != ''
             ORDER BY created_at ASC, id ASC",
        )?;
        let mapped = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for id in mapped {
            ids.push(id?);
        }
        Ok(ids)
    }

    pub fn set_auto_sync(&self, client_id: &str, enabled: bool) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let updated = conn.execute(
            "UPDATE clients SET auto_sync_enabled = ?1, updated_at = ?2 WHERE id = ?3",
            params![enabled, Utc::now().to_rfc3339(), client_id],
        )?;
        ensure_updated(updated, client_id)
    }

    /// Replaces all three OAuth fields at once so a reader never observes a
    /// new access token paired with a stale expiry.
    pub fn store_credential(&self, client_id: &str, credential: &OAuthCredential) -> AppResult<()> {
        let access = self.cipher.encrypt(&credential.access_token)?;
        let refresh = self.cipher.encrypt(&credential.refresh_token)?;
        let expiry = credential.expires_at.map(|at| at.to_rfc3339());

        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let updated = conn.execute(
            "UPDATE clients
             SET google_access_token = ?1, google_refresh_token = ?2, google_token_expiry = ?3, updated_at = ?4
             WHERE id = ?5",
            params![access, refresh, expiry, Utc::now().to_rfc3339(), client_id],
        )?;
        ensure_updated(updated, client_id)
    }

    pub fn set_sheet(&self, client_id: &str, sheet: &SheetRef) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let updated = conn.execute(
            "UPDATE clients
             SET google_sheet_id = ?1, google_sheet_url = ?2, google_sheet_layout = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                sheet.sheet_id,
                sheet.sheet_url,
                sheet.layout.as_str(),
                Utc::now().to_rfc3339(),
                client_id
            ],
        )?;
        ensure_updated(updated, client_id)
    }

    pub fn mark_synced(&self, client_id: &str, synced_at: DateTime<Utc>) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let updated = conn.execute(
            "UPDATE clients SET last_synced_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![synced_at.to_rfc3339(), client_id],
        )?;
        ensure_updated(updated, client_id)
    }

    pub fn save_financial_profile(&self, client_id: &str, profile: &FinancialProfile) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO financial_profiles (
               client_id, cogs_percentage, payment_processing_fee_percentage, merchant_account_fee_flat,
               shipping_cost_per_order, fulfillment_cost_per_order, target_margin_percentage, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(client_id) DO UPDATE SET
               cogs_percentage = excluded.cogs_percentage,
               payment_processing_fee_percentage = excluded.payment_processing_fee_percentage,
               merchant_account_fee_flat = excluded.merchant_account_fee_flat,
               shipping_cost_per_order = excluded.shipping_cost_per_order,
               fulfillment_cost_per_order = excluded.fulfillment_cost_per_order,
               target_margin_percentage = excluded.target_margin_percentage,
               updated_at = excluded.updated_at",
            params![
                client_id,
                profile.cogs_percentage.to_string(),
                profile.payment_processing_fee_percentage.to_string(),
                profile.merchant_account_fee_flat.to_string(),
                profile.shipping_cost_per_order.to_string(),
                profile.fulfillment_cost_per_order.to_string(),
                profile.target_margin_percentage.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_financial_profile(&self, client_id: &str) -> AppResult<Option<FinancialProfile>> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let raw = conn
            .query_row(
                "SELECT cogs_percentage, payment_processing_fee_percentage, merchant_account_fee_flat,
                        shipping_cost_per_order, fulfillment_cost_per_order, target_margin_percentage
                 FROM financial_profiles WHERE client_id = ?1",
                [client_id],
                |row| {
                    Ok([
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ])
                },
            )
            .optional()?;

        let Some([cogs, fee, flat, shipping, fulfillment, target]) = raw else {
            return Ok(None);
        };
        Ok(Some(FinancialProfile {
            cogs_percentage: parse_decimal(&cogs)?,
            payment_processing_fee_percentage: parse_decimal(&fee)?,
            merchant_account_fee_flat: parse_decimal(&flat)?,
            shipping_cost_per_order: parse_decimal(&shipping)?,
            fulfillment_cost_per_order: parse_decimal(&fulfillment)?,
            target_margin_percentage: parse_decimal(&target)?,
        }))
    }

    pub fn upsert_daily_metric(&self, metric: &DailyMetric) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO daily_metrics (client_id, date, platform, revenue, orders, ad_spend, impressions, clicks)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(client_id, date, platform) DO UPDATE SET
               revenue = excluded.revenue,
               orders = excluded.orders,
               ad_spend = excluded.ad_spend,
               impressions = excluded.impressions,
               clicks = excluded.clicks",
            params![
                metric.client_id,
                metric.date.format(DATE_FORMAT).to_string(),
                metric.platform.as_str(),
                metric.revenue.to_string(),
                metric.orders,
                metric.ad_spend.to_string(),
                metric.impressions,
                metric.clicks,
            ],
        )?;
        Ok(())
    }

    /// Metrics with `from <= date <= to`, ordered by date then platform.
    pub fn list_daily_metrics(&self, client_id: &str, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<DailyMetric>> {
        let raw = {
            let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
            let mut stmt = conn.prepare(
                "SELECT date, platform, revenue, orders, ad_spend, impressions, clicks
                 FROM daily_metrics
                 WHERE client_id = ?1 AND date >= ?2 AND date <= ?3
                 ORDER BY date ASC, platform ASC",
            )?;
            let mapped = stmt.query_map(
                params![
                    client_id,
                    from.format(DATE_FORMAT).to_string(),
                    to.format(DATE_FORMAT).to_string()
                ],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )?;
            let mut raw = Vec::new();
            for row in mapped {
                raw.push(row?);
            }
            raw
        };

        let mut metrics = Vec::with_capacity(raw.len());
        for (date, platform, revenue, orders, ad_spend, impressions, clicks) in raw {
            metrics.push(DailyMetric {
                client_id: client_id.to_string(),
                date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
                    .map_err(|error| AppError::Internal(format!("invalid metric date {date}: {error}")))?,
                platform: Platform::parse(&platform)
                    .ok_or_else(|| AppError::Internal(format!("unknown platform {platform}")))?,
                revenue: parse_decimal(&revenue)?,
                orders,
                ad_spend: parse_decimal(&ad_spend)?,
                impressions,
                clicks,
            });
        }
        Ok(metrics)
    }

    /// Tokens sealed under a different key read as absent: the client shows
    /// as not authenticated and reconnecting overwrites them.
    fn open_tokens(
        &self,
        client_id: &str,
        access: Option<String>,
        refresh: Option<String>,
    ) -> (Option<String>, Option<String>) {
        let open = |value: Option<String>| {
            value
                .filter(|value| !value.is_empty())
                .map(|value| self.cipher.decrypt(&value))
                .transpose()
        };
        match (open(access), open(refresh)) {
            (Ok(access), Ok(refresh)) => (access, refresh),
            (Err(error), _) | (_, Err(error)) => {
                tracing::warn!(
                    client_id = %client_id,
                    error = %error,
                    "stored Google tokens are unreadable; client must reconnect"
                );
                (None, None)
            }
        }
    }

    fn hydrate_client(&self, row: ClientRow) -> AppResult<Client> {
        let (access_token, refresh_token) = self.open_tokens(&row.id, row.access_token, row.refresh_token);
        let layout = match row.sheet_layout.as_deref() {
            // Sheets recorded before layouts were stored use the default layout.
            None => ReportLayout::default(),
            Some(raw) => ReportLayout::parse(raw)
                .ok_or_else(|| AppError::Internal(format!("unknown report layout {raw}")))?,
        };
        let sheet = match (row.sheet_id, row.sheet_url) {
            (Some(sheet_id), sheet_url) if !sheet_id.is_empty() => Some(SheetRef {
                sheet_url: sheet_url.unwrap_or_default(),
                sheet_id,
                layout,
            }),
            _ => None,
        };

        Ok(Client {
            id: row.id,
            name: row.name,
            email: row.email.filter(|value| !value.trim().is_empty()),
            access_token,
            refresh_token,
            token_expiry: row.token_expiry.as_deref().map(parse_timestamp).transpose()?,
            sheet,
            auto_sync_enabled: row.auto_sync_enabled,
            last_synced_at: row.last_synced_at.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

fn read_client_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClientRow> {
    Ok(ClientRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        access_token: row.get(3)?,
        refresh_token: row.get(4)?,
        token_expiry: row.get(5)?,
        sheet_id: row.get(6)?,
        sheet_url: row.get(7)?,
        auto_sync_enabled: row.get(8)?,
        last_synced_at: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        sheet_layout: row.get(12)?,
    })
}

fn ensure_schema_extensions(conn: &Connection) -> AppResult<()> {
    if !column_exists(conn, "clients", "google_sheet_layout")? {
        conn.execute("ALTER TABLE clients ADD COLUMN google_sheet_layout TEXT", [])?;
    }
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> AppResult<bool> {
    let pragma = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&pragma)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn ensure_updated(updated: usize, client_id: &str) -> AppResult<()> {
    if updated == 0 {
        return Err(AppError::NotFound(format!("Client {} not found", client_id)));
    }
    Ok(())
}

fn parse_timestamp(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| AppError::Internal(format!("invalid timestamp {raw}: {error}")))
}

fn parse_decimal(raw: &str) -> AppResult<Decimal> {
    Decimal::from_str(raw).map_err(|error| AppError::Internal(format!("invalid decimal {raw}: {error}")))
}
