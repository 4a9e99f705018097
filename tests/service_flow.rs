use chrono::{Duration, NaiveDate, Utc};
use pnl_sheets_sync_lib::config::ServiceConfig;
use pnl_sheets_sync_lib::db::Database;
use pnl_sheets_sync_lib::errors::AppError;
use pnl_sheets_sync_lib::google::fake::{FakeGoogle, FakeOp};
use pnl_sheets_sync_lib::google::ProviderError;
use pnl_sheets_sync_lib::models::{
    CreateSheetPayload, DailyMetricPayload, FinancialProfile, NewClientPayload, Platform, SyncPayload,
};
use pnl_sheets_sync_lib::secrets::TokenCipher;
use pnl_sheets_sync_lib::service::PnlService;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    google: Arc<FakeGoogle>,
    service: Arc<PnlService>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Arc::new(Database::new(&dir.path().join("flow.sqlite"), TokenCipher::from_key([9u8; 32])).expect("db"));
    let google = Arc::new(FakeGoogle::new());
    let service = PnlService::with_providers(ServiceConfig::default(), db, google.clone(), google.clone());
    Harness {
        _dir: dir,
        google,
        service,
    }
}

fn days_ago(days: i64) -> NaiveDate {
    Utc::now().date_naive() - Duration::days(days)
}

fn metric(date: NaiveDate, platform: Platform, revenue: rust_decimal::Decimal, orders: i64, ad_spend: rust_decimal::Decimal) -> DailyMetricPayload {
    DailyMetricPayload {
        date,
        platform,
        revenue,
        orders,
        ad_spend,
        impressions: 0,
        clicks: 0,
    }
}

fn seed_client(service: &PnlService, id: &str, name: &str, email: Option<&str>, auto_sync: bool) {
    service
        .create_client(NewClientPayload {
            id: Some(id.to_string()),
            name: name.to_string(),
            email: email.map(ToString::to_string),
            auto_sync_enabled: auto_sync,
        })
        .expect("create client");
    service
        .save_financial_profile(
            id,
            FinancialProfile {
                cogs_percentage: dec!(35),
                payment_processing_fee_percentage: dec!(2.9),
                merchant_account_fee_flat: dec!(0.30),
                shipping_cost_per_order: dec!(8.50),
                fulfillment_cost_per_order: dec!(3.50),
                target_margin_percentage: dec!(25),
            },
        )
        .expect("profile");
    let recorded = service
        .record_daily_metrics(
            id,
            vec![
                metric(days_ago(1), Platform::Shopify, dec!(1000), 10, dec!(0)),
                metric(days_ago(1), Platform::Meta, dec!(0), 0, dec!(200)),
                metric(days_ago(2), Platform::Shopify, dec!(500), 5, dec!(0)),
                metric(days_ago(90), Platform::Shopify, dec!(999), 9, dec!(0)),
            ],
        )
        .expect("metrics");
    assert_eq!(recorded, 4);
}

#[tokio::test]
async fn connect_provision_and_sync_end_to_end() {
    let h = harness();
    seed_client(&h.service, "acme", "Acme", Some("owner@acme.test"), true);

    let before_auth = h
        .service
        .sync_client("acme", SyncPayload::default())
        .await
        .expect_err("not connected yet");
    assert!(matches!(before_auth, AppError::NotAuthenticated(_)));

    h.service
        .complete_authorization("acme", "consent-code")
        .await
        .expect("authorize");
    assert!(h.service.sync_status("acme").expect("status").authenticated);

    let before_sheet = h
        .service
        .sync_client("acme", SyncPayload::default())
        .await
        .expect_err("no sheet yet");
    assert!(matches!(before_sheet, AppError::NotProvisioned(_)));

    let sheet = h
        .service
        .create_sheet("acme", CreateSheetPayload::default())
        .await
        .expect("create sheet");
    let created = h.google.spreadsheet(&sheet.spreadsheet_id).expect("fake sheet");
    assert_eq!(created.title, "Acme - Daily P&L");
    assert_eq!(created.tab_title, "Daily P&L");
    assert_eq!(created.shared_with, vec!["owner@acme.test".to_string()]);
    assert_eq!(created.rows[0][0], "Date");
    assert_eq!(created.rows[0][9], "Status");

    let outcome = h
        .service
        .sync_client("acme", SyncPayload::default())
        .await
        .expect("sync");
    assert_eq!(outcome.rows_written, 2);
    assert_eq!(outcome.spreadsheet_url, sheet.spreadsheet_url);

    let synced = h.google.spreadsheet(&sheet.spreadsheet_id).expect("fake sheet");
    assert_eq!(synced.rows.len(), 3);
    assert_eq!(synced.rows[0][0], "Date");
    assert_eq!(synced.rows[1][0], days_ago(2).format("%Y-%m-%d").to_string());
    assert_eq!(synced.rows[2][0], days_ago(1).format("%Y-%m-%d").to_string());
    assert_eq!(&synced.rows[2][1..7], &["1000.00", "10", "100.00", "200.00", "5.00", "20.00"]);

    let status = h.service.sync_status("acme").expect("status");
    assert_eq!(status.spreadsheet_id.as_deref(), Some(sheet.spreadsheet_id.as_str()));
    assert!(status.last_synced_at.is_some());
}

#[tokio::test]
async fn narrower_window_replaces_previous_rows() {
    let h = harness();
    seed_client(&h.service, "acme", "Acme", None, true);
    h.service.complete_authorization("acme", "code").await.expect("authorize");
    let sheet = h
        .service
        .create_sheet(
            "acme",
            CreateSheetPayload {
                sheet_title: Some("Acme Q3".to_string()),
            },
        )
        .await
        .expect("sheet");
    assert_eq!(h.google.spreadsheet(&sheet.spreadsheet_id).expect("sheet").title, "Acme Q3");
    assert_eq!(h.google.count(FakeOp::Share), 0);

    let wide = h
        .service
        .sync_client("acme", SyncPayload { days: Some(120) })
        .await
        .expect("wide");
    assert_eq!(wide.rows_written, 3);

    let narrow = h
        .service
        .sync_client("acme", SyncPayload { days: Some(1) })
        .await
        .expect("narrow");
    assert_eq!(narrow.rows_written, 1);
    let rows = h.google.spreadsheet(&sheet.spreadsheet_id).expect("sheet").rows;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1][0], days_ago(1).format("%Y-%m-%d").to_string());
}

#[tokio::test]
async fn expired_access_token_is_refreshed_once_and_retried() {
    let h = harness();
    seed_client(&h.service, "acme", "Acme", None, true);
    h.service.complete_authorization("acme", "code").await.expect("authorize");
    h.service
        .create_sheet("acme", CreateSheetPayload::default())
        .await
        .expect("sheet");

    // Google starts rejecting the token it issued at consent time.
    h.google.revoke_access_token("fake-access-1");
    let outcome = h
        .service
        .sync_client("acme", SyncPayload::default())
        .await
        .expect("sync after refresh");
    assert_eq!(outcome.rows_written, 2);
    assert_eq!(h.google.count(FakeOp::Refresh), 1);

    h.service
        .sync_client("acme", SyncPayload::default())
        .await
        .expect("second sync uses refreshed token");
    assert_eq!(h.google.count(FakeOp::Refresh), 1);
}

#[tokio::test]
async fn rejected_consent_code_leaves_client_unconnected() {
    let h = harness();
    seed_client(&h.service, "acme", "Acme", None, true);
    h.google.reject_code("stale-code");

    let error = h
        .service
        .complete_authorization("acme", "stale-code")
        .await
        .expect_err("rejected code");
    assert!(matches!(error, AppError::AuthExchange(_)));
    assert!(!h.service.sync_status("acme").expect("status").authenticated);
}

#[tokio::test]
async fn batch_isolates_failures_and_skips_opted_out_clients() {
    let h = harness();
    let mut sheets = Vec::new();
    for (id, name, auto_sync) in [("acme", "Acme", true), ("bravo", "Bravo", true), ("charlie", "Charlie", false)] {
        seed_client(&h.service, id, name, None, auto_sync);
        h.service.complete_authorization(id, "code").await.expect("authorize");
        let sheet = h
            .service
            .create_sheet(id, CreateSheetPayload::default())
            .await
            .expect("sheet");
        sheets.push(sheet);
    }
    h.google.fail_always(
        FakeOp::UpdateValues,
        &sheets[1].spreadsheet_id,
        ProviderError::Rejected {
            status: 500,
            message: "backend error".to_string(),
        },
    );

    let summary = h.service.run_batch().await.expect("batch");
    assert_eq!(summary.total, 2);
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.failure_count, 1);

    let acme = summary.results.iter().find(|r| r.client_id == "acme").expect("acme");
    assert!(acme.success);
    assert_eq!(acme.rows_written, Some(2));
    let bravo = summary.results.iter().find(|r| r.client_id == "bravo").expect("bravo");
    assert!(!bravo.success);
    assert_eq!(bravo.error_kind.as_deref(), Some("SyncWriteError"));
    assert!(summary.results.iter().all(|r| r.client_id != "charlie"));

    assert!(h.service.sync_status("charlie").expect("status").last_synced_at.is_none());
}

#[tokio::test]
async fn preview_matches_what_sync_writes() {
    let h = harness();
    seed_client(&h.service, "acme", "Acme", None, true);
    let rows = h.service.preview("acme", Some(7)).expect("preview");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].revenue, dec!(1000));
    assert_eq!(rows[1].roas, dec!(5));
    assert!(matches!(h.service.preview("ghost", None), Err(AppError::NotFound(_))));
}
