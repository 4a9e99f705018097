use super::error::{unauthorized, ApiError};
use super::AppState;
use crate::errors::{AppError, AppResult};
use crate::models::{
    AutoSyncPayload, CreateSheetPayload, DailyMetricPayload, FinancialProfile, NewClientPayload, SyncPayload,
};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;

type ApiResult<T> = Result<T, ApiError>;

/// Empty bodies mean "all defaults"; anything else must be valid JSON.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> AppResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    required_body(body)
}

fn required_body<T: DeserializeOwned>(body: &Bytes) -> AppResult<T> {
    serde_json::from_slice(body).map_err(|error| AppError::Invalid(format!("invalid JSON body: {error}")))
}

fn non_empty(params: &HashMap<String, String>, key: &str) -> Option<String> {
    params
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

fn days_param(params: &HashMap<String, String>) -> AppResult<Option<u32>> {
    non_empty(params, "days")
        .map(|raw| {
            raw.parse::<u32>()
                .map_err(|_| AppError::Invalid(format!("days must be a positive integer, got '{raw}'")))
        })
        .transpose()
}

/// Absolute URL under the dashboard base, with path segments escaped.
fn app_url(base: &str, segments: &[&str], query: &str) -> String {
    match reqwest::Url::parse(base) {
        Ok(mut url) => {
            if let Ok(mut path) = url.path_segments_mut() {
                path.pop_if_empty().extend(segments);
            }
            url.set_query(Some(query));
            url.to_string()
        }
        Err(_) => format!("{}/{}?{}", base.trim_end_matches('/'), segments.join("/"), query),
    }
}

pub(crate) async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub(crate) async fn google_auth(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Redirect> {
    let client_id = non_empty(&params, "clientId");
    let url = state.service.authorization_url(client_id.as_deref())?;
    Ok(Redirect::to(&url))
}

pub(crate) async fn google_callback(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let (Some(code), Some(client_id)) = (non_empty(&params, "code"), non_empty(&params, "state")) else {
        if let Some(reason) = params.get("error") {
            tracing::info!(reason = %reason, "OAuth consent was not granted");
        }
        return ApiError(AppError::Invalid("code and state are required".to_string())).into_response();
    };

    let base = state.service.config().app_base_url.as_str();
    match state.service.complete_authorization(&client_id, &code).await {
        Ok(()) => Redirect::to(&app_url(base, &["dashboard", "clients", &client_id], "connected=true")).into_response(),
        Err(error) => {
            tracing::warn!(client_id = %client_id, error = %error, "OAuth callback failed");
            Redirect::to(&app_url(base, &["dashboard"], "error=oauth_failed")).into_response()
        }
    }
}

pub(crate) async fn create_client(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let payload: NewClientPayload = required_body(&body)?;
    let client = state.service.create_client(payload)?;
    Ok((StatusCode::CREATED, Json(client)).into_response())
}

pub(crate) async fn list_clients(State(state): State<AppState>) -> ApiResult<Response> {
    Ok(Json(state.service.list_clients()?).into_response())
}

pub(crate) async fn get_client(State(state): State<AppState>, Path(client_id): Path<String>) -> ApiResult<Response> {
    Ok(Json(state.service.get_client(&client_id)?).into_response())
}

pub(crate) async fn save_financial_profile(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let profile: FinancialProfile = required_body(&body)?;
    state.service.save_financial_profile(&client_id, profile)?;
    Ok(Json(json!({ "success": true })))
}

pub(crate) async fn record_metrics(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let metrics: Vec<DailyMetricPayload> = required_body(&body)?;
    let recorded = state.service.record_daily_metrics(&client_id, metrics)?;
    Ok(Json(json!({ "success": true, "recorded": recorded })))
}

pub(crate) async fn set_auto_sync(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let payload: AutoSyncPayload = required_body(&body)?;
    state.service.set_auto_sync(&client_id, payload.enabled)?;
    Ok(Json(json!({ "success": true, "autoSyncEnabled": payload.enabled })))
}

pub(crate) async fn create_sheet(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let payload: CreateSheetPayload = optional_body(&body)?;
    let sheet = state.service.create_sheet(&client_id, payload).await?;
    Ok(Json(json!({
        "success": true,
        "spreadsheetId": sheet.spreadsheet_id,
        "spreadsheetUrl": sheet.spreadsheet_url,
        "message": "Google Sheet created successfully",
    })))
}

pub(crate) async fn sync_sheet(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let payload: SyncPayload = optional_body(&body)?;
    let outcome = state.service.sync_client(&client_id, payload).await?;
    Ok(Json(json!({
        "success": true,
        "rowsWritten": outcome.rows_written,
        "spreadsheetUrl": outcome.spreadsheet_url,
        "syncedAt": outcome.synced_at,
        "message": format!("Synced {} rows to Google Sheet", outcome.rows_written),
    })))
}

pub(crate) async fn sheet_status(State(state): State<AppState>, Path(client_id): Path<String>) -> ApiResult<Response> {
    Ok(Json(state.service.sync_status(&client_id)?).into_response())
}

pub(crate) async fn pnl_preview(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let days = days_param(&params)?;
    let rows = state.service.preview(&client_id, days)?;
    Ok(Json(json!({ "clientId": client_id, "rows": rows })))
}

pub(crate) async fn cron_sync(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if !state.service.cron_authorized(authorization) {
        tracing::warn!("rejected cron request with missing or invalid secret");
        return Ok(unauthorized());
    }
    let summary = state.service.run_batch().await?;
    Ok(Json(summary).into_response())
}
