//! In-memory stand-in for Google's OAuth, Sheets and Drive endpoints.
//!
//! Keeps a grid per spreadsheet so callers can assert on what a sync
//! actually left behind, and supports one-shot or sticky failure injection.

use super::{CreatedSpreadsheet, NewSpreadsheet, OAuthProvider, ProviderError, SheetsApi, TokenGrant};
use crate::errors::AppResult;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    Exchange,
    Refresh,
    Create,
    BatchUpdate,
    UpdateValues,
    ClearValues,
    Share,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FakeSpreadsheet {
    pub title: String,
    pub tab_title: String,
    pub locale: String,
    pub time_zone: String,
    /// `rows[0]` is sheet row 1.
    pub rows: Vec<Vec<String>>,
    pub formatting: Vec<serde_json::Value>,
    pub shared_with: Vec<String>,
}

#[derive(Default)]
struct FakeState {
    issued: u64,
    spreadsheets: BTreeMap<String, FakeSpreadsheet>,
    revoked_access: HashSet<String>,
    revoked_refresh: HashSet<String>,
    rejected_codes: HashSet<String>,
    one_shot_failures: HashMap<FakeOp, VecDeque<ProviderError>>,
    sticky_failures: HashMap<(FakeOp, String), ProviderError>,
    calls: Vec<FakeOp>,
    rotate_refresh_tokens: bool,
    refresh_delay: Option<Duration>,
    write_delay: Option<Duration>,
    writes_in_flight: HashMap<String, usize>,
    max_writes_in_flight: HashMap<String, usize>,
}

#[derive(Default)]
pub struct FakeGoogle {
    state: Mutex<FakeState>,
}

impl FakeGoogle {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fails the next call of `op`, whatever its target.
    pub fn fail_next(&self, op: FakeOp, error: ProviderError) {
        self.state().one_shot_failures.entry(op).or_default().push_back(error);
    }

    /// Fails every call of `op` against `target` (a spreadsheet id, or the
    /// spreadsheet title for `Create`).
    pub fn fail_always(&self, op: FakeOp, target: &str, error: ProviderError) {
        self.state().sticky_failures.insert((op, target.to_string()), error);
    }

    pub fn revoke_access_token(&self, access_token: &str) {
        self.state().revoked_access.insert(access_token.to_string());
    }

    pub fn revoke_refresh_token(&self, refresh_token: &str) {
        self.state().revoked_refresh.insert(refresh_token.to_string());
    }

    pub fn reject_code(&self, code: &str) {
        self.state().rejected_codes.insert(code.to_string());
    }

    pub fn rotate_refresh_tokens(&self, rotate: bool) {
        self.state().rotate_refresh_tokens = rotate;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.state().refresh_delay = Some(delay);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.state().write_delay = Some(delay);
    }

    pub fn count(&self, op: FakeOp) -> usize {
        self.state().calls.iter().filter(|call| **call == op).count()
    }

    pub fn spreadsheet(&self, spreadsheet_id: &str) -> Option<FakeSpreadsheet> {
        self.state().spreadsheets.get(spreadsheet_id).cloned()
    }

    pub fn spreadsheet_count(&self) -> usize {
        self.state().spreadsheets.len()
    }

    /// Highest number of clear/write calls seen in flight at once for one
    /// spreadsheet.
    pub fn max_concurrent_writes(&self, spreadsheet_id: &str) -> usize {
        self.state()
            .max_writes_in_flight
            .get(spreadsheet_id)
            .copied()
            .unwrap_or(0)
    }

    fn record(
        &self,
        op: FakeOp,
        access_token: Option<&str>,
        target: Option<&str>,
    ) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.calls.push(op);

        if let Some(token) = access_token {
            if state.revoked_access.contains(token) {
                return Err(ProviderError::Unauthorized("Request had invalid authentication credentials.".to_string()));
            }
        }
        if let Some(error) = state.one_shot_failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        if let Some(target) = target {
            if let Some(error) = state.sticky_failures.get(&(op, target.to_string())) {
                return Err(error.clone());
            }
        }
        Ok(())
    }

    fn issue(&self, keep_refresh: bool) -> TokenGrant {
        let mut state = self.state();
        state.issued += 1;
        let serial = state.issued;
        let refresh_token = if keep_refresh && !state.rotate_refresh_tokens {
            None
        } else {
            Some(format!("fake-refresh-{serial}"))
        };
        TokenGrant {
            access_token: format!("fake-access-{serial}"),
            refresh_token,
            expires_in: Some(3600),
        }
    }

    async fn guarded_write<F>(&self, spreadsheet_id: &str, apply: F) -> Result<(), ProviderError>
    where
        F: FnOnce(&mut FakeSpreadsheet),
    {
        let delay = {
            let mut state = self.state();
            let in_flight = state.writes_in_flight.entry(spreadsheet_id.to_string()).or_insert(0);
            *in_flight += 1;
            let current = *in_flight;
            let max = state.max_writes_in_flight.entry(spreadsheet_id.to_string()).or_insert(0);
            *max = (*max).max(current);
            state.write_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(in_flight) = state.writes_in_flight.get_mut(spreadsheet_id) {
            *in_flight = in_flight.saturating_sub(1);
        }
        let sheet = state
            .spreadsheets
            .get_mut(spreadsheet_id)
            .ok_or_else(|| ProviderError::Rejected {
                status: 404,
                message: format!("Requested entity was not found: {spreadsheet_id}"),
            })?;
        apply(sheet);
        Ok(())
    }
}

/// 1-based start row of an A1 range such as `'Daily P&L'!A2:K`.
fn start_row(range: &str) -> usize {
    let cells = range.rsplit('!').next().unwrap_or(range);
    let first = cells.split(':').next().unwrap_or(cells);
    first
        .trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .parse::<usize>()
        .unwrap_or(1)
        .max(1)
}

#[async_trait]
impl OAuthProvider for FakeGoogle {
    fn authorization_url(&self, state: &str) -> AppResult<String> {
        Ok(format!("https://accounts.example.test/o/oauth2/auth?state={state}"))
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError> {
        self.record(FakeOp::Exchange, None, Some(code))?;
        if self.state().rejected_codes.contains(code) {
            return Err(ProviderError::Rejected {
                status: 400,
                message: "invalid_grant: Malformed auth code.".to_string(),
            });
        }
        Ok(self.issue(false))
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        self.record(FakeOp::Refresh, None, Some(refresh_token))?;
        let delay = self.state().refresh_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state().revoked_refresh.contains(refresh_token) {
            return Err(ProviderError::Rejected {
                status: 400,
                message: "invalid_grant: Token has been expired or revoked.".to_string(),
            });
        }
        Ok(self.issue(true))
    }
}

#[async_trait]
impl SheetsApi for FakeGoogle {
    async fn create_spreadsheet(
        &self,
        access_token: &str,
        new_sheet: &NewSpreadsheet,
    ) -> Result<CreatedSpreadsheet, ProviderError> {
        self.record(FakeOp::Create, Some(access_token), Some(&new_sheet.title))?;
        let mut state = self.state();
        state.issued += 1;
        let spreadsheet_id = format!("fake-sheet-{}", state.issued);
        state.spreadsheets.insert(
            spreadsheet_id.clone(),
            FakeSpreadsheet {
                title: new_sheet.title.clone(),
                tab_title: new_sheet.tab_title.clone(),
                locale: new_sheet.locale.clone(),
                time_zone: new_sheet.time_zone.clone(),
                ..FakeSpreadsheet::default()
            },
        );
        Ok(CreatedSpreadsheet {
            spreadsheet_url: format!("https://docs.google.com/spreadsheets/d/{spreadsheet_id}/edit"),
            spreadsheet_id,
        })
    }

    async fn batch_update(
        &self,
        access_token: &str,
        spreadsheet_id: &str,
        requests: &[serde_json::Value],
    ) -> Result<(), ProviderError> {
        self.record(FakeOp::BatchUpdate, Some(access_token), Some(spreadsheet_id))?;
        let requests = requests.to_vec();
        self.guarded_write(spreadsheet_id, move |sheet| sheet.formatting.extend(requests))
            .await
    }

    async fn update_values(
        &self,
        access_token: &str,
        spreadsheet_id: &str,
        range: &str,
        rows: &[Vec<String>],
    ) -> Result<(), ProviderError> {
        self.record(FakeOp::UpdateValues, Some(access_token), Some(spreadsheet_id))?;
        let offset = start_row(range) - 1;
        let rows = rows.to_vec();
        self.guarded_write(spreadsheet_id, move |sheet| {
            if sheet.rows.len() < offset + rows.len() {
                sheet.rows.resize(offset + rows.len(), Vec::new());
            }
            for (index, row) in rows.into_iter().enumerate() {
                sheet.rows[offset + index] = row;
            }
        })
        .await
    }

    async fn clear_values(&self, access_token: &str, spreadsheet_id: &str, range: &str) -> Result<(), ProviderError> {
        self.record(FakeOp::ClearValues, Some(access_token), Some(spreadsheet_id))?;
        let keep = start_row(range) - 1;
        self.guarded_write(spreadsheet_id, move |sheet| sheet.rows.truncate(keep))
            .await
    }

    async fn share_with_writer(&self, access_token: &str, file_id: &str, email: &str) -> Result<(), ProviderError> {
        self.record(FakeOp::Share, Some(access_token), Some(file_id))?;
        let email = email.to_string();
        self.guarded_write(file_id, move |sheet| sheet.shared_with.push(email))
            .await
    }
}
