use crate::errors::{AppError, AppResult};
use crate::models::{DailyMetric, FinancialProfile, NewClientPayload};
use rust_decimal::Decimal;

const MIN_WINDOW_DAYS: u32 = 1;
const MAX_WINDOW_DAYS: u32 = 365;
const MAX_SHEET_TITLE_CHARS: usize = 100;
const MAX_CLIENT_ID_CHARS: usize = 128;
const MAX_CLIENT_NAME_CHARS: usize = 200;

/// Bounds applied to caller input before it reaches the sync pipeline.
#[derive(Debug, Clone)]
pub struct RequestPolicy {
    default_window_days: u32,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self::new(crate::sync::DEFAULT_WINDOW_DAYS)
    }
}

impl RequestPolicy {
    pub fn new(default_window_days: u32) -> Self {
        Self {
            default_window_days: default_window_days.clamp(MIN_WINDOW_DAYS, MAX_WINDOW_DAYS),
        }
    }

    pub fn default_window_days(&self) -> u32 {
        self.default_window_days
    }

    pub fn window_days(&self, requested: Option<u32>) -> AppResult<u32> {
        let days = requested.unwrap_or(self.default_window_days);
        if !(MIN_WINDOW_DAYS..=MAX_WINDOW_DAYS).contains(&days) {
            return Err(AppError::Invalid(format!(
                "days {} is out of allowed range ({}..={})",
                days, MIN_WINDOW_DAYS, MAX_WINDOW_DAYS
            )));
        }
        Ok(days)
    }

    /// Blank titles mean "use the default title".
    pub fn sheet_title(&self, requested: Option<&str>) -> AppResult<Option<String>> {
        let Some(title) = requested.map(str::trim).filter(|title| !title.is_empty()) else {
            return Ok(None);
        };
        if title.chars().count() > MAX_SHEET_TITLE_CHARS {
            return Err(AppError::Invalid(format!(
                "sheetTitle exceeds {} characters",
                MAX_SHEET_TITLE_CHARS
            )));
        }
        if title.chars().any(char::is_control) {
            return Err(AppError::Invalid("sheetTitle contains control characters".to_string()));
        }
        Ok(Some(title.to_string()))
    }

    pub fn client_id<'a>(&self, client_id: Option<&'a str>) -> AppResult<&'a str> {
        let client_id = client_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Invalid("clientId is required".to_string()))?;
        if client_id.len() > MAX_CLIENT_ID_CHARS {
            return Err(AppError::Invalid(format!(
                "clientId exceeds {} characters",
                MAX_CLIENT_ID_CHARS
            )));
        }
        Ok(client_id)
    }

    pub fn new_client(&self, payload: &NewClientPayload) -> AppResult<()> {
        let name = payload.name.trim();
        if name.is_empty() {
            return Err(AppError::Invalid("client name is required".to_string()));
        }
        if name.chars().count() > MAX_CLIENT_NAME_CHARS {
            return Err(AppError::Invalid(format!(
                "client name exceeds {} characters",
                MAX_CLIENT_NAME_CHARS
            )));
        }
        if let Some(id) = payload.id.as_deref() {
            self.client_id(Some(id))?;
        }
        if let Some(email) = payload.email.as_deref().map(str::trim).filter(|email| !email.is_empty()) {
            if !email.contains('@') || email.contains(char::is_whitespace) {
                return Err(AppError::Invalid(format!("'{}' is not an email address", email)));
            }
        }
        Ok(())
    }

    pub fn financial_profile(&self, profile: &FinancialProfile) -> AppResult<()> {
        let percentages = [
            ("cogsPercentage", profile.cogs_percentage),
            ("paymentProcessingFeePercentage", profile.payment_processing_fee_percentage),
            ("targetMarginPercentage", profile.target_margin_percentage),
        ];
        for (field, value) in percentages {
            if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
                return Err(AppError::Invalid(format!("{} must be within 0..=100", field)));
            }
        }

        let amounts = [
            ("merchantAccountFeeFlat", profile.merchant_account_fee_flat),
            ("shippingCostPerOrder", profile.shipping_cost_per_order),
            ("fulfillmentCostPerOrder", profile.fulfillment_cost_per_order),
        ];
        for (field, value) in amounts {
            if value < Decimal::ZERO {
                return Err(AppError::Invalid(format!("{} must not be negative", field)));
            }
        }
        Ok(())
    }

    pub fn daily_metric(&self, metric: &DailyMetric) -> AppResult<()> {
        if metric.revenue < Decimal::ZERO || metric.ad_spend < Decimal::ZERO {
            return Err(AppError::Invalid("revenue and adSpend must not be negative".to_string()));
        }
        if metric.orders < 0 || metric.impressions < 0 || metric.clicks < 0 {
            return Err(AppError::Invalid(
                "orders, impressions and clicks must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}
