//! KPI derivation from raw daily platform metrics.
//!
//! All arithmetic is exact decimal; rounding happens only when a row is
//! rendered for the report.

use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{DailyMetric, DerivedRow, FinancialProfile, Platform, RoasTarget, StatusTier};
use crate::report::ReportLayout;
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Share of the target margin at which a row drops from YELLOW to RED.
fn warning_band() -> Decimal {
    Decimal::new(9, 1)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Totals {
    revenue: Decimal,
    orders: i64,
    ad_spend: Decimal,
}

#[derive(Clone)]
pub struct MetricsAggregator {
    db: Arc<Database>,
}

impl MetricsAggregator {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Rows for `[today - window_days, today]`, ascending by date.
    pub fn compute(&self, client_id: &str, window_days: u32, layout: ReportLayout) -> AppResult<Vec<DerivedRow>> {
        self.compute_as_of(client_id, window_days, layout, Utc::now().date_naive())
    }

    pub fn compute_as_of(
        &self,
        client_id: &str,
        window_days: u32,
        layout: ReportLayout,
        today: NaiveDate,
    ) -> AppResult<Vec<DerivedRow>> {
        let profile = self.db.get_financial_profile(client_id)?.ok_or_else(|| {
            AppError::NotFound(format!("client {client_id} has no financial profile"))
        })?;
        let from = today - Duration::days(i64::from(window_days));
        let metrics = self.db.list_daily_metrics(client_id, from, today)?;
        Ok(aggregate(&metrics, &profile, layout))
    }
}

/// Groups metrics by date (and platform, for the per-platform layout) and
/// derives one row per group. Output is ordered by date, then platform.
pub fn aggregate(metrics: &[DailyMetric], profile: &FinancialProfile, layout: ReportLayout) -> Vec<DerivedRow> {
    let mut groups: BTreeMap<(NaiveDate, Option<Platform>), Totals> = BTreeMap::new();
    for metric in metrics {
        let platform = match layout {
            ReportLayout::Daily => None,
            ReportLayout::DailyByPlatform => Some(metric.platform),
        };
        let totals = groups.entry((metric.date, platform)).or_default();
        totals.revenue += metric.revenue;
        totals.orders += metric.orders;
        totals.ad_spend += metric.ad_spend;
    }

    groups
        .into_iter()
        .map(|((date, platform), totals)| {
            derive_row(date, platform, totals.revenue, totals.orders, totals.ad_spend, profile)
        })
        .collect()
}

pub fn derive_row(
    date: NaiveDate,
    platform: Option<Platform>,
    revenue: Decimal,
    orders: i64,
    ad_spend: Decimal,
    profile: &FinancialProfile,
) -> DerivedRow {
    let order_count = Decimal::from(orders);

    let aov = safe_div(revenue, order_count);
    let roas = safe_div(revenue, ad_spend);
    let cpa = safe_div(ad_spend, order_count);

    let cost_per_order = aov * profile.cogs_percentage / HUNDRED
        + aov * profile.payment_processing_fee_percentage / HUNDRED
        + profile.merchant_account_fee_flat
        + profile.shipping_cost_per_order
        + profile.fulfillment_cost_per_order;
    let profit_per_order = aov - cost_per_order - cpa;
    let margin_percentage = safe_div(profit_per_order, aov) * HUNDRED;

    let target_profit = aov * profile.target_margin_percentage / HUNDRED;
    let cpa_target = aov - cost_per_order - target_profit;
    let roas_target = if cpa_target > Decimal::ZERO {
        RoasTarget::Value(aov / cpa_target)
    } else {
        RoasTarget::Unattainable
    };

    DerivedRow {
        date,
        platform,
        revenue,
        orders,
        ad_spend,
        aov,
        roas,
        cpa,
        cost_per_order,
        profit_per_order,
        net_margin: profit_per_order * order_count,
        margin_percentage,
        cpa_target,
        roas_target,
        status_tier: classify(margin_percentage, profile.target_margin_percentage),
    }
}

/// GREEN at or above target, YELLOW down to 90% of target (inclusive),
/// RED below that.
pub fn classify(margin_percentage: Decimal, target_margin_percentage: Decimal) -> StatusTier {
    if margin_percentage >= target_margin_percentage {
        StatusTier::Green
    } else if margin_percentage >= target_margin_percentage * warning_band() {
        StatusTier::Yellow
    } else {
        StatusTier::Red
    }
}

fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}
