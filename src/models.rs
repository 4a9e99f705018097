use crate::report::ReportLayout;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Access tokens this close to expiry are treated as already expired.
pub const TOKEN_EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    Shopify,
    Meta,
    TiktokShop,
    TiktokAds,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shopify => "SHOPIFY",
            Self::Meta => "META",
            Self::TiktokShop => "TIKTOK_SHOP",
            Self::TiktokAds => "TIKTOK_ADS",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SHOPIFY" => Some(Self::Shopify),
            "META" => Some(Self::Meta),
            "TIKTOK_SHOP" => Some(Self::TiktokShop),
            "TIKTOK_ADS" => Some(Self::TiktokAds),
            _ => None,
        }
    }

    /// Label written into the report's Platform column.
    pub fn label(self) -> &'static str {
        match self {
            Self::Shopify => "Shopify",
            Self::Meta => "Meta",
            Self::TiktokShop => "TikTok Shop",
            Self::TiktokAds => "TikTok Ads",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthCredential {
    /// A credential without a recorded expiry is used as-is; the provider's
    /// 401 is the signal to refresh in that case.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now + Duration::seconds(TOKEN_EXPIRY_SKEW_SECONDS),
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetRef {
    pub sheet_id: String,
    pub sheet_url: String,
    /// Column layout the sheet was provisioned with.
    pub layout: ReportLayout,
}

#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub sheet: Option<SheetRef>,
    pub auto_sync_enabled: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Client {
    pub fn has_tokens(&self) -> bool {
        matches!(
            (self.access_token.as_deref(), self.refresh_token.as_deref()),
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty()
        )
    }

    pub fn credential(&self) -> Option<OAuthCredential> {
        if !self.has_tokens() {
            return None;
        }
        Some(OAuthCredential {
            access_token: self.access_token.clone()?,
            refresh_token: self.refresh_token.clone()?,
            expires_at: self.token_expiry,
        })
    }
}

/// Client as exposed over the API; tokens never leave the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientView {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub auto_sync_enabled: bool,
    pub spreadsheet_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Client> for ClientView {
    fn from(client: &Client) -> Self {
        Self {
            id: client.id.clone(),
            name: client.name.clone(),
            email: client.email.clone(),
            auto_sync_enabled: client.auto_sync_enabled,
            spreadsheet_url: client.sheet.as_ref().map(|sheet| sheet.sheet_url.clone()),
            created_at: client.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSyncPayload {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClientPayload {
    pub id: Option<String>,
    pub name: String,
    pub email: Option<String>,
    #[serde(default = "default_true")]
    pub auto_sync_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialProfile {
    pub cogs_percentage: Decimal,
    pub payment_processing_fee_percentage: Decimal,
    pub merchant_account_fee_flat: Decimal,
    pub shipping_cost_per_order: Decimal,
    pub fulfillment_cost_per_order: Decimal,
    pub target_margin_percentage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetric {
    pub client_id: String,
    pub date: NaiveDate,
    pub platform: Platform,
    pub revenue: Decimal,
    pub orders: i64,
    pub ad_spend: Decimal,
    pub impressions: i64,
    pub clicks: i64,
}

/// Inbound metric row; the client comes from the request path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetricPayload {
    pub date: NaiveDate,
    pub platform: Platform,
    pub revenue: Decimal,
    pub orders: i64,
    pub ad_spend: Decimal,
    #[serde(default)]
    pub impressions: i64,
    #[serde(default)]
    pub clicks: i64,
}

impl DailyMetricPayload {
    pub fn into_metric(self, client_id: &str) -> DailyMetric {
        DailyMetric {
            client_id: client_id.to_string(),
            date: self.date,
            platform: self.platform,
            revenue: self.revenue,
            orders: self.orders,
            ad_spend: self.ad_spend,
            impressions: self.impressions,
            clicks: self.clicks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusTier {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum RoasTarget {
    Value(Decimal),
    /// Target margin cannot be met at any ad spend (`cpaTarget <= 0`).
    Unattainable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedRow {
    pub date: NaiveDate,
    pub platform: Option<Platform>,
    pub revenue: Decimal,
    pub orders: i64,
    pub ad_spend: Decimal,
    pub aov: Decimal,
    pub roas: Decimal,
    pub cpa: Decimal,
    pub cost_per_order: Decimal,
    pub profit_per_order: Decimal,
    pub net_margin: Decimal,
    pub margin_percentage: Decimal,
    pub cpa_target: Decimal,
    pub roas_target: RoasTarget,
    pub status_tier: StatusTier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedSheet {
    pub spreadsheet_id: String,
    pub spreadsheet_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub rows_written: usize,
    pub spreadsheet_url: String,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSyncResult {
    pub client_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_written: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<ClientSyncResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSheetPayload {
    pub sheet_title: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub client_id: String,
    pub authenticated: bool,
    pub spreadsheet_id: Option<String>,
    pub spreadsheet_url: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub auto_sync_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::{Client, OAuthCredential, Platform};
    use chrono::{Duration, Utc};

    fn client_with_tokens(access: Option<&str>, refresh: Option<&str>) -> Client {
        let now = Utc::now();
        Client {
            id: "client-1".to_string(),
            name: "Acme".to_string(),
            email: None,
            access_token: access.map(ToString::to_string),
            refresh_token: refresh.map(ToString::to_string),
            token_expiry: Some(now - Duration::hours(3)),
            sheet: None,
            auto_sync_enabled: true,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn tokens_required_regardless_of_expiry() {
        assert!(client_with_tokens(Some("a"), Some("r")).has_tokens());
        assert!(!client_with_tokens(Some("a"), None).has_tokens());
        assert!(!client_with_tokens(None, Some("r")).has_tokens());
        assert!(!client_with_tokens(Some(""), Some("r")).has_tokens());
    }

    #[test]
    fn expiry_uses_skew_and_tolerates_missing_expiry() {
        let now = Utc::now();
        let mut credential = OAuthCredential {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: Some(now + Duration::seconds(30)),
        };
        assert!(credential.is_expired(now));
        credential.expires_at = Some(now + Duration::minutes(10));
        assert!(!credential.is_expired(now));
        credential.expires_at = None;
        assert!(!credential.is_expired(now));
    }

    #[test]
    fn platform_codes_round_trip() {
        for platform in [Platform::Shopify, Platform::Meta, Platform::TiktokShop, Platform::TiktokAds] {
            assert_eq!(Platform::parse(platform.as_str()), Some(platform));
        }
        assert_eq!(Platform::parse("GOOGLE"), None);
    }
}
