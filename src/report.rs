//! Report sheet layout shared by provisioning and sync.
//!
//! The provisioner's conditional-format rules and the sync's row writer both
//! read column positions and status tokens from here, so they cannot drift.

use crate::models::{DerivedRow, StatusTier};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const REPORT_TAB_TITLE: &str = "Daily P&L";
pub const REPORT_LOCALE: &str = "en_US";
pub const REPORT_TIME_ZONE: &str = "America/New_York";
/// Provisioned sheets always carry the report on the first tab.
pub const REPORT_SHEET_ID: u32 = 0;

pub const STATUS_GOOD: &str = "Good";
pub const STATUS_WARNING: &str = "Warning";
pub const STATUS_CRITICAL: &str = "Critical";

const DAILY_HEADERS: &[&str] = &[
    "Date",
    "Revenue",
    "Orders",
    "AOV",
    "Ad Spend",
    "ROAS",
    "CPA",
    "Margin ($)",
    "Margin (%)",
    "Status",
];

const PLATFORM_HEADERS: &[&str] = &[
    "Date",
    "Platform",
    "Revenue",
    "Orders",
    "AOV",
    "Ad Spend",
    "ROAS",
    "CPA",
    "Margin ($)",
    "Margin (%)",
    "Status",
];

pub fn status_token(tier: StatusTier) -> &'static str {
    match tier {
        StatusTier::Green => STATUS_GOOD,
        StatusTier::Yellow => STATUS_WARNING,
        StatusTier::Red => STATUS_CRITICAL,
    }
}

pub fn default_sheet_title(client_name: &str) -> String {
    format!("{client_name} - {REPORT_TAB_TITLE}")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportLayout {
    /// One row per date, all platforms summed.
    #[default]
    Daily,
    /// One row per date and platform.
    DailyByPlatform,
}

impl ReportLayout {
    pub fn from_flag(by_platform: bool) -> Self {
        if by_platform {
            Self::DailyByPlatform
        } else {
            Self::Daily
        }
    }

    /// Stored alongside the sheet reference so sync writes the columns the
    /// sheet was provisioned with.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::DailyByPlatform => "daily_by_platform",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "daily" => Some(Self::Daily),
            "daily_by_platform" => Some(Self::DailyByPlatform),
            _ => None,
        }
    }

    pub fn headers(self) -> &'static [&'static str] {
        match self {
            Self::Daily => DAILY_HEADERS,
            Self::DailyByPlatform => PLATFORM_HEADERS,
        }
    }

    pub fn column_count(self) -> usize {
        self.headers().len()
    }

    pub fn status_column(self) -> usize {
        self.column_count() - 1
    }

    fn last_column_letter(self) -> char {
        // Layouts never exceed 26 columns.
        char::from(b'A' + (self.column_count() - 1) as u8)
    }

    pub fn header_range(self) -> String {
        format!("'{REPORT_TAB_TITLE}'!A1:{}1", self.last_column_letter())
    }

    /// First data cell; rows are written from the row right after the header.
    pub fn data_start_range(self) -> String {
        format!("'{REPORT_TAB_TITLE}'!A2")
    }

    /// Every data row below the header, across the layout's columns.
    pub fn data_clear_range(self) -> String {
        format!("'{REPORT_TAB_TITLE}'!A2:{}", self.last_column_letter())
    }

    pub fn header_row(self) -> Vec<String> {
        self.headers().iter().map(|header| header.to_string()).collect()
    }

    pub fn render_row(self, row: &DerivedRow) -> Vec<String> {
        let mut cells = Vec::with_capacity(self.column_count());
        cells.push(row.date.format("%Y-%m-%d").to_string());
        if self == Self::DailyByPlatform {
            cells.push(row.platform.map(|platform| platform.label()).unwrap_or_default().to_string());
        }
        cells.push(two_places(row.revenue));
        cells.push(row.orders.to_string());
        cells.push(two_places(row.aov));
        cells.push(two_places(row.ad_spend));
        cells.push(two_places(row.roas));
        cells.push(two_places(row.cpa));
        cells.push(two_places(row.net_margin));
        cells.push(two_places(row.margin_percentage));
        cells.push(status_token(row.status_tier).to_string());
        cells
    }

    pub fn render_rows(self, rows: &[DerivedRow]) -> Vec<Vec<String>> {
        rows.iter().map(|row| self.render_row(row)).collect()
    }

    /// `batchUpdate` requests applied once at provisioning: header styling,
    /// auto-sized columns, and one tint rule per status token.
    pub fn formatting_requests(self) -> Vec<Value> {
        let columns = self.column_count();
        let status = self.status_column();

        let mut requests = vec![
            json!({
                "repeatCell": {
                    "range": {
                        "sheetId": REPORT_SHEET_ID,
                        "startRowIndex": 0,
                        "endRowIndex": 1,
                    },
                    "cell": {
                        "userEnteredFormat": {
                            "backgroundColor": { "red": 0.2, "green": 0.2, "blue": 0.2 },
                            "textFormat": {
                                "foregroundColor": { "red": 1.0, "green": 1.0, "blue": 1.0 },
                                "fontSize": 11,
                                "bold": true,
                            },
                            "horizontalAlignment": "CENTER",
                        }
                    },
                    "fields": "userEnteredFormat(backgroundColor,textFormat,horizontalAlignment)",
                }
            }),
            json!({
                "autoResizeDimensions": {
                    "dimensions": {
                        "sheetId": REPORT_SHEET_ID,
                        "dimension": "COLUMNS",
                        "startIndex": 0,
                        "endIndex": columns,
                    }
                }
            }),
        ];

        let tints = [
            (STATUS_GOOD, (0.72, 0.88, 0.8)),
            (STATUS_WARNING, (1.0, 0.95, 0.8)),
            (STATUS_CRITICAL, (0.96, 0.8, 0.8)),
        ];
        for (index, (token, (red, green, blue))) in tints.into_iter().enumerate() {
            requests.push(json!({
                "addConditionalFormatRule": {
                    "rule": {
                        "ranges": [{
                            "sheetId": REPORT_SHEET_ID,
                            "startRowIndex": 1,
                            "startColumnIndex": status,
                            "endColumnIndex": status + 1,
                        }],
                        "booleanRule": {
                            "condition": {
                                "type": "TEXT_EQ",
                                "values": [{ "userEnteredValue": token }],
                            },
                            "format": {
                                "backgroundColor": { "red": red, "green": green, "blue": blue },
                                "textFormat": { "bold": true },
                            },
                        },
                    },
                    "index": index,
                }
            }));
        }
        requests
    }
}

/// Half-away-from-zero to two places, always printed with two decimals.
fn two_places(value: Decimal) -> String {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    if rounded.is_zero() {
        rounded.set_sign_positive(true);
    }
    rounded.to_string()
}
