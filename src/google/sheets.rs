use super::{CreatedSpreadsheet, NewSpreadsheet, ProviderError, SheetsApi};
use crate::config::ServiceConfig;
use crate::errors::{AppError, AppResult};
use crate::redaction::Redactor;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde_json::json;

pub struct GoogleSheetsClient {
    http: reqwest::Client,
    sheets_base: Url,
    drive_base: Url,
    redactor: Redactor,
}

impl GoogleSheetsClient {
    pub fn new(config: &ServiceConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|error| AppError::Internal(format!("failed to build Sheets HTTP client: {error}")))?;
        let sheets_base = Url::parse(&config.sheets_api_base)
            .map_err(|error| AppError::Invalid(format!("invalid Sheets API base URL: {error}")))?;
        let drive_base = Url::parse(&config.drive_api_base)
            .map_err(|error| AppError::Invalid(format!("invalid Drive API base URL: {error}")))?;
        Ok(Self {
            http,
            sheets_base,
            drive_base,
            redactor: Redactor::new(true),
        })
    }

    /// Appends path segments to `base`; each segment is percent-encoded, so
    /// ranges like `'Daily P&L'!A2:K` are safe to pass through.
    fn endpoint(&self, base: &Url, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::Transport(format!("base URL cannot carry a path: {base}")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn spreadsheet_url(&self, spreadsheet_id: &str, tail: &[&str]) -> Result<Url, ProviderError> {
        let mut segments = vec!["v4", "spreadsheets"];
        segments.push(spreadsheet_id);
        segments.extend_from_slice(tail);
        self.endpoint(&self.sheets_base, &segments)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, ProviderError> {
        let response = request
            .send()
            .await
            .map_err(|error| ProviderError::Transport(self.redactor.scrub(&error.to_string())))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| {
                value
                    .pointer("/error/message")
                    .and_then(|message| message.as_str())
                    .map(ToString::to_string)
            })
            .unwrap_or(body);
        let message = self.redactor.scrub(&message);

        Err(match status {
            StatusCode::UNAUTHORIZED => ProviderError::Unauthorized(message),
            _ => ProviderError::Rejected {
                status: status.as_u16(),
                message,
            },
        })
    }
}

#[async_trait]
impl SheetsApi for GoogleSheetsClient {
    async fn create_spreadsheet(
        &self,
        access_token: &str,
        new_sheet: &NewSpreadsheet,
    ) -> Result<CreatedSpreadsheet, ProviderError> {
        let url = self.endpoint(&self.sheets_base, &["v4", "spreadsheets"])?;
        let body = json!({
            "properties": {
                "title": new_sheet.title,
                "locale": new_sheet.locale,
                "timeZone": new_sheet.time_zone,
            },
            "sheets": [{
                "properties": {
                    "sheetId": 0,
                    "title": new_sheet.tab_title,
                    "gridProperties": { "frozenRowCount": 1 },
                }
            }],
        });
        let response = self.execute(self.http.post(url).bearer_auth(access_token).json(&body)).await?;
        response
            .json::<CreatedSpreadsheet>()
            .await
            .map_err(|error| ProviderError::Transport(format!("invalid create response: {error}")))
    }

    async fn batch_update(
        &self,
        access_token: &str,
        spreadsheet_id: &str,
        requests: &[serde_json::Value],
    ) -> Result<(), ProviderError> {
        let target = format!("{spreadsheet_id}:batchUpdate");
        let url = self.endpoint(&self.sheets_base, &["v4", "spreadsheets", &target])?;
        self.execute(
            self.http
                .post(url)
                .bearer_auth(access_token)
                .json(&json!({ "requests": requests })),
        )
        .await?;
        Ok(())
    }

    async fn update_values(
        &self,
        access_token: &str,
        spreadsheet_id: &str,
        range: &str,
        rows: &[Vec<String>],
    ) -> Result<(), ProviderError> {
        let mut url = self.spreadsheet_url(spreadsheet_id, &["values", range])?;
        url.query_pairs_mut().append_pair("valueInputOption", "USER_ENTERED");
        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": rows,
        });
        self.execute(self.http.put(url).bearer_auth(access_token).json(&body)).await?;
        Ok(())
    }

    async fn clear_values(&self, access_token: &str, spreadsheet_id: &str, range: &str) -> Result<(), ProviderError> {
        let target = format!("{range}:clear");
        let url = self.spreadsheet_url(spreadsheet_id, &["values", &target])?;
        self.execute(self.http.post(url).bearer_auth(access_token).json(&json!({}))).await?;
        Ok(())
    }

    async fn share_with_writer(&self, access_token: &str, file_id: &str, email: &str) -> Result<(), ProviderError> {
        let mut url = self.endpoint(&self.drive_base, &["drive", "v3", "files", file_id, "permissions"])?;
        url.query_pairs_mut().append_pair("sendNotificationEmail", "true");
        let body = json!({
            "type": "user",
            "role": "writer",
            "emailAddress": email,
        });
        self.execute(self.http.post(url).bearer_auth(access_token).json(&body)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::GoogleSheetsClient;
    use crate::config::ServiceConfig;

    #[test]
    fn value_ranges_are_encoded_as_a_single_path_segment() {
        let client = GoogleSheetsClient::new(&ServiceConfig::default()).expect("sheets client");
        let url = client
            .spreadsheet_url("sheet-1", &["values", "'Daily P&L'!A2:K:clear"])
            .expect("url");
        assert!(url
            .as_str()
            .starts_with("https://sheets.googleapis.com/v4/spreadsheets/sheet-1/values/"));
        assert!(url.as_str().contains("Daily%20P&L"));
        assert_eq!(url.path_segments().map(|segments| segments.count()), Some(5));
    }

    #[test]
    fn rejects_unusable_base_url() {
        let config = ServiceConfig {
            sheets_api_base: "not a url".to_string(),
            ..ServiceConfig::default()
        };
        assert!(GoogleSheetsClient::new(&config).is_err());
    }
}
