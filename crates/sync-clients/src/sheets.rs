//! Source-B REST client (§4.2): spreadsheet discovery, range read/write,
//! and the `batchUpdate`-style structural operations the executors need
//! (column sizing, hiding, dropdown validation).

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use sync_core::mapping::SheetValue;

use crate::error::{ClientError, Result};
use crate::rate_limit::{RateLimit, TokenBucket};
use crate::retry::with_retry;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct SpreadsheetSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SheetMetadata {
    pub sheet_id: i64,
    pub title: String,
    pub column_count: i64,
}

#[derive(Debug, Clone)]
pub struct SpreadsheetMetadata {
    pub spreadsheet_id: String,
    pub sheets: Vec<SheetMetadata>,
}

/// One `batch-set-data-validation` rule (§4.2): installs a dropdown on a
/// single spreadsheet column over a row range.
#[derive(Debug, Clone)]
pub struct DataValidationRule {
    pub column_index: i64,
    pub row_start: i64,
    pub row_end: i64,
    pub allowed_values: Vec<String>,
    pub strict: bool,
    pub show_dropdown: bool,
}

pub struct SheetsClient {
    http: Client,
    base_url: String,
    bucket: std::sync::Arc<TokenBucket>,
}

impl SheetsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bucket: TokenBucket::new(RateLimit::sheets()),
        }
    }

    fn headers(&self, token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| ClientError::Validation {
                status: 0,
                message: "invalid token header".into(),
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await.map_err(ClientError::Network)?;
        if !status.is_success() {
            return Err(ClientError::from_status(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(ClientError::Json)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, token: &str, url: &str) -> Result<T> {
        let headers = self.headers(token)?;
        with_retry(|| async {
            let _permit = self.bucket.acquire().await;
            let response = self
                .http
                .get(url)
                .headers(headers.clone())
                .send()
                .await
                .map_err(ClientError::Network)?;
            Self::parse_json(response).await
        })
        .await
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        method: reqwest::Method,
        url: &str,
        body: &Value,
    ) -> Result<T> {
        let headers = self.headers(token)?;
        with_retry(|| async {
            let _permit = self.bucket.acquire().await;
            let response = self
                .http
                .request(method.clone(), url)
                .headers(headers.clone())
                .json(body)
                .send()
                .await
                .map_err(ClientError::Network)?;
            Self::parse_json(response).await
        })
        .await
    }

    pub async fn list_spreadsheets(&self, token: &str) -> Result<Vec<SpreadsheetSummary>> {
        #[derive(Deserialize)]
        struct DriveFile {
            id: String,
            name: String,
        }
        #[derive(Deserialize)]
        struct DriveListResponse {
            files: Vec<DriveFile>,
        }

        let url = format!(
            "{}/drive/v3/files?q=mimeType%3D%27application%2Fvnd.google-apps.spreadsheet%27",
            self.base_url
        );
        let response: DriveListResponse = self.get(token, &url).await?;
        Ok(response
            .files
            .into_iter()
            .map(|f| SpreadsheetSummary { id: f.id, name: f.name })
            .collect())
    }

    pub async fn get_spreadsheet_metadata(&self, token: &str, spreadsheet_id: &str) -> Result<SpreadsheetMetadata> {
        #[derive(Deserialize)]
        struct Properties {
            #[serde(rename = "sheetId")]
            sheet_id: i64,
            title: String,
            #[serde(rename = "gridProperties")]
            grid_properties: GridProperties,
        }
        #[derive(Deserialize)]
        struct GridProperties {
            #[serde(rename = "columnCount")]
            column_count: i64,
        }
        #[derive(Deserialize)]
        struct SheetEntry {
            properties: Properties,
        }
        #[derive(Deserialize)]
        struct Response {
            sheets: Vec<SheetEntry>,
        }

        let url = format!(
            "{}/v4/spreadsheets/{}?fields=sheets.properties",
            self.base_url, spreadsheet_id
        );
        let response: Response = self.get(token, &url).await?;
        Ok(SpreadsheetMetadata {
            spreadsheet_id: spreadsheet_id.to_string(),
            sheets: response
                .sheets
                .into_iter()
                .map(|s| SheetMetadata {
                    sheet_id: s.properties.sheet_id,
                    title: s.properties.title,
                    column_count: s.properties.grid_properties.column_count,
                })
                .collect(),
        })
    }

    pub async fn get_sheet_values(
        &self,
        token: &str,
        spreadsheet_id: &str,
        sheet_name: &str,
    ) -> Result<Vec<Vec<SheetValue>>> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            values: Vec<Vec<Value>>,
        }

        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.base_url,
            spreadsheet_id,
            urlencode(sheet_name)
        );
        let response: Response = self.get(token, &url).await?;
        Ok(response
            .values
            .into_iter()
            .map(|row| row.iter().map(json_to_sheet_value).collect())
            .collect())
    }

    pub async fn update_range(
        &self,
        token: &str,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<SheetValue>],
    ) -> Result<()> {
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}?valueInputOption=RAW",
            self.base_url,
            spreadsheet_id,
            urlencode(range)
        );
        let body = json!({ "values": values.iter().map(row_to_json).collect::<Vec<_>>() });
        let _: Value = self.send(token, reqwest::Method::PUT, &url, &body).await?;
        Ok(())
    }

    pub async fn append_rows(
        &self,
        token: &str,
        spreadsheet_id: &str,
        sheet_name: &str,
        values: &[Vec<SheetValue>],
    ) -> Result<()> {
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}:append?valueInputOption=RAW&insertDataOption=INSERT_ROWS",
            self.base_url,
            spreadsheet_id,
            urlencode(sheet_name)
        );
        let body = json!({ "values": values.iter().map(row_to_json).collect::<Vec<_>>() });
        let _: Value = self.send(token, reqwest::Method::POST, &url, &body).await?;
        Ok(())
    }

    pub async fn delete_rows(
        &self,
        token: &str,
        spreadsheet_id: &str,
        sheet_id: i64,
        start_index: i64,
        count: i64,
    ) -> Result<()> {
        let body = json!({
            "requests": [{
                "deleteDimension": {
                    "range": {
                        "sheetId": sheet_id,
                        "dimension": "ROWS",
                        "startIndex": start_index,
                        "endIndex": start_index + count,
                    }
                }
            }]
        });
        self.batch_update(token, spreadsheet_id, body).await
    }

    pub async fn ensure_column_count(
        &self,
        token: &str,
        spreadsheet_id: &str,
        sheet_id: i64,
        min_columns: i64,
    ) -> Result<()> {
        let body = json!({
            "requests": [{
                "updateSheetProperties": {
                    "properties": {
                        "sheetId": sheet_id,
                        "gridProperties": { "columnCount": min_columns },
                    },
                    "fields": "gridProperties.columnCount",
                }
            }]
        });
        self.batch_update(token, spreadsheet_id, body).await
    }

    pub async fn hide_column(&self, token: &str, spreadsheet_id: &str, sheet_id: i64, index: i64) -> Result<()> {
        let body = json!({
            "requests": [{
                "updateDimensionProperties": {
                    "range": {
                        "sheetId": sheet_id,
                        "dimension": "COLUMNS",
                        "startIndex": index,
                        "endIndex": index + 1,
                    },
                    "properties": { "hiddenByUser": true },
                    "fields": "hiddenByUser",
                }
            }]
        });
        self.batch_update(token, spreadsheet_id, body).await
    }

    pub async fn batch_set_data_validation(
        &self,
        token: &str,
        spreadsheet_id: &str,
        sheet_id: i64,
        rules: &[DataValidationRule],
    ) -> Result<()> {
        let requests: Vec<Value> = rules
            .iter()
            .map(|rule| {
                json!({
                    "setDataValidation": {
                        "range": {
                            "sheetId": sheet_id,
                            "startRowIndex": rule.row_start,
                            "endRowIndex": rule.row_end,
                            "startColumnIndex": rule.column_index,
                            "endColumnIndex": rule.column_index + 1,
                        },
                        "rule": {
                            "condition": {
                                "type": "ONE_OF_LIST",
                                "values": rule.allowed_values.iter().map(|v| json!({ "userEnteredValue": v })).collect::<Vec<_>>(),
                            },
                            "strict": rule.strict,
                            "showCustomUi": rule.show_dropdown,
                        }
                    }
                })
            })
            .collect();
        self.batch_update(token, spreadsheet_id, json!({ "requests": requests })).await
    }

    async fn batch_update(&self, token: &str, spreadsheet_id: &str, body: Value) -> Result<()> {
        let url = format!("{}/v4/spreadsheets/{}:batchUpdate", self.base_url, spreadsheet_id);
        let _: Value = self.send(token, reqwest::Method::POST, &url, &body).await?;
        Ok(())
    }
}

fn urlencode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

fn row_to_json(row: &Vec<SheetValue>) -> Value {
    Value::Array(row.iter().map(sheet_value_to_json).collect())
}

fn sheet_value_to_json(value: &SheetValue) -> Value {
    match value {
        SheetValue::String(s) => json!(s),
        SheetValue::Number(n) => json!(n),
        SheetValue::Bool(b) => json!(b),
        SheetValue::Empty => json!(""),
    }
}

fn json_to_sheet_value(value: &Value) -> SheetValue {
    match value {
        Value::String(s) if s.is_empty() => SheetValue::Empty,
        Value::String(s) => SheetValue::String(s.clone()),
        Value::Number(n) => SheetValue::Number(n.as_f64().unwrap_or(0.0)),
        Value::Bool(b) => SheetValue::Bool(*b),
        Value::Null => SheetValue::Empty,
        other => SheetValue::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{json_response, start_mock_server};

    #[tokio::test]
    async fn get_sheet_values_parses_mixed_primitives() {
        let response = json_response(200, r#"{"values":[["Alpha","1",true],["Beta","2",false]]}"#);
        let (base_url, server) = start_mock_server(vec![response]).await;

        let client = SheetsClient::new(&base_url);
        let rows = client
            .get_sheet_values("token", "sheet1", "Sheet1!A1:C2")
            .await
            .expect("get_sheet_values succeeds");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], SheetValue::String("Alpha".into()));
        assert_eq!(rows[1][2], SheetValue::Bool(false));

        server.abort();
    }

    #[tokio::test]
    async fn update_range_sends_values_and_succeeds() {
        let response = json_response(200, r#"{"updatedRange":"Sheet1!A1:B2"}"#);
        let (base_url, server) = start_mock_server(vec![response]).await;

        let client = SheetsClient::new(&base_url);
        let values = vec![vec![SheetValue::String("a".into()), SheetValue::Number(1.0)]];
        client
            .update_range("token", "sheet1", "Sheet1!A1:B1", &values)
            .await
            .expect("update_range succeeds");

        server.abort();
    }

    #[tokio::test]
    async fn metadata_parses_sheet_ids_and_titles() {
        let response = json_response(
            200,
            r#"{"sheets":[{"properties":{"sheetId":0,"title":"Sheet1","gridProperties":{"columnCount":26}}}]}"#,
        );
        let (base_url, server) = start_mock_server(vec![response]).await;

        let client = SheetsClient::new(&base_url);
        let metadata = client
            .get_spreadsheet_metadata("token", "sheet1")
            .await
            .expect("metadata succeeds");

        assert_eq!(metadata.sheets.len(), 1);
        assert_eq!(metadata.sheets[0].title, "Sheet1");
        assert_eq!(metadata.sheets[0].column_count, 26);

        server.abort();
    }

    #[tokio::test]
    async fn server_error_retries_then_succeeds() {
        let failing = json_response(503, r#"{"error":"unavailable"}"#);
        let ok = json_response(200, r#"{"values":[]}"#);
        let (base_url, server) = start_mock_server(vec![failing, ok]).await;

        let client = SheetsClient::new(&base_url);
        let rows = client
            .get_sheet_values("token", "sheet1", "Sheet1!A1:A1")
            .await
            .expect("retries past transient 503");

        assert!(rows.is_empty());
        server.abort();
    }
}
