//! Source-A REST client (§4.2): bases, table schema, paginated record
//! listing, and batched create/update/delete, all funneled through the
//! same parse-response/retry shape the teacher's `DeviceSyncClient` uses
//! for its cloud API calls.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use sync_core::field::{FieldType, FieldValue};

use crate::error::{ClientError, Result};
use crate::rate_limit::{RateLimit, TokenBucket};
use crate::retry::with_retry;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// §4.2: batch-create/update/delete are capped at 10 records per request.
pub const BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct AirtableBase {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirtableFieldSchema {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub options: Option<Value>,
}

impl AirtableFieldSchema {
    /// Choice names for single/multi-select, used by the executor to
    /// install dropdown data validation (§4.6.1 step 7).
    pub fn choices(&self) -> Vec<String> {
        self.options
            .as_ref()
            .and_then(|o| o.get("choices"))
            .and_then(|c| c.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|choice| choice.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Target table id for a `LinkedRecord` field, used by the linked-record
    /// resolver to locate the table it should fetch and index.
    pub fn linked_table_id(&self) -> Option<String> {
        self.options
            .as_ref()
            .and_then(|o| o.get("linkedTableId"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirtableTableSchema {
    pub id: String,
    pub name: String,
    pub primary_field_id: String,
    pub fields: Vec<AirtableFieldSchema>,
}

impl AirtableTableSchema {
    pub fn primary_field(&self) -> Option<&AirtableFieldSchema> {
        self.fields.iter().find(|f| f.id == self.primary_field_id)
    }

    pub fn field_by_id(&self, id: &str) -> Option<&AirtableFieldSchema> {
        self.fields.iter().find(|f| f.id == id)
    }
}

#[derive(Debug, Clone)]
pub struct AirtableRecord {
    pub id: String,
    pub created_time: String,
    /// Keyed by field id (not name), matching `SyncConfig::field_mapping`.
    pub fields: BTreeMap<String, FieldValue>,
}

#[derive(Debug, Default, Clone)]
pub struct ListRecordsOptions<'a> {
    pub view: Option<&'a str>,
    pub sort_field_id: Option<&'a str>,
}

pub struct AirtableClient {
    http: Client,
    base_url: String,
    bucket: std::sync::Arc<TokenBucket>,
}

impl AirtableClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bucket: TokenBucket::new(RateLimit::airtable()),
        }
    }

    fn headers(&self, token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ClientError::Validation {
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

    pub async fn list_bases(&self, token: &str) -> Result<Vec<AirtableBase>> {
        #[derive(Deserialize)]
        struct Response {
            bases: Vec<AirtableBase>,
            #[serde(default)]
            offset: Option<String>,
        }

        let mut bases = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            let mut url = format!("{}/v0/meta/bases", self.base_url);
            if let Some(ref o) = offset {
                url.push_str(&format!("?offset={o}"));
            }
            let headers = self.headers(token)?;
            let page: Response = with_retry(|| async {
                let _permit = self.bucket.acquire().await;
                let response = self
                    .http
                    .get(&url)
                    .headers(headers.clone())
                    .send()
                    .await
                    .map_err(ClientError::Network)?;
                Self::parse_json(response).await
            })
            .await?;

            bases.extend(page.bases);
            offset = page.offset;
            if offset.is_none() {
                break;
            }
        }
        Ok(bases)
    }

    pub async fn get_base_schema(&self, token: &str, base_id: &str) -> Result<Vec<AirtableTableSchema>> {
        #[derive(Deserialize)]
        struct Response {
            tables: Vec<AirtableTableSchema>,
        }

        let url = format!("{}/v0/meta/bases/{}/tables", self.base_url, base_id);
        let headers = self.headers(token)?;
        let page: Response = with_retry(|| async {
            let _permit = self.bucket.acquire().await;
            let response = self
                .http
                .get(&url)
                .headers(headers.clone())
                .send()
                .await
                .map_err(ClientError::Network)?;
            Self::parse_json(response).await
        })
        .await?;
        Ok(page.tables)
    }

    /// Pages through transparently; callers see the full record set.
    pub async fn list_records(
        &self,
        token: &str,
        base_id: &str,
        table_id: &str,
        schema: &AirtableTableSchema,
        options: ListRecordsOptions<'_>,
    ) -> Result<Vec<AirtableRecord>> {
        #[derive(Deserialize)]
        struct RawRecord {
            id: String,
            #[serde(rename = "createdTime")]
            created_time: String,
            fields: serde_json::Map<String, Value>,
        }
        #[derive(Deserialize)]
        struct Response {
            records: Vec<RawRecord>,
            #[serde(default)]
            offset: Option<String>,
        }

        let headers = self.headers(token)?;
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut url = format!("{}/v0/{}/{}?pageSize=100", self.base_url, base_id, table_id);
            if let Some(view) = options.view {
                url.push_str(&format!("&view={view}"));
            }
            if let Some(field_id) = options.sort_field_id {
                if let Some(field) = schema.field_by_id(field_id) {
                    url.push_str(&format!(
                        "&sort%5B0%5D%5Bfield%5D={}&sort%5B0%5D%5Bdirection%5D=asc",
                        urlencode(&field.name)
                    ));
                }
            }
            if let Some(ref o) = offset {
                url.push_str(&format!("&offset={o}"));
            }

            let page: Response = with_retry(|| async {
                let _permit = self.bucket.acquire().await;
                let response = self
                    .http
                    .get(&url)
                    .headers(headers.clone())
                    .send()
                    .await
                    .map_err(ClientError::Network)?;
                Self::parse_json(response).await
            })
            .await?;

            for raw in page.records {
                let mut fields = BTreeMap::new();
                for field in &schema.fields {
                    let value = raw
                        .fields
                        .get(&field.name)
                        .map(|v| parse_field_value(field.field_type, v))
                        .unwrap_or(FieldValue::Absent);
                    fields.insert(field.id.clone(), value);
                }
                records.push(AirtableRecord {
                    id: raw.id,
                    created_time: raw.created_time,
                    fields,
                });
            }

            offset = page.offset;
            if offset.is_none() {
                break;
            }
        }

        Ok(records)
    }

    pub async fn batch_create_records(
        &self,
        token: &str,
        base_id: &str,
        table_id: &str,
        schema: &AirtableTableSchema,
        records: Vec<BTreeMap<String, FieldValue>>,
    ) -> Result<Vec<String>> {
        let mut created_ids = Vec::with_capacity(records.len());
        for chunk in records.chunks(BATCH_SIZE) {
            let body = json!({
                "records": chunk.iter().map(|fields| json!({
                    "fields": fields_to_json(fields, schema),
                })).collect::<Vec<_>>(),
            });
            let ids = self.write_batch(token, base_id, table_id, reqwest::Method::POST, body).await?;
            created_ids.extend(ids);
        }
        Ok(created_ids)
    }

    pub async fn batch_update_records(
        &self,
        token: &str,
        base_id: &str,
        table_id: &str,
        schema: &AirtableTableSchema,
        updates: Vec<(String, BTreeMap<String, FieldValue>)>,
    ) -> Result<()> {
        for chunk in updates.chunks(BATCH_SIZE) {
            let body = json!({
                "records": chunk.iter().map(|(id, fields)| json!({
                    "id": id,
                    "fields": fields_to_json(fields, schema),
                })).collect::<Vec<_>>(),
            });
            self.write_batch(token, base_id, table_id, reqwest::Method::PATCH, body).await?;
        }
        Ok(())
    }

    pub async fn batch_delete_records(
        &self,
        token: &str,
        base_id: &str,
        table_id: &str,
        ids: Vec<String>,
    ) -> Result<()> {
        let headers = self.headers(token)?;
        for chunk in ids.chunks(BATCH_SIZE) {
            let query: String = chunk
                .iter()
                .map(|id| format!("records[]={id}"))
                .collect::<Vec<_>>()
                .join("&");
            let url = format!("{}/v0/{}/{}?{}", self.base_url, base_id, table_id, query);
            with_retry(|| async {
                let _permit = self.bucket.acquire().await;
                let response = self
                    .http
                    .delete(&url)
                    .headers(headers.clone())
                    .send()
                    .await
                    .map_err(ClientError::Network)?;
                Self::parse_json::<Value>(response).await
            })
            .await?;
        }
        Ok(())
    }

    async fn write_batch(
        &self,
        token: &str,
        base_id: &str,
        table_id: &str,
        method: reqwest::Method,
        body: Value,
    ) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct WriteResponse {
            records: Vec<WrittenRecord>,
        }
        #[derive(Deserialize)]
        struct WrittenRecord {
            id: String,
        }

        let url = format!("{}/v0/{}/{}", self.base_url, base_id, table_id);
        let headers = self.headers(token)?;
        let response: WriteResponse = with_retry(|| async {
            let _permit = self.bucket.acquire().await;
            let response = self
                .http
                .request(method.clone(), &url)
                .headers(headers.clone())
                .json(&body)
                .send()
                .await
                .map_err(ClientError::Network)?;
            Self::parse_json(response).await
        })
        .await?;

        Ok(response.records.into_iter().map(|r| r.id).collect())
    }
}

fn urlencode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}

fn fields_to_json(fields: &BTreeMap<String, FieldValue>, schema: &AirtableTableSchema) -> Value {
    let mut map = serde_json::Map::new();
    for (field_id, value) in fields {
        if value.is_absent() {
            continue;
        }
        let Some(field) = schema.field_by_id(field_id) else {
            continue;
        };
        if field.field_type.is_read_only() {
            continue;
        }
        map.insert(field.name.clone(), field_value_to_json(value));
    }
    Value::Object(map)
}

fn field_value_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text(s) => json!(s),
        FieldValue::Number(n) => json!(n),
        FieldValue::Bool(b) => json!(b),
        FieldValue::Date(s) | FieldValue::DateTime(s) => json!(s),
        FieldValue::SelectOne(s) => json!(s),
        FieldValue::SelectMany(items) => json!(items),
        FieldValue::LinkedIds(ids) => json!(ids),
        FieldValue::AttachmentList(urls) => json!(urls.iter().map(|u| json!({ "url": u })).collect::<Vec<_>>()),
        FieldValue::Computed(inner) => field_value_to_json(inner),
        FieldValue::Absent => Value::Null,
    }
}

/// Parses one raw Airtable field value according to its declared schema
/// type (§9: "parsed once at the External Client boundary").
fn parse_field_value(field_type: FieldType, raw: &Value) -> FieldValue {
    if raw.is_null() {
        return FieldValue::Absent;
    }
    match field_type {
        FieldType::SingleLineText
        | FieldType::LongText
        | FieldType::RichText
        | FieldType::Url
        | FieldType::Email
        | FieldType::Phone
        | FieldType::Barcode => FieldValue::Text(raw.as_str().unwrap_or_default().to_string()),

        FieldType::Number
        | FieldType::Currency
        | FieldType::Percent
        | FieldType::Rating
        | FieldType::Count
        | FieldType::AutoNumber => FieldValue::Number(raw.as_f64().unwrap_or(0.0)),

        FieldType::Checkbox => FieldValue::Bool(raw.as_bool().unwrap_or(false)),

        FieldType::Date => FieldValue::Date(raw.as_str().unwrap_or_default().to_string()),
        FieldType::DateTime | FieldType::CreatedTime | FieldType::ModifiedTime => {
            FieldValue::Computed(Box::new(FieldValue::DateTime(
                raw.as_str().unwrap_or_default().to_string(),
            )))
        }

        FieldType::SingleSelect => FieldValue::SelectOne(raw.as_str().unwrap_or_default().to_string()),
        FieldType::MultiSelect => FieldValue::SelectMany(
            raw.as_array()
                .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default(),
        ),

        FieldType::LinkedRecord => FieldValue::LinkedIds(
            raw.as_array()
                .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default(),
        ),

        FieldType::Attachments => FieldValue::AttachmentList(
            raw.as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|a| a.get("url").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        ),

        FieldType::Formula | FieldType::Rollup | FieldType::Lookup => {
            FieldValue::Computed(Box::new(json_to_best_effort(raw)))
        }

        FieldType::CreatedBy | FieldType::ModifiedBy => FieldValue::Computed(Box::new(FieldValue::Text(
            raw.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
        ))),

        FieldType::Button => FieldValue::Absent,
    }
}

fn json_to_best_effort(raw: &Value) -> FieldValue {
    match raw {
        Value::String(s) => FieldValue::Text(s.clone()),
        Value::Number(n) => FieldValue::Number(n.as_f64().unwrap_or(0.0)),
        Value::Bool(b) => FieldValue::Bool(*b),
        Value::Array(items) => FieldValue::SelectMany(
            items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        ),
        Value::Null => FieldValue::Absent,
        other => FieldValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{json_response, start_mock_server, MockOutcome};

    fn text_schema() -> AirtableTableSchema {
        AirtableTableSchema {
            id: "tbl1".into(),
            name: "Things".into(),
            primary_field_id: "fldName".into(),
            fields: vec![
                AirtableFieldSchema {
                    id: "fldName".into(),
                    name: "Name".into(),
                    field_type: FieldType::SingleLineText,
                    options: None,
                },
                AirtableFieldSchema {
                    id: "fldCount".into(),
                    name: "Count".into(),
                    field_type: FieldType::Number,
                    options: None,
                },
            ],
        }
    }

    #[tokio::test]
    async fn list_records_pages_transparently() {
        let page1 = json_response(
            200,
            r#"{"records":[{"id":"rec1","createdTime":"2024-01-01T00:00:00.000Z","fields":{"Name":"Alpha","Count":1}}],"offset":"off1"}"#,
        );
        let page2 = json_response(
            200,
            r#"{"records":[{"id":"rec2","createdTime":"2024-01-02T00:00:00.000Z","fields":{"Name":"Beta","Count":2}}]}"#,
        );
        let (base_url, server) = start_mock_server(vec![page1, page2]).await;

        let client = AirtableClient::new(&base_url);
        let schema = text_schema();
        let records = client
            .list_records("token", "base1", "tbl1", &schema, ListRecordsOptions::default())
            .await
            .expect("list_records succeeds");

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "rec1");
        assert_eq!(records[0].fields.get("fldName"), Some(&FieldValue::Text("Alpha".into())));
        assert_eq!(records[1].fields.get("fldCount"), Some(&FieldValue::Number(2.0)));

        server.abort();
    }

    #[tokio::test]
    async fn list_records_retries_after_rate_limit() {
        let limited = json_response(429, r#"{"error":{"type":"RATE_LIMIT_REACHED","message":"quota"}}"#);
        let ok = json_response(
            200,
            r#"{"records":[{"id":"rec1","createdTime":"2024-01-01T00:00:00.000Z","fields":{"Name":"Alpha","Count":1}}]}"#,
        );
        let (base_url, server) = start_mock_server(vec![limited, ok]).await;

        let client = AirtableClient::new(&base_url);
        let schema = text_schema();
        let records = client
            .list_records("token", "base1", "tbl1", &schema, ListRecordsOptions::default())
            .await
            .expect("eventually succeeds after retry");

        assert_eq!(records.len(), 1);
        server.abort();
    }

    #[tokio::test]
    async fn oauth_failure_is_not_retried() {
        let unauthorized = json_response(401, r#"{"error":{"type":"AUTHENTICATION_REQUIRED"}}"#);
        let (base_url, server) = start_mock_server(vec![unauthorized]).await;

        let client = AirtableClient::new(&base_url);
        let schema = text_schema();
        let err = client
            .list_records("token", "base1", "tbl1", &schema, ListRecordsOptions::default())
            .await
            .expect_err("401 should surface immediately");

        assert_eq!(err.status_code(), Some(401));
        server.abort();
    }

    #[tokio::test]
    async fn batch_create_chunks_at_ten_records() {
        let outcomes: Vec<MockOutcome> = (0..2)
            .map(|_| json_response(200, r#"{"records":[{"id":"recA"},{"id":"recB"}]}"#))
            .collect();
        let (base_url, server) = start_mock_server(outcomes).await;

        let client = AirtableClient::new(&base_url);
        let schema = text_schema();
        let mut records = Vec::new();
        for i in 0..12 {
            let mut fields = BTreeMap::new();
            fields.insert("fldName".to_string(), FieldValue::Text(format!("row{i}")));
            records.push(fields);
        }
        let ids = client
            .batch_create_records("token", "base1", "tbl1", &schema, records)
            .await
            .expect("batch create succeeds");

        assert_eq!(ids.len(), 4);
        server.abort();
    }
}
