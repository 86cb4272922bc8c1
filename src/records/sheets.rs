//! Google Sheets-backed [`RecordStore`].
//!
//! Two worksheets of one spreadsheet are used:
//!
//! | Worksheet | Columns |
//! |-----------|---------|
//! | `users` | A: user id, B: constitution label |
//! | `diagnoses` | A: timestamp, B: user id, C: symptom, D: label, E: summary |
//!
//! Rows are only ever appended. The spreadsheet is addressed by id, or
//! looked up by name through the Drive files API on first use.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{tail, RecordStore};
use crate::config::{RecordsConfig, DEFAULT_SPREADSHEET_NAME};
use crate::google_auth::AccessTokenProvider;
use crate::http::{self, ApiError};
use crate::models::{Constitution, DiagnosisRecord};

const SERVICE: &str = "google-sheets";
const MAX_RETRIES: u32 = 2;
const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

pub struct SheetsStore {
    client: reqwest::Client,
    auth: Arc<dyn AccessTokenProvider>,
    sheets_url: String,
    drive_url: String,
    spreadsheet_name: String,
    spreadsheet_id: OnceCell<String>,
    users_sheet: String,
    diagnoses_sheet: String,
}

impl SheetsStore {
    pub fn new(config: &RecordsConfig, auth: Arc<dyn AccessTokenProvider>) -> Result<Self> {
        let spreadsheet_id = OnceCell::new();
        if let Some(id) = &config.spreadsheet_id {
            let _ = spreadsheet_id.set(id.clone());
        }
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            auth,
            sheets_url: config.sheets_url.trim_end_matches('/').to_string(),
            drive_url: config.drive_url.trim_end_matches('/').to_string(),
            spreadsheet_name: config
                .spreadsheet_name
                .clone()
                .unwrap_or_else(|| DEFAULT_SPREADSHEET_NAME.to_string()),
            spreadsheet_id,
            users_sheet: config.users_sheet.clone(),
            diagnoses_sheet: config.diagnoses_sheet.clone(),
        })
    }

    async fn spreadsheet_id(&self) -> Result<&str> {
        self.spreadsheet_id
            .get_or_try_init(|| self.find_spreadsheet())
            .await
            .map(String::as_str)
    }

    /// Look the spreadsheet up by name in Drive.
    async fn find_spreadsheet(&self) -> Result<String> {
        let token = self.auth.access_token().await?;
        let query = format!(
            "name = '{}' and mimeType = '{}' and trashed = false",
            self.spreadsheet_name.replace('\'', "\\'"),
            SPREADSHEET_MIME
        );
        let url = format!("{}/drive/v3/files", self.drive_url);

        let response = http::send_with_retry(SERVICE, MAX_RETRIES, || {
            self.client
                .get(&url)
                .bearer_auth(&token)
                .query(&[("q", query.as_str()), ("fields", "files(id,name)")])
        })
        .await?;
        let json = http::json_body(SERVICE, response).await?;

        let id = json
            .get("files")
            .and_then(|f| f.as_array())
            .and_then(|files| files.first())
            .and_then(|f| f.get("id"))
            .and_then(|id| id.as_str())
            .ok_or_else(|| anyhow!("spreadsheet '{}' not found", self.spreadsheet_name))?;

        info!(name = %self.spreadsheet_name, id, "resolved spreadsheet");
        Ok(id.to_string())
    }

    /// `{sheets_url}/v4/spreadsheets/{id}/values/{range}{suffix}`, with the
    /// range percent-encoded as one path segment.
    fn values_url(&self, id: &str, range: &str, suffix: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.sheets_url)
            .with_context(|| format!("invalid sheets_url: {}", self.sheets_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("sheets_url cannot be a base URL: {}", self.sheets_url))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", id, "values"])
            .push(&format!("{}{}", range, suffix));
        Ok(url)
    }

    async fn read_rows(&self, sheet: &str, columns: &str) -> Result<Vec<Vec<String>>> {
        let id = self.spreadsheet_id().await?;
        let token = self.auth.access_token().await?;
        let url = self.values_url(id, &a1_range(sheet, columns), "")?;

        let response = http::send_with_retry(SERVICE, MAX_RETRIES, || {
            self.client
                .get(url.clone())
                .bearer_auth(&token)
                .query(&[("majorDimension", "ROWS")])
        })
        .await?;
        let json = http::json_body(SERVICE, response).await?;
        let rows = parse_values(&json)?;
        debug!(sheet, rows = rows.len(), "read worksheet");
        Ok(rows)
    }

    async fn append_row(&self, sheet: &str, columns: &str, row: Vec<String>) -> Result<()> {
        let id = self.spreadsheet_id().await?;
        let token = self.auth.access_token().await?;
        let url = self.values_url(id, &a1_range(sheet, columns), ":append")?;
        let body = json!({ "values": [row] });

        http::send_with_retry(SERVICE, MAX_RETRIES, || {
            self.client
                .post(url.clone())
                .bearer_auth(&token)
                .query(&[
                    ("valueInputOption", "RAW"),
                    ("insertDataOption", "INSERT_ROWS"),
                ])
                .json(&body)
        })
        .await?;
        debug!(sheet, "appended row");
        Ok(())
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<Vec<String>>> {
        let rows = self.read_rows(&self.users_sheet, "A:B").await?;
        Ok(rows
            .into_iter()
            .find(|r| r.first().map(|c| c.trim()) == Some(user_id)))
    }
}

/// `'sheet name'!A:B`, quoting the sheet name as A1 notation requires.
fn a1_range(sheet: &str, columns: &str) -> String {
    format!("'{}'!{}", sheet.replace('\'', "''"), columns)
}

/// Extract the `values` grid; a missing key means an empty range.
fn parse_values(json: &Value) -> Result<Vec<Vec<String>>, ApiError> {
    let Some(values) = json.get("values") else {
        return Ok(Vec::new());
    };
    let rows = values
        .as_array()
        .ok_or_else(|| ApiError::malformed(SERVICE, "values is not an array"))?;

    Ok(rows
        .iter()
        .map(|row| {
            row.as_array()
                .map(|cells| {
                    cells
                        .iter()
                        .map(|c| match c {
                            Value::String(s) => s.clone(),
                            Value::Null => String::new(),
                            other => other.to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        })
        .collect())
}

fn cell(row: &[String], i: usize) -> String {
    row.get(i).cloned().unwrap_or_default()
}

#[async_trait]
impl RecordStore for SheetsStore {
    async fn get_user_constitution(&self, user_id: &str) -> Result<Option<Constitution>> {
        let Some(row) = self.find_user(user_id).await? else {
            return Ok(None);
        };
        let label = cell(&row, 1);
        match label.parse() {
            Ok(c) => Ok(Some(c)),
            Err(e) => {
                warn!(user_id, label = %label, error = %e, "unrecognised stored constitution");
                Ok(None)
            }
        }
    }

    async fn register_user(&self, user_id: &str, constitution: Constitution) -> Result<bool> {
        if self.find_user(user_id).await?.is_some() {
            return Ok(false);
        }
        self.append_row(
            &self.users_sheet,
            "A:B",
            vec![user_id.to_string(), constitution.label().to_string()],
        )
        .await?;
        Ok(true)
    }

    async fn save_diagnosis(&self, record: &DiagnosisRecord) -> Result<()> {
        self.append_row(
            &self.diagnoses_sheet,
            "A:E",
            vec![
                record.recorded_at.clone(),
                record.user_id.clone(),
                record.symptom.clone(),
                record.label.clone(),
                record.summary.clone(),
            ],
        )
        .await
    }

    async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<DiagnosisRecord>> {
        let rows = self.read_rows(&self.diagnoses_sheet, "A:E").await?;
        let records = rows
            .iter()
            .filter(|r| r.get(1).map(|c| c.trim()) == Some(user_id))
            .map(|r| DiagnosisRecord {
                recorded_at: cell(r, 0),
                user_id: cell(r, 1),
                symptom: cell(r, 2),
                label: cell(r, 3),
                summary: cell(r, 4),
            })
            .collect();
        Ok(tail(records, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google_auth::StaticToken;

    fn store(sheets_url: &str) -> SheetsStore {
        let config = RecordsConfig {
            backend: "sheets".into(),
            spreadsheet_id: Some("sheet123".into()),
            sheets_url: sheets_url.into(),
            ..RecordsConfig::default()
        };
        SheetsStore::new(&config, Arc::new(StaticToken("t".into()))).unwrap()
    }

    #[test]
    fn test_a1_range_quotes_names() {
        assert_eq!(a1_range("users", "A:B"), "'users'!A:B");
        assert_eq!(a1_range("Bob's log", "A:E"), "'Bob''s log'!A:E");
    }

    #[test]
    fn test_values_url() {
        let s = store("https://sheets.googleapis.com/");
        let url = s.values_url("sheet123", "'users'!A:B", ":append").unwrap();
        assert!(url
            .as_str()
            .starts_with("https://sheets.googleapis.com/v4/spreadsheets/sheet123/values/"));
        assert!(url.as_str().ends_with("A:B:append"));
    }

    #[test]
    fn test_parse_values() {
        let rows = parse_values(&json!({
            "range": "users!A1:B3",
            "values": [["kim", "소음인"], ["lee"], [7, null]]
        }))
        .unwrap();
        assert_eq!(rows[0], vec!["kim", "소음인"]);
        assert_eq!(rows[1], vec!["lee"]);
        assert_eq!(rows[2], vec!["7", ""]);
        assert!(parse_values(&json!({ "range": "users!A1:B1" })).unwrap().is_empty());
    }
}
