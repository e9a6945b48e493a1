//! Google Sheets v4 client

use super::auth::TokenSource;
use super::{check_response, GoogleError};
use async_trait::async_trait;
use reqwest::{Client as HttpClient, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Summary of one sheet tab
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetInfo {
    /// Numeric sheet id
    pub sheet_id: i64,
    /// Tab title
    pub title: String,
    /// Rows with a value in column A
    pub row_count: usize,
    /// Grid column count
    pub column_count: u64,
    /// Hidden tab
    pub hidden: bool,
}

/// Operations the archive needs from Sheets
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SheetsApi: Send + Sync {
    /// Appends one row after the last data row; returns updated cell count
    async fn append_row(&self, sheet: &str, row: Vec<String>) -> Result<u64, GoogleError>;

    /// Cell values of whole columns, one `Vec` per requested column
    async fn column_values(
        &self,
        sheet: &str,
        columns: Vec<String>,
    ) -> Result<Vec<Vec<String>>, GoogleError>;

    /// Properties and row count of a sheet tab
    async fn sheet_info(&self, sheet: &str) -> Result<SheetInfo, GoogleError>;

    /// Title of the spreadsheet
    async fn spreadsheet_title(&self) -> Result<String, GoogleError>;
}

/// A1 range covering a whole sheet column, e.g. `'KTP Jakarta'!F:F`
#[must_use]
pub fn column_range(sheet: &str, column: &str) -> String {
    format!("'{}'!{column}:{column}", sheet.replace('\'', "''"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    #[serde(default)]
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    #[serde(default)]
    updated_cells: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    value_ranges: Vec<ValueRange>,
}

#[derive(Debug, Deserialize)]
struct Spreadsheet {
    #[serde(default)]
    properties: SpreadsheetProperties,
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct SpreadsheetProperties {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    grid_properties: GridProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GridProperties {
    #[serde(default)]
    row_count: usize,
    #[serde(default)]
    column_count: u64,
}

/// First cell of each row as text
fn first_cells(range: ValueRange) -> Vec<String> {
    range
        .values
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .map(|cell| match cell {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect()
}

/// REST client bound to one spreadsheet
pub struct SheetsClient {
    http: HttpClient,
    tokens: Arc<dyn TokenSource>,
    spreadsheet_id: String,
}

impl SheetsClient {
    /// Create a client for `spreadsheet_id`
    #[must_use]
    pub fn new(http: HttpClient, tokens: Arc<dyn TokenSource>, spreadsheet_id: String) -> Self {
        Self {
            http,
            tokens,
            spreadsheet_id,
        }
    }

    fn url(&self, suffix: Option<&str>) -> Result<Url, GoogleError> {
        let mut url = Url::parse(SHEETS_API_BASE)
            .map_err(|e| GoogleError::NetworkError(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| GoogleError::NetworkError("invalid Sheets base URL".to_string()))?;
            segments.push(&self.spreadsheet_id);
            if let Some(suffix) = suffix {
                segments.extend(suffix.split('/'));
            }
        }
        Ok(url)
    }

    async fn spreadsheet(&self) -> Result<Spreadsheet, GoogleError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .get(self.url(None)?)
            .bearer_auth(token)
            .query(&[("fields", "properties.title,sheets.properties")])
            .send()
            .await?;
        let response = check_response(response, "spreadsheet").await?;
        Ok(response.json().await?)
    }

    async fn values(&self, range: &str) -> Result<ValueRange, GoogleError> {
        let token = self.tokens.access_token().await?;
        let mut url = self.url(None)?;
        url.path_segments_mut()
            .map_err(|()| GoogleError::NetworkError("invalid Sheets URL".to_string()))?
            .push("values")
            .push(range);
        let response = self.http.get(url).bearer_auth(token).send().await?;
        let response = check_response(response, range).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SheetsApi for SheetsClient {
    async fn append_row(&self, sheet: &str, row: Vec<String>) -> Result<u64, GoogleError> {
        let token = self.tokens.access_token().await?;
        let range = format!("'{}'!A1", sheet.replace('\'', "''"));
        let mut url = self.url(None)?;
        url.path_segments_mut()
            .map_err(|()| GoogleError::NetworkError("invalid Sheets URL".to_string()))?
            .push("values")
            .push(&format!("{range}:append"));

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "values": [row] }))
            .send()
            .await?;
        let response = check_response(response, &format!("sheet '{sheet}'")).await?;
        let body: AppendResponse = response.json().await?;

        let updated = body.updates.map_or(0, |u| u.updated_cells);
        info!("Added {updated} cells to {sheet}");
        Ok(updated)
    }

    async fn column_values(
        &self,
        sheet: &str,
        columns: Vec<String>,
    ) -> Result<Vec<Vec<String>>, GoogleError> {
        let token = self.tokens.access_token().await?;
        let ranges: Vec<(&str, String)> = columns
            .iter()
            .map(|c| ("ranges", column_range(sheet, c)))
            .collect();

        let response = self
            .http
            .get(self.url(Some("values:batchGet"))?)
            .bearer_auth(token)
            .query(&ranges)
            .send()
            .await?;
        let response = check_response(response, &format!("sheet '{sheet}'")).await?;
        let body: BatchGetResponse = response.json().await?;

        debug!(sheet, ranges = body.value_ranges.len(), "Fetched duplicate check columns");
        Ok(body.value_ranges.into_iter().map(first_cells).collect())
    }

    async fn sheet_info(&self, sheet: &str) -> Result<SheetInfo, GoogleError> {
        let spreadsheet = self.spreadsheet().await?;
        let props = spreadsheet
            .sheets
            .into_iter()
            .map(|s| s.properties)
            .find(|p| p.title == sheet)
            .ok_or_else(|| GoogleError::NotFound(format!("sheet '{sheet}'")))?;

        let row_count = match self.values(&column_range(sheet, "A")).await {
            Ok(range) => range.values.len(),
            Err(_) => props.grid_properties.row_count,
        };

        Ok(SheetInfo {
            sheet_id: props.sheet_id,
            title: props.title,
            row_count,
            column_count: props.grid_properties.column_count,
            hidden: props.hidden,
        })
    }

    async fn spreadsheet_title(&self) -> Result<String, GoogleError> {
        Ok(self.spreadsheet().await?.properties.title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::auth::MockTokenSource;

    #[test]
    fn test_column_range_quotes_sheet_name() {
        assert_eq!(column_range("KTP Jakarta", "F"), "'KTP Jakarta'!F:F");
        assert_eq!(column_range("Toko Bu'Ani", "H"), "'Toko Bu''Ani'!H:H");
    }

    #[test]
    fn test_first_cells_skips_empty_rows() {
        let range: ValueRange = serde_json::from_value(json!({
            "range": "'S'!F1:F4",
            "values": [["NPWP 15"], [], ["866555295602000"], [123]]
        }))
        .expect("value range");

        assert_eq!(first_cells(range), vec!["NPWP 15", "866555295602000", "123"]);
    }

    #[test]
    fn test_urls_escape_ranges() {
        let client = SheetsClient::new(
            HttpClient::new(),
            Arc::new(MockTokenSource::new()),
            "sheet-id".to_string(),
        );

        let batch = client.url(Some("values:batchGet")).expect("url");
        assert_eq!(
            batch.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-id/values:batchGet"
        );

        let mut append = client.url(None).expect("url");
        append
            .path_segments_mut()
            .expect("segments")
            .push("values")
            .push("'KTP Jakarta'!A1:append");
        assert!(append.as_str().ends_with("/values/'KTP%20Jakarta'!A1:append"));
    }
}
