use crate::core::normalize::{currency_from_value, date_from_value, normalize_date};
use crate::domain::model::{Table, Value};
use crate::domain::ports::Storage;
use crate::utils::error::{ReconError, Result};
use calamine::{Data, Reader, Xlsx};
use chrono::{Duration as DateDuration, NaiveDate};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Where a table comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceDescriptor {
    /// A published sheet returning `text/csv`.
    Url(String),
    /// A local `.csv` or `.xlsx` file.
    Path(PathBuf),
    /// A specific sheet of a local workbook; `header_row` is zero-based.
    Sheet {
        path: PathBuf,
        #[serde(default)]
        sheet: Option<String>,
        #[serde(default)]
        header_row: usize,
    },
    /// An object in the configured storage, format chosen by extension.
    Object(String),
}

impl SourceDescriptor {
    pub fn display_name(&self) -> String {
        match self {
            SourceDescriptor::Url(url) => url.clone(),
            SourceDescriptor::Path(path) => path.display().to_string(),
            SourceDescriptor::Sheet { path, sheet, .. } => match sheet {
                Some(sheet) => format!("{}#{}", path.display(), sheet),
                None => path.display().to_string(),
            },
            SourceDescriptor::Object(key) => key.clone(),
        }
    }
}

/// Columns the caller wants typed; everything else stays as raw text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnTypes {
    pub numeric: Vec<String>,
    pub dates: Vec<String>,
}

impl ColumnTypes {
    pub fn raw() -> Self {
        Self::default()
    }

    pub fn numeric(mut self, column: &str) -> Self {
        self.numeric.push(column.to_string());
        self
    }

    pub fn date(mut self, column: &str) -> Self {
        self.dates.push(column.to_string());
        self
    }
}

pub fn is_spreadsheet(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "xlsx" | "xlsm"))
        .unwrap_or(false)
}

#[derive(Clone)]
pub struct TableLoader {
    client: Client,
}

impl TableLoader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Loads `descriptor`; `storage` is only consulted for [`SourceDescriptor::Object`].
    pub async fn load<S: Storage>(
        &self,
        storage: &S,
        descriptor: &SourceDescriptor,
        types: &ColumnTypes,
    ) -> Result<Table> {
        let name = descriptor.display_name();
        tracing::debug!("Loading table from {}", name);

        let table = match descriptor {
            SourceDescriptor::Url(url) => {
                let bytes = self.fetch(url).await?;
                parse_csv(&name, &bytes)?
            }
            SourceDescriptor::Path(path) => {
                let bytes = read_local(path).await?;
                if is_spreadsheet(&name) {
                    parse_spreadsheet(&name, &bytes, None, 0)?
                } else {
                    parse_csv(&name, &bytes)?
                }
            }
            SourceDescriptor::Sheet {
                path,
                sheet,
                header_row,
            } => {
                let bytes = read_local(path).await?;
                parse_spreadsheet(&name, &bytes, sheet.as_deref(), *header_row)?
            }
            SourceDescriptor::Object(key) => {
                if !storage.exists(key).await? {
                    return Err(ReconError::SourceUnavailable {
                        source_name: key.clone(),
                        reason: "object does not exist".to_string(),
                    });
                }
                let bytes = storage.read_file(key).await?;
                if is_spreadsheet(key) {
                    parse_spreadsheet(&name, &bytes, None, 0)?
                } else {
                    parse_csv(&name, &bytes)?
                }
            }
        };

        tracing::info!(
            "Loaded {} rows x {} columns from {}",
            table.len(),
            table.columns().len(),
            name
        );
        Ok(apply_types(table, types))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|e| ReconError::SourceUnavailable {
                    source_name: url.to_string(),
                    reason: e.to_string(),
                })?;

        tracing::debug!("Sheet response status: {}", response.status());
        if !response.status().is_success() {
            return Err(ReconError::SourceUnavailable {
                source_name: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ReconError::SourceUnavailable {
                source_name: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(bytes.to_vec())
    }
}

async fn read_local(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(ReconError::SourceUnavailable {
            source_name: path.display().to_string(),
            reason: "file does not exist".to_string(),
        });
    }
    Ok(tokio::fs::read(path).await?)
}

/// Parses CSV text with a header row. Every cell is kept as raw text.
pub fn parse_csv(name: &str, bytes: &[u8]) -> Result<Table> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let text = std::str::from_utf8(bytes).map_err(|e| ReconError::MalformedSource {
        source_name: name.to_string(),
        reason: format!("not valid UTF-8: {}", e),
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(text.as_bytes());

    let malformed = |e: csv::Error| ReconError::MalformedSource {
        source_name: name.to_string(),
        reason: e.to_string(),
    };

    let columns: Vec<String> = reader
        .headers()
        .map_err(malformed)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if columns.iter().all(|c| c.is_empty()) {
        return Err(ReconError::MalformedSource {
            source_name: name.to_string(),
            reason: "missing header row".to_string(),
        });
    }

    let mut table = Table::new(name, columns);
    for record in reader.records() {
        let record = record.map_err(malformed)?;
        table.push_row(record.iter().map(Value::from).collect());
    }
    Ok(table)
}

/// Parses one sheet of an `.xlsx` workbook. Rows above `header_row` are ignored and fully
/// blank rows are dropped.
pub fn parse_spreadsheet(
    name: &str,
    bytes: &[u8],
    sheet: Option<&str>,
    header_row: usize,
) -> Result<Table> {
    let malformed = |reason: String| ReconError::MalformedSource {
        source_name: name.to_string(),
        reason,
    };

    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(bytes.to_vec())).map_err(|e| malformed(e.to_string()))?;

    let sheet_name = match sheet {
        Some(sheet) => sheet.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| malformed("workbook contains no sheets".to_string()))?,
    };

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| malformed(format!("sheet '{}': {}", sheet_name, e)))?;

    let mut rows = range.rows().skip(header_row);
    let columns: Vec<String> = match rows.next() {
        Some(header) => header
            .iter()
            .map(|cell| cell_to_value(cell).to_string().trim().to_string())
            .collect(),
        None => return Err(malformed(format!("sheet '{}' has no header row", sheet_name))),
    };

    let mut table = Table::new(name, columns);
    for row in rows {
        let values: Vec<Value> = row.iter().map(cell_to_value).collect();
        if values.iter().all(Value::is_empty) {
            continue;
        }
        table.push_row(values);
    }
    Ok(table)
}

fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(DateDuration::days(serial.floor() as i64))
}

fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::String(s) => Value::from(s.as_str()),
        Data::Float(f) => Value::Number(*f),
        Data::Int(i) => Value::Number(*i as f64),
        Data::Bool(b) => Value::Text(b.to_string()),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())
            .map(Value::Date)
            .unwrap_or_else(|| Value::Number(dt.as_f64())),
        Data::DateTimeIso(s) => normalize_date(s)
            .map(Value::Date)
            .unwrap_or_else(|_| Value::from(s.as_str())),
        Data::DurationIso(s) => Value::from(s.as_str()),
        Data::Error(e) => Value::Text(format!("{:?}", e)),
        Data::Empty => Value::Empty,
    }
}

/// Converts declared columns. Cells that do not parse keep their raw text so the caller's
/// policy can decide what to do with them.
pub fn apply_types(mut table: Table, types: &ColumnTypes) -> Table {
    for column in &types.numeric {
        table.map_column(column, |value| match currency_from_value(value) {
            Ok(Some(n)) => Value::Number(n),
            Ok(None) => Value::Empty,
            Err(_) => value.clone(),
        });
    }
    for column in &types.dates {
        table.map_column(column, |value| match date_from_value(value) {
            Ok(Some(d)) => Value::Date(d),
            Ok(None) => Value::Empty,
            Err(_) => value.clone(),
        });
    }
    table
}
