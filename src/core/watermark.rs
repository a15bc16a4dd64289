use crate::core::normalize::{apply_policy, date_from_value, InvalidValuePolicy};
use crate::domain::model::{Table, Value};
use crate::domain::ports::Storage;
use crate::utils::error::{ReconError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// "Last processed date" persisted between runs as `{"last_processed_date": "YYYY-MM-DD"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    #[serde(with = "iso_date")]
    pub last_processed_date: NaiveDate,
}

impl Watermark {
    pub fn new(last_processed_date: NaiveDate) -> Self {
        Self {
            last_processed_date,
        }
    }

    pub fn fallback() -> Self {
        Self::new(NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN))
    }
}

mod iso_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format("%Y-%m-%d").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(serde::de::Error::custom)
    }
}

pub struct WatermarkStore<'a, S: Storage> {
    storage: &'a S,
    key: String,
}

impl<'a, S: Storage> WatermarkStore<'a, S> {
    pub fn new(storage: &'a S, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// A missing or unreadable watermark falls back to 2000-01-01.
    pub async fn read(&self) -> Watermark {
        match self.try_read().await {
            Ok(Some(watermark)) => {
                tracing::info!(
                    "Last processed date: {}",
                    watermark.last_processed_date
                );
                watermark
            }
            Ok(None) => {
                tracing::warn!("No watermark at '{}', starting from 2000-01-01", self.key);
                Watermark::fallback()
            }
            Err(e) => {
                tracing::warn!(
                    "Unreadable watermark at '{}' ({}), starting from 2000-01-01",
                    self.key,
                    e
                );
                Watermark::fallback()
            }
        }
    }

    async fn try_read(&self) -> Result<Option<Watermark>> {
        if !self.storage.exists(&self.key).await? {
            return Ok(None);
        }
        let bytes = self.storage.read_file(&self.key).await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub async fn write(&self, watermark: Watermark) -> Result<()> {
        let bytes = serde_json::to_vec(&watermark)?;
        self.storage.write_file(&self.key, &bytes).await?;
        tracing::info!(
            "Watermark '{}' advanced to {}",
            self.key,
            watermark.last_processed_date
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub table: Table,
    /// Latest date among the selected rows; `None` when nothing was selected.
    pub max_date: Option<NaiveDate>,
}

impl Selection {
    /// The watermark to persist after a successful run, if it should move at all.
    pub fn next_watermark(&self, current: Watermark) -> Option<Watermark> {
        self.max_date
            .filter(|date| *date > current.last_processed_date)
            .map(Watermark::new)
    }
}

/// Keeps rows whose `date_column` is on or after the watermark. Rows with an empty or
/// unparseable date follow `policy`; `TreatAsMissing` drops them too since they cannot be placed.
pub fn select_since(
    table: &Table,
    date_column: &str,
    watermark: Watermark,
    policy: InvalidValuePolicy,
) -> Result<Selection> {
    let index = table
        .column_index(date_column)
        .ok_or_else(|| ReconError::MissingRequiredColumn {
            table: table.name().to_string(),
            column: date_column.to_string(),
        })?;

    let mut dates = Vec::with_capacity(table.len());
    for row in table.rows() {
        let value = row.get(index).unwrap_or(&Value::Empty);
        let date = apply_policy(date_from_value(value), policy)?.flatten();
        dates.push(date);
    }

    let mut selected = table.clone();
    selected.retain_rows(|i, _| {
        dates[i]
            .map(|d| d >= watermark.last_processed_date)
            .unwrap_or(false)
    });
    let max_date = dates
        .iter()
        .flatten()
        .filter(|d| **d >= watermark.last_processed_date)
        .max()
        .copied();

    tracing::info!(
        "Selected {} of {} rows dated on or after {}",
        selected.len(),
        table.len(),
        watermark.last_processed_date
    );
    Ok(Selection {
        table: selected,
        max_date,
    })
}

/// Index of the first marker row: first cell filled, every other cell blank.
pub fn find_marker(table: &Table) -> Option<usize> {
    table.rows().iter().position(|row| {
        let values = row.values();
        values.len() > 1
            && !values[0].is_empty()
            && values[1..].iter().all(|v| v.is_empty())
    })
}

/// Rows after the marker row, or every row when there is no marker.
pub fn rows_after_marker(table: &Table) -> Table {
    match find_marker(table) {
        Some(marker) => {
            tracing::info!("Marker found at row {}, processing rows after it", marker + 1);
            table.slice_from(marker + 1)
        }
        None => {
            tracing::info!("No marker row found, processing all {} rows", table.len());
            table.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    struct MemoryStorage {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl Storage for MemoryStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            self.files
                .lock()
                .await
                .get(path)
                .cloned()
                .ok_or_else(|| ReconError::StorageError {
                    key: path.to_string(),
                    message: "not found".to_string(),
                })
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            self.files
                .lock()
                .await
                .insert(path.to_string(), data.to_vec());
            Ok(())
        }

        async fn exists(&self, path: &str) -> Result<bool> {
            Ok(self.files.lock().await.contains_key(path))
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_watermark_round_trip_and_fallback() {
        let storage = MemoryStorage::default();
        let store = WatermarkStore::new(&storage, "state/last_processed_date.json");

        assert_eq!(store.read().await, Watermark::fallback());

        store.write(Watermark::new(date(2024, 3, 1))).await.unwrap();
        let raw = storage.read_file(store.key()).await.unwrap();
        assert_eq!(
            String::from_utf8(raw).unwrap(),
            r#"{"last_processed_date":"2024-03-01"}"#
        );
        assert_eq!(store.read().await.last_processed_date, date(2024, 3, 1));

        storage.write_file(store.key(), b"garbage").await.unwrap();
        assert_eq!(store.read().await, Watermark::fallback());
    }

    #[test]
    fn test_select_since() {
        let table = Table::from_rows(
            "leads",
            &["Date", "ASIN"],
            &[
                &["2024-01-01", "B000"],
                &["01/02/2024", "B001"],
                &["2024-01-05", "B002"],
                &["not a date", "B003"],
                &["", "B004"],
            ],
        );
        let watermark = Watermark::new(date(2024, 1, 2));

        let selection = select_since(&table, "Date", watermark, InvalidValuePolicy::SkipRow).unwrap();
        assert_eq!(selection.table.len(), 2);
        assert_eq!(selection.table.value(0, "ASIN"), Some(&Value::text("B001")));
        assert_eq!(selection.max_date, Some(date(2024, 1, 5)));
        assert_eq!(
            selection.next_watermark(watermark),
            Some(Watermark::new(date(2024, 1, 5)))
        );

        assert!(select_since(&table, "Date", watermark, InvalidValuePolicy::Abort).is_err());
        assert!(matches!(
            select_since(&table, "Order Date", watermark, InvalidValuePolicy::SkipRow),
            Err(ReconError::MissingRequiredColumn { .. })
        ));
    }

    #[test]
    fn test_empty_selection_keeps_watermark() {
        let table = Table::from_rows("leads", &["Date"], &[&["2023-12-31"]]);
        let watermark = Watermark::new(date(2024, 1, 1));
        let selection = select_since(&table, "Date", watermark, InvalidValuePolicy::SkipRow).unwrap();
        assert!(selection.table.is_empty());
        assert_eq!(selection.next_watermark(watermark), None);
    }

    #[test]
    fn test_rows_after_marker() {
        let table = Table::from_rows(
            "leads",
            &["Date", "Name", "ASIN"],
            &[
                &["2024-01-01", "Old", "B000"],
                &["DONE", "", ""],
                &["2024-01-02", "New", "B001"],
            ],
        );
        let batch = rows_after_marker(&table);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.value(0, "ASIN"), Some(&Value::text("B001")));

        let unmarked = Table::from_rows("leads", &["Date", "ASIN"], &[&["2024-01-02", "B001"]]);
        assert_eq!(rows_after_marker(&unmarked).len(), 1);
    }
}
