//! Canonical forms for join keys, currency amounts and dates.
//!
//! All normalizers are idempotent: feeding a canonical value back in returns it unchanged.

use crate::domain::change::RecordKey;
use crate::domain::model::{Row, Value};
use crate::utils::error::{ReconError, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Key,
    Currency,
    Date,
}

/// What to do with a value that fails to normalize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidValuePolicy {
    /// Fail the whole batch.
    Abort,
    /// Leave the row out and keep going.
    #[default]
    SkipRow,
    /// Treat the value as missing.
    TreatAsMissing,
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%m/%d/%y",
    "%Y/%m/%d",
    "%m-%d-%Y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%B %d %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Trims surrounding whitespace. ASIN and SKU values are case-sensitive, so case is preserved.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_string()
}

pub fn key_from_value(value: &Value) -> String {
    match value {
        Value::Text(s) => normalize_key(s),
        Value::Empty => String::new(),
        other => normalize_key(&other.to_string()),
    }
}

/// Builds the record key for `row` from already-resolved column indexes.
pub fn record_key(row: &Row, columns: &[usize]) -> RecordKey {
    RecordKey(
        columns
            .iter()
            .map(|&index| row.get(index).map(key_from_value).unwrap_or_default())
            .collect(),
    )
}

/// Parses a currency amount. `Ok(None)` means missing, which is never the same as zero.
pub fn normalize_currency(raw: &str) -> Result<Option<f64>> {
    let cleaned: String = raw.chars().filter(|c| *c != '$' && *c != ',').collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Ok(None);
    }
    match cleaned.parse::<f64>() {
        Ok(amount) if amount.is_finite() => Ok(Some(amount)),
        _ => Err(ReconError::InvalidCurrencyFormat {
            value: raw.to_string(),
        }),
    }
}

pub fn currency_from_value(value: &Value) -> Result<Option<f64>> {
    match value {
        Value::Number(n) if n.is_finite() => Ok(Some(*n)),
        Value::Number(n) => Err(ReconError::InvalidCurrencyFormat {
            value: n.to_string(),
        }),
        Value::Text(s) => normalize_currency(s),
        Value::Empty => Ok(None),
        Value::Date(d) => Err(ReconError::InvalidCurrencyFormat {
            value: d.to_string(),
        }),
    }
}

/// Parses a date in any of the layouts the lead sheets are known to use.
pub fn normalize_date(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    for format in DATE_FORMATS {
        match NaiveDate::parse_from_str(trimmed, format) {
            // "%Y" happily reads "24" as year 24; leave two-digit years to "%y"
            Ok(date) if date.year() < 100 => continue,
            Ok(date) => return Ok(date),
            Err(_) => continue,
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(datetime.date());
        }
    }
    if let Ok(datetime) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Ok(datetime.date_naive());
    }
    Err(ReconError::InvalidDateFormat {
        value: raw.to_string(),
    })
}

/// `Ok(None)` for an empty cell.
pub fn date_from_value(value: &Value) -> Result<Option<NaiveDate>> {
    match value {
        Value::Date(d) => Ok(Some(*d)),
        Value::Empty => Ok(None),
        Value::Text(s) if s.trim().is_empty() => Ok(None),
        Value::Text(s) => normalize_date(s).map(Some),
        Value::Number(n) => Err(ReconError::InvalidDateFormat {
            value: n.to_string(),
        }),
    }
}

/// Normalizes a cell according to `kind`.
pub fn normalize(value: &Value, kind: FieldKind) -> Result<Value> {
    match kind {
        FieldKind::Key => Ok(Value::from(key_from_value(value))),
        FieldKind::Currency => Ok(currency_from_value(value)?
            .map(Value::Number)
            .unwrap_or(Value::Empty)),
        FieldKind::Date => Ok(date_from_value(value)?
            .map(Value::Date)
            .unwrap_or(Value::Empty)),
    }
}

/// Applies `policy` to a failed normalization: `Ok(None)` means "skip the row".
pub fn apply_policy<T>(result: Result<Option<T>>, policy: InvalidValuePolicy) -> Result<Option<Option<T>>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) => match policy {
            InvalidValuePolicy::Abort => Err(err),
            InvalidValuePolicy::SkipRow => {
                tracing::debug!("Skipping row: {}", err);
                Ok(None)
            }
            InvalidValuePolicy::TreatAsMissing => Ok(Some(None)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_normalization() {
        assert_eq!(normalize_currency("$1,234.50").unwrap(), Some(1234.50));
        assert_eq!(normalize_currency(" 12 ").unwrap(), Some(12.0));
        assert_eq!(normalize_currency("").unwrap(), None);
        assert_eq!(normalize_currency(" $ ").unwrap(), None);
        assert_eq!(normalize_currency("0").unwrap(), Some(0.0));
        assert!(matches!(
            normalize_currency("abc"),
            Err(ReconError::InvalidCurrencyFormat { .. })
        ));
        assert!(normalize_currency("nan").is_err());
    }

    #[test]
    fn test_key_normalization_is_idempotent() {
        let once = normalize_key("  B00abc \t");
        assert_eq!(once, "B00abc");
        assert_eq!(normalize_key(&once), once);
        assert_eq!(key_from_value(&Value::Number(12345.0)), "12345");
    }

    #[test]
    fn test_permissive_dates() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        for raw in ["2024-01-02", "01/02/2024", "1/2/2024", "2024/01/02", "Jan 2, 2024", "1/2/24", "2024-01-02 13:45:00"] {
            assert_eq!(normalize_date(raw).unwrap(), expected, "{}", raw);
        }
        assert!(matches!(
            normalize_date("soon"),
            Err(ReconError::InvalidDateFormat { .. })
        ));
    }

    #[test]
    fn test_normalize_is_idempotent_for_each_kind() {
        let currency = normalize(&Value::text("$1,234.50"), FieldKind::Currency).unwrap();
        assert_eq!(normalize(&currency, FieldKind::Currency).unwrap(), currency);

        let date = normalize(&Value::text("03/15/2024"), FieldKind::Date).unwrap();
        assert_eq!(normalize(&date, FieldKind::Date).unwrap(), date);

        assert_eq!(normalize(&Value::text(""), FieldKind::Currency).unwrap(), Value::Empty);
    }

    #[test]
    fn test_apply_policy() {
        let bad = normalize_currency("abc");
        assert!(apply_policy(bad, InvalidValuePolicy::Abort).is_err());
        assert_eq!(
            apply_policy(normalize_currency("abc"), InvalidValuePolicy::SkipRow).unwrap(),
            None
        );
        assert_eq!(
            apply_policy(normalize_currency("abc"), InvalidValuePolicy::TreatAsMissing).unwrap(),
            Some(None)
        );
        assert_eq!(
            apply_policy(normalize_currency("$3"), InvalidValuePolicy::Abort).unwrap(),
            Some(Some(3.0))
        );
    }
}
