use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

/// A single cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Empty,
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    /// Blank text counts as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Empty => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            Value::Empty
        } else {
            Value::Text(value.to_string())
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        if value.is_empty() {
            Value::Empty
        } else {
            Value::Text(value)
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Number(n) => write!(f, "{}", n),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Empty => Ok(()),
        }
    }
}

/// One row, positionally aligned with the owning table's columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// Ordered named columns plus rows. Every row carries exactly one value per column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a table from string cells; mostly useful for fixtures.
    pub fn from_rows(name: impl Into<String>, columns: &[&str], rows: &[&[&str]]) -> Self {
        let mut table = Self::new(name, columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            let mut values: Vec<Value> = row.iter().map(|cell| Value::from(*cell)).collect();
            values.resize(table.columns.len(), Value::Empty);
            table.rows.push(Row { values });
        }
        table
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)
    }

    /// Appends a row, padding or truncating it to the column count.
    pub fn push_row(&mut self, mut values: Vec<Value>) {
        values.resize(self.columns.len(), Value::Empty);
        self.rows.push(Row { values });
    }

    /// Appends a row given as `(column, value)` pairs; unknown columns are ignored.
    pub fn push_named(&mut self, fields: &[(String, Value)]) {
        let mut values = vec![Value::Empty; self.columns.len()];
        for (column, value) in fields {
            if let Some(index) = self.column_index(column) {
                values[index] = value.clone();
            }
        }
        self.rows.push(Row { values });
    }

    pub fn set(&mut self, row: usize, column: &str, value: Value) -> bool {
        match (self.column_index(column), self.rows.get_mut(row)) {
            (Some(index), Some(target)) => {
                target.values[index] = value;
                true
            }
            _ => false,
        }
    }

    /// Adds a column filled with `Empty` if it does not exist yet.
    pub fn ensure_column(&mut self, column: &str) {
        if !self.has_column(column) {
            self.columns.push(column.to_string());
            for row in &mut self.rows {
                row.values.push(Value::Empty);
            }
        }
    }

    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(usize, &Row) -> bool,
    {
        let mut index = 0;
        self.rows.retain(|row| {
            let kept = keep(index, row);
            index += 1;
            kept
        });
    }

    pub fn map_column<F>(&mut self, column: &str, mut f: F)
    where
        F: FnMut(&Value) -> Value,
    {
        if let Some(index) = self.column_index(column) {
            for row in &mut self.rows {
                row.values[index] = f(&row.values[index]);
            }
        }
    }

    /// Row as `(column, value)` pairs in column order.
    pub fn named_row(&self, row: usize) -> Vec<(String, Value)> {
        match self.rows.get(row) {
            Some(r) => self
                .columns
                .iter()
                .cloned()
                .zip(r.values.iter().cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn slice_from(&self, start: usize) -> Table {
        Table {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows: self.rows.iter().skip(start).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_share_column_set() {
        let mut table = Table::from_rows("t", &["ASIN", "Cost"], &[&["B001"]]);
        table.push_row(vec![Value::text("B002"), Value::Number(1.0), Value::text("extra")]);
        assert!(table.rows().iter().all(|r| r.values().len() == 2));
        assert_eq!(table.value(0, "Cost"), Some(&Value::Empty));
    }

    #[test]
    fn test_push_named_and_ensure_column() {
        let mut table = Table::from_rows("t", &["ASIN"], &[&["B001"]]);
        table.ensure_column("SKU");
        table.push_named(&[
            ("SKU".to_string(), Value::text("ABCD-123456")),
            ("Unknown".to_string(), Value::text("ignored")),
        ]);
        assert_eq!(table.columns(), ["ASIN".to_string(), "SKU".to_string()]);
        assert_eq!(table.value(0, "SKU"), Some(&Value::Empty));
        assert_eq!(table.value(1, "SKU"), Some(&Value::text("ABCD-123456")));
        assert_eq!(table.value(1, "ASIN"), Some(&Value::Empty));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Number(10.0).to_string(), "10");
        assert_eq!(Value::Number(23.5).to_string(), "23.5");
        assert_eq!(
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()).to_string(),
            "2024-01-02"
        );
        assert!(Value::text("  ").is_empty());
    }
}
