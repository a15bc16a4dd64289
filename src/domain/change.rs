use crate::domain::model::{Table, Value};
use serde::Serialize;
use std::fmt;

/// Canonicalized natural key; composite keys keep their component order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RecordKey(pub Vec<String>);

impl RecordKey {
    pub fn single(value: impl Into<String>) -> Self {
        RecordKey(vec![value.into()])
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    /// True when any component is blank; such keys never match.
    pub fn is_blank(&self) -> bool {
        self.0.iter().any(|c| c.is_empty())
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" / "))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    Unchanged,
    FilledMissing { new_value: f64 },
    ConflictingUpdate { old_value: f64, new_value: f64 },
    NewRecord { fields: Vec<(String, Value)> },
}

/// Outcome for one source row. Never mutated after the engine emits it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRecord {
    /// Zero-based row index in the source table.
    pub source_row: usize,
    pub key: RecordKey,
    /// Identifier of the matched or created target row (the catalog SKU).
    pub identifier: Option<String>,
    /// Human-readable label from the source row, e.g. the product name.
    pub label: Option<String>,
    #[serde(flatten)]
    pub kind: ChangeKind,
}

impl ChangeRecord {
    pub fn is_unchanged(&self) -> bool {
        matches!(self.kind, ChangeKind::Unchanged)
    }

    pub fn is_filled(&self) -> bool {
        matches!(self.kind, ChangeKind::FilledMissing { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.kind, ChangeKind::ConflictingUpdate { .. })
    }

    pub fn is_new(&self) -> bool {
        matches!(self.kind, ChangeKind::NewRecord { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipCounts {
    pub sentinel: usize,
    pub invalid_cost: usize,
    pub missing_cost: usize,
    pub blank_key: usize,
    pub filtered_target: usize,
    /// Unmatched keys when new-record creation is disabled.
    pub unmatched: usize,
}

impl SkipCounts {
    pub fn total(&self) -> usize {
        self.sentinel
            + self.invalid_cost
            + self.missing_cost
            + self.blank_key
            + self.filtered_target
            + self.unmatched
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationResult {
    pub target: Table,
    pub changes: Vec<ChangeRecord>,
    pub skipped: SkipCounts,
    /// Whether conflicting costs were written into `target`.
    pub conflicts_applied: bool,
}

impl ReconciliationResult {
    pub fn unchanged_count(&self) -> usize {
        self.changes.iter().filter(|c| c.is_unchanged()).count()
    }

    pub fn filled(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.changes.iter().filter(|c| c.is_filled())
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.changes.iter().filter(|c| c.is_conflict())
    }

    pub fn new_records(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.changes.iter().filter(|c| c.is_new())
    }

    pub fn summary(&self) -> ChangeSummary {
        ChangeSummary {
            unchanged: self.unchanged_count(),
            filled: self.filled().count(),
            conflicts: self.conflicts().count(),
            new_records: self.new_records().count(),
            skipped: self.skipped.total(),
        }
    }

    /// The source rows that produced new records, plus the generated identifier under
    /// `identifier_column`, in creation order. `source` must be the table that was reconciled.
    pub fn new_records_table(&self, source: &Table, identifier_column: &str) -> Table {
        let mut columns = source.columns().to_vec();
        if !columns.iter().any(|c| c == identifier_column) {
            columns.push(identifier_column.to_string());
        }
        let mut table = Table::new("new_records", columns);
        for change in self.new_records() {
            let mut fields = source.named_row(change.source_row);
            fields.retain(|(column, _)| column != identifier_column);
            fields.push((
                identifier_column.to_string(),
                change
                    .identifier
                    .clone()
                    .map(Value::Text)
                    .unwrap_or(Value::Empty),
            ));
            table.push_named(&fields);
        }
        table
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub unchanged: usize,
    pub filled: usize,
    pub conflicts: usize,
    pub new_records: usize,
    pub skipped: usize,
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} filled, {} conflicts, {} new, {} unchanged, {} skipped",
            self.filled, self.conflicts, self.new_records, self.unchanged, self.skipped
        )
    }
}
