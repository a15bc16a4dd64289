//! Reconciliation of a source-of-truth table against a target catalog.
//!
//! Source rows are classified in input order. Intended mutations are collected while iterating
//! and applied to the target in a separate pass; lookups during the iteration see the staged
//! state, so a key repeated in the source behaves exactly as if each row had been applied
//! immediately.

use crate::core::identifier::IdentifierSource;
use crate::core::normalize::{currency_from_value, key_from_value, record_key, InvalidValuePolicy};
use crate::domain::change::{ChangeKind, ChangeRecord, RecordKey, ReconciliationResult, SkipCounts};
use crate::domain::model::{Table, Value};
use crate::utils::error::{ReconError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const COST_EPSILON: f64 = 1e-9;

pub const DEFAULT_SENTINEL: &str = "Replen";

/// Rows whose `column` equals `value` (trimmed, case-insensitive) are left out entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelRule {
    pub column: String,
    #[serde(default = "default_sentinel")]
    pub value: String,
}

fn default_sentinel() -> String {
    DEFAULT_SENTINEL.to_string()
}

impl SentinelRule {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: default_sentinel(),
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        key_from_value(value).eq_ignore_ascii_case(self.value.trim())
    }
}

/// Only target rows whose `column` equals `equals` (case-insensitive) take part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFilter {
    pub column: String,
    pub equals: String,
}

impl TargetFilter {
    fn accepts(&self, value: Option<&Value>) -> bool {
        value
            .map(key_from_value)
            .is_some_and(|v| v.eq_ignore_ascii_case(self.equals.trim()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Conflicts are reported for human review; the target keeps its cost.
    #[default]
    ReportOnly,
    /// Conflicting source costs overwrite the target.
    Apply,
}

/// How a target row is built for a source key with no match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRecordTemplate {
    pub enabled: bool,
    /// `(target column, source column)` pairs copied verbatim.
    pub copy: Vec<(String, String)>,
    /// `(target column, value)` pairs for columns the source cannot provide.
    pub defaults: Vec<(String, String)>,
}

impl NewRecordTemplate {
    pub fn disabled() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub source_key: Vec<String>,
    pub target_key: Vec<String>,
    pub source_cost: String,
    pub target_cost: String,
    pub target_identifier: Option<String>,
    pub label_column: Option<String>,
    pub sentinel: Option<SentinelRule>,
    pub target_filter: Option<TargetFilter>,
    pub conflicts: ConflictPolicy,
    pub invalid_target_cost: InvalidValuePolicy,
    pub new_records: NewRecordTemplate,
}

impl ReconcileOptions {
    pub fn new(
        source_key: &[&str],
        target_key: &[&str],
        source_cost: &str,
        target_cost: &str,
    ) -> Self {
        Self {
            source_key: source_key.iter().map(|s| s.to_string()).collect(),
            target_key: target_key.iter().map(|s| s.to_string()).collect(),
            source_cost: source_cost.to_string(),
            target_cost: target_cost.to_string(),
            target_identifier: None,
            label_column: None,
            sentinel: None,
            target_filter: None,
            conflicts: ConflictPolicy::ReportOnly,
            invalid_target_cost: InvalidValuePolicy::Abort,
            new_records: NewRecordTemplate::disabled(),
        }
    }

    pub fn with_identifier(mut self, column: &str) -> Self {
        self.target_identifier = Some(column.to_string());
        self
    }

    pub fn with_label(mut self, column: &str) -> Self {
        self.label_column = Some(column.to_string());
        self
    }

    pub fn with_sentinel(mut self, rule: SentinelRule) -> Self {
        self.sentinel = Some(rule);
        self
    }

    pub fn with_target_filter(mut self, filter: TargetFilter) -> Self {
        self.target_filter = Some(filter);
        self
    }

    pub fn with_conflicts(mut self, policy: ConflictPolicy) -> Self {
        self.conflicts = policy;
        self
    }

    pub fn with_invalid_target_cost(mut self, policy: InvalidValuePolicy) -> Self {
        self.invalid_target_cost = policy;
        self
    }

    pub fn with_new_records(mut self, template: NewRecordTemplate) -> Self {
        self.new_records = template;
        self
    }
}

fn require_column(table: &Table, column: &str) -> Result<usize> {
    table
        .column_index(column)
        .ok_or_else(|| ReconError::MissingRequiredColumn {
            table: table.name().to_string(),
            column: column.to_string(),
        })
}

fn require_columns(table: &Table, columns: &[String]) -> Result<Vec<usize>> {
    columns.iter().map(|c| require_column(table, c)).collect()
}

/// Where a matched row lives: the original target or a row staged during this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Existing(usize),
    Staged(usize),
}

struct StagedRow {
    fields: Vec<(String, Value)>,
    identifier: Option<String>,
}

/// Reconciles `source` into `target` and returns the mutated target with one change record per
/// classified source row.
///
/// When several target rows share a key, the first one in target order is used.
pub fn reconcile(
    source: &Table,
    mut target: Table,
    options: &ReconcileOptions,
    identifiers: &mut dyn IdentifierSource,
) -> Result<ReconciliationResult> {
    if options.source_key.len() != options.target_key.len() || options.source_key.is_empty() {
        return Err(ReconError::ConfigError {
            message: format!(
                "source key {:?} and target key {:?} must have the same, non-zero length",
                options.source_key, options.target_key
            ),
        });
    }

    let source_key_idx = require_columns(source, &options.source_key)?;
    let source_cost_idx = require_column(source, &options.source_cost)?;
    let sentinel_idx = match &options.sentinel {
        Some(rule) => Some((require_column(source, &rule.column)?, rule)),
        None => None,
    };
    let label_idx = options
        .label_column
        .as_deref()
        .and_then(|c| source.column_index(c));

    let target_key_idx = require_columns(&target, &options.target_key)?;
    let target_cost_idx = require_column(&target, &options.target_cost)?;
    let identifier_idx = match &options.target_identifier {
        Some(column) => Some(require_column(&target, column)?),
        None => None,
    };
    let filter_idx = match &options.target_filter {
        Some(filter) => Some((require_column(&target, &filter.column)?, filter)),
        None => None,
    };

    let template = &options.new_records;
    if template.enabled {
        for (_, source_column) in &template.copy {
            require_column(source, source_column)?;
        }
    }

    // index the target; rows excluded by the filter are remembered separately
    let mut index: HashMap<RecordKey, Slot> = HashMap::new();
    let mut filtered_out: HashMap<RecordKey, usize> = HashMap::new();
    for (row_idx, row) in target.rows().iter().enumerate() {
        let key = record_key(row, &target_key_idx);
        if key.is_blank() {
            continue;
        }
        let accepted = filter_idx
            .map(|(col, filter)| filter.accepts(row.get(col)))
            .unwrap_or(true);
        if accepted {
            index.entry(key).or_insert(Slot::Existing(row_idx));
        } else {
            filtered_out.entry(key).or_insert(row_idx);
        }
    }

    if let Some(col) = identifier_idx {
        let existing: Vec<String> = target
            .rows()
            .iter()
            .filter_map(|row| row.get(col).map(key_from_value))
            .filter(|id| !id.is_empty())
            .collect();
        identifiers.reserve(&existing);
    }

    let mut pending_costs: HashMap<Slot, f64> = HashMap::new();
    let mut staged: Vec<StagedRow> = Vec::new();
    let mut changes: Vec<ChangeRecord> = Vec::new();
    let mut skipped = SkipCounts::default();

    for (row_idx, row) in source.rows().iter().enumerate() {
        if let Some((col, rule)) = sentinel_idx {
            if row.get(col).is_some_and(|v| rule.matches(v)) {
                skipped.sentinel += 1;
                continue;
            }
        }

        let new_cost = match row.get(source_cost_idx).map(currency_from_value) {
            Some(Ok(Some(cost))) => cost,
            Some(Ok(None)) | None => {
                tracing::debug!("Source row {} has no cost, skipping", row_idx);
                skipped.missing_cost += 1;
                continue;
            }
            Some(Err(err)) => {
                tracing::debug!("Source row {} skipped: {}", row_idx, err);
                skipped.invalid_cost += 1;
                continue;
            }
        };

        let key = record_key(row, &source_key_idx);
        if key.is_blank() {
            skipped.blank_key += 1;
            continue;
        }

        let label = label_idx
            .and_then(|col| row.get(col))
            .map(key_from_value)
            .filter(|l| !l.is_empty());

        let found = index.get(&key).copied();
        let Some(slot) = found else {
            if filtered_out.contains_key(&key) {
                skipped.filtered_target += 1;
                continue;
            }
            if !template.enabled {
                skipped.unmatched += 1;
                continue;
            }

            let identifier = options
                .target_identifier
                .as_ref()
                .map(|_| identifiers.next_identifier());
            let fields = build_new_row(source, row_idx, &key, new_cost, identifier.as_deref(), options);
            let slot = Slot::Staged(staged.len());
            staged.push(StagedRow {
                fields,
                identifier: identifier.clone(),
            });
            index.insert(key.clone(), slot);
            pending_costs.insert(slot, new_cost);

            tracing::debug!("New record {} ({:?})", key, identifier);
            changes.push(ChangeRecord {
                source_row: row_idx,
                key,
                identifier,
                label,
                kind: ChangeKind::NewRecord {
                    fields: source.named_row(row_idx),
                },
            });
            continue;
        };

        let identifier = match slot {
            Slot::Existing(t) => identifier_idx
                .and_then(|col| target.rows()[t].get(col))
                .map(key_from_value)
                .filter(|id| !id.is_empty()),
            Slot::Staged(s) => staged[s].identifier.clone(),
        };

        let current = match pending_costs.get(&slot) {
            Some(cost) => Ok(Some(*cost)),
            None => match slot {
                Slot::Existing(t) => target.rows()[t]
                    .get(target_cost_idx)
                    .map(currency_from_value)
                    .unwrap_or(Ok(None)),
                Slot::Staged(_) => Ok(None),
            },
        };

        let old_cost = match current {
            Ok(cost) => cost,
            Err(err) => match options.invalid_target_cost {
                InvalidValuePolicy::Abort => return Err(err),
                InvalidValuePolicy::SkipRow => {
                    tracing::debug!("Target cost for {} is invalid, skipping: {}", key, err);
                    skipped.invalid_cost += 1;
                    continue;
                }
                InvalidValuePolicy::TreatAsMissing => None,
            },
        };

        let kind = match old_cost {
            None => {
                pending_costs.insert(slot, new_cost);
                ChangeKind::FilledMissing {
                    new_value: new_cost,
                }
            }
            Some(old) if (old - new_cost).abs() > COST_EPSILON => {
                if options.conflicts == ConflictPolicy::Apply {
                    pending_costs.insert(slot, new_cost);
                }
                ChangeKind::ConflictingUpdate {
                    old_value: old,
                    new_value: new_cost,
                }
            }
            Some(_) => ChangeKind::Unchanged,
        };

        tracing::debug!("{} -> {:?}", key, kind);
        changes.push(ChangeRecord {
            source_row: row_idx,
            key,
            identifier,
            label,
            kind,
        });
    }

    // apply pass
    let original_len = target.len();
    for (slot, cost) in &pending_costs {
        if let Slot::Existing(t) = slot {
            debug_assert!(*t < original_len);
            target.set(*t, &options.target_cost, Value::Number(*cost));
        }
    }
    // template columns only appear once a row actually needs them
    if !staged.is_empty() {
        for (target_column, _) in template.copy.iter().chain(template.defaults.iter()) {
            target.ensure_column(target_column);
        }
    }
    for (s, row) in staged.into_iter().enumerate() {
        let mut fields = row.fields;
        if let Some(cost) = pending_costs.get(&Slot::Staged(s)) {
            set_field(&mut fields, &options.target_cost, Value::Number(*cost));
        }
        target.push_named(&fields);
    }

    let result = ReconciliationResult {
        target,
        changes,
        skipped,
        conflicts_applied: options.conflicts == ConflictPolicy::Apply,
    };
    tracing::info!(
        "Reconciled {} source rows into '{}': {}",
        source.len(),
        result.target.name(),
        result.summary()
    );
    Ok(result)
}

fn set_field(fields: &mut Vec<(String, Value)>, column: &str, value: Value) {
    match fields.iter_mut().find(|(c, _)| c == column) {
        Some((_, existing)) => *existing = value,
        None => fields.push((column.to_string(), value)),
    }
}

fn build_new_row(
    source: &Table,
    row_idx: usize,
    key: &RecordKey,
    cost: f64,
    identifier: Option<&str>,
    options: &ReconcileOptions,
) -> Vec<(String, Value)> {
    let mut fields: Vec<(String, Value)> = Vec::new();
    for (target_column, default) in &options.new_records.defaults {
        set_field(&mut fields, target_column, Value::from(default.as_str()));
    }
    for (target_column, source_column) in &options.new_records.copy {
        let value = source
            .value(row_idx, source_column)
            .cloned()
            .unwrap_or(Value::Empty);
        set_field(&mut fields, target_column, value);
    }
    for (column, component) in options.target_key.iter().zip(key.components()) {
        set_field(&mut fields, column, Value::text(component.clone()));
    }
    if let (Some(column), Some(id)) = (&options.target_identifier, identifier) {
        set_field(&mut fields, column, Value::text(id));
    }
    set_field(&mut fields, &options.target_cost, Value::Number(cost));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identifier::{is_valid_sku, RandomSku};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ids() -> RandomSku<StdRng> {
        RandomSku::with_rng(StdRng::seed_from_u64(1), true)
    }

    fn leads(rows: &[&[&str]]) -> Table {
        Table::from_rows("leads", &["ASIN", "Name", "COGS", "Sale Price"], rows)
    }

    fn catalog(rows: &[&[&str]]) -> Table {
        Table::from_rows("catalog", &["ASIN", "SKU", "Title", "Cost"], rows)
    }

    fn options() -> ReconcileOptions {
        ReconcileOptions::new(&["ASIN"], &["ASIN"], "COGS", "Cost")
            .with_identifier("SKU")
            .with_label("Name")
            .with_sentinel(SentinelRule::new("Sale Price"))
            .with_new_records(NewRecordTemplate {
                enabled: true,
                copy: vec![("Title".to_string(), "Name".to_string())],
                defaults: vec![("Labels".to_string(), "#FBA".to_string())],
            })
    }

    #[test]
    fn test_classifies_each_outcome() {
        let source = leads(&[
            &["B001", "Filled", "$10.00", "20"],
            &["B002", "Conflict", "$12.00", "20"],
            &["B003", "Same", "5", "20"],
            &["B004", "Brand new", "$7.50", "20"],
        ]);
        let target = catalog(&[
            &["B001", "AAAA-111111", "Filled", ""],
            &["B002", "AAAA-222222", "Conflict", "11"],
            &["B003", "AAAA-333333", "Same", "5.00"],
        ]);

        let result = reconcile(&source, target, &options(), &mut ids()).unwrap();

        assert_eq!(result.filled().count(), 1);
        assert_eq!(result.conflicts().count(), 1);
        assert_eq!(result.unchanged_count(), 1);
        assert_eq!(result.new_records().count(), 1);

        assert_eq!(result.target.value(0, "Cost"), Some(&Value::Number(10.0)));
        // conflicts are report-only by default
        assert_eq!(result.target.value(1, "Cost"), Some(&Value::text("11")));

        assert_eq!(result.target.len(), 4);
        let sku = result.target.value(3, "SKU").unwrap().to_string();
        assert!(is_valid_sku(&sku));
        assert_eq!(result.target.value(3, "Title"), Some(&Value::text("Brand new")));
        assert_eq!(result.target.value(3, "Labels"), Some(&Value::text("#FBA")));
        assert_eq!(result.target.value(3, "Cost"), Some(&Value::Number(7.5)));
        assert_eq!(result.target.value(0, "Labels"), Some(&Value::Empty));

        let conflict = result.conflicts().next().unwrap();
        assert_eq!(conflict.identifier.as_deref(), Some("AAAA-222222"));
        assert_eq!(
            conflict.kind,
            ChangeKind::ConflictingUpdate {
                old_value: 11.0,
                new_value: 12.0
            }
        );
    }

    #[test]
    fn test_sentinel_and_unparseable_rows_are_skipped() {
        let source = leads(&[
            &["B001", "Replen item", "$10", "replen"],
            &["B002", "Bad cost", "abc", "20"],
            &["B003", "No cost", "", "20"],
        ]);
        let target = catalog(&[&["B001", "AAAA-111111", "x", ""]]);
        let before = target.clone();

        let result = reconcile(&source, target, &options(), &mut ids()).unwrap();

        assert!(result.changes.is_empty());
        assert_eq!(result.target, before);
        assert_eq!(result.skipped.sentinel, 1);
        assert_eq!(result.skipped.invalid_cost, 1);
        assert_eq!(result.skipped.missing_cost, 1);
    }

    #[test]
    fn test_repeated_new_key_creates_one_row() {
        let source = leads(&[&["B009", "First", "$3", "9"], &["B009", "Again", "$4", "9"]]);
        let result = reconcile(&source, catalog(&[]), &options(), &mut ids()).unwrap();

        assert_eq!(result.target.len(), 1);
        assert_eq!(result.new_records().count(), 1);
        // the second row sees the staged record and reports a conflict against it
        let conflict = result.conflicts().next().unwrap();
        assert_eq!(conflict.identifier, result.new_records().next().unwrap().identifier);
        assert_eq!(result.target.value(0, "Cost"), Some(&Value::Number(3.0)));
    }

    #[test]
    fn test_repeated_key_fills_once() {
        let source = leads(&[&["B001", "a", "$3", "9"], &["B001", "b", "$3", "9"]]);
        let target = catalog(&[&["B001", "AAAA-111111", "x", ""]]);
        let result = reconcile(&source, target, &options(), &mut ids()).unwrap();

        assert_eq!(result.filled().count(), 1);
        assert_eq!(result.unchanged_count(), 1);
    }

    #[test]
    fn test_first_duplicate_target_wins() {
        let source = leads(&[&["B001", "a", "$3", "9"]]);
        let target = catalog(&[
            &["B001", "AAAA-111111", "first", ""],
            &["B001", "AAAA-222222", "second", ""],
        ]);
        let result = reconcile(&source, target, &options(), &mut ids()).unwrap();

        assert_eq!(result.target.value(0, "Cost"), Some(&Value::Number(3.0)));
        assert_eq!(result.target.value(1, "Cost"), Some(&Value::Empty));
        assert_eq!(
            result.filled().next().unwrap().identifier.as_deref(),
            Some("AAAA-111111")
        );
    }

    #[test]
    fn test_composite_key_with_filter_and_applied_conflicts() {
        let catalog = Table::from_rows(
            "sb",
            &["ASIN", "SKU", "Cost"],
            &[
                &["B001", "AAAA-111111", "4.5"],
                &["B001", "AAAA-999999", "8"],
                &["B002", "BBBB-222222", "6"],
            ],
        );
        let inventory = Table::from_rows(
            "aura",
            &["asin", "sku", "fulfillment_type", "cost"],
            &[
                &["B001", "AAAA-111111", "FBA", "4"],
                &["B001", "AAAA-999999", "fba", ""],
                &["B002", "BBBB-222222", "fbm", "1"],
            ],
        );
        let options = ReconcileOptions::new(&["ASIN", "SKU"], &["asin", "sku"], "Cost", "cost")
            .with_identifier("sku")
            .with_target_filter(TargetFilter {
                column: "fulfillment_type".to_string(),
                equals: "fba".to_string(),
            })
            .with_conflicts(ConflictPolicy::Apply);

        let result = reconcile(&catalog, inventory, &options, &mut ids()).unwrap();

        assert_eq!(result.target.len(), 3);
        assert_eq!(result.target.value(0, "cost"), Some(&Value::Number(4.5)));
        assert_eq!(result.target.value(1, "cost"), Some(&Value::Number(8.0)));
        assert_eq!(result.target.value(2, "cost"), Some(&Value::text("1")));
        assert_eq!(result.skipped.filtered_target, 1);
        assert!(result.conflicts_applied);
    }

    #[test]
    fn test_missing_columns_abort_before_any_work() {
        let source = Table::from_rows("leads", &["ASIN", "Name"], &[&["B001", "x"]]);
        let err = reconcile(&source, catalog(&[]), &options(), &mut ids()).unwrap_err();
        assert!(matches!(
            err,
            ReconError::MissingRequiredColumn { ref column, .. } if column == "COGS"
        ));

        let target = Table::from_rows("catalog", &["SKU", "Cost"], &[]);
        let err = reconcile(&leads(&[]), target, &options(), &mut ids()).unwrap_err();
        assert!(matches!(
            err,
            ReconError::MissingRequiredColumn { ref column, .. } if column == "ASIN"
        ));
    }

    #[test]
    fn test_invalid_target_cost_policy() {
        let source = leads(&[&["B001", "a", "$3", "9"]]);
        let target = catalog(&[&["B001", "AAAA-111111", "x", "n/a"]]);

        assert!(matches!(
            reconcile(&source, target.clone(), &options(), &mut ids()),
            Err(ReconError::InvalidCurrencyFormat { .. })
        ));

        let lenient = options().with_invalid_target_cost(InvalidValuePolicy::TreatAsMissing);
        let result = reconcile(&source, target, &lenient, &mut ids()).unwrap();
        assert_eq!(result.filled().count(), 1);
    }

    #[test]
    fn test_unmatched_rows_counted_when_creation_disabled() {
        let source = leads(&[&["B404", "a", "$3", "9"]]);
        let options = options().with_new_records(NewRecordTemplate::disabled());
        let result = reconcile(&source, catalog(&[]), &options, &mut ids()).unwrap();
        assert!(result.target.is_empty());
        assert!(result.changes.is_empty());
        assert_eq!(result.skipped.unmatched, 1);
    }
}
