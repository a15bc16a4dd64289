use crate::core::normalize::{currency_from_value, date_from_value};
use crate::domain::model::{Row, Table, Value};
use crate::utils::error::{ReconError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_MARKUP: f64 = 1.15;
pub const REPLEN: &str = "Replen";

/// Column order of the prep-service upload template.
pub const REQUIRED_HEADERS: [&str; 16] = [
    "Order Date",
    "Supplier / Retailer",
    "Item Name / Description",
    "Size / Color",
    "Bundled?",
    "# Units in Bundle",
    "# Units Expected",
    "ASIN",
    "COGS",
    "Requested List Price",
    "Seller Notes / Prep Request",
    "Tracking #",
    "Custom MSKU",
    "Order #",
    "UPC #",
    "FBA or FBM",
];

pub const LISTING_LOADER_HEADERS: [&str; 9] = [
    "Your Search Term",
    "Amazon's Title",
    "Record Action",
    "Seller SKU",
    "Merchant Suggested ASIN",
    "Offering Condition Type",
    "Fulfillment Channel Code (US)",
    "Your Price USD (Sell on Amazon, US)",
    "Recommended Action",
];

/// How `# Units in Bundle` is filled for bundled rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleUnitsMode {
    /// Copy the bundle field verbatim.
    #[default]
    Raw,
    /// Require a whole number; anything else aborts the projection.
    Integer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceFormat {
    Number,
    /// Text with exactly two decimals, e.g. `"23.00"`.
    Fixed2,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldSource {
    Column(String),
    Constant(String),
    ListPrice {
        column: String,
        markup: f64,
        format: PriceFormat,
    },
    Bundled {
        column: String,
    },
    UnitsInBundle {
        column: String,
        mode: BundleUnitsMode,
    },
    Date {
        column: String,
        format: String,
    },
}

impl FieldSource {
    fn source_column(&self) -> Option<&str> {
        match self {
            FieldSource::Constant(_) => None,
            FieldSource::Column(column)
            | FieldSource::ListPrice { column, .. }
            | FieldSource::Bundled { column }
            | FieldSource::UnitsInBundle { column, .. }
            | FieldSource::Date { column, .. } => Some(column),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub target: String,
    pub source: FieldSource,
    /// Missing source column, or for dates a missing/invalid value, aborts the projection.
    pub required: bool,
}

impl FieldRule {
    pub fn new(target: &str, source: FieldSource) -> Self {
        Self {
            target: target.to_string(),
            source,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// An output schema: ordered columns plus how to fill them. Columns without a rule are copied
/// from the same-named source column, or filled with `default`.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub name: String,
    pub columns: Vec<String>,
    pub rules: Vec<FieldRule>,
    pub default: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub table: Table,
    /// Source columns that did not feed any output column.
    pub unmapped: Vec<String>,
}

impl Template {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rules: Vec::new(),
            default: Value::Empty,
        }
    }

    pub fn rule(mut self, rule: FieldRule) -> Self {
        self.rules.retain(|r| r.target != rule.target);
        self.rules.push(rule);
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = default;
        self
    }

    fn rule_for(&self, column: &str) -> Option<&FieldRule> {
        self.rules.iter().find(|r| r.target == column)
    }

    pub fn project(&self, source: &Table) -> Result<Projection> {
        for rule in self.rules.iter().filter(|r| r.required) {
            if let Some(column) = rule.source.source_column() {
                if !source.has_column(column) {
                    return Err(ReconError::MissingRequiredColumn {
                        table: source.name().to_string(),
                        column: column.to_string(),
                    });
                }
            }
        }

        let mut used: HashSet<&str> = HashSet::new();
        for column in &self.columns {
            match self.rule_for(column) {
                Some(rule) => {
                    if let Some(source_column) = rule.source.source_column() {
                        used.insert(source_column);
                    }
                }
                None => {
                    used.insert(column.as_str());
                }
            }
        }
        let unmapped: Vec<String> = source
            .columns()
            .iter()
            .filter(|c| !used.contains(c.as_str()))
            .cloned()
            .collect();
        if !unmapped.is_empty() {
            tracing::debug!(
                "Template '{}' ignores source columns: {}",
                self.name,
                unmapped.join(", ")
            );
        }

        let mut table = Table::new(self.name.clone(), self.columns.clone());
        for (index, row) in source.rows().iter().enumerate() {
            let mut values = Vec::with_capacity(self.columns.len());
            for column in &self.columns {
                let value = match self.rule_for(column) {
                    Some(rule) => self.apply(rule, source, row, index)?,
                    None => self.lookup(source, row, column),
                };
                values.push(value);
            }
            table.push_row(values);
        }

        Ok(Projection { table, unmapped })
    }

    fn lookup(&self, source: &Table, row: &Row, column: &str) -> Value {
        source
            .column_index(column)
            .and_then(|i| row.get(i))
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    fn raw<'a>(source: &Table, row: &'a Row, column: &str) -> Option<&'a Value> {
        source.column_index(column).and_then(|i| row.get(i))
    }

    fn apply(&self, rule: &FieldRule, source: &Table, row: &Row, index: usize) -> Result<Value> {
        match &rule.source {
            FieldSource::Constant(value) => Ok(Value::text(value.clone())),
            FieldSource::Column(column) => Ok(self.lookup(source, row, column)),
            FieldSource::ListPrice {
                column,
                markup,
                format,
            } => Ok(
                match list_price(Self::raw(source, row, column), *markup, *format) {
                    Some(value) => value,
                    None => self.default.clone(),
                },
            ),
            FieldSource::Bundled { column } => {
                Ok(Value::text(if is_bundled(Self::raw(source, row, column)) {
                    "Yes"
                } else {
                    "No"
                }))
            }
            FieldSource::UnitsInBundle { column, mode } => {
                let raw = Self::raw(source, row, column);
                if !is_bundled(raw) {
                    return Ok(self.default.clone());
                }
                let raw = raw.cloned().unwrap_or(Value::Empty);
                match mode {
                    BundleUnitsMode::Raw => Ok(raw),
                    BundleUnitsMode::Integer => units_as_integer(&raw)
                        .map(|n| Value::text(n.to_string()))
                        .ok_or_else(|| ReconError::MalformedSource {
                            source_name: source.name().to_string(),
                            reason: format!(
                                "row {}: '{}' is not a whole number of units",
                                index + 1,
                                raw
                            ),
                        }),
                }
            }
            FieldSource::Date { column, format } => {
                let raw = Self::raw(source, row, column).unwrap_or(&Value::Empty);
                match date_from_value(raw) {
                    Ok(Some(date)) => Ok(Value::text(date.format(format).to_string())),
                    Ok(None) if rule.required => Err(ReconError::InvalidDateFormat {
                        value: format!("<empty> in row {}", index + 1),
                    }),
                    Err(err) if rule.required => Err(err),
                    _ => Ok(self.default.clone()),
                }
            }
        }
    }
}

fn is_bundled(value: Option<&Value>) -> bool {
    value.map(|v| !v.is_empty()).unwrap_or(false)
}

fn units_as_integer(value: &Value) -> Option<i64> {
    let number = match value {
        Value::Number(n) => *n,
        Value::Text(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (number.fract() == 0.0).then_some(number as i64)
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// `sale × markup` rounded to cents. A sale price mentioning "replen" yields the literal
/// `Replen`; a missing or unreadable price yields `None`.
pub fn list_price(sale: Option<&Value>, markup: f64, format: PriceFormat) -> Option<Value> {
    let sale = sale?;
    if sale.to_string().to_lowercase().contains("replen") {
        return Some(Value::text(REPLEN));
    }
    match currency_from_value(sale) {
        Ok(Some(amount)) => {
            let price = round_cents(amount * markup);
            Some(match format {
                PriceFormat::Number => Value::Number(price),
                PriceFormat::Fixed2 => Value::text(format!("{:.2}", price)),
            })
        }
        Ok(None) => None,
        Err(err) => {
            tracing::warn!("Cannot derive a list price: {}", err);
            None
        }
    }
}

/// Leads → prep-service upload rows.
pub fn prep_template(markup: f64, bundle_units: BundleUnitsMode) -> Template {
    Template::new("Processed_Instant_Fulfillment_Template", &REQUIRED_HEADERS)
        .rule(
            FieldRule::new(
                "Order Date",
                FieldSource::Date {
                    column: "Date".to_string(),
                    format: "%m/%d/%Y".to_string(),
                },
            )
            .required(),
        )
        .rule(FieldRule::new(
            "Supplier / Retailer",
            FieldSource::Constant("temp".to_string()),
        ))
        .rule(FieldRule::new(
            "Item Name / Description",
            FieldSource::Column("Name".to_string()),
        ))
        .rule(FieldRule::new(
            "Size / Color",
            FieldSource::Constant("N/A".to_string()),
        ))
        .rule(FieldRule::new(
            "Bundled?",
            FieldSource::Bundled {
                column: "Bundled?".to_string(),
            },
        ))
        .rule(FieldRule::new(
            "# Units in Bundle",
            FieldSource::UnitsInBundle {
                column: "Bundled?".to_string(),
                mode: bundle_units,
            },
        ))
        .rule(FieldRule::new(
            "# Units Expected",
            FieldSource::Column("Amount Purchased".to_string()),
        ))
        .rule(FieldRule::new(
            "Requested List Price",
            FieldSource::ListPrice {
                column: "Sale Price".to_string(),
                markup,
                format: PriceFormat::Number,
            },
        ))
        .rule(FieldRule::new(
            "FBA or FBM",
            FieldSource::Constant("FBA".to_string()),
        ))
}

/// New catalog products → listing-loader rows. Expects the new-records table, which carries
/// the generated `SKU`.
pub fn listing_loader_template(markup: f64) -> Template {
    Template::new("Listing_Loader", &LISTING_LOADER_HEADERS)
        .rule(FieldRule::new(
            "Your Search Term",
            FieldSource::Column("ASIN".to_string()),
        ))
        .rule(FieldRule::new(
            "Amazon's Title",
            FieldSource::Column("Name".to_string()),
        ))
        .rule(FieldRule::new(
            "Record Action",
            FieldSource::Constant("Add Product".to_string()),
        ))
        .rule(FieldRule::new(
            "Seller SKU",
            FieldSource::Column("SKU".to_string()),
        ))
        .rule(FieldRule::new(
            "Merchant Suggested ASIN",
            FieldSource::Column("ASIN".to_string()),
        ))
        .rule(FieldRule::new(
            "Offering Condition Type",
            FieldSource::Constant("New".to_string()),
        ))
        .rule(FieldRule::new(
            "Fulfillment Channel Code (US)",
            FieldSource::Constant("AMAZON_NA".to_string()),
        ))
        .rule(FieldRule::new(
            "Your Price USD (Sell on Amazon, US)",
            FieldSource::ListPrice {
                column: "Sale Price".to_string(),
                markup,
                format: PriceFormat::Fixed2,
            },
        ))
        .rule(FieldRule::new(
            "Recommended Action",
            FieldSource::Constant("Ready To list > Enter required details.".to_string()),
        ))
}
