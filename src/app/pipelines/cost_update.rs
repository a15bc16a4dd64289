use super::{file_name, today, JobContext};
use crate::adapters::report::render_cost_report;
use crate::adapters::tabular::encode_xlsx;
use crate::config::toml_config::{CostUpdateAccount, ReconcileSettings};
use crate::core::loader::{parse_spreadsheet, ColumnTypes, SourceDescriptor};
use crate::core::projector::listing_loader_template;
use crate::core::reconcile::{reconcile, NewRecordTemplate, ReconcileOptions, SentinelRule};
use crate::core::watermark::{select_since, Selection, Watermark, WatermarkStore};
use crate::domain::change::ReconciliationResult;
use crate::domain::model::Table;
use crate::domain::ports::{Attachment, OutboundMessage, Pipeline, RunOutcome, Storage};
use crate::utils::error::{ReconError, Result};
use async_trait::async_trait;

pub const SUBJECT: &str = "Amazon New Listings & COGS Report";
const LISTING_SHEET: &str = "Template";

pub struct CostUpdateInput {
    pub watermark: Watermark,
    pub leads: Table,
    pub catalog: Table,
}

pub struct CostUpdatePlan {
    pub watermark: Watermark,
    pub selection: Selection,
    /// `None` when no lead was dated on or after the watermark.
    pub result: Option<ReconciliationResult>,
    pub listing: Option<Table>,
}

/// Leads sheet → catalog workbook (+ listing loader for new products).
pub struct CostUpdatePipeline<S: Storage + Clone> {
    ctx: JobContext<S>,
    account: CostUpdateAccount,
    leads: SourceDescriptor,
}

/// Leads join the catalog on `ASIN`; new catalog rows get a generated `SKU`.
pub fn cost_update_options(settings: &ReconcileSettings) -> ReconcileOptions {
    ReconcileOptions::new(&["ASIN"], &["ASIN"], "COGS", "Cost")
        .with_identifier("SKU")
        .with_label("Name")
        .with_invalid_target_cost(settings.invalid_target_cost)
        .with_sentinel(SentinelRule {
            column: "Sale Price".to_string(),
            value: settings.sentinel.clone(),
        })
        .with_new_records(NewRecordTemplate {
            enabled: true,
            copy: vec![("Title".to_string(), "Name".to_string())],
            defaults: vec![
                ("Labels".to_string(), "#FBA".to_string()),
                ("VAT_CATEGORY".to_string(), "A_GEN_STANDARD".to_string()),
                ("Hide".to_string(), "NO".to_string()),
            ],
        })
}

impl<S: Storage + Clone> CostUpdatePipeline<S> {
    pub fn new(ctx: JobContext<S>, account: CostUpdateAccount, leads: SourceDescriptor) -> Self {
        Self {
            ctx,
            account,
            leads,
        }
    }

    fn catalog_sheet(&self) -> &str {
        self.account.catalog_sheet.as_deref().unwrap_or("Sheet1")
    }

    async fn load_catalog(&self) -> Result<Table> {
        let key = &self.account.catalog_key;
        if !self.ctx.storage.exists(key).await? {
            return Err(ReconError::SourceUnavailable {
                source_name: key.clone(),
                reason: "catalog workbook does not exist".to_string(),
            });
        }
        let bytes = self.ctx.storage.read_file(key).await?;
        parse_spreadsheet(key, &bytes, self.account.catalog_sheet.as_deref(), 0)
    }
}

#[async_trait]
impl<S: Storage + Clone> Pipeline for CostUpdatePipeline<S> {
    type Extracted = CostUpdateInput;
    type Transformed = CostUpdatePlan;

    fn name(&self) -> &str {
        &self.account.name
    }

    async fn extract(&self) -> Result<CostUpdateInput> {
        let watermark = WatermarkStore::new(&self.ctx.storage, self.account.watermark_key())
            .read()
            .await;
        let leads = self
            .ctx
            .loader
            .load(&self.ctx.storage, &self.leads, &ColumnTypes::raw())
            .await?;
        let catalog = self.load_catalog().await?;
        Ok(CostUpdateInput {
            watermark,
            leads,
            catalog,
        })
    }

    async fn transform(&self, input: CostUpdateInput) -> Result<CostUpdatePlan> {
        let selection = select_since(
            &input.leads,
            "Date",
            input.watermark,
            self.ctx.settings.date_policy,
        )?;
        if selection.table.is_empty() {
            tracing::info!(
                "[{}] No leads dated on or after {}",
                self.account.name,
                input.watermark.last_processed_date
            );
            return Ok(CostUpdatePlan {
                watermark: input.watermark,
                selection,
                result: None,
                listing: None,
            });
        }

        let options = cost_update_options(&self.ctx.settings);
        let mut identifiers = self.ctx.identifiers();
        let result = reconcile(&selection.table, input.catalog, &options, &mut identifiers)?;

        let listing = if result.new_records().next().is_some() {
            let new_products = result.new_records_table(&selection.table, "SKU");
            Some(
                listing_loader_template(self.ctx.settings.markup)
                    .project(&new_products)?
                    .table,
            )
        } else {
            None
        };

        Ok(CostUpdatePlan {
            watermark: input.watermark,
            selection,
            result: Some(result),
            listing,
        })
    }

    async fn load(&self, plan: CostUpdatePlan) -> Result<RunOutcome> {
        let name = &self.account.name;
        let mut outcome = RunOutcome {
            account: name.clone(),
            rows_considered: plan.selection.table.len(),
            ..Default::default()
        };
        let Some(result) = plan.result else {
            return Ok(outcome);
        };

        let summary = result.summary();
        tracing::info!("[{}] {}", name, summary);
        if self.ctx.dry_run {
            tracing::info!("[{}] Dry run: catalog, delivery and watermark left untouched", name);
            return Ok(outcome);
        }

        let mut attachments = Vec::new();
        if summary.filled > 0 || summary.new_records > 0 {
            let key = &self.account.catalog_key;
            let bytes = encode_xlsx(&result.target, self.catalog_sheet())?;
            self.ctx.storage.write_file(key, &bytes).await?;
            tracing::info!("[{}] Catalog written to {}", name, key);
            outcome.artifacts.push(key.clone());
            attachments.push(Attachment {
                filename: file_name(key),
                data: bytes,
            });
        }

        if let Some(listing) = &plan.listing {
            let key = self.account.listing_loader_key(&self.ctx.output_path);
            let bytes = encode_xlsx(listing, LISTING_SHEET)?;
            self.ctx.storage.write_file(&key, &bytes).await?;
            tracing::info!("[{}] Listing loader with {} products written to {}", name, listing.len(), key);
            outcome.artifacts.push(key.clone());
            attachments.push(Attachment {
                filename: file_name(&key),
                data: bytes,
            });
        }

        if let Some(report) = render_cost_report(name, &result, "Cost") {
            let message = OutboundMessage {
                recipient: self.account.email.clone(),
                subject: format!("{} {}", SUBJECT, today()),
                text_body: report.text,
                html_body: Some(report.html),
                attachments,
            };
            self.ctx.delivery.deliver(&message).await?;
            outcome.delivered = true;
        }

        if let Some(next) = plan.selection.next_watermark(plan.watermark) {
            WatermarkStore::new(&self.ctx.storage, self.account.watermark_key())
                .write(next)
                .await?;
            outcome.watermark = Some(next.last_processed_date.format("%Y-%m-%d").to_string());
        }

        Ok(outcome)
    }
}
