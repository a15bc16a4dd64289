use super::{today, JobContext};
use crate::adapters::report::render_prep_upload;
use crate::adapters::tabular::encode_csv;
use crate::config::toml_config::PrepUploadAccount;
use crate::core::loader::{ColumnTypes, SourceDescriptor};
use crate::core::projector::prep_template;
use crate::core::watermark::rows_after_marker;
use crate::domain::model::Table;
use crate::domain::ports::{Attachment, OutboundMessage, Pipeline, RunOutcome, Storage};
use crate::utils::error::Result;
use async_trait::async_trait;

pub const SUBJECT: &str = "Processed Instant Fulfillment Template";

/// Leads sheet → prep-service upload CSV.
pub struct PrepUploadPipeline<S: Storage + Clone> {
    ctx: JobContext<S>,
    account: PrepUploadAccount,
    leads: SourceDescriptor,
}

impl<S: Storage + Clone> PrepUploadPipeline<S> {
    pub fn new(ctx: JobContext<S>, account: PrepUploadAccount, leads: SourceDescriptor) -> Self {
        Self {
            ctx,
            account,
            leads,
        }
    }
}

#[async_trait]
impl<S: Storage + Clone> Pipeline for PrepUploadPipeline<S> {
    type Extracted = Table;
    /// `None` when the batch after the marker row is empty.
    type Transformed = Option<Table>;

    fn name(&self) -> &str {
        &self.account.name
    }

    async fn extract(&self) -> Result<Table> {
        self.ctx
            .loader
            .load(&self.ctx.storage, &self.leads, &ColumnTypes::raw())
            .await
    }

    async fn transform(&self, leads: Table) -> Result<Option<Table>> {
        let batch = rows_after_marker(&leads);
        if batch.is_empty() {
            tracing::info!("[{}] No new leads after the marker row", self.account.name);
            return Ok(None);
        }
        let template = prep_template(self.ctx.settings.markup, self.ctx.settings.bundle_units);
        Ok(Some(template.project(&batch)?.table))
    }

    async fn load(&self, output: Option<Table>) -> Result<RunOutcome> {
        let name = &self.account.name;
        let mut outcome = RunOutcome {
            account: name.clone(),
            ..Default::default()
        };
        let Some(table) = output else {
            return Ok(outcome);
        };
        outcome.rows_considered = table.len();

        if self.ctx.dry_run {
            tracing::info!("[{}] Dry run: {} prep rows not written", name, table.len());
            return Ok(outcome);
        }

        let key = self.account.output_key(&self.ctx.output_path);
        let bytes = encode_csv(&table)?;
        self.ctx.storage.write_file(&key, &bytes).await?;
        tracing::info!("[{}] {} prep rows written to {}", name, table.len(), key);
        outcome.artifacts.push(key);

        let body = render_prep_upload(name, table.len(), PrepUploadAccount::FILENAME);
        let message = OutboundMessage {
            recipient: self.account.email.clone(),
            subject: format!("{} {}", SUBJECT, today()),
            text_body: body.text,
            html_body: Some(body.html),
            attachments: vec![Attachment {
                filename: PrepUploadAccount::FILENAME.to_string(),
                data: bytes,
            }],
        };
        self.ctx.delivery.deliver(&message).await?;
        outcome.delivered = true;

        Ok(outcome)
    }
}
