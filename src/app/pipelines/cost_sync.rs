use super::JobContext;
use crate::adapters::tabular::encode_csv;
use crate::config::toml_config::CostSyncAccount;
use crate::core::loader::ColumnTypes;
use crate::core::reconcile::{reconcile, ConflictPolicy, ReconcileOptions};
use crate::domain::change::ReconciliationResult;
use crate::domain::model::Table;
use crate::domain::ports::{Pipeline, RunOutcome, Storage};
use crate::utils::error::Result;
use async_trait::async_trait;

pub struct CostSyncInput {
    pub catalog: Table,
    pub inventory: Table,
}

/// Catalog costs → third-party inventory export. Never creates rows.
pub struct CostSyncPipeline<S: Storage + Clone> {
    ctx: JobContext<S>,
    account: CostSyncAccount,
}

impl<S: Storage + Clone> CostSyncPipeline<S> {
    pub fn new(ctx: JobContext<S>, account: CostSyncAccount) -> Self {
        Self { ctx, account }
    }

    pub fn options(&self) -> ReconcileOptions {
        let source_key: Vec<&str> = self.account.source_key.iter().map(String::as_str).collect();
        let target_key: Vec<&str> = self.account.target_key.iter().map(String::as_str).collect();
        let mut options = ReconcileOptions::new(
            &source_key,
            &target_key,
            &self.account.source_cost,
            &self.account.target_cost,
        )
        .with_invalid_target_cost(self.ctx.settings.invalid_target_cost)
        .with_conflicts(if self.account.apply_conflicts {
            ConflictPolicy::Apply
        } else {
            ConflictPolicy::ReportOnly
        });
        if let Some(filter) = &self.account.filter {
            options = options.with_target_filter(filter.clone());
        }
        options
    }
}

#[async_trait]
impl<S: Storage + Clone> Pipeline for CostSyncPipeline<S> {
    type Extracted = CostSyncInput;
    type Transformed = ReconciliationResult;

    fn name(&self) -> &str {
        &self.account.name
    }

    async fn extract(&self) -> Result<CostSyncInput> {
        let types = ColumnTypes::raw();
        let catalog = self
            .ctx
            .loader
            .load(&self.ctx.storage, &self.account.catalog, &types)
            .await?;
        let inventory = self
            .ctx
            .loader
            .load(&self.ctx.storage, &self.account.inventory, &types)
            .await?;
        Ok(CostSyncInput { catalog, inventory })
    }

    async fn transform(&self, input: CostSyncInput) -> Result<ReconciliationResult> {
        let mut identifiers = self.ctx.identifiers();
        reconcile(&input.catalog, input.inventory, &self.options(), &mut identifiers)
    }

    async fn load(&self, result: ReconciliationResult) -> Result<RunOutcome> {
        let name = &self.account.name;
        let summary = result.summary();
        tracing::info!(
            "[{}] {} (conflicts applied: {})",
            name,
            summary,
            result.conflicts_applied
        );
        for change in result.conflicts() {
            tracing::debug!("[{}] conflicting cost for {}: {:?}", name, change.key, change.kind);
        }

        let mut outcome = RunOutcome {
            account: name.clone(),
            rows_considered: result.changes.len() + result.skipped.total(),
            ..Default::default()
        };
        if self.ctx.dry_run {
            tracing::info!("[{}] Dry run: {} left untouched", name, self.account.output_key);
            return Ok(outcome);
        }

        let bytes = encode_csv(&result.target)?;
        self.ctx
            .storage
            .write_file(&self.account.output_key, &bytes)
            .await?;
        tracing::info!("[{}] Updated inventory written to {}", name, self.account.output_key);
        outcome.artifacts.push(self.account.output_key.clone());
        Ok(outcome)
    }
}
