use crate::app::pipelines::{CostSyncPipeline, CostUpdatePipeline, JobContext, PrepUploadPipeline};
use crate::config::build_delivery;
use crate::config::toml_config::{AccountConfig, RunConfig};
use crate::core::etl::EtlEngine;
use crate::core::loader::{SourceDescriptor, TableLoader};
use crate::domain::ports::{RunOutcome, SourceResolver, Storage};
use crate::utils::error::{ReconError, Result};
use std::time::Duration;

#[derive(Debug)]
pub struct AccountFailure {
    pub account: String,
    pub error: ReconError,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<RunOutcome>,
    pub failures: Vec<AccountFailure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Exit code of the most severe failure, 0 when every account succeeded.
    pub fn exit_code(&self) -> i32 {
        self.failures
            .iter()
            .max_by_key(|f| f.error.severity())
            .map(|f| f.error.exit_code())
            .unwrap_or(0)
    }
}

/// Builds the shared job context from the run configuration.
pub fn build_context<S>(config: &RunConfig, storage: S, dry_run: bool) -> Result<JobContext<S>>
where
    S: Storage + Clone + 'static,
{
    let loader = TableLoader::new(Duration::from_secs(config.source.timeout_seconds))?;
    let delivery = build_delivery(&config.delivery, &storage)?;
    Ok(JobContext::new(
        storage,
        loader,
        delivery,
        config.reconcile.clone(),
        config.load.output_path.clone(),
    )
    .with_dry_run(dry_run))
}

async fn run_account<S>(
    ctx: &JobContext<S>,
    account: &AccountConfig,
    leads: Option<SourceDescriptor>,
) -> Result<RunOutcome>
where
    S: Storage + Clone + 'static,
{
    let missing_leads = || ReconError::MissingConfigError {
        field: format!("accounts.{}.leads", account.name()),
    };

    match account {
        AccountConfig::CostUpdate(a) => {
            let leads = leads.ok_or_else(missing_leads)?;
            EtlEngine::new(CostUpdatePipeline::new(ctx.clone(), a.clone(), leads))
                .run()
                .await
        }
        AccountConfig::PrepUpload(a) => {
            let leads = leads.ok_or_else(missing_leads)?;
            EtlEngine::new(PrepUploadPipeline::new(ctx.clone(), a.clone(), leads))
                .run()
                .await
        }
        AccountConfig::CostSync(a) => {
            EtlEngine::new(CostSyncPipeline::new(ctx.clone(), a.clone()))
                .run()
                .await
        }
    }
}

/// Runs every selected account in configuration order. Lead sources are resolved for all
/// accounts before the first job starts; a failing account is logged and the rest still run.
pub async fn run_accounts<S>(
    config: &RunConfig,
    ctx: &JobContext<S>,
    resolver: &dyn SourceResolver,
    only: &[String],
) -> RunReport
where
    S: Storage + Clone + 'static,
{
    let mut report = RunReport::default();

    let mut planned = Vec::new();
    for account in config.accounts_matching(only) {
        if !account.reads_leads() {
            planned.push((account, None));
            continue;
        }
        match resolver.resolve(account.name(), account.leads()) {
            Ok(source) => planned.push((account, Some(source))),
            Err(error) => {
                tracing::error!("❌ [{}] {}", account.name(), error);
                report.failures.push(AccountFailure {
                    account: account.name().to_string(),
                    error,
                });
            }
        }
    }

    if planned.is_empty() && report.failures.is_empty() {
        tracing::warn!("No accounts selected");
    }

    for (account, leads) in planned {
        tracing::info!("Running {} for {}", account.job(), account.name());
        match run_account(ctx, account, leads).await {
            Ok(outcome) => report.outcomes.push(outcome),
            Err(error) => {
                tracing::error!(
                    "❌ [{}] {} (Category: {:?}, Severity: {:?})",
                    account.name(),
                    error,
                    error.category(),
                    error.severity()
                );
                tracing::error!("💡 Recovery suggestion: {}", error.recovery_suggestion());
                report.failures.push(AccountFailure {
                    account: account.name().to_string(),
                    error,
                });
            }
        }
    }

    report
}
