use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client as S3Client;
use cogs_reconcile::config::cli::ConfiguredResolver;
use cogs_reconcile::utils::{logger, validation::Validate};
use cogs_reconcile::{build_context, run_accounts, LambdaConfig, S3Storage};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct Request {
    /// Only run these accounts; all accounts when empty.
    pub accounts: Vec<String>,
    pub dry_run: bool,
}

#[derive(Serialize)]
pub struct AccountResult {
    pub account: String,
    pub rows_considered: usize,
    pub artifacts: Vec<String>,
    pub delivered: bool,
    pub watermark: Option<String>,
}

#[derive(Serialize)]
pub struct Response {
    pub message: String,
    pub results: Vec<AccountResult>,
    pub failures: Vec<String>,
}

fn boxed(e: cogs_reconcile::ReconError) -> Error {
    Box::new(e)
}

async fn function_handler(event: LambdaEvent<Request>) -> Result<Response, Error> {
    tracing::info!("Starting cogs-reconcile Lambda function");

    let lambda_config = LambdaConfig::from_env().map_err(boxed)?;
    lambda_config.validate().map_err(boxed)?;

    let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .region(Region::new(lambda_config.s3_region.clone()))
        .force_path_style(true)
        .build();
    let storage = S3Storage::new(
        S3Client::from_conf(s3_config),
        lambda_config.s3_bucket.clone(),
    );

    let config = lambda_config.load_run_config(&storage).await.map_err(boxed)?;
    config.validate().map_err(boxed)?;

    let ctx = build_context(&config, storage, event.payload.dry_run).map_err(boxed)?;
    let report = run_accounts(&config, &ctx, &ConfiguredResolver, &event.payload.accounts).await;

    let failures: Vec<String> = report
        .failures
        .iter()
        .map(|f| format!("{}: {}", f.account, f.error))
        .collect();
    let results = report
        .outcomes
        .into_iter()
        .map(|o| AccountResult {
            account: o.account,
            rows_considered: o.rows_considered,
            artifacts: o.artifacts,
            delivered: o.delivered,
            watermark: o.watermark,
        })
        .collect();

    let message = if failures.is_empty() {
        "Reconciliation completed successfully".to_string()
    } else {
        format!("Reconciliation finished with {} failed account(s)", failures.len())
    };
    tracing::info!("{}", message);

    Ok(Response {
        message,
        results,
        failures,
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    logger::init_lambda_logger();
    run(service_fn(function_handler)).await
}
