use clap::Parser;
use cogs_reconcile::config::cli::{ConfiguredResolver, PromptResolver};
use cogs_reconcile::domain::ports::SourceResolver;
use cogs_reconcile::utils::{logger, validation::Validate};
use cogs_reconcile::{build_context, run_accounts, CliConfig, LocalStorage, ReconError, RunConfig};

fn fail(e: &ReconError) -> ! {
    tracing::error!(
        "❌ {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());
    std::process::exit(e.exit_code().max(1));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    logger::init_cli_logger(cli.verbose);

    tracing::info!("Starting cogs-reconcile");
    tracing::debug!("CLI config: {:?}", cli);

    if let Err(e) = cli.validate() {
        fail(&e);
    }

    let mut config = match RunConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => fail(&e),
    };
    if let Some(dir) = &cli.data_dir {
        config.storage.path = dir.clone();
    }
    if let Some(path) = &cli.output_path {
        config.load.output_path = path.clone();
    }
    if let Err(e) = config.validate() {
        fail(&e);
    }
    if cli.dry_run {
        tracing::info!("🔍 Dry run: nothing will be written or sent");
    }

    let storage = LocalStorage::new(config.storage.path.clone());
    let ctx = match build_context(&config, storage, cli.dry_run) {
        Ok(ctx) => ctx,
        Err(e) => fail(&e),
    };

    let resolver: Box<dyn SourceResolver> = if cli.no_prompt {
        Box::new(ConfiguredResolver)
    } else {
        Box::new(PromptResolver::stdin())
    };

    let report = run_accounts(&config, &ctx, resolver.as_ref(), &cli.account).await;

    for outcome in &report.outcomes {
        println!(
            "✅ {}: {} rows, delivered: {}{}",
            outcome.account,
            outcome.rows_considered,
            outcome.delivered,
            outcome
                .watermark
                .as_ref()
                .map(|w| format!(", watermark {}", w))
                .unwrap_or_default()
        );
        for artifact in &outcome.artifacts {
            println!("   📁 {}", artifact);
        }
    }
    for failure in &report.failures {
        eprintln!("❌ {}: {}", failure.account, failure.error.user_friendly_message());
    }

    if !report.is_success() {
        std::process::exit(report.exit_code().max(1));
    }
    Ok(())
}
