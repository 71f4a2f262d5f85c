//! Sluice main entry point
//!
//! This is the command-line interface for the Sluice ingestion pipeline.

use anyhow::Context;
use clap::Parser;
use sluice::config::{load_config_with_hash, Config, OutputFormat};
use sluice::fetch::{build_http_client, ProductApiClient};
use sluice::ingest::{IngestionOrchestrator, OrchestratorSettings, ReviewEnricher};
use sluice::normalize::ProductNormalizer;
use sluice::output::{open_sink, print_summary, term_artifact, write_markdown_summary};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Sluice: a resilient search-term ingestion pipeline
///
/// Sluice discovers products for each configured search term, fetches them
/// with bounded concurrency and retries, deduplicates the results, and
/// writes one batch per term plus a combined batch.
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(version)]
#[command(about = "A resilient search-term ingestion pipeline", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be fetched without any network access
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("invalid configuration in {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    handle_ingest(config, config_hash).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sluice=info,warn"),
            1 => EnvFilter::new("sluice=debug,info"),
            2 => EnvFilter::new("sluice=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows what would be fetched
fn handle_dry_run(config: &Config) {
    println!("=== Sluice Dry Run ===\n");

    println!("API:");
    println!("  Endpoint: {}", config.api.endpoint);
    println!("  Marketplace: {}", config.api.amazon_domain);
    println!("  Pages per search: {}", config.api.max_page);

    println!("\nConcurrency:");
    println!("  Terms at once: {}", config.ingest.term_concurrency);
    println!("  Items per term: {}", config.ingest.item_concurrency);
    println!(
        "  Ceiling on simultaneous fetches: {}",
        config.ingest.term_concurrency * config.ingest.item_concurrency
    );

    println!("\nRetry:");
    println!(
        "  Items: {} attempts, {}ms base delay, x{} backoff, {}ms cap",
        config.retry.max_attempts,
        config.retry.base_delay_ms,
        config.retry.backoff_multiplier,
        config.retry.max_delay_ms
    );
    println!("  Discovery: {} attempts", config.discovery_retry.max_attempts);

    println!("\nOutput:");
    println!("  Directory: {}", config.output.directory.display());
    match config.output.format {
        OutputFormat::Sqlite => println!("  Database: {}", config.output.database_file),
        OutputFormat::Jsonl => println!("  Format: JSON lines"),
    }

    println!("\nTerms ({}):", config.ingest.terms.len());
    for term in &config.ingest.terms {
        println!(
            "  - {} -> {}",
            term,
            term_artifact(term, &config.output.separator)
        );
    }

    match &config.completion {
        Some(completion) => println!(
            "\nReview enrichment: {} at {}",
            completion.model, completion.endpoint
        ),
        None => println!("\nReview enrichment: disabled"),
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the main ingestion run
async fn handle_ingest(config: Config, config_hash: String) -> anyhow::Result<()> {
    let http = build_http_client(&config.api).context("failed to build HTTP client")?;
    let api = Arc::new(ProductApiClient::with_client(http.clone(), &config.api));
    let sink = open_sink(&config.output).with_context(|| {
        format!(
            "failed to open output in {}",
            config.output.directory.display()
        )
    })?;
    let normalizer = Arc::new(ProductNormalizer::new(
        config.output.platform.clone(),
        config.output.product_types.clone(),
    ));

    let mut orchestrator = IngestionOrchestrator::new(
        Arc::clone(&api),
        api,
        config.retry.to_policy(),
        normalizer,
        sink,
        OrchestratorSettings::from_config(&config),
    )
    .with_config_hash(config_hash);

    if let Some(completion) = &config.completion {
        tracing::info!("Review enrichment enabled ({})", completion.model);
        orchestrator = orchestrator.with_enricher(ReviewEnricher::from_config(
            http,
            completion,
            config.ingest.item_concurrency,
        ));
    }
    let orchestrator = Arc::new(orchestrator);

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight fetches");
            cancel.cancel();
        }
    });

    let report = orchestrator.ingest(config.ingest.terms.clone()).await?;

    print_summary(&report.summary);

    let summary_path = config.output.directory.join(&config.output.summary_file);
    write_markdown_summary(&report.summary, &summary_path)
        .with_context(|| format!("failed to write {}", summary_path.display()))?;
    tracing::info!("Summary written to {}", summary_path.display());

    Ok(())
}
