use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand};
use colored::*;
use hookline::{load_bundle, CorrelationReport, EvaluationReport, HookEngine, MemoryStores, SweepReport};
use hookline_core::config::load_engine_config;
use hookline_core::logging::init_tracing;
use hookline_core::serde_utils::to_pretty_json;
use hookline_dispatch::{DispatchGateway, HttpGateway};
use serde::Serialize;

mod log_gateway;

use log_gateway::LogGateway;

#[derive(Parser)]
#[command(name = "hookline")]
#[command(about = "Check and replay Hookline rule bundles", long_about = None)]
struct Cli {
    #[arg(long, global = true, env = "HOOKLINE_LOG_LEVEL")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a rule bundle and validate every rule in it
    Check {
        /// Bundle file or directory
        bundle: PathBuf,
    },
    /// Run event payloads through the engine
    Replay(ReplayArgs),
    /// Show version information
    Version,
}

#[derive(Args)]
struct ReplayArgs {
    /// Bundle file or directory
    bundle: PathBuf,
    /// Webhook receiving the events
    #[arg(long)]
    webhook: String,
    /// Event bodies, processed in order
    #[arg(required = true)]
    events: Vec<PathBuf>,
    /// Sweep correlations as if this many seconds had passed after the last event
    #[arg(long)]
    sweep_after: Option<u64>,
    /// Deliver through the bundle's HTTP channels instead of logging
    #[arg(long, default_value_t = false)]
    deliver: bool,
}

#[derive(Debug, Serialize)]
struct ReplayedEvent {
    file: String,
    evaluation: EvaluationReport,
    correlations: CorrelationReport,
}

#[derive(Debug, Serialize)]
struct ReplayOutput {
    events: Vec<ReplayedEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sweep: Option<SweepReport>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref()).context("failed to initialise logging")?;

    match cli.command {
        Commands::Check { bundle } => check(&bundle),
        Commands::Replay(args) => {
            let output = replay(&args).await?;
            println!("{}", to_pretty_json(&output)?);
            Ok(())
        }
        Commands::Version => {
            println!("Hookline v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check(path: &Path) -> anyhow::Result<()> {
    let bundle = load_bundle(path)
        .with_context(|| format!("failed to load bundle {}", path.display()))?;
    let config = bundle.engine_config();
    let issues = bundle.validate(config.max_condition_depth);

    println!(
        "{} {}",
        "Bundle:".bold(),
        path.display().to_string().bold()
    );
    println!("  Webhooks: {}", bundle.webhooks.len());
    println!("  Rules: {}", bundle.rules.len());
    println!("  Correlations: {}", bundle.correlations.len());
    println!("  Field correlations: {}", bundle.field_correlations.len());
    println!("  Channels: {}", bundle.channels.len());

    if issues.is_empty() {
        println!("{}", "✔ Bundle is valid".green().bold());
        return Ok(());
    }

    for issue in &issues {
        println!(
            "{} {}: {}",
            "✘".red().bold(),
            issue.rule_id.as_deref().unwrap_or("bundle"),
            issue.message
        );
    }
    bail!("{} problem(s) found in {}", issues.len(), path.display())
}

async fn replay(args: &ReplayArgs) -> anyhow::Result<ReplayOutput> {
    let bundle = load_bundle(&args.bundle)
        .with_context(|| format!("failed to load bundle {}", args.bundle.display()))?;
    let config = match bundle.engine.clone() {
        Some(config) => config,
        None => load_engine_config()?,
    };
    let stores = MemoryStores::from_config(&config);
    bundle.install(&stores)?;

    let gateway: Arc<dyn DispatchGateway> = if args.deliver {
        Arc::new(HttpGateway::new(bundle.channels.clone())?)
    } else {
        Arc::new(LogGateway::new())
    };
    let engine = HookEngine::in_memory(&stores, gateway, config);
    let webhook = bundle.webhook(&args.webhook);

    let mut events = Vec::with_capacity(args.events.len());
    for file in &args.events {
        let body = tokio::fs::read(file)
            .await
            .with_context(|| format!("failed to read event {}", file.display()))?;
        let handled = engine.handle_event(&webhook, &body).await;
        let correlations = handled.correlations.await?;
        events.push(ReplayedEvent {
            file: file.display().to_string(),
            evaluation: handled.evaluation,
            correlations,
        });
    }

    let sweep = match args.sweep_after {
        Some(secs) => {
            let now = Utc::now() + Duration::seconds(secs.min(u64::from(u32::MAX)) as i64);
            Some(engine.sweep_expired_at(now).await)
        }
        None => None,
    };

    Ok(ReplayOutput { events, sweep })
}
