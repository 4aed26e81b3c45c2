use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Local;
use clap::Parser;
use offerwatch::analytics::JsonLinesSink;
use offerwatch::config::{Config, InvocationInput};
use offerwatch::ledger::{FileLedgerStore, LedgerStore, MemoryLedgerStore};
use offerwatch::notify::{DryRunNotifier, EmailNotifier, Notifier};
use offerwatch::process::Ingestor;
use offerwatch::request::HttpFetcher;
use offerwatch::{info_time, Error, Result};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Run one ingestion pass for a marketplace search.
#[derive(Debug, Parser)]
#[command(name = "offerwatch", version)]
struct Cli {
    /// Invocation JSON file. Read from stdin when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Log notifications instead of sending them and keep the ledger in memory.
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offerwatch=info,warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn read_input(path: Option<&PathBuf>) -> Result<InvocationInput> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            raw
        }
    };
    InvocationInput::from_json(&raw)
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env()?;
    let input = read_input(cli.input.as_ref())?;

    let notifier: Box<dyn Notifier> = match (&config.smtp, cli.dry_run) {
        (_, true) => Box::new(DryRunNotifier),
        (Some(smtp), false) => Box::new(EmailNotifier::new(smtp)?),
        (None, false) if input.notification_targets().is_empty() => Box::new(DryRunNotifier),
        (None, false) => {
            return Err(Error::Config(
                "SMTP_HOST, SMTP_USER, SMTP_PASS and SOURCE_EMAIL are required to send email".into(),
            ))
        }
    };
    let store: Box<dyn LedgerStore> = if cli.dry_run {
        Box::new(MemoryLedgerStore::new())
    } else {
        Box::new(FileLedgerStore::new(&config.ledger_dir))
    };

    let ingestor = Ingestor::new(
        config.marketplace.clone(),
        config.ledger_capacity,
        Box::new(HttpFetcher::new(
            reqwest::Client::new(),
            config.marketplace.search_base.clone(),
        )),
        store,
        notifier,
        Box::new(JsonLinesSink::new(&config.analytics_dir)),
    );

    let report = ingestor.run(&input).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let start_time = Local::now();
    let outcome = run(cli).await;
    info_time!(start_time, "Full program time:");

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}
