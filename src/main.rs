use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use comms_triage::config::AppConfig;
use comms_triage::error::IngestError;
use comms_triage::feeds::build_feeds;
use comms_triage::pipeline::{Classifier, Ingestor, RuleSet, RulesHandle, spawn_refresh_poller};
use comms_triage::store::{Database, LibSqlBackend};

const USAGE: &str = "\
usage: comms-triage                              run one refresh (or poll, see COMMS_POLL_INTERVAL_SECS)
       comms-triage explain [--sender NAME] TEXT  classify ad-hoc text
       comms-triage stats                        print stored message analytics";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Invalid configuration")?;

    // Keep the guard alive so the non-blocking file writer flushes on exit.
    let _log_guard = init_tracing(&config);

    let rules = match &config.rules_path {
        Some(path) => RuleSet::from_file(path)?,
        None => RuleSet::defaults(),
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => run(config, rules).await,
        Some("explain") => explain(rules, &args[1..]),
        Some("-h") | Some("--help") => {
            println!("{USAGE}");
            Ok(())
        }
        Some("stats") => stats(config, &rules).await,
        Some(other) => anyhow::bail!("Unknown command: {other}\n{USAGE}"),
    }
}

fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "comms-triage.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

async fn open_store(config: &AppConfig) -> anyhow::Result<LibSqlBackend> {
    LibSqlBackend::new_local(&config.db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))
}

async fn stats(config: AppConfig, rules: &RuleSet) -> anyhow::Result<()> {
    let db = open_store(&config).await?;
    let stats = db.stats(&rules.notable_subjects).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn run(config: AppConfig, rules: RuleSet) -> anyhow::Result<()> {
    let db: Arc<dyn Database> = Arc::new(open_store(&config).await?);

    let sources = build_feeds(&config.feeds, config.feed_token.as_ref());
    let ingestor = Ingestor::new(RulesHandle::new(rules), config.fetch_timeout);

    eprintln!("📬 Comms Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Feeds: {}", sources.iter().map(|s| s.name()).collect::<Vec<_>>().join(", "));

    let Some(interval) = config.poll_interval else {
        return match ingestor.refresh(&sources, db.as_ref()).await {
            Ok(result) => {
                println!("{}", serde_json::to_string_pretty(&result)?);
                Ok(())
            }
            Err(e @ IngestError::Persistence { .. }) => {
                println!("{}", serde_json::to_string_pretty(e.report())?);
                Err(e.into())
            }
        };
    };

    eprintln!("   Polling every {}s, Ctrl-C to stop\n", interval.as_secs());
    let (mut handle, shutdown) = spawn_refresh_poller(ingestor, sources, db, interval);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");
    shutdown.store(true, Ordering::Relaxed);

    if tokio::time::timeout(Duration::from_secs(5), &mut handle).await.is_err() {
        // Dropping an in-flight batch leaves its transaction uncommitted.
        handle.abort();
    }
    Ok(())
}

fn explain(rules: RuleSet, args: &[String]) -> anyhow::Result<()> {
    let (sender, words) = match args {
        [flag, name, rest @ ..] if flag == "--sender" => (name.as_str(), rest),
        rest => ("", rest),
    };
    if words.is_empty() {
        anyhow::bail!("Nothing to explain\n{USAGE}");
    }

    let text = words.join(" ");
    let classifier = Classifier::new(Arc::new(rules));
    let classification = classifier.classify_traced(&text, sender);
    println!("{}", classification.category);
    println!("{}", classifier.explain(&text, sender));
    Ok(())
}
