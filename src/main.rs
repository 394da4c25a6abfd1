use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use feedhaul::config::Config;
use feedhaul::discovery::{Crawler, DiscoveryEvent, DiscoveryService, EventSender};
use feedhaul::feed::{scheduler, FeedRetriever, FetchOrchestrator, SweepOutcome};
use feedhaul::storage::{Database, DatabaseError};

/// Get the config directory path (~/.config/feedhaul/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedhaul"))
}

#[derive(Parser, Debug)]
#[command(name = "feedhaul", about = "Feed fetcher with blogroll discovery")]
struct Args {
    /// Config file (defaults to ~/.config/feedhaul/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file (defaults to ~/.config/feedhaul/feedhaul.db)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh every subscribed feed once
    Refresh,
    /// Subscribe to a feed and fetch it immediately
    Add {
        url: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },
    /// Subscribe to feeds without fetching them
    Import {
        #[arg(required = true)]
        urls: Vec<String>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Discover new feeds from blogrolls (all undiscovered feeds, or one)
    Discover {
        #[arg(long)]
        feed_id: Option<i64>,
    },
    /// Refresh on the configured interval until interrupted
    Daemon,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    let config_path = args.config.unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    tracing::debug!(?config, "Configuration");

    let db_path = args.db.unwrap_or_else(|| config_dir.join("feedhaul.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another feedhaul process is using the database. Please close it and try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            ctrl_c.cancel();
        }
    });

    match args.command {
        Command::Refresh => {
            let orchestrator = build_orchestrator(&db, &config)?;
            report_sweep(orchestrator.fetch_all(&cancel).await?);
            for failure in orchestrator.progress().errors {
                eprintln!("  {}: {}", failure.feed_title, failure.message);
            }
        }
        Command::Add {
            url,
            category,
            title,
        } => {
            let orchestrator = build_orchestrator(&db, &config)?;
            let id = orchestrator
                .add_subscription(&url, category.as_deref(), title.as_deref())
                .await
                .with_context(|| format!("Failed to subscribe to {url}"))?;
            println!("Subscribed (feed id {id})");
        }
        Command::Import { urls, category } => {
            let orchestrator = build_orchestrator(&db, &config)?;
            let mut imported = 0usize;
            for url in &urls {
                match orchestrator
                    .import_subscription(url, category.as_deref(), None)
                    .await
                {
                    Ok(_) => imported += 1,
                    Err(e) => eprintln!("Skipping {url}: {e}"),
                }
            }
            println!("Imported {imported} of {} feeds", urls.len());
        }
        Command::Discover { feed_id } => {
            let crawler = Crawler::new(&config).context("Failed to build HTTP client")?;
            let service = DiscoveryService::new(db.clone(), crawler, config.discovery.clone());

            let (tx, mut rx) = mpsc::channel(64);
            let printer = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    print_event(&event);
                }
            });

            let events = EventSender::new(tx);
            let result = match feed_id {
                Some(id) => service.discover_feed(&cancel, id, &events).await,
                None => service.discover_all(&cancel, &events).await,
            };
            drop(events);
            printer.await.context("Event printer failed")?;
            result.context("Discovery failed")?;
        }
        Command::Daemon => {
            let orchestrator = Arc::new(build_orchestrator(&db, &config)?);
            let interval = std::time::Duration::from_secs(config.refresh_interval_minutes * 60);
            report_sweep(orchestrator.fetch_all(&cancel).await?);
            scheduler::run(orchestrator, interval, cancel.clone()).await;
        }
    }

    Ok(())
}

fn build_orchestrator(db: &Database, config: &Config) -> Result<FetchOrchestrator> {
    let retriever = FeedRetriever::new(db.clone(), config).context("Failed to build HTTP client")?;
    Ok(FetchOrchestrator::new(db.clone(), retriever, config))
}

fn report_sweep(outcome: SweepOutcome) {
    match outcome {
        SweepOutcome::Completed(summary) => println!(
            "Refreshed {} feeds ({} failed), {} new or updated articles",
            summary.succeeded + summary.failed,
            summary.failed,
            summary.new_articles
        ),
        SweepOutcome::Cancelled => println!("Refresh cancelled"),
        SweepOutcome::AlreadyRunning => println!("A refresh is already running"),
    }
}

fn print_event(event: &DiscoveryEvent) {
    match event {
        DiscoveryEvent::Progress { message } => println!("{message}"),
        DiscoveryEvent::Error { message } => eprintln!("error: {message}"),
        DiscoveryEvent::Complete { feeds } => match serde_json::to_string_pretty(feeds) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::warn!(error = %e, "Failed to render discovery results"),
        },
    }
}
