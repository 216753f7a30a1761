//! Command-line interface for contentsync.
//!
//! Provides commands for queueing items, draining the pending queue,
//! inspecting confirmed and pending content, and watching a content type
//! while connectivity comes and goes.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::config::{self, ResolvedConfig};
use crate::connectivity::{ConnectivityObserver, ManualConnectivity, ProbeConnectivity};
use crate::domain::{Item, TIMESTAMP_FIELD};
use crate::remote::HttpRemote;
use crate::storage::{pending_queue_name, DurableQueue, QueueBackend};
use crate::sync::{ContentManager, DrainReport};

/// contentsync - offline-tolerant content sync
#[derive(Parser, Debug)]
#[command(name = "contentsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Pending queue backend (defaults to the configured one)
    #[arg(short, long, value_enum, global = true)]
    pub backend: Option<QueueBackend>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Queue an item and upload it if possible
    Add {
        /// Content type (e.g. news, comments)
        content_type: String,

        /// Field as key=value; values that parse as JSON keep their type
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, Value)>,

        /// Only queue, do not try to upload
        #[arg(long)]
        offline: bool,
    },

    /// Download and print confirmed items
    List {
        /// Content type
        content_type: String,
    },

    /// Print records waiting for upload
    Pending {
        /// Content type
        content_type: String,
    },

    /// Upload every pending record once
    Sync {
        /// Content type
        content_type: String,
    },

    /// Drop every pending record
    Clear {
        /// Content type
        content_type: String,
    },

    /// Keep syncing, printing the list on every change, until Ctrl-C
    Watch {
        /// Content type
        content_type: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = config::config()?;
        let backend = self.backend.unwrap_or(cfg.backend);

        match self.command {
            Commands::Add {
                content_type,
                fields,
                offline,
            } => add_item(cfg, backend, &content_type, fields, offline).await,
            Commands::List { content_type } => list_items(cfg, backend, &content_type).await,
            Commands::Pending { content_type } => list_pending(cfg, backend, &content_type).await,
            Commands::Sync { content_type } => sync_pending(cfg, backend, &content_type).await,
            Commands::Clear { content_type } => clear_pending(cfg, backend, &content_type).await,
            Commands::Watch { content_type } => watch(cfg, backend, &content_type).await,
            Commands::Config => show_config(cfg, backend),
        }
    }
}

/// Parse `key=value`, keeping JSON scalars typed (`time=1000` is a number)
fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty field name in '{}'", raw));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn open_queue(cfg: &ResolvedConfig, backend: QueueBackend, content_type: &str) -> DurableQueue {
    DurableQueue::open(
        backend,
        &pending_queue_name(content_type),
        &cfg.kv_dir(),
        &cfg.database_path(),
    )
}

/// Manager that only drains when asked to
fn open_manager(cfg: &ResolvedConfig, backend: QueueBackend, content_type: &str) -> ContentManager {
    ContentManager::new(
        content_type,
        open_queue(cfg, backend, content_type),
        Arc::new(HttpRemote::new(cfg.endpoint.clone())),
        Arc::new(ManualConnectivity::new(false)),
    )
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

fn print_report(report: &DrainReport) {
    if report.attempted == 0 {
        eprintln!("Nothing pending.");
        return;
    }

    eprintln!("Uploaded {}/{} pending record(s).", report.uploaded, report.attempted);
    if let Some(failure) = &report.failure {
        eprintln!(
            "Stopped at a failed upload ({}); {} record(s) remain queued.",
            failure,
            report.remaining()
        );
    }
}

/// Queue an item, then drain unless offline
async fn add_item(
    cfg: &ResolvedConfig,
    backend: QueueBackend,
    content_type: &str,
    fields: Vec<(String, Value)>,
    offline: bool,
) -> Result<()> {
    if fields.is_empty() {
        anyhow::bail!("No fields given. Use -f key=value");
    }

    let mut item = Item::new();
    for (key, value) in fields {
        item.insert(key, value);
    }
    if item.get(TIMESTAMP_FIELD).is_none() {
        item.insert(TIMESTAMP_FIELD, Utc::now().timestamp_millis());
    }

    let manager = open_manager(cfg, backend, content_type);
    let id = manager
        .add(item)
        .await
        .with_context(|| format!("Failed to queue {} item", content_type))?;
    eprintln!("Queued {} item {}", content_type, id);

    if !offline {
        let report = manager.try_upload().await.context("Failed to drain pending queue")?;
        print_report(&report);
    }

    Ok(())
}

/// Download and print the confirmed list
async fn list_items(cfg: &ResolvedConfig, backend: QueueBackend, content_type: &str) -> Result<()> {
    let manager = open_manager(cfg, backend, content_type);
    manager.loaded().await;

    let items = manager.list();
    if items.is_empty() {
        eprintln!("No confirmed {} items (or the remote store was unreachable).", content_type);
    }
    print_json(&items)
}

async fn list_pending(cfg: &ResolvedConfig, backend: QueueBackend, content_type: &str) -> Result<()> {
    let queue = open_queue(cfg, backend, content_type);
    let records = queue
        .get_all()
        .await
        .with_context(|| format!("Failed to read queue {}", queue.name()))?;
    print_json(&records)
}

async fn sync_pending(cfg: &ResolvedConfig, backend: QueueBackend, content_type: &str) -> Result<()> {
    let manager = open_manager(cfg, backend, content_type);
    let report = manager.try_upload().await.context("Failed to drain pending queue")?;
    print_report(&report);

    if report.failure.is_some() {
        std::process::exit(1);
    }
    Ok(())
}

async fn clear_pending(cfg: &ResolvedConfig, backend: QueueBackend, content_type: &str) -> Result<()> {
    let queue = open_queue(cfg, backend, content_type);
    queue
        .clear()
        .await
        .with_context(|| format!("Failed to clear queue {}", queue.name()))?;
    eprintln!("Cleared {}", queue.name());
    Ok(())
}

/// Run a live manager driven by the connectivity probe
async fn watch(cfg: &ResolvedConfig, backend: QueueBackend, content_type: &str) -> Result<()> {
    let remote = HttpRemote::new(cfg.endpoint.clone());
    let connectivity: Arc<dyn ConnectivityObserver> =
        Arc::new(ProbeConnectivity::spawn(remote.clone(), cfg.probe_interval));

    let manager = Arc::new(ContentManager::new(
        content_type,
        open_queue(cfg, backend, content_type),
        Arc::new(remote),
        connectivity,
    ));

    let observed = Arc::downgrade(&manager);
    manager.subscribe(move || {
        if let Some(manager) = observed.upgrade() {
            let items = manager.list();
            println!("--- {} confirmed {} item(s)", items.len(), manager.content_type());
            if let Some(last) = items.last() {
                println!("{}", Value::Object(last.fields().clone()));
            }
        }
    });

    eprintln!(
        "Watching {} via {} (Ctrl-C to stop)",
        content_type, cfg.endpoint
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    let pending = manager.pending().await.map(|p| p.len()).unwrap_or(0);
    eprintln!("Stopping; {} record(s) still pending.", pending);
    Ok(())
}

fn show_config(cfg: &ResolvedConfig, backend: QueueBackend) -> Result<()> {
    println!("contentsync configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:           {}", cfg.home.display());
    println!("  Key-value dir:  {}", cfg.kv_dir().display());
    println!("  Database:       {}", cfg.database_path().display());
    println!();
    println!("Remote:");
    println!("  Endpoint:       {}", cfg.endpoint);
    println!("  Probe interval: {}s", cfg.probe_interval.as_secs());
    println!();
    println!("Queue backend:    {}", backend);

    Ok(())
}
