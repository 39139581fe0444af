//! # Highlighter Daemon Main Driver
//!
//! ## Purpose
//! Entry point for the keyword highlighting daemon. Hosts a document, wires
//! the engine to the mutation watcher and the settings store, and serves the
//! JSON-line message transport on stdin/stdout.
//!
//! ## Input/Output Specification
//! - **Input**: Configuration file, optional document file, one JSON message
//!   per stdin line
//! - **Output**: One JSON acknowledgement per stdout line
//! - **Initialization**: Opens the store, bootstraps the active setting,
//!   starts the mutation watcher, handles shutdown signals
//!
//! ## Architecture Flow
//! 1. Parse command line arguments and load configuration
//! 2. Initialize logging and tracing
//! 3. Open the settings store (and serve setting CRUD subcommands)
//! 4. Build the document and engine, bootstrap the active setting
//! 5. Watch mutations and store changes, answer transport messages
//! 6. Handle shutdown signals gracefully

use clap::{Arg, ArgAction, Command};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use keyword_highlighter::{
    config::EngineConfig,
    errors::{EngineError, Result},
    store::{SettingsStore, SledSettingsStore, StoredSetting, DEFAULT_NEW_SETTING_THRESHOLD},
    utils, Document, HighlightEngine, MutationWatcher, NodeId,
};

/// Host-side document description, loaded from a JSON file
#[derive(Debug, Deserialize)]
struct NodeSpec {
    #[serde(default = "default_tag")]
    tag: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    classes: Vec<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    children: Vec<NodeSpec>,
}

fn default_tag() -> String {
    "div".to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("highlighter-daemon")
        .version("0.1.0")
        .about("Reactive keyword highlighting engine for live job-listing documents")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("document")
                .short('d')
                .long("document")
                .value_name("FILE")
                .help("JSON document file to host"),
        )
        .arg(
            Arg::new("check-health")
                .long("check-health")
                .help("Run health checks and exit")
                .action(ArgAction::SetTrue),
        )
        .subcommand(Command::new("setting-list").about("List stored setting groups"))
        .subcommand(
            Command::new("setting-add")
                .about("Create a setting group")
                .arg(Arg::new("name").long("name").required(true))
                .arg(
                    Arg::new("keywords")
                        .long("keywords")
                        .required(true)
                        .help("Comma-separated keyword list"),
                )
                .arg(
                    Arg::new("threshold")
                        .long("threshold")
                        .value_parser(clap::value_parser!(u32)),
                ),
        )
        .subcommand(
            Command::new("setting-remove")
                .about("Delete a setting group")
                .arg(Arg::new("id").required(true)),
        )
        .subcommand(
            Command::new("setting-activate")
                .about("Mark a setting group active")
                .arg(Arg::new("id").required(true)),
        )
        .subcommand(Command::new("setting-clear-active").about("Clear the active selection"))
        .get_matches();

    let config_path = matches.get_one::<String>("config").expect("has default");
    let config = EngineConfig::from_file(config_path)?;

    init_logging(&config)?;
    info!("Starting keyword highlighter v0.1.0");
    info!("Configuration loaded from: {}", config_path);

    let store = Arc::new(SledSettingsStore::open(&config.store.db_path)?);

    if matches.get_flag("check-health") {
        store.health_check()?;
        config.validate()?;
        info!("All health checks passed");
        return Ok(());
    }

    if let Some((name, sub)) = matches.subcommand() {
        return run_setting_command(store.as_ref(), name, sub).await;
    }

    // Build the hosted document
    let doc = Document::new();
    if let Some(path) = matches.get_one::<String>("document") {
        load_document(&doc, path)?;
        info!("Document loaded from {}", path);
    }

    let engine = HighlightEngine::new(doc, &config)?;

    // Initial bootstrap: a store failure here is non-fatal, the engine
    // simply starts inert
    if let Err(e) = engine.bootstrap(store.as_ref()).await {
        error!("Bootstrap failed: {}", e);
    }

    let watcher = MutationWatcher::spawn(
        engine.clone(),
        Duration::from_millis(config.scan.debounce_ms),
    );

    // Re-bootstrap on out-of-band store changes
    let store_listener = {
        let engine = engine.clone();
        let store = store.clone();
        let mut changes = store.subscribe();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                info!("Settings store changed, re-bootstrapping");
                if let Err(e) = engine.bootstrap(store.as_ref()).await {
                    error!("Re-bootstrap failed: {}", e);
                }
            }
        })
    };

    info!("Engine ready, reading messages from stdin");

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        result = serve_transport(engine.clone()) => {
            if let Err(e) = result {
                error!("Transport error: {}", e);
            } else {
                info!("Transport closed");
            }
        }
    }

    store_listener.abort();
    watcher.shutdown().await;
    info!("Keyword highlighter shut down successfully");
    Ok(())
}

/// Initialize logging and tracing
fn init_logging(config: &EngineConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.logging.level).map_err(|_| EngineError::Config {
        message: format!("Invalid log level: {}", config.logging.level),
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Read one JSON message per stdin line, answer one ack per stdout line
async fn serve_transport(engine: Arc<HighlightEngine>) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let ack = engine.handle_raw(trimmed);
        if !ack.success {
            warn!("Rejected message: {}", utils::truncate(trimmed, 120));
        }
        println!("{}", serde_json::to_string(&ack)?);
    }

    Ok(())
}

/// Execute one setting CRUD subcommand against the store
async fn run_setting_command(
    store: &SledSettingsStore,
    name: &str,
    sub: &clap::ArgMatches,
) -> Result<()> {
    match name {
        "setting-list" => {
            let active = store.active_setting_id().await?;
            for setting in store.list().await? {
                let marker = if active == Some(setting.id) { "*" } else { " " };
                println!(
                    "{} {}  {}  threshold={}  [{}]",
                    marker,
                    setting.id,
                    setting.name,
                    setting.highlight_threshold,
                    setting.keywords.join(", ")
                );
            }
        }
        "setting-add" => {
            let name = sub.get_one::<String>("name").expect("required");
            let keywords: Vec<String> = sub
                .get_one::<String>("keywords")
                .expect("required")
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            let threshold = sub
                .get_one::<u32>("threshold")
                .copied()
                .unwrap_or(DEFAULT_NEW_SETTING_THRESHOLD);

            let setting = StoredSetting::new(name, keywords, threshold);
            let id = setting.id;
            store.save(setting).await?;
            println!("{}", id);
        }
        "setting-remove" => {
            let id = parse_setting_id(sub)?;
            store.delete(id).await?;
        }
        "setting-activate" => {
            let id = parse_setting_id(sub)?;
            store.set_active(id).await?;
        }
        "setting-clear-active" => {
            store.clear_active().await?;
        }
        _ => unreachable!("unknown subcommand"),
    }
    Ok(())
}

fn parse_setting_id(sub: &clap::ArgMatches) -> Result<Uuid> {
    let raw = sub.get_one::<String>("id").expect("required");
    Uuid::parse_str(raw).map_err(|e| EngineError::InvalidMessage {
        details: format!("invalid setting id '{}': {}", raw, e),
    })
}

/// Build the hosted document from a JSON node description
fn load_document(doc: &Document, path: &str) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    let specs: Vec<NodeSpec> = serde_json::from_str(&content)?;
    for spec in &specs {
        let node = build_node(doc, spec);
        doc.append_child(doc.root(), node);
    }
    Ok(())
}

fn build_node(doc: &Document, spec: &NodeSpec) -> NodeId {
    let node = doc.create_element(&spec.tag);
    if let Some(id) = &spec.id {
        doc.set_id(node, id);
    }
    for class in &spec.classes {
        doc.add_class(node, class);
    }
    if !spec.text.is_empty() {
        doc.set_text(node, &spec.text);
    }
    for child in &spec.children {
        let built = build_node(doc, child);
        doc.append_child(node, built);
    }
    node
}
