//! MeshMQ admin CLI
//!
//! Usage:
//!   meshmq [OPTIONS] <COMMAND>
//!
//! Commands:
//!   match <TOPIC>                    Filters and subscribers matching a topic name
//!   clients <NODE>                   Clients connected to a node
//!   nodes <CLIENT>                   Nodes a client is connected to
//!   subscriptions <CLIENT>           Subscriptions of a client
//!   inflight <CLIENT>                Queued in-flight messages of a client
//!   evict <NODE>                     Drop the presence entries of a dead node
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use meshmq::config::{BackendType, Config};
use meshmq::inflight::InFlightRecord;
use meshmq::store::{FjallStore, KvStore, MemoryStore, ScanCursor};
use meshmq::topic::TopicLevels;
use meshmq::{FilterTree, SessionManager};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    #[default]
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// MeshMQ - inspect and maintain clustered MQTT broker state
#[derive(Parser, Debug)]
#[command(name = "meshmq")]
#[command(author = "MeshMQ Contributors")]
#[command(version)]
#[command(about = "Inspect and maintain clustered MQTT broker state")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Filters and subscribers matching a topic name
    Match { topic: String },
    /// Clients connected to a node
    Clients { node: String },
    /// Nodes a client is connected to
    Nodes { client: String },
    /// Subscriptions of a client
    Subscriptions {
        client: String,
        /// Show the clean-session scope instead of the persistent one
        #[arg(long)]
        clean: bool,
    },
    /// Queued in-flight messages of a client
    Inflight {
        client: String,
        /// Show the clean-session scope instead of the persistent one
        #[arg(long)]
        clean: bool,
    },
    /// Drop the presence entries of a dead node
    Evict { node: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise defaults plus environment
    let config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let config = match config {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };

    // CLI overrides config, config overrides default (warn)
    let log_level = args.log_level.unwrap_or_else(|| match config.log.level.to_lowercase().as_str() {
        "error" => LogLevel::Error,
        "warn" => LogLevel::Warn,
        "info" => LogLevel::Info,
        "debug" => LogLevel::Debug,
        "trace" => LogLevel::Trace,
        _ => LogLevel::Warn,
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let (store, fjall): (Arc<dyn KvStore>, Option<Arc<FjallStore>>) = match config.store.backend {
        BackendType::Memory => {
            info!("Using in-memory store; state is discarded on exit");
            let shared: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
            (shared, None)
        }
        BackendType::Fjall => {
            let fjall = Arc::new(FjallStore::open(&config.store.path)?);
            fjall.spawn_flusher(config.store.flush_interval);
            info!(path = ?config.store.path, "Opened fjall store");
            let shared: Arc<dyn KvStore> = fjall.clone();
            (shared, Some(fjall))
        }
    };

    let sessions = SessionManager::new(store.clone(), &config.node.id, &config.limits);

    match args.command {
        Command::Match { topic } => {
            let levels = TopicLevels::parse_name_with_max_levels(&topic, config.limits.max_topic_levels)?;
            let tree = FilterTree::new(store.clone());
            let subscriptions = sessions.subscriptions();

            let mut patterns = vec![levels.clone()];
            patterns.extend(tree.matching_filters(&levels).await?);
            for pattern in &patterns {
                let mut subscribers: Vec<_> = subscriptions.get_by_topic(pattern).await?.into_iter().collect();
                subscribers.sort();
                for (client, qos) in subscribers {
                    println!("{}\t{}\t{}", pattern.joined(), client, qos as u8);
                }
            }
        }
        Command::Clients { node } => {
            let mut cursor = ScanCursor::start();
            loop {
                let page = sessions
                    .presence()
                    .list_connected_clients(&node, &cursor, config.limits.scan_page_size)
                    .await?;
                for client in &page.items {
                    println!("{}", client);
                }
                match page.next {
                    Some(next) => cursor = next,
                    None => break,
                }
            }
        }
        Command::Nodes { client } => {
            for node in sessions.presence().connected_nodes(&client).await? {
                println!("{}", node);
            }
        }
        Command::Subscriptions { client, clean } => {
            let mut subscriptions: Vec<_> = sessions
                .subscriptions()
                .get_by_client(&client, clean)
                .await?
                .into_iter()
                .collect();
            subscriptions.sort();
            for (pattern, qos) in subscriptions {
                println!("{}\t{}", pattern, qos as u8);
            }
        }
        Command::Inflight { client, clean } => {
            let inflight = sessions.inflight();
            for packet_id in inflight.list_ids(&client, clean).await? {
                match inflight.get_record(&client, packet_id).await {
                    Ok(Some(InFlightRecord::Publish {
                        qos,
                        topic_name,
                        payload,
                        ..
                    })) => println!("{}\tPUBLISH\t{}\t{}\t{} bytes", packet_id, qos as u8, topic_name, payload.len()),
                    Ok(Some(InFlightRecord::PubRel { .. })) => println!("{}\tPUBREL", packet_id),
                    Ok(None) => println!("{}\tMISSING", packet_id),
                    Err(e) => println!("{}\tERROR\t{}", packet_id, e),
                }
            }
        }
        Command::Evict { node } => {
            let evicted = sessions.evict_node(&node).await?;
            println!("evicted {} clients from {}", evicted, node);
        }
    }

    if let Some(fjall) = fjall {
        fjall.flush().await?;
    }
    Ok(())
}
