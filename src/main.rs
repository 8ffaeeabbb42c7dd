//! railproxy - caching proxy for railway queries
//!
//! Main entry point for the railproxy CLI.

use clap::{Parser, Subcommand};
use railproxy::cache::{CacheStore, Payload, SqliteStore};
use railproxy::config::{validate_config_result, RailProxyConfig};
use railproxy::query::{QueryCache, QueryOutcome};
use railproxy::server::ProxyServer;
use railproxy::upstream::UpstreamClient;
use railproxy::{logging, Query};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// railproxy - cache railway queries in front of the upstream provider
#[derive(Parser, Debug)]
#[command(name = "railproxy")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/railproxy/config.yaml)
    #[arg(short, long, global = true, env = "RAILPROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Pretty-print query results instead of the provider's exact body
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    Init,

    /// Run the HTTP server
    Serve {
        /// Address to listen on (overrides server.bind and PORT)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Search trains between two stations
    Search {
        /// Source station code (e.g., NDLS)
        #[arg(short, long)]
        source: String,

        /// Destination station code (e.g., GKP)
        #[arg(short, long)]
        destination: String,

        /// Look-ahead window in hours
        #[arg(long)]
        hours: String,
    },

    /// Live running status of a train
    Live {
        /// Train number (e.g., 12555)
        #[arg(short, long)]
        train_number: String,

        /// Days since the train started (0 = today)
        #[arg(long)]
        start_day: String,
    },

    /// Booking status for a PNR
    Pnr {
        /// 10-digit PNR number
        pnr: String,
    },

    /// Timetable of a train
    Schedule {
        /// Train number (e.g., 12555)
        train_number: String,
    },

    /// Show cached entry counts per query kind
    CacheStats,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match cli.command {
        Commands::Serve { .. } => logging::SERVER_LEVEL,
        _ => logging::CLI_LEVEL,
    };
    if let Err(e) = logging::init(level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> railproxy::Result<()> {
    // Handle init command first (creates config)
    if let Commands::Init = cli.command {
        return handle_init_command(&cli.config);
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => Ok(()),
        Commands::Serve { bind } => {
            let addr = bind.unwrap_or_else(|| config.server.bind.clone());
            let query_cache = build_query_cache(&config)?;
            ProxyServer::new(query_cache)
                .with_frontend_origin(config.server.frontend_origin.as_deref())?
                .run(&addr)
                .await
        }
        Commands::Search {
            source,
            destination,
            hours,
        } => run_query(&config, Query::search(source, destination, hours), cli.pretty).await,
        Commands::Live {
            train_number,
            start_day,
        } => run_query(&config, Query::live_status(train_number, start_day), cli.pretty).await,
        Commands::Pnr { pnr } => run_query(&config, Query::pnr_status(pnr), cli.pretty).await,
        Commands::Schedule { train_number } => {
            run_query(&config, Query::schedule(train_number), cli.pretty).await
        }
        Commands::CacheStats => handle_cache_stats(&config).await,
    }
}

fn load_config(path: &Option<PathBuf>) -> railproxy::Result<RailProxyConfig> {
    let mut config = match path {
        Some(path) => RailProxyConfig::load(path)?,
        None => RailProxyConfig::load_default()?,
    };
    config.apply_env();
    Ok(config)
}

fn build_query_cache(config: &RailProxyConfig) -> railproxy::Result<QueryCache> {
    validate_config_result(config)?;

    let store = SqliteStore::open(&config.cache)?;
    let client = UpstreamClient::new(&config.upstream)?;

    Ok(QueryCache::new(Arc::new(store), Arc::new(client))
        .with_policy(config.freshness.policy())
        .with_options(config.resilience.options()))
}

async fn run_query(config: &RailProxyConfig, query: Query, pretty: bool) -> railproxy::Result<()> {
    let query_cache = build_query_cache(config)?;
    let result = query_cache.execute(&query).await;
    query_cache.close().await?;

    print_outcome(&result?, pretty)
}

fn print_outcome(outcome: &QueryOutcome, pretty: bool) -> railproxy::Result<()> {
    tracing::info!(
        status = %outcome.status,
        stored_at = %outcome.stored_at,
        "Query answered"
    );
    println!("{}", render_payload(&outcome.payload, pretty)?);
    Ok(())
}

/// The payload exactly as cached, or re-indented when `pretty` is set
fn render_payload(payload: &Payload, pretty: bool) -> railproxy::Result<String> {
    if !pretty {
        return Ok(payload.as_str().to_string());
    }
    let value = payload.to_value()?;
    Ok(serde_json::to_string_pretty(&value)?)
}

async fn handle_cache_stats(config: &RailProxyConfig) -> railproxy::Result<()> {
    let store = SqliteStore::open(&config.cache)?;
    let stats = store.stats().await?;
    store.close().await?;

    println!("Cache: {}", config.cache.path.display());
    println!();
    println!("{:<16} {:>8}  {}", "KIND", "ENTRIES", "NEWEST");
    for kind_stats in stats {
        let newest = kind_stats
            .newest
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<16} {:>8}  {}",
            kind_stats.kind.as_str(),
            kind_stats.entries,
            newest
        );
    }
    Ok(())
}

fn handle_init_command(config_path: &Option<PathBuf>) -> railproxy::Result<()> {
    let config_file = config_path
        .clone()
        .unwrap_or_else(RailProxyConfig::default_path);

    // Check if already initialized
    if config_file.exists() {
        println!("Configuration already exists at {}", config_file.display());
        return Ok(());
    }

    let config = RailProxyConfig::new();
    config.save(&config_file)?;

    println!("✓ Created configuration at {}", config_file.display());
    println!();
    println!("Next steps:");
    println!("  1. Provide upstream credentials:");
    println!("     export RAPID_API_KEY=...");
    println!("     export RAPID_API_HOST=irctc-api2.p.rapidapi.com");
    println!();
    println!("  2. Start the proxy:");
    println!("     railproxy serve");

    Ok(())
}
