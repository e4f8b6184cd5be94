use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use listsync_core::config::Config;
use listsync_core::core_event::{Event, RelayUrl};
use listsync_core::core_lists::{ListMember, ListsDirectory, NoopEventCache};
use listsync_core::core_relay::{MemoryRelayPool, PoolOptions};
use listsync_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "listsync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Configuration file (TOML); LISTSYNC_* environment variables otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch an owner's people lists from fixture relays and print them as JSON
    Fetch {
        /// Owner public key, 64 hex characters
        #[arg(long)]
        owner: String,

        /// JSON object mapping relay urls to the events they hold
        #[arg(long)]
        fixture: PathBuf,

        /// Relays to query (defaults to the configured relays, then every fixture relay)
        #[arg(long = "relay")]
        relays: Vec<String>,

        /// Relays to treat as unreachable
        #[arg(long)]
        offline: Vec<String>,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration to a file
    Init { path: PathBuf },
}

#[derive(Debug, Serialize)]
struct ListReport {
    name: String,
    created_at: u64,
    event: String,
    members: Vec<ListMember>,
    address: String,
    relay: Option<RelayUrl>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::from_env().context("reading LISTSYNC_* environment")?,
    };
    config.validate()?;

    let mut log_config = LogConfig::try_from(&config.logging)?;
    if let Some(level) = &args.log_level {
        log_config.level = level.parse().unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', using 'info'", level);
            LogLevel::Info
        });
    }
    if args.json_logs {
        log_config = log_config.json_format(true);
    }
    init_logging_with_config(log_config)?;
    listsync_core::metrics::init_metrics();

    match args.command {
        Command::Fetch {
            owner,
            fixture,
            relays,
            offline,
        } => {
            let reports = run_fetch(&config, &owner, &fixture, &relays, &offline).await?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Command::Config {
            action: ConfigAction::Init { path },
        } => {
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            Config::default().save_to_file(&path)?;
            info!(path = %path.display(), "wrote default configuration");
        }
    }

    Ok(())
}

/// Serve `fixture` from in-memory relays, fetch `owner`, wait for drain
async fn run_fetch(
    config: &Config,
    owner: &str,
    fixture: &Path,
    relays: &[String],
    offline: &[String],
) -> Result<Vec<ListReport>> {
    let pool = load_fixture(fixture)?;
    for url in offline {
        pool.set_online(&RelayUrl::parse(url)?, false);
    }

    let relays: Vec<RelayUrl> = if !relays.is_empty() {
        relays
            .iter()
            .map(|url| RelayUrl::parse(url))
            .collect::<Result<_, _>>()?
    } else if !config.relays.default_relays.is_empty() {
        config.relays.default_relays.clone()
    } else {
        pool.relay_urls()
    };
    if relays.is_empty() {
        warn!("no relays to query");
    }

    let directory = ListsDirectory::with_scoreboard(
        Arc::new(pool),
        PoolOptions::from(config),
        Arc::new(NoopEventCache),
    );
    let cell = directory.fetch(owner, &relays)?;
    if let Some(status) = directory.request_status(owner)? {
        let mut rx = status.watch();
        let _ = rx.wait_for(|status| !status.is_loading()).await;
    }

    let lists = cell.get();
    let mut reports = Vec::with_capacity(lists.len());
    for list in lists.values() {
        let address = directory.address(list);
        reports.push(ListReport {
            name: list.name().to_string(),
            created_at: list.created_at().as_secs(),
            event: list.event().id.to_hex(),
            members: list.members().get(),
            address: address.encode()?,
            relay: address.relay,
        });
    }
    info!(owner, lists = reports.len(), "fetch finished");

    directory.shutdown();
    Ok(reports)
}

fn load_fixture(path: &Path) -> Result<MemoryRelayPool> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading fixture {}", path.display()))?;
    let relays: BTreeMap<String, Vec<Event>> =
        serde_json::from_str(&raw).with_context(|| format!("parsing fixture {}", path.display()))?;

    let pool = MemoryRelayPool::new();
    for (url, events) in relays {
        let url = RelayUrl::parse(&url)?;
        pool.add_relay(&url);
        for event in events {
            pool.insert(&url, event);
        }
    }
    Ok(pool)
}
