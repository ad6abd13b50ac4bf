//! budgetsync - inspect Budget-Buddy's client-side caches from a terminal.
//!
//! Commands:
//! - `ttl`: evaluate a quote TTL policy at a given wall-clock time
//! - `list <area>`: fetch one feature area through its store and print it
//! - `watch <area>`: follow a store's state transitions and scheduled refreshes
//! - `config`: print the effective configuration

use std::fmt::Display;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDateTime, NaiveTime};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use budgetsync_core::{
    ApiClient, CachedCollection, EntityArea, FinanceStores, Status, Store, StoreRegistry,
    SyncConfig, TtlPolicy,
};

#[derive(Parser, Debug)]
#[command(name = "budgetsync")]
#[command(about = "Inspect Budget-Buddy's cached stores and quote refresh schedules")]
#[command(version)]
struct Cli {
    /// Path to config file (default: $XDG_CONFIG_HOME/budgetsync/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show how long a quote fetched at the given time stays fresh
    Ttl {
        /// end-of-day, hourly, hourly:<lead secs> or fixed:<secs>
        #[arg(short, long, default_value = "end-of-day")]
        policy: TtlPolicy,

        /// Local wall-clock time (HH:MM:SS), defaults to now
        #[arg(long, value_parser = parse_time)]
        at: Option<NaiveTime>,
    },
    /// Fetch a feature area once and print its items
    List {
        area: EntityArea,

        /// Print items as JSON instead of one line per item
        #[arg(long)]
        json: bool,
    },
    /// Follow a feature area's store until interrupted
    Watch { area: EntityArea },
    /// Print the effective configuration
    Config,
}

/// Run an expression against the typed store of a feature area.
macro_rules! with_area_store {
    ($stores:expr, $area:expr, |$store:ident| $body:expr) => {
        match $area {
            EntityArea::Categories => {
                let $store = &$stores.categories;
                $body
            }
            EntityArea::Transactions => {
                let $store = &$stores.transactions;
                $body
            }
            EntityArea::Budgets => {
                let $store = &$stores.budgets;
                $body
            }
            EntityArea::PaymentMethods => {
                let $store = &$stores.payment_methods;
                $body
            }
            EntityArea::RecurringPayments => {
                let $store = &$stores.recurring_payments;
                $body
            }
            EntityArea::Subscriptions => {
                let $store = &$stores.subscriptions;
                $body
            }
            EntityArea::StockWatchlist => {
                let $store = &$stores.stock_watchlist;
                $body
            }
            EntityArea::MetalQuotes => {
                let $store = &$stores.metal_quotes;
                $body
            }
        }
    };
}

fn parse_time(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| format!("Invalid time '{}', expected HH:MM:SS", value))
}

/// Initialize the tracing subscriber for logging.
/// Use RUST_LOG to control the level (e.g. RUST_LOG=budgetsync_core=debug).
fn init_tracing() -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
}

fn load_config(path: Option<&PathBuf>) -> Result<SyncConfig> {
    match path {
        Some(path) => {
            let mut config = SyncConfig::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            Ok(config)
        }
        None => SyncConfig::load(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing();

    let config = load_config(cli.config.as_ref())?;
    info!(api = %config.api_base_url, "budgetsync starting");

    match cli.command {
        Command::Ttl { policy, at } => show_ttl(policy, at),
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::List { area, json } => {
            let stores = connect(&config)?;
            with_area_store!(stores, area, |store| list_store(store, json).await)
        }
        Command::Watch { area } => {
            let stores = connect(&config)?;
            with_area_store!(stores, area, |store| watch_store(store).await)
        }
    }
}

fn connect(config: &SyncConfig) -> Result<FinanceStores> {
    let client = ApiClient::from_config(config)?;
    FinanceStores::connect(&client, config, StoreRegistry::global())
        .context("Failed to register stores")
}

// ============================================================================
// Commands
// ============================================================================

fn show_ttl(policy: TtlPolicy, at: Option<NaiveTime>) -> Result<()> {
    let now = Local::now();
    let at = match at {
        Some(time) => NaiveDateTime::new(now.date_naive(), time),
        None => now.naive_local(),
    };

    let decision = policy.decide(at);
    let expires = at + chrono::Duration::seconds(decision.seconds_until_expiry as i64);
    println!("policy:      {}", policy);
    println!("fetched at:  {}", at.format("%Y-%m-%d %H:%M:%S"));
    println!("ttl:         {}s", decision.seconds_until_expiry);
    println!("expires at:  {}", expires.format("%Y-%m-%d %H:%M:%S"));
    Ok(())
}

async fn list_store<T>(store: &Store<T>, json: bool) -> Result<()>
where
    T: Display + Serialize + Send + Sync + 'static,
{
    store.read();
    let snapshot = store.settled().await;
    if let Some(err) = snapshot.error {
        return Err(anyhow!(err).context(format!("Failed to load {}", store.name())));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(snapshot.items.as_slice())?);
    } else {
        for item in snapshot.items.iter() {
            println!("{}", item);
        }
        eprintln!("{} {} (fetched {})", snapshot.len(), store.name(), snapshot.age_display());
    }
    Ok(())
}

async fn watch_store<T>(store: &Store<T>) -> Result<()>
where
    T: Send + Sync + 'static,
{
    let mut rx = store.subscribe();
    store.ensure_fresh();
    let initial = rx.borrow_and_update().clone();
    print_transition(store, &initial);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = rx.borrow_and_update().clone();
                print_transition(store, &snapshot);
            }
            _ = &mut ctrl_c => {
                info!(store = store.name(), "Interrupted, stopping watch");
                break;
            }
        }
    }
    Ok(())
}

fn print_transition<T>(store: &Store<T>, snapshot: &CachedCollection<T>)
where
    T: Send + Sync + 'static,
{
    let now = Local::now().format("%H:%M:%S");
    let status = match snapshot.status {
        Status::Empty => "empty",
        Status::Loading => "loading",
        Status::Ready => "ready",
        Status::Error => "error",
    };
    let next = store
        .next_refresh_at()
        .map(|at| at.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());

    match &snapshot.error {
        Some(err) => println!(
            "[{}] {} {:<8} items={} next_refresh={} error={}",
            now,
            store.name(),
            status,
            snapshot.len(),
            next,
            err
        ),
        None => println!(
            "[{}] {} {:<8} items={} next_refresh={}",
            now,
            store.name(),
            status,
            snapshot.len(),
            next
        ),
    }
}
