//! minehaul - command-line client for mine and shipping planners.
//!
//! Signs planners in against the minehaul backend, manages their login
//! sessions across devices, and lists the orders and schedules they work on.

mod commands;

use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use minehaul_core::{ApiClient, Config, SessionStore};

use commands::Command;

/// Directory for daily-rotated log files, in addition to stderr
const ENV_LOG_DIR: &str = "MINEHAUL_LOG_DIR";

const USAGE: &str = "\
Usage: minehaul <command> [options]

Commands:
  status                       Show whether you are signed in
  login [--role mine|shipping] [--email <email>]
                               Sign in
  logout                       Sign out and forget the stored token
  whoami                       Show your profile
  sessions                     List your active sessions
  revoke <session-id>          Revoke one of your sessions
  register <mine|shipping>     Create a new planner account
  orders [--all]               List orders (your own unless --all)
  order <order-id>             Show one order with its schedules
  create-order [--field k=v]   Create a transport order (mine planners)
  delete-order <order-id>      Delete one of your orders (mine planners)
  schedule <schedule-id>       Show one schedule
  schedules [--order <id>]     List schedules, optionally for one order
  create-schedule <order-id> [--field k=v]
                               Schedule an order (shipping planners)
  update-schedule <schedule-id> [--status <status>] [--notes <text>] [--field k=v]
                               Update a schedule (shipping planners)

Environment:
  MINEHAUL_API_URL             Backend base URL
  MINEHAUL_TOKEN_STORAGE       keyring (default) or file
  MINEHAUL_EMAIL, MINEHAUL_PASSWORD
                               Credentials for non-interactive login
  RUST_LOG                     Log filter (default: warn)";

/// Initialize the tracing subscriber for logging.
/// Returns the file writer guard, which must live until exit.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) if !dir.is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "minehaul.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };
    if matches!(command, Command::Help) {
        println!("{}", USAGE);
        return Ok(());
    }

    info!("minehaul starting");

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };
    config.apply_env_overrides();
    debug!(api = config.api_base_url(), storage = ?config.token_storage, "Config loaded");

    let api = ApiClient::new(config.api_base_url())?;
    let store = Arc::new(SessionStore::new(Arc::new(api.clone()), config.token_store()?));

    // Every command needs to know whether a persisted token still signs us in.
    store.initialize().await;

    let result = commands::run(command, &store, &api, &mut config).await;

    if let Err(ref e) = result {
        debug!(error = ?e, "Command failed");
    }
    info!("minehaul shutting down");
    result
}
