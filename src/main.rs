//! Database gateway - main entry point.
//!
//! Connects to the configured primary (falling back to the failover target),
//! verifies the server is reachable, and exits nonzero with the coded message
//! on any fatal error. Connection and query failures inside the library are
//! plain `Result` values; this binary is the caller that decides to terminate.

use clap::Parser;
use db_gateway::config::Settings;
use db_gateway::db::ConnectionManager;
use db_gateway::error::DbError;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(settings: &Settings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if settings.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

fn exit_with(err: DbError) -> ! {
    error!(code = err.code(), error = %err, "Fatal error");
    eprintln!("[{}] {err}", err.code());
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let settings = Settings::parse();
    init_tracing(&settings);

    info!("Starting database gateway v{}", env!("CARGO_PKG_VERSION"));

    let manager = ConnectionManager::new(settings);
    if let Err(e) = manager.connect_with_failover().await {
        exit_with(e);
    }

    if let Err(e) = manager.ping().await {
        exit_with(e);
    }

    info!("Database connection established and verified");
    manager.close_all().await;
}
