// src/lib.rs

pub mod api;
pub mod attachments;
pub mod cli;
pub mod db;
pub mod error;
pub mod events;
pub mod preferences;
pub mod settings;
pub mod state;
pub mod stores;
pub mod types;
pub mod validation;

use clap::Parser;

pub use api::{ApiClient, ApiRequest};
pub use error::{AdminError, ApiError, AppError, ChatError};
pub use events::{EventBus, StoreEvent};
pub use state::AppContext;

fn init_tracing() {
    // stderr keeps log lines out of the chat transcript on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

// ==================== App Entry Point ====================

pub fn run() {
    let args = cli::Args::parse();
    init_tracing();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(cli::run(args)) {
        tracing::error!(error = %e, "ollachat exited with an error");
        eprintln!("{e}");
        std::process::exit(1);
    }
}
