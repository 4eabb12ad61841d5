//! wsaa-ticket: acquires one access ticket and prints it as JSON.
//!
//! Reads the same environment variables as the services that embed the
//! ticket manager, so it doubles as a smoke test for key material and
//! connectivity.

use std::path::PathBuf;

use arca_wsaa::{Environment, Identity, TicketConfig, TicketManager};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Acquire a WSAA access ticket.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Downstream service the ticket is for (e.g. wsfe, wscoem)
    service: String,

    /// Tax identifier (CUIT) the ticket is requested for
    #[arg(long, env = "CUIT")]
    cuit: Identity,

    /// PEM private key
    #[arg(long, env = "PRIVATE_KEY_FILE")]
    private_key_file: PathBuf,

    /// PEM certificate issued for the private key
    #[arg(long, env = "CERTIFICATE_FILE")]
    certificate_file: PathBuf,

    /// Use the production authority instead of homologation
    #[arg(long, env = "PROD")]
    prod: bool,

    /// Directory for persisted tickets
    #[arg(long, env = "TICKET_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Log filter directive
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let environment = if args.prod { Environment::Production } else { Environment::Testing };
    let config = TicketConfig::builder()
        .identity(args.cuit)
        .private_key_file(args.private_key_file)
        .certificate_file(args.certificate_file)
        .environment(environment)
        .maybe_cache_dir(args.cache_dir)
        .build()?;

    let manager = TicketManager::from_config(&config)?;
    match manager.acquire(environment, &args.service, config.identity()).await {
        Ok(ticket) => {
            println!("{}", serde_json::to_string_pretty(&ticket)?);
            Ok(())
        },
        Err(err) => {
            if err.is_already_authenticated() {
                tracing::error!(
                    "The authority still holds an active ticket for {}; set TICKET_CACHE_DIR to \
                     keep tickets across runs",
                    args.service
                );
            }
            Err(err.into())
        },
    }
}
