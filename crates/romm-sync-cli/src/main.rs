//! romm-sync - Mirror a RomM catalog into EmulationStation gamelists
//!
//! Usage:
//!   romm-sync -s <url> -u <user> -p <password>   Sync favorites (default)
//!   romm-sync platforms                          List server platforms
//!   romm-sync --help                             Show help

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli::run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if let Some(hint) = hint_for(&e) {
                eprintln!("Hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    // Logs go to stderr so --json output on stdout stays parseable
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Remediation for fatal engine errors
fn hint_for(err: &anyhow::Error) -> Option<&'static str> {
    use romm_sync_core::Error;

    match err.downcast_ref::<Error>()? {
        Error::Authentication(_) => Some("check --server, --user and --password (or ROMM_PASSWORD)"),
        Error::CollectionNotFound { .. } => {
            Some("create a 'Favourites' collection in RomM, or pass --all-roms to sync everything")
        }
        Error::UnknownPlatforms(_) => Some("run `romm-sync platforms` to list the slugs the server knows"),
        Error::Config(message) if message.contains("ES-DE") || message.contains("auto-detection") => Some(
            "for steamdeck, launch ES-DE once so it writes its settings, or pass --rom-path and --media-path",
        ),
        _ => None,
    }
}
