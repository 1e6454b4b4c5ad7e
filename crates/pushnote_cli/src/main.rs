//! Pushnote CLI
//!
//! Command-line tools for the Pushnote services sync engine.
//!
//! # Commands
//!
//! - `watch` - Run a sync session and print list changes as they happen
//! - `fetch` - Page through the remote services list
//! - `decode-frame` - Decode a push frame and print its change events

mod client;
mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Pushnote command-line sync tools.
#[derive(Parser)]
#[command(name = "pushnote")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the REST API
    #[arg(global = true, long, env = "PUSHNOTE_API_URL")]
    api_url: Option<String>,

    /// URL of the push WebSocket endpoint
    #[arg(global = true, long, env = "PUSHNOTE_PUSH_URL")]
    push_url: Option<String>,

    /// Bearer token for the API and the push handshake
    #[arg(global = true, long, env = "PUSHNOTE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync session and print view events until interrupted
    Watch {
        /// Number of pages to load before only following push changes
        #[arg(short, long, default_value = "1")]
        pages: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Page through the remote services list
    Fetch {
        /// Page size
        #[arg(
            short,
            long,
            default_value = "25",
            value_parser = clap::value_parser!(u32).range(1..)
        )]
        limit: u32,

        /// Stop after this many pages
        #[arg(short, long)]
        max_pages: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Decode a push frame (reads stdin if no frame is given)
    DecodeFrame {
        /// Raw frame text
        frame: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Watch { pages, format } => {
            let api_url = cli.api_url.ok_or("API URL required for watch")?;
            let push_url = cli.push_url.ok_or("push URL required for watch")?;
            let token = cli.token.ok_or("token required for watch")?;
            commands::watch::run(&api_url, &push_url, &token, pages, &format).await?;
        }
        Commands::Fetch {
            limit,
            max_pages,
            format,
        } => {
            let api_url = cli.api_url.ok_or("API URL required for fetch")?;
            commands::fetch::run(&api_url, cli.token, limit, max_pages, &format).await?;
        }
        Commands::DecodeFrame { frame, format } => {
            commands::decode_frame::run(frame, &format)?;
        }
        Commands::Version => {
            println!("Pushnote CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Pushnote Sync v{}", pushnote_sync::VERSION);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_rejects_zero_limit() {
        assert!(Cli::try_parse_from(["pushnote", "fetch", "--limit", "0"]).is_err());

        let cli = Cli::try_parse_from(["pushnote", "fetch", "--limit", "1"]).unwrap();
        assert!(matches!(cli.command, Commands::Fetch { limit: 1, .. }));
    }
}
