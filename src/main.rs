//! imagery-mcp: MCP server exposing satellite imagery workflows over HTTP
//!
//! Speaks JSON-RPC 2.0 over a single HTTP endpoint with an auxiliary SSE
//! channel for asynchronous push notifications.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use imagery_mcp::config;
use imagery_mcp::mcp::session::Session;
use imagery_mcp::mcp::transport::{McpServer, TransportConfig};
use imagery_mcp::tools::StaticRegistry;

/// MCP server exposing satellite imagery workflows over HTTP.
///
/// Accepts JSON-RPC 2.0 method calls on POST /mcp and pushes asynchronous
/// notifications to clients connected on GET /sse.
#[derive(Parser, Debug)]
#[command(name = "imagery-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Entry point for the imagery-mcp server.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    // Display GPL license notice (required by GPLv3 Section 5d)
    eprintln!(
        "imagery-mcp {}  Copyright (C) 2026  The Embedded Society",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("This program comes with ABSOLUTELY NO WARRANTY.");
    eprintln!("This is free software, licensed under GPL-3.0-or-later.");
    eprintln!("Source: {}", env!("CARGO_PKG_REPOSITORY"));
    eprintln!();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting imagery-mcp server"
    );

    let host: IpAddr = match cfg.server.host.parse() {
        Ok(host) => host,
        Err(e) => {
            eprintln!("Invalid server.host '{}': {e}", cfg.server.host);
            return ExitCode::FAILURE;
        }
    };
    let addr = SocketAddr::new(host, cfg.server.port);

    // Tool handlers are registered here as they come online; the protocol
    // core is tool-agnostic.
    let registry = Arc::new(StaticRegistry::new());
    if registry.is_empty() {
        info!("No tools registered; tools/list will return an empty set");
    }

    let session = Arc::new(Session::new(registry));
    let transport_config = TransportConfig {
        keepalive: Duration::from_secs(cfg.sse.keepalive_secs),
        idle_timeout: Duration::from_secs(cfg.sse.idle_timeout_secs),
        cleanup_interval: Duration::from_secs(cfg.sse.cleanup_interval_secs),
    };
    let server = McpServer::new(session, transport_config);

    // Run the server
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(server.serve(addr)) {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn log_level_from_flags() {
        assert_eq!(get_log_level(0, true, "debug"), Level::ERROR);
        assert_eq!(get_log_level(0, false, "debug"), Level::DEBUG);
        assert_eq!(get_log_level(1, false, "warn"), Level::INFO);
        assert_eq!(get_log_level(3, false, "warn"), Level::TRACE);
    }
}
