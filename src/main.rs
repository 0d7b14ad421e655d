//! agent-say MCP server entry point
//!
//! stdout carries the protocol, so all logging goes to stderr (or to
//! `agent-say.log` with `--debug`).

use agent_say::config::Config;
use agent_say::mcp::Server;
use agent_say::platform::ensure_scratch_dir;
use agent_say::speech::Dispatcher;
use agent_say::Result;
use log::{debug, error, info, warn};
use std::io;
use std::process;
use std::sync::{Arc, Mutex};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let debug_mode = args.iter().any(|arg| arg == "--debug" || arg == "-d");

    if debug_mode {
        use std::fs::OpenOptions;
        match OpenOptions::new()
            .create(true)
            .append(true)
            .open("agent-say.log")
        {
            Ok(log_file) => {
                env_logger::Builder::new()
                    .filter_level(log::LevelFilter::Debug)
                    .target(env_logger::Target::Pipe(Box::new(log_file)))
                    .init();
            }
            Err(e) => {
                eprintln!("Warning: Failed to open agent-say.log for debug logging: {}", e);
                eprintln!("Continuing with warnings on stderr...");
                env_logger::Builder::new()
                    .filter_level(log::LevelFilter::Warn)
                    .init();
            }
        }

        info!(
            "agent-say version {} starting (debug mode)",
            agent_say::VERSION
        );
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .target(env_logger::Target::Stderr)
            .init();
    }

    if let Err(e) = run() {
        error!("Fatal error: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    // Not fatal: speech may still work with the inherited environment
    match ensure_scratch_dir() {
        Ok(dir) => debug!("Using scratch directory {}", dir.display()),
        Err(e) => warn!("Could not prepare scratch directory: {}", e),
    }

    let config = Config::load()?;
    info!("Config from {}", config.path().display());

    let dispatcher = Dispatcher::new(config.settings());
    let server = Server::new(dispatcher);

    let stdin = io::stdin();
    let stdout = Arc::new(Mutex::new(io::stdout()));
    server.serve(stdin.lock(), stdout)?;

    info!("agent-say shutting down");
    Ok(())
}
