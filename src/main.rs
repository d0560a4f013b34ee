//! Understudy — harness daemon entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI args (config path, verbosity)
//!   3. Load config
//!   4. Init logger (CLI `-v` flags > env > config)
//!   5. Start the harness (gateway + channel)
//!   6. Wait for Ctrl-C, then shut down cooperatively

use std::path::PathBuf;
use std::process;

use tracing::info;

use understudy::{config, error::HarnessError, harness::Harness, logger};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

async fn run() -> Result<(), HarnessError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref())?;

    let effective_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_level, args.log_level.is_some())?;

    info!(
        configured_log_level = %config.log_level,
        effective_log_level = %effective_level,
        mode = ?config.gateway.mode,
        "config loaded"
    );

    let harness = Harness::start(config).await?;

    println!(
        "✓ understudy listening: gateway ports {:?}, channel {}",
        harness.gateway_ports(),
        harness.channel_addr()
    );

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received — shutting down");
    harness.shutdown();

    Ok(())
}

struct CliArgs {
    config_path: Option<PathBuf>,
    log_level: Option<&'static str>,
}

fn parse_cli_args() -> CliArgs {
    let mut config_path = None;
    let mut verbosity = 0u8;
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-f" | "--config" => match iter.next() {
                Some(path) => config_path = Some(PathBuf::from(path)),
                None => {
                    eprintln!("error: {arg} requires a path");
                    process::exit(2);
                }
            },
            "-h" | "--help" => {
                print_help();
                process::exit(0);
            }
            flag if flag.starts_with("-v") && flag[1..].bytes().all(|b| b == b'v') => {
                verbosity += (flag.len() - 1) as u8;
            }
            other => {
                eprintln!("error: unknown argument '{other}'");
                print_help();
                process::exit(2);
            }
        }
    }

    let log_level = match verbosity {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { config_path, log_level }
}

fn print_help() {
    println!(
        "understudy — HTTP mock-service harness

Usage: understudy [options]

Options:
  -f, --config <path>   config file (default: config/default.toml)
  -v, -vv               raise log verbosity (debug, trace)
  -h, --help            print this help"
    );
}
