//! `understudy-stub` — rule-file-driven stub client.
//!
//! Connects to a running harness, loads one or more TOML rule files into
//! the client's handler registry, prints the assigned gateway port and
//! answers until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! understudy-stub --connect <addr> --rules <file> [--rules <file> …]
//!
//! Flags:
//!   -c, --connect <addr>   harness channel address (default: 127.0.0.1:4540)
//!   -r, --rules <path>     rule file to load; repeatable, later files win
//!   -v, -vv                raise log verbosity (debug, trace)
//!   -h, --help             print this help
//! ```

use std::path::PathBuf;
use std::process;

use tracing::info;

use understudy::client::StubClient;
use understudy::config::expand_home;
use understudy::logger;
use understudy::rules::load_rules;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    logger::init(args.log_level.unwrap_or("info"), args.log_level.is_some())?;

    if args.rules.is_empty() {
        eprintln!("error: at least one --rules file is required");
        print_help();
        process::exit(2);
    }

    let client = StubClient::connect(&args.connect).await?;

    let mut total = 0;
    for path in &args.rules {
        let handlers = load_rules(path)?;
        total += handlers.len();
        for handler in handlers {
            client.register(handler).await;
        }
    }
    info!(stubs = total, "rule files registered");

    match client.port() {
        Some(port) => println!("✓ stub answering on gateway port {port} ({total} stubs)"),
        None => println!("✓ stub answering in broadcast mode ({total} stubs)"),
    }

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received — disconnecting");
    client.close();

    Ok(())
}

struct Args {
    connect: String,
    rules: Vec<PathBuf>,
    log_level: Option<&'static str>,
}

fn parse_args() -> Args {
    let mut connect = "127.0.0.1:4540".to_string();
    let mut rules = Vec::new();
    let mut verbosity = 0u8;
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" | "--connect" => match iter.next() {
                Some(addr) => connect = addr,
                None => {
                    eprintln!("error: {arg} requires an address");
                    process::exit(2);
                }
            },
            "-r" | "--rules" => match iter.next() {
                Some(path) => rules.push(expand_home(&path)),
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

    Args { connect, rules, log_level }
}

fn print_help() {
    println!(
        "understudy-stub — rule-file-driven stub client

Usage: understudy-stub --rules <file> [options]

Options:
  -c, --connect <addr>   harness channel address (default: 127.0.0.1:4540)
  -r, --rules <path>     rule file to load; repeatable, later files win
  -v, -vv                raise log verbosity (debug, trace)
  -h, --help             print this help"
    );
}
