//! eduscan-mockd - mock EduScan scanning service
//!
//! Usage:
//!   eduscan-mockd [OPTIONS] [config.toml]
//!
//! Options:
//!   --port <port>    Override the listen port
//!   --token <token>  Accept this bearer token (repeatable)
//!
//! Without a config file the service listens on 8090 and accepts `dev-token`.

use std::net::SocketAddr;

use anyhow::Context;
use eduscan_mock::{create_router, MockConfig, MockState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parsed command-line arguments
struct Args {
    /// Service config file (TOML)
    config_path: Option<String>,
    port: Option<u16>,
    tokens: Vec<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut result = Args {
        config_path: None,
        port: None,
        tokens: Vec::new(),
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                let value = args.get(i + 1).context("Missing argument for --port")?;
                result.port = Some(value.parse().context("Invalid port")?);
                i += 2;
            }
            "--token" | "-t" => {
                let value = args.get(i + 1).context("Missing argument for --token")?;
                result.tokens.push(value.clone());
                i += 2;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                result.config_path = Some(arg.to_string());
                i += 1;
            }
            _ => {
                tracing::warn!("Unknown argument: {}", args[i]);
                i += 1;
            }
        }
    }

    Ok(result)
}

fn print_help() {
    eprintln!(
        r#"eduscan-mockd - mock EduScan scanning service

Usage: eduscan-mockd [OPTIONS] [config.toml]

Options:
  -p, --port <port>    Override the listen port
  -t, --token <token>  Accept this bearer token (repeatable, replaces config tokens)
  -h, --help           Print this help message

Examples:
  # Defaults: port 8090, token "dev-token"
  eduscan-mockd

  # Config file with a port override
  eduscan-mockd --port 9000 mock.toml
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eduscan_mockd=info,eduscan_mock=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;

    let mut config = match &args.config_path {
        Some(path) => {
            tracing::info!("Loading config from: {}", path);
            MockConfig::from_file(path).with_context(|| format!("Failed to load {}", path))?
        }
        None => {
            tracing::info!("No config file provided, using defaults");
            MockConfig::default()
        }
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if !args.tokens.is_empty() {
        config.tokens = args.tokens;
    }

    tracing::info!(
        tokens = config.tokens.len(),
        reject_mode = ?config.reject_mode,
        "Starting eduscan-mockd"
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = create_router(MockState::new(config));

    tracing::info!("Listening on ws://{}/ws/scan", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
