//! eduscan - scan answer sheets from the command line
//!
//! Runs a scanning session against the EduScan scanning service over a set of
//! image files, and manages the stored access token.

mod commands;
mod config;
mod output;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use eduscan_client::{CredentialStore, ScanConfig, StaticToken, TokenSource};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "eduscan")]
#[command(author, version, about = "EduScan answer sheet scanner")]
#[command(propagate_version = true)]
struct Cli {
    /// Scanning service WebSocket URL
    #[arg(short, long, env = "EDUSCAN_SERVER")]
    server: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "EDUSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Access token (overrides the credential store)
    #[arg(long, env = "EDUSCAN_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan answer sheet images
    Scan {
        /// Exam ID
        #[arg(long)]
        exam: i64,

        /// Answer sheet template ID
        #[arg(long)]
        template: i64,

        /// Save every recognised sheet
        #[arg(long)]
        save: bool,

        /// Seconds to wait for each recognition result
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Image files, scanned in order
        #[arg(required = true)]
        frames: Vec<PathBuf>,
    },

    /// Manage the stored access token
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Store an access token
    SetToken {
        token: String,

        /// User the token belongs to
        #[arg(long)]
        user: Option<String>,
    },

    /// Show stored credentials
    Status,

    /// Remove stored credentials
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("eduscan=debug,eduscan_client=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    let merged = config.merge_with_args(cli.server.as_deref(), cli.no_color)?;
    let ctx = OutputContext::new(cli.output, merged.no_color, cli.quiet);
    let store = CredentialStore::new(&merged.token_file);

    match &cli.command {
        Commands::Scan {
            exam,
            template,
            save,
            timeout,
            frames,
        } => {
            let tokens: Arc<dyn TokenSource> = match &cli.token {
                Some(token) => Arc::new(StaticToken::new(token.clone())),
                None => Arc::new(store),
            };
            let scan_config = ScanConfig::builder(&merged.server).build();
            let request = commands::ScanRequest {
                exam_id: *exam,
                template_id: *template,
                frames,
                save: *save,
                timeout: Duration::from_secs(*timeout),
            };
            commands::scan(&scan_config, tokens, request, &ctx).await?;
        }

        Commands::Auth { command } => match command {
            AuthCommands::SetToken { token, user } => {
                commands::auth::set_token(&store, token, user.as_deref(), &ctx)?;
            }
            AuthCommands::Status => commands::auth::status(&store, &ctx)?,
            AuthCommands::Clear => commands::auth::clear(&store, &ctx)?,
        },
    }

    Ok(())
}
