//! Command-line entry point: obtain, refresh, inspect, and revoke OAuth 2.0 / OIDC tokens.

mod commands;
mod config;
mod output;
mod provider_args;

use clap::{Parser, Subcommand};
use commands::{AuthArgs, GrantCommand, InspectArgs, RefreshArgs, RevokeArgs, TokensCommand};
use output::OutputFormat;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "oauth-cli", version, about = "Obtain, refresh, inspect, and revoke OAuth 2.0 / OIDC tokens")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Rendering for command output.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Directory the encrypted token store lives in (default: `$XDG_DATA_HOME/oauth-cli/tokens`).
    #[arg(long, global = true, env = "OAUTH_CLI_TOKEN_STORE_DIR")]
    token_store_dir: Option<std::path::PathBuf>,

    /// Path to the config file (default: `$XDG_CONFIG_HOME/oauth-cli/config.json`).
    #[arg(long, global = true, env = "OAUTH_CLI_CONFIG")]
    config: Option<std::path::PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Obtain a token using the best interactive grant the provider supports.
    Auth(AuthArgs),
    /// Obtain a token using an explicitly chosen grant.
    Token {
        #[command(subcommand)]
        grant: GrantCommand,
    },
    /// Refresh a stored or supplied token.
    Refresh(RefreshArgs),
    /// Decode a token's header and payload without verifying its signature.
    Inspect(InspectArgs),
    /// Revoke a token at the provider.
    Revoke(RevokeArgs),
    /// Manage the local token store.
    #[command(subcommand)]
    Tokens(TokensCommand),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let output_format = cli.output;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(oauth_err) = err.downcast_ref::<oauth_core::Error>() {
                output::print_error(output_format, oauth_err);
            } else {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };
    let cfg = config::load_config(&config_path)?;

    let store_dir = match cli.token_store_dir {
        Some(dir) => dir,
        None => config::default_token_store_dir()?,
    };
    let store = oauth_core::TokenStore::open(store_dir)?;

    match cli.command {
        Commands::Auth(args) => commands::auth(args, &store, &cfg, cli.output).await,
        Commands::Token { grant } => commands::token(grant, &store, &cfg, cli.output).await,
        Commands::Refresh(args) => commands::refresh(args, &store, &cfg, cli.output).await,
        Commands::Inspect(args) => commands::inspect(args, &store, cli.output),
        Commands::Revoke(args) => commands::revoke(args, &cfg, cli.output).await,
        Commands::Tokens(cmd) => commands::tokens(cmd, &store, cli.output),
    }
}
