use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use duet_rpc::api::ApiServer;
use duet_rpc::client::{Client, ClientOptions, ReconnectPolicy};
use duet_rpc::config::PersistenceMode;
use duet_rpc::network::JoinAction;
use duet_rpc::protocol::CallType;
use duet_rpc::{Config, Router, system};

/// Duet - bidirectional RPC rooms over WebSocket
#[derive(Parser)]
#[command(name = "duet", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "DUET_PORT")]
    port: Option<u16>,

    /// Directory for persisted room rosters
    #[arg(long, env = "DUET_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Keep rosters in memory only
    #[arg(long)]
    memory: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve rooms (default)
    Serve,
    /// Call a procedure on a running server
    Call {
        /// Server base URL
        #[arg(long, default_value = "ws://127.0.0.1:18791")]
        url: String,
        /// Room to join
        #[arg(short, long)]
        room: String,
        /// Peer id to connect as (random when omitted)
        #[arg(long)]
        peer: Option<String>,
        /// Create the room if it does not exist
        #[arg(long)]
        create: bool,
        /// Procedure path, e.g. `system.peers`
        path: String,
        /// JSON input
        #[arg(default_value = "null")]
        input: String,
        /// Send as a mutation instead of a query
        #[arg(long)]
        mutation: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,duet_rpc=info",
        1 => "info,duet_rpc=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if cli.memory {
        config.persistence = PersistenceMode::Memory;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config).await,
        Command::Call {
            url,
            room,
            peer,
            create,
            path,
            input,
            mutation,
        } => {
            let input = serde_json::from_str(&input).context("input must be valid JSON")?;
            let call_type = if mutation {
                CallType::Mutation
            } else {
                CallType::Query
            };
            let peer = peer.unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));
            let action = if create {
                JoinAction::Create
            } else {
                JoinAction::Join
            };

            let options = ClientOptions::from_config(&config, url, room, peer)
                .action(action)
                .reconnect(ReconnectPolicy {
                    max_attempts: 0,
                    ..config.reconnect
                });
            call(options, call_type, &path, input).await
        }
    }
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    tracing::info!(
        port = config.port,
        persistence = ?config.persistence,
        data_dir = %config.data_dir.display(),
        "starting duet server"
    );

    let server = ApiServer::from_config(config, system::router());
    let handle = server.spawn();

    tokio::select! {
        result = handle => {
            result.context("server task failed")??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    Ok(())
}

async fn call(
    options: ClientOptions,
    call_type: CallType,
    path: &str,
    input: serde_json::Value,
) -> anyhow::Result<()> {
    let client = Client::new(Router::new(), options);
    let result = client.call(call_type, path, input).await;
    client.disconnect().await;

    let data = result.with_context(|| format!("{call_type} '{path}' failed"))?;
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}
