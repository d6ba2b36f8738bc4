use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailbridge::affinity::ThreadAffinityRegistry;
use mailbridge::config::{ServerConfig, Transport};
use mailbridge::host::fixture;
use mailbridge::host::sandbox::{SandboxHost, SandboxRuntime};
use mailbridge::lifecycle::LifecycleManager;
use mailbridge::mcp::{self, McpServer, SessionThread};

#[derive(Parser)]
#[command(name = "mailbridge")]
#[command(about = "Mail, calendar and task tools for AI agents over line-delimited JSON-RPC")]
struct Cli {
    /// Account (store name) used for folder lookups and free/busy
    #[arg(long, global = true)]
    account: Option<String>,

    /// JSON fixture seeding the mailbox
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,

    /// Settings file (default: <config dir>/mailbridge/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the JSON-RPC server (default)
    Serve {
        #[arg(long, value_enum)]
        transport: Option<Transport>,

        /// Listen address for the TCP transport
        #[arg(long)]
        bind: Option<String>,
    },
    /// Start a session, report its state and inbox size, then shut down
    Check,
}

/// Initialize tracing. Logs always go to stderr since stdout may carry the protocol.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "mailbridge=info".into()),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn resolve_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load_from(path)?,
        None => ServerConfig::load(),
    };
    config.apply_env();
    if let Some(account) = &cli.account {
        config.account = Some(account.clone());
    }
    if let Some(fixture) = &cli.fixture {
        config.fixture = Some(fixture.clone());
    }
    if let Some(Commands::Serve { transport, bind }) = &cli.command {
        if let Some(transport) = transport {
            config.transport = *transport;
        }
        if let Some(bind) = bind {
            config.bind = bind.clone();
        }
    }
    Ok(config)
}

fn open_host(config: &ServerConfig) -> anyhow::Result<SandboxHost> {
    match &config.fixture {
        Some(path) => {
            tracing::info!(fixture = %path.display(), "Loading mailbox fixture");
            fixture::load(path)
        }
        None => {
            tracing::warn!("No fixture configured, serving an empty mailbox");
            Ok(match &config.account {
                Some(account) => SandboxHost::with_store(account),
                None => SandboxHost::new(),
            })
        }
    }
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let host = open_host(&config)?;
    let registry = Arc::new(ThreadAffinityRegistry::new(Arc::new(
        SandboxRuntime::for_host(&host),
    )));
    let options = config.bridge_options();
    let warmup = config.warmup_policy();
    let session = tokio::task::spawn_blocking(move || {
        SessionThread::spawn(registry, Arc::new(host), options, warmup)
    })
    .await?
    .context("Failed to start the host session")?;

    let server = Arc::new(McpServer::new(Some(session.handle())).with_call_timeout(config.call_timeout()));
    let served = match config.transport {
        Transport::Stdio => mcp::run_stdio_server(server.clone()).await,
        Transport::Tcp => mcp::run_tcp_server(server.clone(), &config.bind).await,
    };

    drop(server);
    tokio::task::spawn_blocking(move || session.shutdown()).await?;
    tracing::info!("Stopped");
    served
}

async fn check(config: ServerConfig) -> anyhow::Result<()> {
    let report = tokio::task::spawn_blocking(move || -> anyhow::Result<serde_json::Value> {
        let host = open_host(&config)?;
        let registry = Arc::new(ThreadAffinityRegistry::new(Arc::new(
            SandboxRuntime::for_host(&host),
        )));
        let mut manager = LifecycleManager::new(
            registry,
            Arc::new(host),
            config.bridge_options(),
            config.warmup_policy(),
        );
        let inbox = manager
            .start()
            .context("Failed to start the host session")?
            .inbox_count()?;
        let report = json!({ "state": manager.state(), "inbox": inbox });
        manager.shutdown();
        Ok(report)
    })
    .await??;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = resolve_config(&cli)?;
    match cli.command {
        Some(Commands::Check) => check(config).await,
        Some(Commands::Serve { .. }) | None => serve(config).await,
    }
}
