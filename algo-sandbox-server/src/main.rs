use algo_sandbox::{RuntimeKind, SandboxConfig};
use algo_sandbox_server::{create_app, run_server};
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address to listen on
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    addr: SocketAddr,

    /// Maximum number of concurrent executions
    #[arg(short, long)]
    max_concurrent: Option<usize>,

    /// Isolation backend: docker or process
    #[arg(long)]
    runtime: Option<RuntimeKind>,

    /// Directory for per-execution workspaces
    #[arg(long)]
    workspace_root: Option<PathBuf>,

    /// Docker daemon socket, when not the local default
    #[arg(long)]
    docker_socket: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            SandboxConfig::from_file(path)?
        }
        None => SandboxConfig::default(),
    };
    if let Some(max) = args.max_concurrent {
        config = config.with_max_concurrent_executions(max);
    }
    if let Some(runtime) = args.runtime {
        config = config.with_runtime(runtime);
    }
    if let Some(root) = args.workspace_root {
        config = config.with_workspace_root(root);
    }
    if let Some(socket) = args.docker_socket {
        config = config.with_docker_socket(socket);
    }

    let app = create_app(config)?;
    run_server(app, args.addr).await?;

    Ok(())
}
