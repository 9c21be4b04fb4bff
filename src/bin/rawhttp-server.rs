use clap::Parser;
use rawhttp::http::Server;
use rawhttp::ServerConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rawhttp-server")]
#[command(about = "Serve a document root over HTTP/1.1", long_about = None)]
struct Cli {
    /// Host to bind; requests must name it in their Host header
    #[arg(short, long, default_value = "localhost")]
    address: String,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Directory files are served from and stored to
    #[arg(short, long, default_value = "www")]
    root: PathBuf,

    /// Read/write timeout on client connections
    #[arg(long, default_value_t = 2)]
    timeout_secs: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rawhttp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = ServerConfig {
        address: cli.address,
        port: cli.port,
        root: cli.root,
        timeout: Duration::from_secs(cli.timeout_secs),
    };

    tracing::info!(
        address = %config.address,
        port = config.port,
        root = %config.root.display(),
        timeout_secs = cli.timeout_secs,
        "Configuration loaded"
    );

    let server = Server::bind(config)?;
    server.run()?;

    Ok(())
}
