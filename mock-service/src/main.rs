use clap::Parser;
use mock_service::InvertedIndex;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(version, about = "Inverted-index service to load test against")]
struct Cli {
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Directory of documents to index; a small built-in set when absent
    #[arg(short, long)]
    documents: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mock_service=info,tower_http=info")),
        )
        .init();

    let args = Cli::parse();
    let index = match &args.documents {
        Some(dir) => InvertedIndex::from_dir(dir)?,
        None => InvertedIndex::sample(),
    };

    let listener = TcpListener::bind(args.addr).await?;
    mock_service::run(listener, index).await?;
    Ok(())
}
