// chat-gateway/crates/chat-gateway/src/main.rs

use chat_gateway::{config::Config, run_server, telemetry};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "chat-gateway", version, about = "Authenticated chat and image-generation gateway")]
struct Cli {
    /// Overrides API_HOST
    #[arg(long)]
    host: Option<String>,

    /// Overrides API_PORT
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing();

    let mut cfg = Config::from_env()?;
    if let Some(host) = cli.host {
        cfg.api_host = host;
    }
    if let Some(port) = cli.port {
        cfg.api_port = port;
    }

    run_server(cfg).await
}
