use anyhow::Result;
use clap::Parser;

use reviewgate::config::Config;
use reviewgate::{gateway, logging};

#[derive(Debug, Parser)]
#[command(name = "reviewgate", about = "Webhook-triggered LLM code review", version)]
struct Cli {
    /// Address to bind the webhook gateway on.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the webhook gateway on.
    #[arg(long, default_value_t = 8000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging()?;

    let config = Config::from_env()?;
    gateway::run_gateway(&cli.host, cli.port, config).await
}
