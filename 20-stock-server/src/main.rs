use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use stock_server::{cli::Cli, lifecycle::Lifecycle};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// One thread serves every connection and owns the ledger.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let lifecycle = Lifecycle::start(cli.into_config()).await?;
    let addr = lifecycle.local_addr()?;
    info!("stock server listening on {}", addr);

    if let Err(err) = lifecycle.run_until_ctrl_c().await {
        warn!("stock server exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
