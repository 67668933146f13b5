use anyhow::Result;
use stratum_bridge::cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
