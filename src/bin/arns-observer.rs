use anyhow::Result;
use arns_observer::cli::{self, Cli};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run(Cli::parse()).await
}
