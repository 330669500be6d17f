//! GrantBot CLI: ask questions about Singapore business-support schemes.
//!
//! Scrapes the configured official pages, lets an LLM pick the relevant
//! passages, and composes an answer from them.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    // A missing .env is fine; the key may come from the real environment.
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
