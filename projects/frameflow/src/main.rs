mod cli;
mod config;
mod engine;
mod error;
mod filter;
mod frame;
mod pipeline;
mod run;
mod run_report;

use anyhow::Result;
use cli::Args;

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing; RUST_LOG selects the level
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();

    run::run(args)?;

    Ok(())
}
