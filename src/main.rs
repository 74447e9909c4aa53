//! massindex CLI: rebuild indexes from a directory of JSON Lines files.

use anyhow::Result;
use clap::Parser;
use massindex::engine::Cli;
use massindex::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
