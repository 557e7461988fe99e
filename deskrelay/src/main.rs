use anyhow::Result;
use clap::Parser;

use deskrelay::cli::Cli;

fn main() -> Result<()> {
    deskrelay_core::observability::init_tracing();
    let cli = Cli::parse();
    deskrelay::run(cli)
}
