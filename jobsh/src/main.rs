mod cli;
mod log;
mod prompt;
mod repl;

use clap::Parser;
use jobsh_core::ShellConfig;
use miette::Result;

use crate::cli::Cli;
use crate::log::Level;

fn main() -> Result<()> {
    let cli = Cli::parse();
    log::init_tracing(Level::from_flags(cli.verbose, cli.quiet));

    let mut config = ShellConfig::load(cli.config.as_deref())?;
    if let Some(max_jobs) = cli.max_jobs {
        config.max_jobs = max_jobs;
    }
    if cli.no_notify {
        config.notify_done = false;
    }
    tracing::debug!(?config, "Configuration loaded");

    repl::run(&config)
}
