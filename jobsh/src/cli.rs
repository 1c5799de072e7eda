use clap::{Parser, crate_version};
use jobsh_core::MIN_MAX_JOBS;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "jobsh",
    version = crate_version!(),
    about = "An interactive shell with job control"
)]
pub struct Cli {
    #[arg(short, long, help = "Enable debug log level.")]
    pub verbose: bool,

    #[arg(
        short,
        long,
        conflicts_with = "verbose",
        help = "Only log errors."
    )]
    pub quiet: bool,

    #[arg(
        long,
        value_name = "PATH",
        env = "JOBSH_CONFIG",
        help = "Read configuration from PATH instead of the XDG config directory."
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        value_parser = clap::value_parser!(u32).range(i64::from(MIN_MAX_JOBS)..),
        help = "Override the job id bound (exclusive, at least 2)."
    )]
    pub max_jobs: Option<u32>,

    #[arg(long, help = "Do not announce background jobs that finish.")]
    pub no_notify: bool,
}
