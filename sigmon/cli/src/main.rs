use anyhow::Result;
use clap::Parser;
use env_logger::Env;

mod cli;

const ENV_SIGMON_LOGLEVEL: &str = "SIGMON_LOGLEVEL";

pub fn main() -> Result<()> {
    env_logger::init_from_env(Env::new().filter(ENV_SIGMON_LOGLEVEL));
    cli::Cli::parse().run()
}
