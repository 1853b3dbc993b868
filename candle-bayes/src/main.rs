use anyhow::Result;
use candle_bayes::cli::{bnn, vae, Cli, Commands};
use clap::Parser;

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Vae(args) => {
            vae::run(args)?;
        }
        Commands::Bnn(args) => {
            bnn::run(args)?;
        }
    }

    Ok(())
}
