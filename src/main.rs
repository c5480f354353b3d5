use clap::Parser;
use portico::cli::{Cli, Commands, RunArgs};
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    portico::cli::init_logging();

    match cli.command {
        Some(Commands::Run(args)) => portico::cli::run(args, cli.config.as_deref()).await,
        Some(Commands::Providers) => portico::cli::providers(cli.config.as_deref()),
        // Bare `portico` runs interactively
        None => portico::cli::run(RunArgs::default(), cli.config.as_deref()).await,
    }
}
