use std::process::ExitCode;

use bud_cli::Cli;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(!bud_ore::env::is_truthy("NO_COLOR"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match bud_cli::run(&cli, |text| println!("{text}")) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
