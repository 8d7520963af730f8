//! Snapvault CLI - snapvault command

use clap::Parser;
use cli_lib::{app, Cli};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    ExitCode::from(app::execute(cli).await)
}
