//! Script tester - integration tests driven by Lua scenario scripts
//!
//! Each script in a directory declares test blocks against pluggable
//! capabilities and checks responses with structural matching.

use clap::Parser;
use commands::Commands;
use tester::common::logging;
use tester::{cli, commands};

#[derive(Parser)]
#[command(name = "tester", about = "Run Lua-scripted integration tests")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Watch sessions also log to a file; the guard flushes it on exit
    let _guard = match cli.command {
        Commands::Watch { .. } => logging::init_watch(),
        _ => {
            logging::init_cli();
            None
        }
    };

    match cli::dispatch(cli.command).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
