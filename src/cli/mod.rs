//! CLI command handling
//!
//! Builds the manager for a script directory and dispatches commands to it.

use std::path::Path;
use std::sync::Arc;

use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::commands::{Commands, Format};
use crate::common::config::Config;
use crate::common::Result;
use crate::manager::Manager;
use crate::reporter::{JsonReporter, PrettyReporter, Reporter, Tally, TallyCounts};
use crate::runner::http::{HttpRunner, HttpSetup};
use crate::runner::strings::StringHelpers;
use crate::runner::Registry;

/// Dispatch a CLI command
///
/// Returns `false` when the command ran but reported failures.
pub async fn dispatch(command: Commands) -> Result<bool> {
    match command {
        Commands::Run {
            dir,
            format,
            verbose,
        } => {
            let manager = manager(&dir)?;
            let inner: Arc<dyn Reporter> = match format {
                Format::Pretty => Arc::new(PrettyReporter::new(verbose)),
                Format::Json => Arc::new(JsonReporter::stdout()),
            };
            let tally = Arc::new(Tally::new(inner));
            let counts = tally.counts();

            let cancel = cancel_on_ctrl_c();
            manager.run(&dir, tally, cancel).await?;

            if format == Format::Pretty {
                print_summary(&counts);
            }
            Ok(counts.is_success())
        }

        Commands::Watch { dir, addr } => {
            let mut config = Config::load(&dir)?;
            if let Some(addr) = addr {
                config.live.addr = addr;
            }
            let manager = Manager::new(registry(&config), config);

            let cancel = cancel_on_ctrl_c();
            manager.watch(&dir, cancel).await?;
            Ok(true)
        }

        Commands::List { dir } => {
            let manager = manager(&dir)?;
            let files = manager.discover(&dir)?;

            println!("{}", "Scripts:".cyan());
            if files.is_empty() {
                println!("  {}", "(none)".dimmed());
            }
            for file in &files {
                println!("  {}", file.display());
            }

            let registry = manager.registry();
            for runner in registry.declared_runners() {
                println!("\n{}", format!("Test.{}:", runner.name()).cyan());
                for function in runner.functions() {
                    println!("  {}", function.signature());
                    if !function.doc.is_empty() {
                        println!("      {}", function.doc.dimmed());
                    }
                }
            }

            let helpers = registry.helper_specs();
            if !helpers.is_empty() {
                println!("\n{}", "Helper:".cyan());
                for helper in helpers {
                    println!("  {}", helper.signature());
                    if !helper.doc.is_empty() {
                        println!("      {}", helper.doc.dimmed());
                    }
                }
            }
            Ok(true)
        }
    }
}

/// Runners and helpers available to every script
fn registry(config: &Config) -> Registry<HttpSetup> {
    Registry::new(HttpSetup)
        .runner(Arc::new(HttpRunner::declared()))
        .helpers(Arc::new(StringHelpers))
        .script_config(config.script.clone())
}

fn manager(dir: &Path) -> Result<Manager<HttpSetup>> {
    let config = Config::load(dir)?;
    Ok(Manager::new(registry(&config), config))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}

fn print_summary(counts: &TallyCounts) {
    let passed = format!("{} passed", counts.passed());
    let failed = format!("{} failed", counts.failed());
    let failed = if counts.failed() > 0 {
        failed.red()
    } else {
        failed.normal()
    };
    print!("\n{}, {}", passed.green(), failed);
    if counts.file_errors() > 0 {
        print!(", {}", format!("{} file errors", counts.file_errors()).red());
    }
    println!();
}
