//! Human-readable console reporter

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use colored::Colorize;

use super::{Info, Reporter, TestError};

/// Prints one line per test, with errors indented underneath
#[derive(Debug, Clone, Copy, Default)]
pub struct PrettyReporter {
    verbose: bool,
}

impl PrettyReporter {
    /// With `verbose`, infos are printed as they arrive
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

fn print_error(error: &TestError) {
    for line in error.message.lines() {
        let line = if line.starts_with('-') {
            line.red()
        } else if line.starts_with('+') {
            line.green()
        } else {
            line.normal()
        };
        println!("      {}", line);
    }
}

fn print_info(info: &Info) {
    let args: Vec<String> = info
        .args
        .iter()
        .map(|a| format!("{}={}", a.name, a.value))
        .collect();
    if args.is_empty() {
        println!("    {} {}", "·".dimmed(), info.title.dimmed());
    } else {
        println!(
            "    {} {}({})",
            "·".dimmed(),
            info.title.dimmed(),
            args.join(", ").dimmed()
        );
    }
    if !info.content.is_empty() {
        for line in info.content.lines() {
            println!("      {}", line.dimmed());
        }
    }
}

impl Reporter for PrettyReporter {
    fn run_file(&self, path: &Path, f: &mut dyn FnMut(Arc<dyn Reporter>)) {
        println!("\n{}", path.display().to_string().white().bold());
        f(Arc::new(PrettyScope {
            verbose: self.verbose,
            errors: None,
        }));
    }

    fn run_test(&self, _capability: &str, _name: &str, _f: &mut dyn FnMut(Arc<dyn Reporter>)) {}

    fn error(&self, error: TestError) {
        print_error(&error);
    }

    fn info(&self, _info: Info) {}
}

struct PrettyScope {
    verbose: bool,
    /// Set inside a test: errors are held until the test line is printed
    errors: Option<Mutex<Vec<TestError>>>,
}

impl Reporter for PrettyScope {
    fn run_file(&self, _path: &Path, _f: &mut dyn FnMut(Arc<dyn Reporter>)) {}

    fn run_test(&self, capability: &str, name: &str, f: &mut dyn FnMut(Arc<dyn Reporter>)) {
        let scope = Arc::new(PrettyScope {
            verbose: self.verbose,
            errors: Some(Mutex::new(Vec::new())),
        });
        let started = Instant::now();
        f(scope.clone());
        let elapsed = format!("({}ms)", started.elapsed().as_millis());

        let errors = scope
            .errors
            .as_ref()
            .map(|e| std::mem::take(&mut *e.lock().unwrap_or_else(PoisonError::into_inner)))
            .unwrap_or_default();

        if errors.is_empty() {
            println!(
                "  {} {} {} {}",
                "✓".green(),
                capability.cyan(),
                name,
                elapsed.dimmed()
            );
        } else {
            println!(
                "  {} {} {} {}",
                "✗".red(),
                capability.cyan(),
                name.red(),
                elapsed.dimmed()
            );
            for error in &errors {
                print_error(error);
            }
        }
    }

    fn error(&self, error: TestError) {
        match &self.errors {
            Some(errors) => errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(error),
            None => {
                println!("  {} {}", "✗".red(), error.kind.red().bold());
                print_error(&error);
            }
        }
    }

    fn info(&self, info: Info) {
        if self.verbose {
            print_info(&info);
        }
    }
}
