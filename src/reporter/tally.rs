//! Pass/fail counting decorator
//!
//! Wraps another reporter and counts outcomes on the way through; the CLI
//! uses the totals for its exit status.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Info, Reporter, TestError};

/// Shared counters
#[derive(Debug, Default)]
pub struct TallyCounts {
    passed: AtomicUsize,
    failed: AtomicUsize,
    file_errors: AtomicUsize,
}

impl TallyCounts {
    pub fn passed(&self) -> usize {
        self.passed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn file_errors(&self) -> usize {
        self.file_errors.load(Ordering::SeqCst)
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.file_errors() == 0
    }
}

/// Reporter decorator that counts tests and file-level errors
pub struct Tally {
    inner: Arc<dyn Reporter>,
    counts: Arc<TallyCounts>,
    /// Present inside a test scope
    failed: Option<AtomicBool>,
}

impl Tally {
    pub fn new(inner: Arc<dyn Reporter>) -> Self {
        Self {
            inner,
            counts: Arc::new(TallyCounts::default()),
            failed: None,
        }
    }

    pub fn counts(&self) -> Arc<TallyCounts> {
        Arc::clone(&self.counts)
    }
}

impl Reporter for Tally {
    fn run_file(&self, path: &Path, f: &mut dyn FnMut(Arc<dyn Reporter>)) {
        let counts = Arc::clone(&self.counts);
        self.inner.run_file(path, &mut |inner| {
            f(Arc::new(Tally {
                inner,
                counts: Arc::clone(&counts),
                failed: None,
            }))
        });
    }

    fn run_test(&self, capability: &str, name: &str, f: &mut dyn FnMut(Arc<dyn Reporter>)) {
        let counts = Arc::clone(&self.counts);
        self.inner.run_test(capability, name, &mut |inner| {
            let scope = Arc::new(Tally {
                inner,
                counts: Arc::clone(&counts),
                failed: Some(AtomicBool::new(false)),
            });
            f(scope.clone());
            let failed = scope
                .failed
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::SeqCst));
            let counter = if failed { &counts.failed } else { &counts.passed };
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }

    fn error(&self, error: TestError) {
        match &self.failed {
            Some(flag) => flag.store(true, Ordering::SeqCst),
            None => {
                self.counts.file_errors.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.inner.error(error);
    }

    fn info(&self, info: Info) {
        self.inner.info(info);
    }
}
