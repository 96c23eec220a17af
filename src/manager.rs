//! Run and watch orchestration
//!
//! The manager discovers scripts and runs each one in its own [`Suite`] on
//! a blocking thread (the Lua runtime is not `Send`). A one-shot run goes
//! through the files sequentially. A watch session runs three tasks that
//! share one cancellation token: the change batcher, the run loop and the
//! live report server. The first task to finish cancels the others.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::live;
use crate::reporter::{Cache, LiveReporter, Reporter};
use crate::runner::{Registry, Setup, SetupContext};
use crate::script::Value;
use crate::suite::Suite;
use crate::watch::{self, Change, ChangeKind};

/// Entry point for running script directories
pub struct Manager<S: Setup> {
    registry: Arc<Registry<S>>,
    config: Arc<Config>,
}

impl<S: Setup> Clone for Manager<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: Setup> Manager<S> {
    pub fn new(registry: Registry<S>, config: Config) -> Self {
        Self {
            registry: Arc::new(registry),
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }

    /// Scenario scripts in `dir`, excluding the generated stub file
    pub fn discover(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(paths::discover(dir, &self.config.run.extension)?)
    }

    /// Run one file to completion and return its final state
    pub async fn run_file(
        &self,
        path: &Path,
        reporter: Arc<dyn Reporter>,
        cancel: CancellationToken,
    ) -> Result<BTreeMap<String, Value>> {
        let suite = Suite::new(
            path,
            Arc::clone(&self.registry),
            SetupContext::new(Handle::current(), cancel),
        );
        tokio::task::spawn_blocking(move || suite.run(reporter.as_ref()))
            .await
            .map_err(|e| Error::Internal(format!("suite task failed: {}", e)))
    }

    /// Run every script in `dir` once, in order
    #[tracing::instrument(skip_all, fields(dir = %dir.display()))]
    pub async fn run(
        &self,
        dir: &Path,
        reporter: Arc<dyn Reporter>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let files = self.discover(dir)?;
        tracing::info!(files = files.len(), "Running scripts");

        for path in files {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.run_file(&path, Arc::clone(&reporter), cancel.clone())
                .await?;
        }
        Ok(())
    }

    /// Run everything, then re-run files as they change until cancelled
    #[tracing::instrument(skip_all, fields(dir = %dir.display()))]
    pub async fn watch(&self, dir: &Path, cancel: CancellationToken) -> Result<()> {
        let dir = dir.canonicalize()?;
        let cache = Arc::new(Cache::new(self.config.live.listener_buffer));
        let listener = live::bind(&self.config.live.addr).await?;
        let (watcher, raw_rx) = watch::watch_dir(&dir)?;
        let (change_tx, change_rx) = mpsc::channel(64);
        let interval = Duration::from_millis(self.config.watch.debounce_ms.max(1));

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        {
            let cancel = cancel.clone();
            tasks.spawn(async move {
                watch::run_batcher(raw_rx, change_tx, interval, cancel).await;
                Ok(())
            });
        }
        tasks.spawn(live::serve(listener, Arc::clone(&cache), cancel.clone()));
        {
            let this = self.clone();
            let cache = Arc::clone(&cache);
            let cancel = cancel.clone();
            tasks.spawn(async move { this.run_loop(dir, cache, change_rx, cancel).await });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .map_err(|e| Error::Internal(format!("watch task failed: {}", e)))
                .and_then(|r| r);
            if let Err(e) = result {
                tracing::error!(error = %e, "Watch task failed");
                first_error.get_or_insert(e);
            }
            cancel.cancel();
        }

        drop(watcher);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn run_loop(
        &self,
        dir: PathBuf,
        cache: Arc<Cache>,
        mut changes: mpsc::Receiver<Change>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let reporter: Arc<dyn Reporter> = Arc::new(LiveReporter::new(Arc::clone(&cache)));
        match self.run(&dir, Arc::clone(&reporter), cancel.clone()).await {
            Ok(()) | Err(Error::Cancelled) => {}
            Err(e) => return Err(e),
        }

        let extension = &self.config.run.extension;
        loop {
            let change = tokio::select! {
                _ = cancel.cancelled() => break,
                change = changes.recv() => match change {
                    Some(change) => change,
                    None => break,
                },
            };
            if !paths::is_script(&change.path, extension) {
                continue;
            }

            match change.kind {
                ChangeKind::Changed if change.path.is_file() => {
                    tracing::info!(file = %change.path.display(), "Re-running");
                    self.run_file(&change.path, Arc::clone(&reporter), cancel.clone())
                        .await?;
                }
                ChangeKind::Changed => {}
                ChangeKind::Removed => {
                    tracing::info!(file = %change.path.display(), "Removed");
                    cache.remove_file(&change.path);
                }
            }
        }
        Ok(())
    }
}
