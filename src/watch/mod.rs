//! Debounced filesystem change batching
//!
//! Raw events are recorded into a [`Batch`] as they arrive; on every tick
//! the batch is flushed into discrete [`Change`]s. Ingestion and flushing
//! never wait on each other: the raw source pushes into an unbounded
//! channel, and a flush that finds the output channel full leaves the change
//! pending for the next tick instead of blocking.

mod source;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

pub use source::watch_dir;

/// Kind of a raw filesystem event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Write,
    Create,
    Remove,
    Rename,
}

/// Event as produced by the filesystem source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: PathBuf,
    pub kind: RawKind,
}

impl RawEvent {
    pub fn new(path: impl Into<PathBuf>, kind: RawKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// What a flushed change asks the run loop to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Re-run the file
    Changed,
    /// Forget the file
    Removed,
}

/// Coalesced change for one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Pending changes, at most one per path
#[derive(Debug, Default)]
pub struct Batch {
    pending: BTreeMap<PathBuf, ChangeKind>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw event
    ///
    /// A remove evicts a pending write for the same path, so a file that is
    /// created and deleted within one window produces nothing.
    pub fn record(&mut self, event: RawEvent) {
        match event.kind {
            RawKind::Write | RawKind::Create => {
                self.pending.insert(event.path, ChangeKind::Changed);
            }
            RawKind::Remove | RawKind::Rename => {
                if self.pending.remove(&event.path) != Some(ChangeKind::Changed) {
                    self.pending.insert(event.path, ChangeKind::Removed);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Put back a change that could not be delivered
    ///
    /// An event recorded since the flush takes precedence.
    pub fn requeue(&mut self, change: Change) {
        self.pending.entry(change.path).or_insert(change.kind);
    }

    /// Take every pending change, leaving the batch empty
    pub fn flush(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(path, kind)| Change { path, kind })
            .collect()
    }
}

/// Forward debounced changes from `raw` to `out` every `interval`
///
/// Returns when `cancel` fires, when the raw source closes, or when the
/// consumer goes away. A busy consumer never stalls ingestion.
pub async fn run_batcher(
    mut raw: mpsc::UnboundedReceiver<RawEvent>,
    out: mpsc::Sender<Change>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut batch = Batch::new();
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately
    tick.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = raw.recv() => match event {
                Some(event) => {
                    tracing::trace!(path = %event.path.display(), kind = ?event.kind, "Raw event");
                    batch.record(event);
                }
                None => break,
            },
            _ = tick.tick() => {
                if batch.is_empty() {
                    continue;
                }
                for change in batch.flush() {
                    tracing::debug!(path = %change.path.display(), kind = ?change.kind, "Change");
                    match out.try_send(change) {
                        Ok(()) => {}
                        Err(TrySendError::Full(change)) => {
                            tracing::trace!(path = %change.path.display(), "Consumer busy, deferring");
                            batch.requeue(change);
                        }
                        Err(TrySendError::Closed(_)) => return,
                    }
                }
            }
        }
    }
    tracing::debug!("Batcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rapid_writes_coalesce() {
        let mut batch = Batch::new();
        batch.record(RawEvent::new("a.lua", RawKind::Write));
        batch.record(RawEvent::new("a.lua", RawKind::Write));
        assert_eq!(
            batch.flush(),
            vec![Change {
                path: "a.lua".into(),
                kind: ChangeKind::Changed
            }]
        );
        assert!(batch.flush().is_empty());
    }

    #[test]
    fn test_write_then_remove_is_silent() {
        let mut batch = Batch::new();
        batch.record(RawEvent::new("a.lua", RawKind::Create));
        batch.record(RawEvent::new("a.lua", RawKind::Remove));
        assert!(batch.flush().is_empty());
    }

    #[test]
    fn test_remove_of_existing_file() {
        let mut batch = Batch::new();
        batch.record(RawEvent::new("b.lua", RawKind::Rename));
        batch.record(RawEvent::new("a.lua", RawKind::Write));
        let changes = batch.flush();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].kind, ChangeKind::Removed);
    }

    #[test]
    fn test_recreate_after_remove() {
        let mut batch = Batch::new();
        batch.record(RawEvent::new("a.lua", RawKind::Remove));
        batch.record(RawEvent::new("a.lua", RawKind::Create));
        assert_eq!(batch.flush()[0].kind, ChangeKind::Changed);
    }

    #[tokio::test]
    async fn test_batcher_flushes_on_tick() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_batcher(
            raw_rx,
            out_tx,
            Duration::from_millis(50),
            cancel.clone(),
        ));

        raw_tx.send(RawEvent::new("a.lua", RawKind::Write)).unwrap();
        raw_tx.send(RawEvent::new("a.lua", RawKind::Write)).unwrap();
        raw_tx.send(RawEvent::new("b.lua", RawKind::Write)).unwrap();
        raw_tx.send(RawEvent::new("b.lua", RawKind::Remove)).unwrap();

        let change = out_rx.recv().await.unwrap();
        assert_eq!(change.path, PathBuf::from("a.lua"));
        assert_eq!(change.kind, ChangeKind::Changed);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(out_rx.try_recv().is_err());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_busy_consumer_defers_changes() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_batcher(
            raw_rx,
            out_tx,
            Duration::from_millis(20),
            cancel.clone(),
        ));

        raw_tx.send(RawEvent::new("a.lua", RawKind::Write)).unwrap();
        raw_tx.send(RawEvent::new("b.lua", RawKind::Write)).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        // Still ingesting while the output channel is full
        raw_tx.send(RawEvent::new("c.lua", RawKind::Write)).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let mut seen = Vec::new();
        for _ in 0..3 {
            let change = tokio::time::timeout(Duration::from_secs(2), out_rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(change.path);
        }
        seen.sort();
        assert_eq!(
            seen,
            vec![
                PathBuf::from("a.lua"),
                PathBuf::from("b.lua"),
                PathBuf::from("c.lua")
            ]
        );

        cancel.cancel();
        task.await.unwrap();
    }

    #[test]
    fn test_requeue_keeps_newer_event() {
        let mut batch = Batch::new();
        batch.record(RawEvent::new("a.lua", RawKind::Remove));
        batch.requeue(Change {
            path: "a.lua".into(),
            kind: ChangeKind::Changed,
        });
        assert_eq!(batch.flush()[0].kind, ChangeKind::Removed);
    }
}
