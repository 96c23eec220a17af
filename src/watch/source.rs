//! notify-backed raw event source

use std::path::Path;

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::{RawEvent, RawKind};
use crate::common::{Error, Result};

/// Map a notify event to raw events; access and metadata events are dropped
fn translate(event: notify::Event) -> Vec<RawEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => RawKind::Create,
        EventKind::Remove(_) => RawKind::Remove,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => RawKind::Rename,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => RawKind::Create,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            return paths
                .next()
                .map(|from| RawEvent::new(from, RawKind::Rename))
                .into_iter()
                .chain(paths.map(|to| RawEvent::new(to, RawKind::Create)))
                .collect();
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            return event
                .paths
                .into_iter()
                .map(|path| {
                    let kind = if path.exists() {
                        RawKind::Create
                    } else {
                        RawKind::Rename
                    };
                    RawEvent::new(path, kind)
                })
                .collect();
        }
        EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) => return Vec::new(),
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => RawKind::Write,
    };
    event
        .paths
        .into_iter()
        .map(|path| RawEvent::new(path, kind))
        .collect()
}

/// Start watching `dir` (non-recursively)
///
/// The watcher stops when the returned handle is dropped. Watch errors are
/// logged and never end the stream.
pub fn watch_dir(dir: &Path) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<RawEvent>)> {
    let (tx, rx) = mpsc::unbounded_channel();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
        Ok(event) => {
            for raw in translate(event) {
                let _ = tx.send(raw);
            }
        }
        Err(e) => tracing::warn!(error = %e, "Watch error"),
    })
    .map_err(|e| Error::Watch(e.to_string()))?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| Error::Watch(format!("{}: {}", dir.display(), e)))?;

    tracing::info!(dir = %dir.display(), "Watching for changes");
    Ok((watcher, rx))
}
