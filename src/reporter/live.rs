//! Live reporter tree and broadcast cache
//!
//! Files and tests are entities guarded by their own mutex. Every mutation
//! happens under the entity lock and, while that lock is still held, is
//! broadcast through the [`Cache`], which takes its own lock second. The
//! cache never calls back into an entity, so the order is always
//! entity then cache.
//!
//! The cache keeps an event-sourced snapshot of every file. A listener is
//! registered under the cache write lock: it receives `init` with that
//! snapshot and joins the listener set in the same critical section, so no
//! event can fall between the two.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;

use super::{Info, Reporter, TestError};

/// File as seen by listeners
///
/// File-level events carry the file's own fields; `tests` is only filled in
/// snapshots, tests themselves travel in test events.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileSnapshot {
    pub filename: String,
    pub running: bool,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub errors: Vec<TestError>,
    pub infos: Vec<Info>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tests: Vec<TestSnapshot>,
}

/// Test as seen by listeners
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestSnapshot {
    pub filename: String,
    pub name: String,
    pub capability: String,
    pub order: u64,
    pub running: bool,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub errors: Vec<TestError>,
    pub infos: Vec<Info>,
}

impl TestSnapshot {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Entity carried by an `error` event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Entity {
    File(FileSnapshot),
    Test(TestSnapshot),
}

/// Message pushed to live listeners
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    Init(BTreeMap<String, FileSnapshot>),
    Start(FileSnapshot),
    End(FileSnapshot),
    StartTest(TestSnapshot),
    EndTest(TestSnapshot),
    Error(Entity),
    Info(TestSnapshot),
    FileInfo(FileSnapshot),
    Remove(String),
}

/// Handle for removing a listener
pub type ListenerId = u64;

struct Listener {
    id: ListenerId,
    tx: mpsc::Sender<Event>,
}

#[derive(Default)]
struct CacheState {
    files: BTreeMap<String, FileSnapshot>,
    listeners: Vec<Listener>,
}

/// Shared file map and listener set for one watch session
pub struct Cache {
    state: RwLock<CacheState>,
    next_listener: AtomicU64,
    buffer: usize,
}

impl Cache {
    /// Create a cache whose listeners buffer up to `buffer` events
    pub fn new(buffer: usize) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            next_listener: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Register a listener; the first event it receives is `init`
    pub fn subscribe(&self) -> (ListenerId, mpsc::Receiver<Event>) {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        // Fresh channel with capacity >= 1, the send cannot fail
        let _ = tx.try_send(Event::Init(state.files.clone()));
        state.listeners.push(Listener { id, tx });
        tracing::debug!(listener = id, listeners = state.listeners.len(), "Listener registered");

        (id, rx)
    }

    /// Remove a listener; removing twice is a no-op
    pub fn unsubscribe(&self, id: ListenerId) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let before = state.listeners.len();
        state.listeners.retain(|l| l.id != id);
        if state.listeners.len() != before {
            tracing::debug!(listener = id, "Listener removed");
        }
    }

    pub fn listener_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .len()
    }

    /// Current state of every known file
    pub fn snapshot(&self) -> BTreeMap<String, FileSnapshot> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .files
            .clone()
    }

    /// Forget a file and tell listeners
    pub fn remove_file(&self, path: &Path) {
        self.broadcast(Event::Remove(path.display().to_string()));
    }

    /// Apply `event` to the snapshot and fan it out
    ///
    /// Sends never wait: a listener whose buffer is full or whose receiver
    /// is gone is dropped from the set.
    pub fn broadcast(&self, event: Event) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut state.files, &event);

        state.listeners.retain(|l| match l.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(listener = l.id, "Listener saturated, disconnecting");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

fn apply(files: &mut BTreeMap<String, FileSnapshot>, event: &Event) {
    match event {
        Event::Init(_) => {}
        Event::Start(file) => {
            files.insert(file.filename.clone(), file.clone());
        }
        Event::End(file) | Event::FileInfo(file) | Event::Error(Entity::File(file)) => {
            let entry = files.entry(file.filename.clone()).or_default();
            let tests = std::mem::take(&mut entry.tests);
            *entry = FileSnapshot {
                tests,
                ..file.clone()
            };
        }
        Event::StartTest(test)
        | Event::EndTest(test)
        | Event::Info(test)
        | Event::Error(Entity::Test(test)) => {
            let entry = files
                .entry(test.filename.clone())
                .or_insert_with(|| FileSnapshot {
                    filename: test.filename.clone(),
                    ..Default::default()
                });
            match entry.tests.iter_mut().find(|t| t.order == test.order) {
                Some(existing) => *existing = test.clone(),
                None => entry.tests.push(test.clone()),
            }
        }
        Event::Remove(path) => {
            files.remove(path);
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

struct FileState {
    snapshot: FileSnapshot,
    started: Instant,
    next_order: u64,
}

struct FileEntity {
    state: Mutex<FileState>,
}

struct TestState {
    snapshot: TestSnapshot,
    started: Instant,
}

struct TestEntity {
    state: Mutex<TestState>,
}

/// Root reporter feeding a [`Cache`]
#[derive(Clone)]
pub struct LiveReporter {
    cache: Arc<Cache>,
}

impl LiveReporter {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }
}

impl Reporter for LiveReporter {
    fn run_file(&self, path: &Path, f: &mut dyn FnMut(Arc<dyn Reporter>)) {
        let file = Arc::new(FileEntity {
            state: Mutex::new(FileState {
                snapshot: FileSnapshot {
                    filename: path.display().to_string(),
                    running: true,
                    ..Default::default()
                },
                started: Instant::now(),
                next_order: 0,
            }),
        });

        {
            let state = lock(&file.state);
            self.cache.broadcast(Event::Start(state.snapshot.clone()));
        }

        f(Arc::new(FileReporter {
            file: Arc::clone(&file),
            cache: Arc::clone(&self.cache),
        }));

        let mut state = lock(&file.state);
        state.snapshot.running = false;
        state.snapshot.duration_ms = elapsed_ms(state.started);
        self.cache.broadcast(Event::End(state.snapshot.clone()));
    }

    fn run_test(&self, capability: &str, name: &str, _f: &mut dyn FnMut(Arc<dyn Reporter>)) {
        tracing::warn!(capability, test = name, "Test reported outside of a file");
    }

    fn error(&self, error: TestError) {
        tracing::warn!(error = %error.message, "Error reported outside of a file");
    }

    fn info(&self, _info: Info) {}
}

struct FileReporter {
    file: Arc<FileEntity>,
    cache: Arc<Cache>,
}

impl Reporter for FileReporter {
    fn run_file(&self, path: &Path, _f: &mut dyn FnMut(Arc<dyn Reporter>)) {
        tracing::warn!(file = %path.display(), "Nested file scope ignored");
    }

    fn run_test(&self, capability: &str, name: &str, f: &mut dyn FnMut(Arc<dyn Reporter>)) {
        let (filename, order) = {
            let mut state = lock(&self.file.state);
            let order = state.next_order;
            state.next_order += 1;
            (state.snapshot.filename.clone(), order)
        };

        let test = Arc::new(TestEntity {
            state: Mutex::new(TestState {
                snapshot: TestSnapshot {
                    filename,
                    name: name.to_string(),
                    capability: capability.to_string(),
                    order,
                    running: true,
                    ..Default::default()
                },
                started: Instant::now(),
            }),
        });

        {
            let state = lock(&test.state);
            self.cache.broadcast(Event::StartTest(state.snapshot.clone()));
        }

        f(Arc::new(TestReporter {
            test: Arc::clone(&test),
            cache: Arc::clone(&self.cache),
        }));

        let mut state = lock(&test.state);
        state.snapshot.running = false;
        state.snapshot.duration_ms = elapsed_ms(state.started);
        self.cache.broadcast(Event::EndTest(state.snapshot.clone()));
    }

    fn error(&self, error: TestError) {
        let mut state = lock(&self.file.state);
        state.snapshot.errors.push(error);
        self.cache
            .broadcast(Event::Error(Entity::File(state.snapshot.clone())));
    }

    fn info(&self, mut info: Info) {
        let mut state = lock(&self.file.state);
        info.offset_ms = elapsed_ms(state.started);
        info.order = Some(state.next_order);
        state.next_order += 1;
        state.snapshot.infos.push(info);
        self.cache.broadcast(Event::FileInfo(state.snapshot.clone()));
    }
}

struct TestReporter {
    test: Arc<TestEntity>,
    cache: Arc<Cache>,
}

impl Reporter for TestReporter {
    fn run_file(&self, path: &Path, _f: &mut dyn FnMut(Arc<dyn Reporter>)) {
        tracing::warn!(file = %path.display(), "Nested file scope ignored");
    }

    fn run_test(&self, capability: &str, name: &str, _f: &mut dyn FnMut(Arc<dyn Reporter>)) {
        tracing::warn!(capability, test = name, "Nested test scope ignored");
    }

    fn error(&self, error: TestError) {
        let mut state = lock(&self.test.state);
        state.snapshot.errors.push(error);
        self.cache
            .broadcast(Event::Error(Entity::Test(state.snapshot.clone())));
    }

    fn info(&self, mut info: Info) {
        let mut state = lock(&self.test.state);
        info.offset_ms = elapsed_ms(state.started);
        state.snapshot.infos.push(info);
        self.cache.broadcast(Event::Info(state.snapshot.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::InfoKind;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn run_passing_file(reporter: &LiveReporter, path: &str) {
        reporter.run_file(&PathBuf::from(path), &mut |file| {
            file.run_test("http", "ok", &mut |_test| {});
        });
    }

    fn drain(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[test]
    fn test_event_sequence() {
        let cache = Arc::new(Cache::new(64));
        let (_, mut rx) = cache.subscribe();
        let reporter = LiveReporter::new(Arc::clone(&cache));

        reporter.run_file(&PathBuf::from("a.lua"), &mut |file| {
            file.info(Info::new(InfoKind::Helper, "Helper.Dedent"));
            file.run_test("http", "fails", &mut |test| {
                test.error(TestError::new("MATCH_ERROR", "diff"));
            });
        });

        let kinds: Vec<&str> = drain(&mut rx)
            .iter()
            .map(|e| match e {
                Event::Init(_) => "init",
                Event::Start(_) => "start",
                Event::End(_) => "end",
                Event::StartTest(_) => "start_test",
                Event::EndTest(_) => "end_test",
                Event::Error(_) => "error",
                Event::Info(_) => "info",
                Event::FileInfo(_) => "file_info",
                Event::Remove(_) => "remove",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["init", "start", "file_info", "start_test", "error", "end_test", "end"]
        );

        let snapshot = cache.snapshot();
        let file = &snapshot["a.lua"];
        assert!(!file.running);
        assert_eq!(file.infos[0].order, Some(0));
        assert_eq!(file.tests.len(), 1);
        assert_eq!(file.tests[0].order, 1);
        assert!(!file.tests[0].passed());
    }

    #[test]
    fn test_late_listener_gets_init_only() {
        let cache = Arc::new(Cache::new(64));
        let reporter = LiveReporter::new(Arc::clone(&cache));
        for path in ["a.lua", "b.lua", "c.lua"] {
            run_passing_file(&reporter, path);
        }

        let (_, mut rx) = cache.subscribe();
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        let Event::Init(files) = &events[0] else {
            panic!("expected init");
        };
        assert_eq!(files.len(), 3);
        assert!(files.values().all(|f| !f.running && f.tests.len() == 1));
    }

    #[test]
    fn test_rerun_resets_file() {
        let cache = Arc::new(Cache::new(64));
        let reporter = LiveReporter::new(Arc::clone(&cache));
        run_passing_file(&reporter, "a.lua");
        reporter.run_file(&PathBuf::from("a.lua"), &mut |_| {});
        assert!(cache.snapshot()["a.lua"].tests.is_empty());
    }

    #[test]
    fn test_saturated_listener_is_dropped() {
        let cache = Arc::new(Cache::new(4));
        let (_, _slow) = cache.subscribe();
        let (_, mut fast) = cache.subscribe();
        let reporter = LiveReporter::new(Arc::clone(&cache));

        reporter.run_file(&PathBuf::from("a.lua"), &mut |_| {});
        assert_eq!(cache.listener_count(), 2);
        assert_eq!(drain(&mut fast).len(), 3);

        run_passing_file(&reporter, "b.lua");
        assert_eq!(cache.listener_count(), 1);
        assert_eq!(drain(&mut fast).len(), 4);
    }

    #[test]
    fn test_closed_listener_is_dropped() {
        let cache = Cache::new(8);
        let (_, rx) = cache.subscribe();
        drop(rx);
        cache.broadcast(Event::Remove("a.lua".into()));
        assert_eq!(cache.listener_count(), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let cache = Cache::new(8);
        let (id, _rx) = cache.subscribe();
        cache.unsubscribe(id);
        cache.unsubscribe(id);
        assert_eq!(cache.listener_count(), 0);
    }

    #[test]
    fn test_remove_file() {
        let cache = Arc::new(Cache::new(8));
        let reporter = LiveReporter::new(Arc::clone(&cache));
        run_passing_file(&reporter, "a.lua");
        let (_, mut rx) = cache.subscribe();
        cache.remove_file(Path::new("a.lua"));
        assert!(cache.snapshot().is_empty());
        let events = drain(&mut rx);
        assert_eq!(events[1], Event::Remove("a.lua".into()));
    }

    #[test]
    fn test_event_json_shape() {
        let event = Event::Remove("a.lua".into());
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "remove", "data": "a.lua"})
        );

        let test = TestSnapshot {
            filename: "a.lua".into(),
            name: "ok".into(),
            capability: "http".into(),
            order: 1,
            duration_ms: 12,
            ..Default::default()
        };
        let json = serde_json::to_value(Event::EndTest(test)).unwrap();
        assert_eq!(json["type"], "end_test");
        assert_eq!(json["data"]["duration"], 12);
        assert!(json["data"].get("duration_ms").is_none());
    }
}
