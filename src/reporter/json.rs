//! Line-oriented JSON reporter for CI
//!
//! One object per line: `start`/`end` for files, `start_test`/`end_test`
//! for tests, plus one `error` or `info` object per diagnostic. Every line
//! is tagged with the file and, inside a test, its name and capability.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;

use super::{Info, Reporter, TestError};

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

#[derive(Serialize)]
struct Line<'a> {
    event: &'a str,
    file: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capability: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a TestError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<&'a Info>,
}

impl<'a> Line<'a> {
    fn new(event: &'a str, file: &'a str) -> Self {
        Self {
            event,
            file,
            name: None,
            capability: None,
            passed: None,
            duration_ms: None,
            error: None,
            info: None,
        }
    }
}

fn emit(sink: &Sink, line: &Line<'_>) {
    let mut out = sink.lock().unwrap_or_else(PoisonError::into_inner);
    let written = serde_json::to_writer(&mut *out, line)
        .map_err(std::io::Error::from)
        .and_then(|_| writeln!(out))
        .and_then(|_| out.flush());
    if let Err(e) = written {
        tracing::warn!(error = %e, "Failed to write report line");
    }
}

/// JSON line reporter writing to any sink, stdout by default
#[derive(Clone)]
pub struct JsonReporter {
    sink: Sink,
}

impl JsonReporter {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl Reporter for JsonReporter {
    fn run_file(&self, path: &Path, f: &mut dyn FnMut(Arc<dyn Reporter>)) {
        let file = path.display().to_string();
        let started = Instant::now();
        let failed = Arc::new(AtomicBool::new(false));

        emit(&self.sink, &Line::new("start", &file));
        f(Arc::new(ScopedJson {
            sink: Arc::clone(&self.sink),
            file: file.clone(),
            test: None,
            failed: Arc::clone(&failed),
            parent_failed: None,
        }));

        let mut end = Line::new("end", &file);
        end.passed = Some(!failed.load(Ordering::SeqCst));
        end.duration_ms = Some(started.elapsed().as_millis() as u64);
        emit(&self.sink, &end);
    }

    fn run_test(&self, capability: &str, name: &str, _f: &mut dyn FnMut(Arc<dyn Reporter>)) {
        tracing::warn!(capability, test = name, "Test reported outside of a file");
    }

    fn error(&self, error: TestError) {
        tracing::warn!(error = %error.message, "Error reported outside of a file");
    }

    fn info(&self, _info: Info) {}
}

struct ScopedJson {
    sink: Sink,
    file: String,
    test: Option<(String, String)>,
    failed: Arc<AtomicBool>,
    parent_failed: Option<Arc<AtomicBool>>,
}

impl ScopedJson {
    fn line<'a>(&'a self, event: &'a str) -> Line<'a> {
        let mut line = Line::new(event, &self.file);
        if let Some((capability, name)) = &self.test {
            line.name = Some(name);
            line.capability = Some(capability);
        }
        line
    }
}

impl Reporter for ScopedJson {
    fn run_file(&self, path: &Path, _f: &mut dyn FnMut(Arc<dyn Reporter>)) {
        tracing::warn!(file = %path.display(), "Nested file scope ignored");
    }

    fn run_test(&self, capability: &str, name: &str, f: &mut dyn FnMut(Arc<dyn Reporter>)) {
        if self.test.is_some() {
            tracing::warn!(capability, test = name, "Nested test scope ignored");
            return;
        }

        let scoped = Arc::new(ScopedJson {
            sink: Arc::clone(&self.sink),
            file: self.file.clone(),
            test: Some((capability.to_string(), name.to_string())),
            failed: Arc::new(AtomicBool::new(false)),
            parent_failed: Some(Arc::clone(&self.failed)),
        });
        let started = Instant::now();

        emit(&self.sink, &scoped.line("start_test"));
        f(scoped.clone());

        let mut end = scoped.line("end_test");
        end.passed = Some(!scoped.failed.load(Ordering::SeqCst));
        end.duration_ms = Some(started.elapsed().as_millis() as u64);
        emit(&self.sink, &end);
    }

    fn error(&self, error: TestError) {
        self.failed.store(true, Ordering::SeqCst);
        if let Some(parent) = &self.parent_failed {
            parent.store(true, Ordering::SeqCst);
        }
        let mut line = self.line("error");
        line.error = Some(&error);
        emit(&self.sink, &line);
    }

    fn info(&self, info: Info) {
        let mut line = self.line("info");
        line.info = Some(&info);
        emit(&self.sink, &line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::InfoKind;
    use pretty_assertions::assert_eq;

    /// Writer that keeps everything in a shared buffer
    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn lines(buf: &Buffer) -> Vec<serde_json::Value> {
        String::from_utf8(buf.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_start_end_pairs_even_on_failure() {
        let buf = Buffer::default();
        let reporter = JsonReporter::new(Box::new(buf.clone()));

        reporter.run_file(Path::new("users.lua"), &mut |file| {
            file.run_test("http", "create", &mut |test| {
                test.info(Info::new(InfoKind::Request, "POST /users"));
                test.error(TestError::new("MATCH_ERROR", "diff"));
            });
        });

        let out = lines(&buf);
        let events: Vec<&str> = out.iter().map(|l| l["event"].as_str().unwrap()).collect();
        assert_eq!(
            events,
            vec!["start", "start_test", "info", "error", "end_test", "end"]
        );
        assert_eq!(out[3]["name"], "create");
        assert_eq!(out[3]["capability"], "http");
        assert_eq!(out[3]["error"]["kind"], "MATCH_ERROR");
        assert_eq!(out[4]["passed"], false);
        assert_eq!(out[5]["passed"], false);
        assert_eq!(out[5]["file"], "users.lua");
        assert!(out[5].get("name").is_none());
    }

    #[test]
    fn test_passing_file() {
        let buf = Buffer::default();
        let reporter = JsonReporter::new(Box::new(buf.clone()));
        reporter.run_file(Path::new("ok.lua"), &mut |file| {
            file.run_test("http", "ping", &mut |_| {});
        });
        let out = lines(&buf);
        assert_eq!(out[2]["passed"], true);
        assert_eq!(out[3]["passed"], true);
    }
}
