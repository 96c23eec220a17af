//! Capability provider contract
//!
//! A [`Runner`] exposes named test-step functions for one protocol. Runners
//! may also expose helper functions ([`Helpers`]) and an after-test hook
//! ([`AfterTest`]); both are optional and discovered by probing, so a
//! runner that provides neither only implements the required methods.

pub mod http;
pub mod registry;
pub mod strings;

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::common::{Error, Result};
use crate::matcher;
use crate::reporter::{Info, Reporter};
use crate::script::Value;
use crate::state::StateStore;

pub use registry::Registry;

/// Type accepted by a function argument, used in listings and stubs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Number,
    Boolean,
    Table,
    Any,
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArgType::String => "string",
            ArgType::Number => "number",
            ArgType::Boolean => "boolean",
            ArgType::Table => "table",
            ArgType::Any => "any",
        };
        write!(f, "{}", s)
    }
}

/// One argument of a runner function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub name: String,
    pub types: Vec<ArgType>,
    pub optional: bool,
    pub doc: String,
}

impl Argument {
    pub fn new(name: &str, types: &[ArgType], doc: &str) -> Self {
        Self {
            name: name.to_string(),
            types: types.to_vec(),
            optional: false,
            doc: doc.to_string(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Metadata for a callable function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: String,
    pub args: Vec<Argument>,
    pub doc: String,
    pub returns: Vec<ArgType>,
}

impl FunctionSpec {
    pub fn new(name: &str, doc: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Vec::new(),
            doc: doc.to_string(),
            returns: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: Argument) -> Self {
        self.args.push(arg);
        self
    }

    pub fn returns(mut self, ty: ArgType) -> Self {
        self.returns.push(ty);
        self
    }

    /// Signature as shown by `tester list`
    pub fn signature(&self) -> String {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                let types: Vec<String> = a.types.iter().map(ToString::to_string).collect();
                let opt = if a.optional { "?" } else { "" };
                format!("{}{}: {}", a.name, opt, types.join("|"))
            })
            .collect();
        let mut sig = format!("{}({})", self.name, args.join(", "));
        if !self.returns.is_empty() {
            let returns: Vec<String> = self.returns.iter().map(ToString::to_string).collect();
            sig.push_str(" -> ");
            sig.push_str(&returns.join(", "));
        }
        sig
    }

    /// Name of the positional argument at `index`
    pub fn arg_name(&self, index: usize) -> String {
        self.args
            .get(index)
            .map(|a| a.name.clone())
            .unwrap_or_else(|| format!("arg{}", index + 1))
    }
}

/// Access to the async runtime and the run's cancellation token
#[derive(Clone)]
pub struct SetupContext {
    handle: Handle,
    cancel: CancellationToken,
}

impl SetupContext {
    pub fn new(handle: Handle, cancel: CancellationToken) -> Self {
        Self { handle, cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Drive `fut` to completion, aborting when the run is cancelled
    ///
    /// Must be called from a blocking thread, never from inside the runtime.
    pub fn block_on<F: Future>(&self, fut: F) -> Result<F::Output> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let cancel = self.cancel.clone();
        self.handle.block_on(async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(Error::Cancelled),
                out = fut => Ok(out),
            }
        })
    }
}

/// Everything a runner function can reach while it executes
pub struct CallContext<'a> {
    reporter: Arc<dyn Reporter>,
    state: &'a StateStore,
    exec: &'a SetupContext,
}

impl<'a> CallContext<'a> {
    pub fn new(reporter: Arc<dyn Reporter>, state: &'a StateStore, exec: &'a SetupContext) -> Self {
        Self {
            reporter,
            state,
            exec,
        }
    }

    /// Match `actual` against `expected`, capturing saves into the state store
    pub fn check(&self, expected: &Value, actual: &Value) -> Result<()> {
        matcher::check(expected, actual, self.state)
    }

    /// Attach a diagnostic to the current test, or to the file outside tests
    pub fn info(&self, info: Info) {
        self.reporter.info(info);
    }

    pub fn state(&self) -> &StateStore {
        self.state
    }

    pub fn block_on<F: Future>(&self, fut: F) -> Result<F::Output> {
        self.exec.block_on(fut)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        self.exec.cancel_token()
    }
}

/// Pluggable capability provider
pub trait Runner: Send + Sync {
    /// Name used as `Test.<name>` in scripts
    fn name(&self) -> &str;

    /// Functions exposed on the module passed to test blocks
    fn functions(&self) -> Vec<FunctionSpec>;

    /// Invoke one of [`Runner::functions`]
    fn call(&self, cx: &CallContext<'_>, function: &str, args: Vec<Value>) -> Result<Vec<Value>>;

    /// Helper functions, if this runner provides any
    fn helpers(&self) -> Option<&dyn Helpers> {
        None
    }

    /// Per-test cleanup hook, if this runner needs one
    fn after_test_hook(&self) -> Option<&dyn AfterTest> {
        None
    }
}

/// Capability-independent functions exposed under `Helper.<name>`
pub trait Helpers: Send + Sync {
    fn helper_functions(&self) -> Vec<FunctionSpec>;

    fn call_helper(&self, cx: &CallContext<'_>, name: &str, args: Vec<Value>) -> Result<Vec<Value>>;
}

/// Clears per-test transient state without undoing setup
pub trait AfterTest: Send + Sync {
    fn after_test(&self, cx: &CallContext<'_>) -> Result<()>;
}

/// Result of provisioning a file's environment
#[derive(Default)]
pub struct Provisioned {
    pub runners: Vec<Arc<dyn Runner>>,
    pub cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl Provisioned {
    pub fn new(runners: Vec<Arc<dyn Runner>>) -> Self {
        Self {
            runners,
            cleanup: None,
        }
    }

    pub fn with_cleanup(mut self, cleanup: impl FnOnce() + Send + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }
}

/// External collaborator that creates live runners for one file
///
/// Invoked lazily, at most once per file, with the script's `Config` table
/// decoded into [`Setup::Config`].
pub trait Setup: Send + Sync + 'static {
    type Config: DeserializeOwned;

    fn setup(&self, cx: &SetupContext, dir: &Path, config: Self::Config) -> Result<Provisioned>;
}

/// Pull argument `index` as a string
pub fn string_arg(function: &str, args: &[Value], index: usize) -> Result<String> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(Error::invalid_argument(
            function,
            format!("argument {} must be a string, got {}", index + 1, other.type_name()),
        )),
        None => Err(Error::invalid_argument(
            function,
            format!("missing argument {}", index + 1),
        )),
    }
}
