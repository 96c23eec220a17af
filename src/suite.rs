//! Suite orchestrator
//!
//! A [`Suite`] executes one script file in a fresh Lua runtime. The runtime
//! is created at the start of [`Suite::run`] and dropped at its end; nothing
//! is shared with other files or with other runs of the same file.
//!
//! Globals registered for the script:
//! - the placeholder constructors and the `Null` sentinel
//! - `Config`, seeded from the run configuration and decoded at setup
//! - `State`, backed by the file's [`StateStore`]
//! - `Test.<capability>(name, fn)` for every declared runner
//! - `Helper.<name>(...)` for every declared helper
//!
//! Setup is lazy: the first `Test.*` or `Helper.*` call provisions the
//! runners, and it happens at most once per file.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use mlua::{Function, Lua, MultiValue, Table};

use crate::common::{Error, Result};
use crate::reporter::{Info, InfoKind, NullReporter, Reporter, TestError};
use crate::runner::{CallContext, FunctionSpec, Helpers, Registry, Runner, Setup, SetupContext};
use crate::script::{bridge, placeholder, Value};
use crate::state::StateStore;

/// One script file bound to its capabilities
pub struct Suite<S: Setup> {
    path: PathBuf,
    registry: Arc<Registry<S>>,
    exec: SetupContext,
}

impl<S: Setup> Suite<S> {
    pub fn new(path: impl Into<PathBuf>, registry: Arc<Registry<S>>, exec: SetupContext) -> Self {
        Self {
            path: path.into(),
            registry,
            exec,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Execute the file, reporting one file scope, and return the final state
    ///
    /// Never fails: every error ends up in the reporter.
    #[tracing::instrument(skip_all, fields(file = %self.path.display()))]
    pub fn run(&self, reporter: &dyn Reporter) -> BTreeMap<String, Value> {
        let shared = Rc::new(Shared {
            registry: Arc::clone(&self.registry),
            dir: self
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            exec: self.exec.clone(),
            state: StateStore::new(),
            reporter: RefCell::new(Arc::new(NullReporter)),
            setup: RefCell::new(SetupState::Pending),
            live: RefCell::new(BTreeMap::new()),
            cleanup: RefCell::new(None),
            in_test: Cell::new(false),
        });

        reporter.run_file(&self.path, &mut |file_reporter| {
            shared.reporter.replace(Arc::clone(&file_reporter));

            let lua = Lua::new();
            if let Err(e) = self.execute(&lua, &shared) {
                tracing::warn!(error = %e, "File aborted");
                file_reporter.error(TestError::from(&e));
            }
            drop(lua);
            shared.teardown();
        });

        shared.state.snapshot()
    }

    fn execute(&self, lua: &Lua, shared: &Rc<Shared<S>>) -> Result<()> {
        if self.exec.is_cancelled() {
            return Err(Error::Cancelled);
        }

        register_globals(lua, shared)?;

        let source = std::fs::read_to_string(&self.path)?;
        lua.load(source)
            .set_name(format!("@{}", self.path.display()))
            .exec()?;
        Ok(())
    }
}

enum SetupState {
    Pending,
    Running,
    Done,
    Failed(String),
}

/// Where a helper call is dispatched
enum HelperOwner {
    Runner(Arc<dyn Runner>),
    Set(Arc<dyn Helpers>),
}

impl HelperOwner {
    fn call(&self, cx: &CallContext<'_>, name: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        match self {
            HelperOwner::Runner(runner) => match runner.helpers() {
                Some(helpers) => helpers.call_helper(cx, name, args),
                None => Err(Error::unknown_function("Helper", name)),
            },
            HelperOwner::Set(helpers) => helpers.call_helper(cx, name, args),
        }
    }
}

fn provides(helpers: &dyn Helpers, name: &str) -> bool {
    helpers.helper_functions().iter().any(|f| f.name == name)
}

/// Per-file state reachable from the registered Lua functions
struct Shared<S: Setup> {
    registry: Arc<Registry<S>>,
    dir: PathBuf,
    exec: SetupContext,
    state: StateStore,
    /// File reporter outside tests, test reporter inside one
    reporter: RefCell<Arc<dyn Reporter>>,
    setup: RefCell<SetupState>,
    live: RefCell<BTreeMap<String, Arc<dyn Runner>>>,
    cleanup: RefCell<Option<Box<dyn FnOnce() + Send>>>,
    /// Set while a test body runs; tests do not nest
    in_test: Cell<bool>,
}

impl<S: Setup> Shared<S> {
    fn current_reporter(&self) -> Arc<dyn Reporter> {
        Arc::clone(&self.reporter.borrow())
    }

    fn call_context(&self) -> CallContext<'_> {
        CallContext::new(self.current_reporter(), &self.state, &self.exec)
    }

    /// Provision runners on first use
    fn ensure_setup(&self, lua: &Lua) -> Result<()> {
        match &*self.setup.borrow() {
            SetupState::Done => return Ok(()),
            SetupState::Failed(message) => return Err(Error::Setup(message.clone())),
            SetupState::Running => {
                return Err(Error::Setup("setup re-entered while running".to_string()))
            }
            SetupState::Pending => {}
        }
        self.setup.replace(SetupState::Running);

        match self.provision(lua) {
            Ok(count) => {
                tracing::info!(runners = count, "Environment provisioned");
                self.setup.replace(SetupState::Done);
                Ok(())
            }
            Err(e) => {
                let message = match e {
                    Error::Setup(message) => message,
                    other => other.to_string(),
                };
                tracing::warn!(error = %message, "Setup failed");
                self.setup.replace(SetupState::Failed(message.clone()));
                Err(Error::Setup(message))
            }
        }
    }

    fn provision(&self, lua: &Lua) -> Result<usize> {
        let raw: mlua::Value = lua.globals().get("Config")?;
        let json = bridge::from_lua(&raw)?.to_json();
        let config: S::Config = serde_json::from_value(json)
            .map_err(|e| Error::Setup(format!("invalid Config: {}", e)))?;

        let provisioned = self
            .registry
            .setup_collaborator()
            .setup(&self.exec, &self.dir, config)?;

        let count = provisioned.runners.len();
        let mut live = self.live.borrow_mut();
        for runner in provisioned.runners {
            live.insert(runner.name().to_string(), runner);
        }
        self.cleanup.replace(provisioned.cleanup);
        Ok(count)
    }

    fn runner(&self, name: &str) -> Option<Arc<dyn Runner>> {
        self.live.borrow().get(name).cloned()
    }

    fn resolve_helper(&self, name: &str) -> Option<HelperOwner> {
        let from_runner = self
            .live
            .borrow()
            .values()
            .find(|r| r.helpers().is_some_and(|h| provides(h, name)))
            .cloned();
        if let Some(runner) = from_runner {
            return Some(HelperOwner::Runner(runner));
        }
        self.registry
            .helper_sets()
            .iter()
            .find(|h| provides(Arc::as_ref(h), name))
            .map(|h| HelperOwner::Set(Arc::clone(h)))
    }

    fn teardown(&self) {
        self.live.borrow_mut().clear();
        if let Some(cleanup) = self.cleanup.borrow_mut().take() {
            cleanup();
        }
    }
}

fn external(e: Error) -> mlua::Error {
    mlua::Error::external(e)
}

fn to_multi(lua: &Lua, values: &[Value]) -> mlua::Result<MultiValue> {
    values.iter().map(|v| bridge::to_lua(lua, v)).collect()
}

fn from_multi(args: &MultiValue) -> mlua::Result<Vec<Value>> {
    args.iter().map(bridge::from_lua).collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn register_globals<S: Setup>(lua: &Lua, shared: &Rc<Shared<S>>) -> Result<()> {
    placeholder::register(lua)?;

    let globals = lua.globals();
    globals.set(
        "Config",
        bridge::to_lua(lua, &Value::from(shared.registry.initial_config().clone()))?,
    )?;
    globals.set("State", shared.state.bind(lua)?)?;

    let test = lua.create_table()?;
    for runner in shared.registry.declared_runners() {
        let name = runner.name().to_string();
        test.set(name.clone(), test_function(lua, shared, name)?)?;
    }
    globals.set("Test", test)?;

    let helper = lua.create_table()?;
    for spec in shared.registry.helper_specs() {
        helper.set(spec.name.clone(), helper_function(lua, shared, spec)?)?;
    }
    globals.set("Helper", helper)?;

    Ok(())
}

/// `Test.<capability>(name, fn)`
fn test_function<S: Setup>(lua: &Lua, shared: &Rc<Shared<S>>, capability: String) -> mlua::Result<Function> {
    let shared = Rc::clone(shared);
    lua.create_function(move |lua, (name, body): (String, Function)| {
        if shared.in_test.get() {
            return Err(external(Error::Script(format!(
                "Test.{}(\"{}\") called inside another test",
                capability, name
            ))));
        }
        shared.ensure_setup(lua).map_err(external)?;
        let runner = shared
            .runner(&capability)
            .ok_or_else(|| external(Error::UnknownRunner(capability.clone())))?;
        if shared.exec.is_cancelled() {
            return Err(external(Error::Cancelled));
        }

        let mut fatal = None;
        let parent = shared.current_reporter();
        parent.run_test(&capability, &name, &mut |test_reporter| {
            let previous = shared.reporter.replace(Arc::clone(&test_reporter));
            shared.in_test.set(true);
            tracing::debug!(runner = %capability, test = %name, "Running test");

            let outcome = module_table(lua, &shared, &runner).map_err(Error::from).and_then(|module| {
                match panic::catch_unwind(AssertUnwindSafe(|| body.call::<()>(module))) {
                    Ok(result) => result.map_err(Error::from),
                    Err(payload) => Err(Error::Script(format!(
                        "panic in test: {}",
                        panic_message(payload.as_ref())
                    ))),
                }
            });

            if let Err(e) = outcome {
                if e.is_fatal_for_file() {
                    fatal = Some(e);
                } else {
                    tracing::debug!(test = %name, error = %e, "Test failed");
                    test_reporter.error(TestError::from(&e));
                }
            }

            if let Some(hook) = runner.after_test_hook() {
                if let Err(e) = hook.after_test(&shared.call_context()) {
                    test_reporter.error(TestError::from(&e));
                }
            }

            shared.in_test.set(false);
            shared.reporter.replace(previous);
        });

        match fatal {
            Some(e) => Err(external(e)),
            None => Ok(()),
        }
    })
}

/// Table of the runner's functions, passed to a test body
fn module_table<S: Setup>(lua: &Lua, shared: &Rc<Shared<S>>, runner: &Arc<dyn Runner>) -> mlua::Result<Table> {
    let module = lua.create_table()?;
    for spec in runner.functions() {
        let shared = Rc::clone(shared);
        let runner = Arc::clone(runner);
        let function = spec.name.clone();
        module.set(
            spec.name,
            lua.create_function(move |lua, args: MultiValue| {
                let values = from_multi(&args)?;
                let out = runner
                    .call(&shared.call_context(), &function, values)
                    .map_err(external)?;
                to_multi(lua, &out)
            })?,
        )?;
    }
    Ok(module)
}

/// `Helper.<name>(...)`
fn helper_function<S: Setup>(lua: &Lua, shared: &Rc<Shared<S>>, spec: FunctionSpec) -> mlua::Result<Function> {
    let shared = Rc::clone(shared);
    lua.create_function(move |lua, args: MultiValue| {
        shared.ensure_setup(lua).map_err(external)?;

        let info = args.iter().enumerate().fold(
            Info::new(InfoKind::Helper, format!("Helper.{}", spec.name)),
            |info, (i, arg)| info.arg(spec.arg_name(i), bridge::format_compact(arg)),
        );
        shared.current_reporter().info(info);

        let owner = shared
            .resolve_helper(&spec.name)
            .ok_or_else(|| external(Error::unknown_function("Helper", &spec.name)))?;
        let out = owner
            .call(&shared.call_context(), &spec.name, from_multi(&args)?)
            .map_err(external)?;
        to_multi(lua, &out)
    })
}
