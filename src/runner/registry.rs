//! Declared capabilities shared by every suite of a run

use std::sync::Arc;

use super::{FunctionSpec, Helpers, Runner, Setup};

/// The setup collaborator plus the capability metadata known before setup
///
/// Declared runners give scripts their `Test.<name>` entries and helper
/// names; the runners that actually execute come from [`Setup::setup`].
pub struct Registry<S: Setup> {
    setup: S,
    runners: Vec<Arc<dyn Runner>>,
    helpers: Vec<Arc<dyn Helpers>>,
    script_config: serde_json::Value,
}

impl<S: Setup> Registry<S> {
    pub fn new(setup: S) -> Self {
        Self {
            setup,
            runners: Vec::new(),
            helpers: Vec::new(),
            script_config: serde_json::Value::Object(Default::default()),
        }
    }

    /// Declare a capability
    pub fn runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runners.push(runner);
        self
    }

    /// Add helpers available without any capability
    pub fn helpers(mut self, helpers: Arc<dyn Helpers>) -> Self {
        self.helpers.push(helpers);
        self
    }

    /// Initial contents of the script's `Config` table
    pub fn script_config(mut self, config: serde_json::Value) -> Self {
        self.script_config = config;
        self
    }

    pub fn setup_collaborator(&self) -> &S {
        &self.setup
    }

    pub fn declared_runners(&self) -> &[Arc<dyn Runner>] {
        &self.runners
    }

    pub fn helper_sets(&self) -> &[Arc<dyn Helpers>] {
        &self.helpers
    }

    pub fn initial_config(&self) -> &serde_json::Value {
        &self.script_config
    }

    /// Every helper name visible to scripts, in declaration order
    pub fn helper_specs(&self) -> Vec<FunctionSpec> {
        let mut specs: Vec<FunctionSpec> = Vec::new();
        let from_runners = self
            .runners
            .iter()
            .filter_map(|r| r.helpers())
            .flat_map(|h| h.helper_functions());
        let from_sets = self.helpers.iter().flat_map(|h| h.helper_functions());
        for spec in from_runners.chain(from_sets) {
            if !specs.iter().any(|s| s.name == spec.name) {
                specs.push(spec);
            }
        }
        specs
    }
}
