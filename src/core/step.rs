//! Build steps and rules.
//!
//! A [`BuildStep`] is one edge of the build graph: the outputs it produces,
//! the inputs it reads and exactly one [`Action`] that produces them.

use std::collections::BTreeMap;

use crate::core::path::{OutPath, Path};

/// A reusable recipe, rendered as a Ninja `rule` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BuildRule {
    /// Shared name. Empty for anonymous rules, which receive a generated name.
    pub name: String,
    pub command: String,
    pub description: Option<String>,
    pub depfile: Option<String>,
    /// Dependency style (`gcc` or `msvc`).
    pub deps: Option<String>,
    pub pool: Option<String>,
}

impl BuildRule {
    /// Create a shared rule.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        BuildRule {
            name: name.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn depfile(mut self, depfile: impl Into<String>) -> Self {
        self.depfile = Some(depfile.into());
        self
    }

    pub fn deps(mut self, deps: impl Into<String>) -> Self {
        self.deps = Some(deps.into());
        self
    }

    pub fn pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }
}

/// What a step does to produce its outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A shell command.
    Command(String),
    /// An inline script, stored as an executable blob and run as the command.
    Script(String),
    /// Inline file contents, copied to the single output.
    Data { contents: Vec<u8>, mode: u32 },
    /// A shared named rule, parameterized by the step's variables.
    Rule(BuildRule),
}

/// Default permissions of data payloads.
pub const DATA_MODE: u32 = 0o644;

/// Permissions of script payloads.
pub const SCRIPT_MODE: u32 = 0o755;

/// One edge of the build graph.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildStep {
    pub outs: Vec<OutPath>,
    pub ins: Vec<Path>,
    pub order_only: Vec<Path>,
    pub depfile: Option<OutPath>,
    pub action: Action,
    pub descr: Option<String>,
    pub variables: BTreeMap<String, String>,
}

impl BuildStep {
    fn with_action(action: Action) -> Self {
        BuildStep {
            outs: Vec::new(),
            ins: Vec::new(),
            order_only: Vec::new(),
            depfile: None,
            action,
            descr: None,
            variables: BTreeMap::new(),
        }
    }

    /// Create a step running a shell command.
    pub fn command(cmd: impl Into<String>) -> Self {
        Self::with_action(Action::Command(cmd.into()))
    }

    /// Create a step running an inline script.
    pub fn script(script: impl Into<String>) -> Self {
        Self::with_action(Action::Script(script.into()))
    }

    /// Create a step writing inline data to its output.
    pub fn data(contents: impl Into<Vec<u8>>) -> Self {
        Self::with_action(Action::Data {
            contents: contents.into(),
            mode: DATA_MODE,
        })
    }

    /// Create a step using a shared rule.
    pub fn with_rule(rule: BuildRule) -> Self {
        Self::with_action(Action::Rule(rule))
    }

    pub fn out(mut self, out: OutPath) -> Self {
        self.outs.push(out);
        self
    }

    pub fn outs(mut self, outs: impl IntoIterator<Item = OutPath>) -> Self {
        self.outs.extend(outs);
        self
    }

    pub fn input(mut self, input: impl Into<Path>) -> Self {
        self.ins.push(input.into());
        self
    }

    pub fn inputs<I, P>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Path>,
    {
        self.ins.extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn order_only(mut self, input: impl Into<Path>) -> Self {
        self.order_only.push(input.into());
        self
    }

    pub fn depfile(mut self, depfile: OutPath) -> Self {
        self.depfile = Some(depfile);
        self
    }

    pub fn descr(mut self, descr: impl Into<String>) -> Self {
        self.descr = Some(descr.into());
        self
    }

    pub fn var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Permissions for a data payload (ignored for other actions).
    pub fn mode(mut self, mode: u32) -> Self {
        if let Action::Data { mode: m, .. } = &mut self.action {
            *m = mode;
        }
        self
    }
}
