//! Manifest parsing - the dagen.toml workspace description.
//!
//! A manifest declares flags, shared rules, libraries (memoized producers
//! shared between targets) and top-level targets. Each manifest target is a
//! [`Build`] implementation emitting the declared steps, so the engine
//! treats it exactly like a target written in Rust.
//!
//! ```toml
//! [flags.opt]
//! type = "string"
//! allowed = ["0", "2"]
//! default = "0"
//!
//! [rules.cc]
//! command = "cc -O{{opt}} -c $in -o $out"
//!
//! [[libraries.util.steps]]
//! inputs = ["lib/util.c"]
//! outputs = ["lib/util.o"]
//! rule = "cc"
//!
//! [targets.App]
//! run = "{{cwd}}/app"
//!
//! [[targets.App.steps]]
//! inputs = ["app/main.c"]
//! libs = ["util"]
//! outputs = ["app"]
//! command = "cc -O{{opt}} -o $out $in"
//! ```
//!
//! Step inputs are source paths relative to the workspace root, build paths
//! when prefixed with `out:`, or global paths when absolute. Target step
//! outputs are relative to the target's build directory; library outputs
//! are relative to the configuration's build directory.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, OnceLock};

use miette::Diagnostic;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::builder::context::Context;
use crate::builder::errors::{BuildError, GraphError};
use crate::core::flags::{FlagDef, FlagError, FlagRegistry, FlagType, FlagValue};
use crate::core::path::{GlobalPath, OutPath, Path};
use crate::core::step::{BuildRule, BuildStep, DATA_MODE};
use crate::core::target::{Build, Run, TargetSet, Test};

/// File name of the manifest.
pub const MANIFEST_FILE: &str = "dagen.toml";

/// Placeholders that expand to layout directories rather than flags.
const BUILTIN_PLACEHOLDERS: &[&str] = &["cwd", "build", "source"];

/// Prefix marking a step input as a build path.
const OUT_PREFIX: &str = "out:";

/// Error raised while loading or validating a manifest.
#[derive(Debug, Error, Diagnostic)]
pub enum ManifestError {
    #[error("failed to read manifest {}: {source}", path.display())]
    #[diagnostic(code(dagen::manifest::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    #[diagnostic(code(dagen::manifest::parse))]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid flag `{name}`: {reason}")]
    #[diagnostic(code(dagen::manifest::invalid_flag))]
    InvalidFlag { name: String, reason: String },

    #[error("step {index} of {owner}: {reason}")]
    #[diagnostic(code(dagen::manifest::invalid_step))]
    InvalidStep {
        owner: String,
        index: usize,
        reason: String,
    },

    #[error("{owner} uses undefined rule `{name}`")]
    #[diagnostic(
        code(dagen::manifest::unknown_rule),
        help("Declare it in a `[rules.{name}]` table")
    )]
    UnknownRule { owner: String, name: String },

    #[error("{owner} uses undefined library `{name}`")]
    #[diagnostic(
        code(dagen::manifest::unknown_library),
        help("Declare it in a `[libraries.{name}]` table")
    )]
    UnknownLibrary { owner: String, name: String },

    #[error("{owner} uses unknown placeholder `{{{{{name}}}}}`")]
    #[diagnostic(
        code(dagen::manifest::unknown_placeholder),
        help("Placeholders expand flags and the built-in names `cwd`, `build` and `source`")
    )]
    UnknownPlaceholder { owner: String, name: String },

    #[error("rule `{name}`: {reason}")]
    #[diagnostic(code(dagen::manifest::invalid_rule))]
    InvalidRule { name: String, reason: String },

    #[error("library `{name}` depends on itself")]
    #[diagnostic(code(dagen::manifest::library_cycle))]
    LibraryCycle { name: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Flag(#[from] FlagError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

/// `[flags.<name>]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagSpec {
    #[serde(default, rename = "type")]
    pub ty: FlagType,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub allowed: Vec<toml::Value>,

    #[serde(default)]
    pub default: Option<toml::Value>,
}

impl FlagSpec {
    /// Convert to a registry definition.
    pub fn to_def(&self, name: &str) -> Result<FlagDef, ManifestError> {
        let mut def = FlagDef::new(name, self.description.clone(), self.ty);
        def.allowed = self.allowed.iter().map(value_to_string).collect();
        if let Some(default) = &self.default {
            def.default = Some(convert_default(name, self.ty, default)?);
        }
        Ok(def)
    }
}

fn value_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn convert_default(
    name: &str,
    ty: FlagType,
    value: &toml::Value,
) -> Result<FlagValue, ManifestError> {
    match (ty, value) {
        (FlagType::String, toml::Value::String(s)) => Ok(FlagValue::String(s.clone())),
        (FlagType::Bool, toml::Value::Boolean(b)) => Ok(FlagValue::Bool(*b)),
        (FlagType::Int, toml::Value::Integer(i)) => Ok(FlagValue::Int(*i)),
        (FlagType::Float, toml::Value::Float(x)) => Ok(FlagValue::Float(*x)),
        (FlagType::Float, toml::Value::Integer(i)) => Ok(FlagValue::Float(*i as f64)),
        (ty, value) => Err(ManifestError::InvalidFlag {
            name: name.to_string(),
            reason: format!("default `{}` is not a {} value", value, ty),
        }),
    }
}

/// `[rules.<name>]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub command: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub depfile: Option<String>,

    #[serde(default)]
    pub deps: Option<String>,

    #[serde(default)]
    pub pool: Option<String>,
}

impl RuleSpec {
    /// Strings subject to placeholder expansion.
    fn templates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(&self.command)
            .chain(&self.description)
            .chain(&self.depfile)
            .map(String::as_str)
    }

    pub fn to_rule(&self, name: &str) -> BuildRule {
        BuildRule {
            name: name.to_string(),
            command: self.command.clone(),
            description: self.description.clone(),
            depfile: self.depfile.clone(),
            deps: self.deps.clone(),
            pool: self.pool.clone(),
        }
    }
}

/// One `[[...steps]]` entry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default, rename = "order-only", alias = "order_only")]
    pub order_only: Vec<String>,

    #[serde(default)]
    pub depfile: Option<String>,

    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub script: Option<String>,

    #[serde(default)]
    pub data: Option<String>,

    /// Permissions of a data output.
    #[serde(default)]
    pub mode: Option<u32>,

    #[serde(default)]
    pub rule: Option<String>,

    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Libraries whose outputs become inputs of this step.
    #[serde(default)]
    pub libs: Vec<String>,
}

impl StepSpec {
    /// Strings subject to placeholder expansion.
    fn templates(&self) -> impl Iterator<Item = &str> {
        self.command
            .iter()
            .chain(&self.script)
            .chain(&self.data)
            .chain(&self.description)
            .chain(self.variables.values())
            .map(String::as_str)
    }

    fn validate(
        &self,
        owner: &str,
        index: usize,
        manifest: &Manifest,
    ) -> Result<(), ManifestError> {
        let invalid = |reason: &str| ManifestError::InvalidStep {
            owner: owner.to_string(),
            index,
            reason: reason.to_string(),
        };

        let actions = [
            self.command.is_some(),
            self.script.is_some(),
            self.data.is_some(),
            self.rule.is_some(),
        ];
        match actions.iter().filter(|set| **set).count() {
            0 => return Err(invalid("one of `command`, `script`, `data` or `rule` is required")),
            1 => {}
            _ => {
                return Err(invalid(
                    "`command`, `script`, `data` and `rule` are mutually exclusive",
                ))
            }
        }
        if self.mode.is_some() && self.data.is_none() {
            return Err(invalid("`mode` only applies to `data` steps"));
        }
        if self.data.is_some() && self.outputs.len() != 1 {
            return Err(invalid("a single output is required for a `data` step"));
        }

        if let Some(rule) = &self.rule {
            if !manifest.rules.contains_key(rule) {
                return Err(ManifestError::UnknownRule {
                    owner: owner.to_string(),
                    name: rule.clone(),
                });
            }
        }
        for lib in &self.libs {
            if !manifest.libraries.contains_key(lib) {
                return Err(ManifestError::UnknownLibrary {
                    owner: owner.to_string(),
                    name: lib.clone(),
                });
            }
        }
        for template in self.templates() {
            manifest.check_placeholders(owner, template)?;
        }
        Ok(())
    }
}

/// `[libraries.<name>]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LibrarySpec {
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

/// `[targets.<name>]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSpec {
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub steps: Vec<StepSpec>,

    /// Other top-level targets this target aggregates.
    #[serde(default)]
    pub deps: Vec<String>,

    /// Command running the target; run arguments are appended.
    #[serde(default)]
    pub run: Option<String>,

    /// Command testing the target; test arguments are appended.
    #[serde(default)]
    pub test: Option<String>,

    /// Outputs to print instead of the frontier, relative to the target's
    /// build directory.
    #[serde(default)]
    pub print: Option<Vec<String>>,
}

/// The parsed dagen.toml manifest.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub flags: BTreeMap<String, FlagSpec>,

    #[serde(default)]
    pub rules: BTreeMap<String, RuleSpec>,

    #[serde(default)]
    pub libraries: BTreeMap<String, LibrarySpec>,

    #[serde(default)]
    pub targets: BTreeMap<String, TargetSpec>,

    /// The directory containing this manifest
    #[serde(skip)]
    pub manifest_dir: PathBuf,
}

impl Manifest {
    /// Load a manifest from a file.
    pub fn load(path: &FsPath) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Parse and validate manifest content.
    pub fn parse(content: &str, path: &FsPath) -> Result<Self, ManifestError> {
        let mut manifest: Manifest =
            toml::from_str(content).map_err(|source| ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        manifest.manifest_dir = path.parent().unwrap_or(FsPath::new(".")).to_path_buf();
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        for (name, spec) in &self.flags {
            if BUILTIN_PLACEHOLDERS.contains(&name.as_str()) {
                return Err(ManifestError::InvalidFlag {
                    name: name.clone(),
                    reason: "the name is reserved for a built-in placeholder".to_string(),
                });
            }
            spec.to_def(name)?;
        }

        for (name, rule) in &self.rules {
            let owner = format!("rule `{}`", name);
            for template in rule.templates() {
                self.check_placeholders(&owner, template)?;
                if placeholders(template).any(|p| p == "cwd") {
                    return Err(ManifestError::InvalidRule {
                        name: name.clone(),
                        reason: "`{{cwd}}` differs between targets; pass it through a step variable"
                            .to_string(),
                    });
                }
            }
        }

        for (name, library) in &self.libraries {
            let owner = format!("library `{}`", name);
            for (index, step) in library.steps.iter().enumerate() {
                step.validate(&owner, index, self)?;
            }
        }

        for (name, target) in &self.targets {
            let owner = format!("target `{}`", name);
            for (index, step) in target.steps.iter().enumerate() {
                step.validate(&owner, index, self)?;
            }
            for template in target.run.iter().chain(&target.test) {
                self.check_placeholders(&owner, template)?;
            }
        }

        self.check_library_cycles()
    }

    fn check_placeholders(&self, owner: &str, template: &str) -> Result<(), ManifestError> {
        for name in placeholders(template) {
            if !BUILTIN_PLACEHOLDERS.contains(&name) && !self.flags.contains_key(name) {
                return Err(ManifestError::UnknownPlaceholder {
                    owner: owner.to_string(),
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_library_cycles(&self) -> Result<(), ManifestError> {
        fn visit<'m>(
            manifest: &'m Manifest,
            name: &'m str,
            active: &mut Vec<&'m str>,
            done: &mut BTreeSet<&'m str>,
        ) -> Result<(), ManifestError> {
            if done.contains(name) {
                return Ok(());
            }
            if active.contains(&name) {
                return Err(ManifestError::LibraryCycle {
                    name: name.to_string(),
                });
            }
            active.push(name);
            if let Some(library) = manifest.libraries.get(name) {
                for lib in library.steps.iter().flat_map(|s| &s.libs) {
                    visit(manifest, lib, active, done)?;
                }
            }
            active.pop();
            done.insert(name);
            Ok(())
        }

        let mut done = BTreeSet::new();
        for name in self.libraries.keys() {
            visit(self, name, &mut Vec::new(), &mut done)?;
        }
        Ok(())
    }

    /// Flag definitions declared by the manifest.
    pub fn flag_defs(&self) -> Result<Vec<FlagDef>, ManifestError> {
        self.flags
            .iter()
            .map(|(name, spec)| spec.to_def(name))
            .collect()
    }

    /// Register every declared flag.
    pub fn register_flags(&self, registry: &mut FlagRegistry) -> Result<(), ManifestError> {
        for def in self.flag_defs()? {
            registry.register(def)?;
        }
        Ok(())
    }

    /// Turn the declared targets into a target set.
    pub fn into_targets(self) -> Result<TargetSet, ManifestError> {
        let shared = Arc::new(Shared {
            rules: self
                .rules
                .iter()
                .map(|(name, spec)| (name.clone(), spec.to_rule(name)))
                .collect(),
            libraries: self.libraries,
        });

        let mut set = TargetSet::new();
        for (name, spec) in self.targets {
            let target = ManifestTarget {
                spec,
                shared: Arc::clone(&shared),
                printed: RefCell::new(None),
            };
            set.insert(name, target)?;
        }
        Ok(set)
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Names of the `{{name}}` placeholders in a template.
fn placeholders(template: &str) -> impl Iterator<Item = &str> {
    placeholder_pattern()
        .captures_iter(template)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
}

/// Expand placeholders against the current context.
fn expand(ctx: &Context<'_>, template: &str) -> Result<String, BuildError> {
    let mut result = String::with_capacity(template.len());
    let mut last = 0;
    for caps in placeholder_pattern().captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        result.push_str(&template[last..whole.start()]);
        match name.as_str() {
            "cwd" => result.push_str(&ctx.cwd().absolute()),
            "build" => result.push_str(&ctx.layout().build_dir()),
            "source" => result.push_str(ctx.layout().source_dir()),
            flag => result.push_str(&ctx.flag_value(flag)?.to_string()),
        }
        last = whole.end();
    }
    result.push_str(&template[last..]);
    Ok(result)
}

/// Expand the placeholders of a shared rule. Rules cannot use `{{cwd}}`, so
/// the result is the same for every target of a run.
fn expand_rule(ctx: &Context<'_>, rule: &BuildRule) -> Result<BuildRule, BuildError> {
    Ok(BuildRule {
        name: rule.name.clone(),
        command: expand(ctx, &rule.command)?,
        description: rule.description.as_deref().map(|d| expand(ctx, d)).transpose()?,
        depfile: rule.depfile.as_deref().map(|d| expand(ctx, d)).transpose()?,
        deps: rule.deps.clone(),
        pool: rule.pool.clone(),
    })
}

/// Rules and libraries shared by every target of a manifest.
#[derive(Debug)]
struct Shared {
    rules: BTreeMap<String, BuildRule>,
    libraries: BTreeMap<String, LibrarySpec>,
}

/// Where relative step outputs are resolved.
#[derive(Clone, Copy)]
enum OutputBase {
    TargetDir,
    BuildDir,
}

impl OutputBase {
    fn resolve(self, ctx: &Context<'_>, rel: &str) -> OutPath {
        match self {
            OutputBase::TargetDir => ctx.cwd().join(rel),
            OutputBase::BuildDir => ctx.out(rel),
        }
    }
}

fn resolve_input(ctx: &Context<'_>, input: &str) -> Path {
    if let Some(rel) = input.strip_prefix(OUT_PREFIX) {
        Path::Out(ctx.out(rel))
    } else if input.starts_with('/') {
        Path::Global(GlobalPath::new(input))
    } else {
        Path::Source(ctx.source(input))
    }
}

impl Shared {
    fn emit_step(
        &self,
        ctx: &mut Context<'_>,
        spec: &StepSpec,
        base: OutputBase,
    ) -> Result<(), BuildError> {
        let mut step = if let Some(command) = &spec.command {
            BuildStep::command(expand(ctx, command)?)
        } else if let Some(script) = &spec.script {
            BuildStep::script(expand(ctx, script)?)
        } else if let Some(data) = &spec.data {
            BuildStep::data(expand(ctx, data)?).mode(spec.mode.unwrap_or(DATA_MODE))
        } else if let Some(rule) = &spec.rule {
            let rule = self
                .rules
                .get(rule)
                .ok_or_else(|| BuildError::target(format!("undefined rule `{}`", rule)))?;
            BuildStep::with_rule(expand_rule(ctx, rule)?)
        } else {
            return Err(GraphError::invalid_step("step without an action").into());
        };

        step = step
            .inputs(spec.inputs.iter().map(|i| resolve_input(ctx, i)))
            .outs(spec.outputs.iter().map(|o| base.resolve(ctx, o)));
        for input in &spec.order_only {
            step = step.order_only(resolve_input(ctx, input));
        }
        for lib in &spec.libs {
            let outputs = self.build_library(ctx, lib)?;
            step = step.inputs(outputs);
        }
        if let Some(depfile) = &spec.depfile {
            step = step.depfile(base.resolve(ctx, depfile));
        }
        if let Some(description) = &spec.description {
            step = step.descr(expand(ctx, description)?);
        }
        for (name, value) in &spec.variables {
            step = step.var(name.clone(), expand(ctx, value)?);
        }

        ctx.add_build_step(step)
    }

    /// Outputs of a library: those of its steps not consumed by another of
    /// its steps.
    fn library_outputs(&self, ctx: &Context<'_>, library: &LibrarySpec) -> Vec<OutPath> {
        let consumed: BTreeSet<OutPath> = library
            .steps
            .iter()
            .flat_map(|s| &s.inputs)
            .filter_map(|i| match resolve_input(ctx, i) {
                Path::Out(p) => Some(p),
                _ => None,
            })
            .collect();
        library
            .steps
            .iter()
            .flat_map(|s| &s.outputs)
            .map(|o| ctx.out(o.as_str()))
            .filter(|o| !consumed.contains(o))
            .collect()
    }

    /// Emit a library's steps at most once and return its outputs.
    fn build_library(&self, ctx: &mut Context<'_>, name: &str) -> Result<Vec<OutPath>, BuildError> {
        let library = self
            .libraries
            .get(name)
            .ok_or_else(|| BuildError::target(format!("undefined library `{}`", name)))?;
        let outputs = self.library_outputs(ctx, library);
        let id = match outputs.first() {
            Some(first) => first.absolute(),
            None => format!("lib:{}", name),
        };

        if !ctx.built(&id) {
            ctx.with_trace(format!("lib:{}", name), |ctx| {
                for step in &library.steps {
                    self.emit_step(ctx, step, OutputBase::BuildDir)?;
                }
                Ok::<_, BuildError>(())
            })?;
        }
        Ok(outputs)
    }
}

/// A target declared in the manifest.
struct ManifestTarget {
    spec: TargetSpec,
    shared: Arc<Shared>,
    /// Explicit outputs, resolved when the target is built.
    printed: RefCell<Option<Vec<Path>>>,
}

impl ManifestTarget {
    fn command(
        &self,
        ctx: &Context<'_>,
        template: &str,
        args: &[String],
    ) -> Result<String, BuildError> {
        let mut command = expand(ctx, template)?;
        for arg in args {
            command.push(' ');
            command.push_str(arg);
        }
        Ok(command)
    }
}

impl Build for ManifestTarget {
    fn build(&self, ctx: &mut Context<'_>) -> Result<(), BuildError> {
        for dep in &self.spec.deps {
            ctx.add_target_dependency(dep)?;
        }
        for step in &self.spec.steps {
            self.shared.emit_step(ctx, step, OutputBase::TargetDir)?;
        }
        if let Some(print) = &self.spec.print {
            let paths = print
                .iter()
                .map(|p| Path::Out(ctx.cwd().join(p)))
                .collect();
            *self.printed.borrow_mut() = Some(paths);
        }
        Ok(())
    }

    fn description(&self) -> Option<String> {
        self.spec.description.clone()
    }

    fn outputs(&self) -> Option<Vec<Path>> {
        self.printed.borrow().clone()
    }

    fn as_run(&self) -> Option<&dyn Run> {
        self.spec.run.as_ref().map(|_| self as &dyn Run)
    }

    fn as_test(&self) -> Option<&dyn Test> {
        self.spec.test.as_ref().map(|_| self as &dyn Test)
    }
}

impl Run for ManifestTarget {
    fn run_command(&self, ctx: &Context<'_>, args: &[String]) -> Result<String, BuildError> {
        let template = self.spec.run.as_deref().unwrap_or_default();
        self.command(ctx, template, args)
    }
}

impl Test for ManifestTarget {
    fn test_command(&self, ctx: &Context<'_>, args: &[String]) -> Result<String, BuildError> {
        let template = self.spec.test.as_deref().unwrap_or_default();
        self.command(ctx, template, args)
    }
}
