//! Implementation of `dagen generate`.
//!
//! Locks the configuration, lists and selects the exported targets, then
//! (in the build-producing modes) processes every target in sorted order
//! and renders the Ninja file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context as _, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::builder::context::Context;
use crate::builder::ninja;
use crate::core::flags::{
    ConfigHash, FlagInfo, FlagRegistry, FlagSources, PERSISTED_FLAGS_FILE,
};
use crate::core::manifest::Manifest;
use crate::core::path::Layout;
use crate::core::target::{is_exported, TargetSet};
use crate::util::context::GlobalContext;

/// What the generator is asked to produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Generate the build file.
    #[default]
    Build,
    /// List exported targets only.
    List,
    /// Generate the build file; list runnable targets.
    Run,
    /// Generate the build file; list testable targets.
    Test,
    /// Report the resolved flags only.
    Flags,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Build => "build",
            Mode::List => "list",
            Mode::Run => "run",
            Mode::Test => "test",
            Mode::Flags => "flags",
        }
    }

    /// Whether this mode builds the graph and renders a build file.
    pub fn generates_graph(&self) -> bool {
        matches!(self, Mode::Build | Mode::Run | Mode::Test)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "build" => Ok(Mode::Build),
            "list" => Ok(Mode::List),
            "run" => Ok(Mode::Run),
            "test" => Ok(Mode::Test),
            "flags" => Ok(Mode::Flags),
            _ => bail!(
                "unknown mode `{}` (expected build, list, run, test or flags)",
                s
            ),
        }
    }
}

/// Options for the generate command.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub mode: Mode,

    /// Absolute workspace source directory
    pub source_dir: PathBuf,

    /// Absolute build root; outputs go to `<build root>/<hash>/`
    pub build_root: PathBuf,

    /// Directory printed outputs are made relative to
    pub working_dir: PathBuf,

    /// Arguments appended to run commands
    pub run_args: Vec<String>,

    /// Arguments appended to test commands
    pub test_args: Vec<String>,

    /// Target name patterns to select (empty = all)
    pub include: Vec<String>,

    /// Target name patterns to deselect; these win over `include`
    pub exclude: Vec<String>,

    /// Write resolved flags to `<build root>/FLAGS.json`
    pub persist_flags: bool,
}

impl GenerateOptions {
    /// Path of the persisted flag file.
    pub fn flags_file(&self) -> PathBuf {
        self.build_root.join(PERSISTED_FLAGS_FILE)
    }
}

/// An exported target as reported by the generator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub description: String,
    pub runnable: bool,
    pub testable: bool,
    /// Selected only by its exact name, and built only when selected
    pub report: bool,
    pub selected: bool,
}

/// Result document of a generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorOutput {
    /// Rendered Ninja file; absent in `list` and `flags` modes
    pub ninja_file: Option<String>,
    pub targets: BTreeMap<String, TargetInfo>,
    pub flags: BTreeMap<String, FlagInfo>,
    pub selected_targets: Vec<String>,
    pub config_hash: ConfigHash,
}

/// Compiled selection patterns.
struct Selector {
    names: Vec<String>,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl Selector {
    fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Selector {
            names: include.to_vec(),
            include: compile_patterns(include)?,
            exclude: compile_patterns(exclude)?,
        })
    }

    fn selects(&self, name: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|re| re.is_match(name));
        included && !self.excludes(name)
    }

    /// Report targets must be named exactly.
    fn selects_report(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name) && !self.excludes(name)
    }

    fn excludes(&self, name: &str) -> bool {
        self.exclude.iter().any(|re| re.is_match(name))
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(&format!("^(?:{})$", p))
                .with_context(|| format!("invalid target pattern `{}`", p))
        })
        .collect()
}

/// Run the generator over a set of targets.
pub fn generate(
    registry: &mut FlagRegistry,
    targets: &TargetSet,
    opts: &GenerateOptions,
) -> Result<GeneratorOutput> {
    let persist_to = opts.persist_flags.then(|| opts.flags_file());
    let locked = registry
        .lock(persist_to.as_deref())
        .context("failed to resolve configuration flags")?;

    let selector = Selector::new(&opts.include, &opts.exclude)?;

    let mut infos = BTreeMap::new();
    for (name, target) in targets.iter() {
        if !is_exported(name) {
            continue;
        }
        let runnable = target.as_run().is_some();
        let testable = target.as_test().is_some();
        let report = target.as_report().is_some();
        let listed = match opts.mode {
            Mode::Run => runnable,
            Mode::Test => testable,
            _ => true,
        };
        if !listed {
            continue;
        }
        infos.insert(
            name.to_string(),
            TargetInfo {
                description: target.description().unwrap_or_default(),
                runnable,
                testable,
                report,
                selected: if report {
                    selector.selects_report(name)
                } else {
                    selector.selects(name)
                },
            },
        );
    }

    let selected_targets: Vec<String> = infos
        .iter()
        .filter(|(_, info)| info.selected)
        .map(|(name, _)| name.clone())
        .collect();

    let ninja_file = if opts.mode.generates_graph() {
        let layout = Layout::new(
            path_string(&opts.source_dir),
            path_string(&opts.build_root),
            locked.hash.clone(),
        );
        Some(build_ninja(registry, targets, &infos, &selected_targets, layout, opts)?)
    } else {
        None
    };

    Ok(GeneratorOutput {
        ninja_file,
        targets: infos,
        flags: locked.flags,
        selected_targets,
        config_hash: locked.hash,
    })
}

fn build_ninja(
    registry: &FlagRegistry,
    targets: &TargetSet,
    infos: &BTreeMap<String, TargetInfo>,
    selected: &[String],
    layout: Layout,
    opts: &GenerateOptions,
) -> Result<String> {
    let mut ctx = Context::new(layout, registry)
        .with_known_targets(targets.names())
        .with_working_dir(opts.working_dir.clone());

    for (name, target) in targets.iter() {
        let result = match target.as_report() {
            Some(report) => {
                if !infos.get(name).is_some_and(|info| info.selected) {
                    tracing::debug!("skipping unselected report {}", name);
                    continue;
                }
                report.report(targets, selected).and_then(|built| {
                    ctx.handle_target(name, built.as_ref(), &opts.run_args, &opts.test_args)
                })
            }
            None => ctx.handle_target(name, target, &opts.run_args, &opts.test_args),
        };
        result.with_context(|| format!("while processing target '{}'", name))?;
    }

    let graph = ctx.into_graph();
    tracing::info!(
        "generated {} rules and {} edges for {} targets",
        graph.rules().len(),
        graph.edges().len(),
        targets.len()
    );
    Ok(ninja::render(&graph))
}

fn path_string(path: &Path) -> String {
    path.display().to_string()
}

/// Options for generating from a dagen.toml workspace.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceOptions {
    /// Path of the manifest
    pub manifest_path: PathBuf,

    /// Command-line flag arguments (`name=value` or `name`)
    pub cmdline_flags: Vec<String>,

    pub generate: GenerateOptions,
}

/// Load a workspace manifest and its configuration, then generate.
pub fn generate_workspace(
    gctx: &GlobalContext,
    opts: &WorkspaceOptions,
) -> Result<GeneratorOutput> {
    let manifest = Manifest::load(&opts.manifest_path)?;
    let config = gctx.load_config(&opts.generate.source_dir);

    let mut generate_opts = opts.generate.clone();
    generate_opts.persist_flags = generate_opts.persist_flags && config.persist_flags();

    let sources = FlagSources::new()
        .with_cmdline(FlagSources::parse_cmdline(&opts.cmdline_flags))
        .with_persisted(FlagSources::load_persisted(&generate_opts.flags_file())?)
        .with_workspace(config.flag_values());

    let mut registry = FlagRegistry::new(sources);
    manifest.register_flags(&mut registry)?;
    let targets = manifest.into_targets()?;

    tracing::debug!(
        "loaded {} targets from {}",
        targets.len(),
        opts.manifest_path.display()
    );

    generate(&mut registry, &targets, &generate_opts)
}
