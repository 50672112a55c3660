//! Build context - the engine targets emit their steps into.
//!
//! One `Context` exists per generation run. It owns the build graph being
//! constructed, the memo table behind [`Context::built`], the provenance
//! trace and the per-target frontier (outputs not consumed by any other
//! step of the same target).

use std::collections::{BTreeSet, HashSet};
use std::ops::{Deref, DerefMut};
use std::path::{Path as FsPath, PathBuf};

use crate::builder::blob::BlobStore;
use crate::builder::errors::{BuildError, GraphError};
use crate::builder::graph::{BuildGraph, Definition, Edge, PseudoEdge, TargetBlock};
use crate::core::flags::{Flag, FlagKind, FlagRegistry, FlagValue};
use crate::core::path::{Layout, OutPath, Path, SourcePath};
use crate::core::step::{Action, BuildRule, BuildStep, SCRIPT_MODE};
use crate::core::target::{is_exported, target_dir, Build};
use crate::util::fs::relative_path;

/// Printed for exported targets without outputs.
pub const NO_OUTPUTS: &str = "<no outputs produced>";

/// Build context of a generation run.
pub struct Context<'a> {
    layout: Layout,
    flags: &'a FlagRegistry,
    blobs: BlobStore,
    graph: BuildGraph,
    trace: Vec<String>,
    seen: HashSet<String>,
    frontier: BTreeSet<String>,
    consumed: HashSet<String>,
    cwd: OutPath,
    current_target: Option<String>,
    target_deps: Vec<String>,
    known_targets: BTreeSet<String>,
    working_dir: PathBuf,
}

impl<'a> Context<'a> {
    /// Create a context for a locked flag registry.
    pub fn new(layout: Layout, flags: &'a FlagRegistry) -> Self {
        let blobs = BlobStore::new(layout.build_root());
        let cwd = layout.out("");
        let working_dir = PathBuf::from(layout.source_dir());
        Context {
            layout,
            flags,
            blobs,
            graph: BuildGraph::new(),
            trace: Vec::new(),
            seen: HashSet::new(),
            frontier: BTreeSet::new(),
            consumed: HashSet::new(),
            cwd,
            current_target: None,
            target_deps: Vec::new(),
            known_targets: BTreeSet::new(),
            working_dir,
        }
    }

    /// Set the top-level targets other targets may depend on.
    pub fn with_known_targets<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_targets = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the directory printed outputs are made relative to.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn flags(&self) -> &FlagRegistry {
        self.flags
    }

    /// Resolved value of a typed flag.
    pub fn flag<T: FlagKind>(&self, flag: &Flag<T>) -> Result<T, BuildError> {
        Ok(self.flags.get(flag)?)
    }

    /// Resolved value of a flag by name.
    pub fn flag_value(&self, name: &str) -> Result<&FlagValue, BuildError> {
        Ok(self.flags.lookup(name)?)
    }

    pub fn source(&self, rel: impl Into<String>) -> SourcePath {
        self.layout.source(rel)
    }

    pub fn out(&self, rel: impl Into<String>) -> OutPath {
        self.layout.out(rel)
    }

    pub fn out_for(&self, src: &SourcePath) -> OutPath {
        self.layout.out_for(src)
    }

    /// Build directory of the current target.
    pub fn cwd(&self) -> &OutPath {
        &self.cwd
    }

    /// Name of the target being processed.
    pub fn current_target(&self) -> Option<&str> {
        self.current_target.as_deref()
    }

    /// Directory printed outputs are made relative to.
    pub fn working_dir(&self) -> &FsPath {
        &self.working_dir
    }

    /// Returns whether `id` was built before, marking it built.
    ///
    /// Use it to emit the steps of a shared producer at most once:
    /// `if !ctx.built(&id) { ... }`.
    pub fn built(&mut self, id: &str) -> bool {
        let fresh = self.seen.insert(id.to_string());
        if !fresh {
            tracing::debug!("memo hit for {}", id);
        }
        !fresh
    }

    /// Run `f` with `label` pushed onto the trace.
    ///
    /// The trace is restored when `f` returns, including on early error
    /// returns and unwinding.
    pub fn with_trace<R>(
        &mut self,
        label: impl Into<String>,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let mut scope = TraceScope::enter(self, label.into());
        f(&mut *scope)
    }

    /// Copy of the current trace.
    pub fn trace(&self) -> Vec<String> {
        self.trace.clone()
    }

    /// Make the current target's aggregation edge depend on another
    /// top-level target.
    pub fn add_target_dependency(&mut self, name: &str) -> Result<(), BuildError> {
        if !self.known_targets.contains(name) {
            return Err(GraphError::UnknownTarget {
                name: name.to_string(),
            }
            .into());
        }
        if !is_exported(name) {
            return Err(GraphError::invalid_step(format!(
                "target dependency `{}` is not exported",
                name
            ))
            .into());
        }
        if !self.target_deps.iter().any(|d| d == name) {
            self.target_deps.push(name.to_string());
        }
        Ok(())
    }

    /// Add a build step for the current target.
    ///
    /// Steps without outputs are ignored. A step redefining an existing
    /// output is merged when equivalent and rejected otherwise.
    pub fn add_build_step(&mut self, step: BuildStep) -> Result<(), BuildError> {
        if step.outs.is_empty() {
            tracing::debug!("ignoring build step without outputs");
            return Ok(());
        }

        let outs: Vec<String> = step.outs.iter().map(OutPath::absolute).collect();
        let ins: Vec<String> = step.ins.iter().map(Path::absolute).collect();
        let order_only: Vec<String> = step.order_only.iter().map(Path::absolute).collect();
        let depfile = step.depfile.as_ref().map(OutPath::absolute);
        let mut variables = step.variables;

        let rule = match step.action {
            Action::Command(command) => anonymous_rule(command, step.descr, depfile),
            Action::Script(script) => {
                let blob = self.blobs.write(script.as_bytes(), SCRIPT_MODE)?;
                anonymous_rule(blob.display().to_string(), step.descr, depfile)
            }
            Action::Data { contents, mode } => {
                if outs.len() != 1 {
                    return Err(GraphError::invalid_step(
                        "a single output is required for a data step",
                    )
                    .into());
                }
                let blob = self.blobs.write(&contents, mode)?;
                let command = format!("cp \"{}\" \"{}\"", blob.display(), outs[0]);
                anonymous_rule(command, step.descr, depfile)
            }
            Action::Rule(rule) => {
                if rule.name.is_empty() {
                    return Err(GraphError::invalid_step("shared rule without a name").into());
                }
                if let Some(depfile) = depfile {
                    variables.insert("depfile".to_string(), depfile);
                }
                if let Some(descr) = step.descr {
                    variables.insert("description".to_string(), descr);
                }
                rule
            }
        };

        let rule = self.graph.intern_rule(rule)?;
        let edge = Edge {
            outs,
            ins,
            order_only,
            rule,
            variables,
            traces: vec![self.trace.clone()],
        };

        for input in edge.ins.iter().chain(&edge.order_only) {
            self.frontier.remove(input);
            self.consumed.insert(input.clone());
        }
        for out in &edge.outs {
            if !self.consumed.contains(out) {
                self.frontier.insert(out.clone());
            }
        }

        let first_out = edge.outs[0].clone();
        if self.graph.define(edge)? == Definition::Merged {
            tracing::debug!("merged equivalent definition of {}", first_out);
        }
        Ok(())
    }

    /// Build one top-level target and record its aggregation block.
    pub(crate) fn handle_target(
        &mut self,
        name: &str,
        target: &dyn Build,
        run_args: &[String],
        test_args: &[String],
    ) -> Result<(), BuildError> {
        tracing::debug!("processing target {}", name);

        self.current_target = Some(name.to_string());
        self.cwd = self.layout.out(target_dir(name));
        self.frontier.clear();
        self.consumed.clear();
        self.target_deps.clear();

        self.with_trace(format!("top:{}", name), |ctx| target.build(ctx))?;

        if is_exported(name) {
            self.finish_target(name, target, run_args, test_args)?;
        }

        self.current_target = None;
        Ok(())
    }

    fn finish_target(
        &mut self,
        name: &str,
        target: &dyn Build,
        run_args: &[String],
        test_args: &[String],
    ) -> Result<(), BuildError> {
        let printed: Vec<String> = match target.outputs() {
            Some(outputs) => outputs.iter().map(Path::absolute).collect(),
            None => self.frontier.iter().cloned().collect(),
        };
        let mut print: Vec<String> = printed
            .iter()
            .map(|p| {
                relative_path(self.working_dir(), FsPath::new(p))
                    .display()
                    .to_string()
            })
            .collect();
        print.sort();
        if print.is_empty() {
            print.push(NO_OUTPUTS.to_string());
        }

        let rule = self.graph.fresh_rule_name();
        let run = match target.as_run() {
            Some(r) => Some(PseudoEdge {
                command: r.run_command(self, run_args)?,
                rule: self.graph.fresh_rule_name(),
            }),
            None => None,
        };
        let test = match target.as_test() {
            Some(t) => Some(PseudoEdge {
                command: t.test_command(self, test_args)?,
                rule: self.graph.fresh_rule_name(),
            }),
            None => None,
        };

        let block = TargetBlock {
            name: name.to_string(),
            rule,
            print,
            inputs: self.frontier.iter().cloned().collect(),
            deps: self.target_deps.clone(),
            run,
            test,
        };
        self.graph.add_target(block);
        Ok(())
    }

    /// Consume the context, returning the completed graph.
    pub fn into_graph(self) -> BuildGraph {
        self.graph
    }

    /// The graph built so far.
    pub fn graph(&self) -> &BuildGraph {
        &self.graph
    }
}

fn anonymous_rule(
    command: String,
    description: Option<String>,
    depfile: Option<String>,
) -> BuildRule {
    BuildRule {
        command,
        description,
        depfile,
        ..Default::default()
    }
}

/// Pops a trace label when dropped.
struct TraceScope<'c, 'a> {
    ctx: &'c mut Context<'a>,
    depth: usize,
}

impl<'c, 'a> TraceScope<'c, 'a> {
    fn enter(ctx: &'c mut Context<'a>, label: String) -> Self {
        let depth = ctx.trace.len();
        ctx.trace.push(label);
        TraceScope { ctx, depth }
    }
}

impl<'a> Deref for TraceScope<'_, 'a> {
    type Target = Context<'a>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl<'a> DerefMut for TraceScope<'_, 'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl Drop for TraceScope<'_, '_> {
    fn drop(&mut self) {
        self.ctx.trace.truncate(self.depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{layout, locked_registry, temp_layout, FnTarget};
    use tempfile::TempDir;

    #[test]
    fn test_built_is_at_most_once() {
        let flags = locked_registry();
        let mut ctx = Context::new(layout(), &flags);
        assert!(!ctx.built("lib/util.a"));
        assert!(ctx.built("lib/util.a"));
        assert!(ctx.built("lib/util.a"));
        assert!(!ctx.built("lib/other.a"));
    }

    #[test]
    fn test_trace_is_scoped() {
        let flags = locked_registry();
        let mut ctx = Context::new(layout(), &flags);
        ctx.with_trace("top:Foo", |ctx| {
            ctx.with_trace("lib:util", |ctx| {
                assert_eq!(ctx.trace(), vec!["top:Foo", "lib:util"]);
            });
            assert_eq!(ctx.trace(), vec!["top:Foo"]);
        });
        assert!(ctx.trace().is_empty());
    }

    #[test]
    fn test_trace_restored_after_error() {
        let flags = locked_registry();
        let mut ctx = Context::new(layout(), &flags);
        let result: Result<(), BuildError> = ctx.with_trace("top:Foo", |ctx| {
            ctx.with_trace("lib:broken", |_| Err::<(), _>(BuildError::target("boom")))?;
            Ok(())
        });
        assert!(result.is_err());
        assert!(ctx.trace().is_empty());
    }

    #[test]
    fn test_trace_restored_after_panic() {
        let flags = locked_registry();
        let mut ctx = Context::new(layout(), &flags);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ctx.with_trace("top:Foo", |_| panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(ctx.trace().is_empty());
    }

    #[test]
    fn test_zero_output_step_is_noop() {
        let flags = locked_registry();
        let mut ctx = Context::new(layout(), &flags);
        let src = ctx.source("a.c");
        ctx.add_build_step(BuildStep::command("true").input(src)).unwrap();
        let graph = ctx.into_graph();
        assert!(graph.edges().is_empty());
        assert!(graph.rules().is_empty());
    }

    #[test]
    fn test_zero_output_step_leaves_frontier_unchanged() {
        let flags = locked_registry();
        let mut ctx = Context::new(layout(), &flags);
        let target = FnTarget::new(|ctx| {
            let src = ctx.source("a.c");
            let obj = ctx.out("a.o");
            ctx.add_build_step(BuildStep::command("cc -c").input(src).out(obj.clone()))?;
            // Consumes a.o but produces nothing, so a.o stays a final output.
            ctx.add_build_step(BuildStep::command("true").input(obj))
        });
        ctx.handle_target("Foo", &target, &[], &[]).unwrap();

        let empty = FnTarget::new(|ctx| {
            let src = ctx.source("b.c");
            ctx.add_build_step(BuildStep::command("true").input(src))
        });
        ctx.handle_target("Empty", &empty, &[], &[]).unwrap();

        let graph = ctx.into_graph();
        assert_eq!(graph.edges().len(), 1);
        let empty = graph.targets().iter().find(|t| t.name == "Empty").unwrap();
        assert!(empty.inputs.is_empty());
        assert_eq!(empty.print, vec![NO_OUTPUTS]);
        let foo = graph.targets().iter().find(|t| t.name == "Foo").unwrap();
        assert_eq!(foo.inputs, vec!["/build/CAFE0001/a.o"]);
    }

    #[test]
    fn test_equivalent_redefinition_merges() {
        let flags = locked_registry();
        let mut ctx = Context::new(layout(), &flags);
        let step = BuildStep::command("cc -c a.c")
            .input(ctx.source("a.c"))
            .out(ctx.out("a.o"));

        ctx.with_trace("top:Foo", |ctx| ctx.add_build_step(step.clone())).unwrap();
        ctx.with_trace("top:Bar", |ctx| ctx.add_build_step(step)).unwrap();

        let graph = ctx.into_graph();
        assert_eq!(graph.edges().len(), 1);
        assert_eq!(
            graph.edges()[0].traces,
            vec![vec!["top:Foo".to_string()], vec!["top:Bar".to_string()]]
        );
    }

    #[test]
    fn test_incompatible_redefinition_fails() {
        let flags = locked_registry();
        let mut ctx = Context::new(layout(), &flags);
        let out = ctx.out("a.o");

        ctx.with_trace("top:Foo", |ctx| {
            ctx.add_build_step(BuildStep::command("cc -O0").out(out.clone()))
        })
        .unwrap();
        let err = ctx
            .with_trace("top:Bar", |ctx| {
                ctx.add_build_step(BuildStep::command("cc -O2").out(out.clone()))
            })
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains(&out.absolute()));
        assert!(msg.contains("top:Foo"));
        assert!(msg.contains("top:Bar"));
    }

    #[test]
    fn test_frontier_is_order_independent() {
        let frontier = |consumer_first: bool| {
            let flags = locked_registry();
            let mut ctx = Context::new(layout(), &flags);
            let obj = ctx.out("a.o");
            let bin = ctx.out("a.bin");
            let compile = BuildStep::command("cc -c")
                .input(ctx.source("a.c"))
                .out(obj.clone());
            let link = BuildStep::command("ld").input(obj).out(bin);
            let target = FnTarget::new(move |ctx| {
                if consumer_first {
                    ctx.add_build_step(link.clone())?;
                    ctx.add_build_step(compile.clone())
                } else {
                    ctx.add_build_step(compile.clone())?;
                    ctx.add_build_step(link.clone())
                }
            });
            ctx.handle_target("Foo", &target, &[], &[]).unwrap();
            ctx.into_graph().targets()[0].inputs.clone()
        };

        assert_eq!(frontier(false), vec!["/build/CAFE0001/a.bin"]);
        assert_eq!(frontier(true), frontier(false));
    }

    #[test]
    fn test_cwd_follows_target_directory() {
        let flags = locked_registry();
        let mut ctx = Context::new(layout(), &flags);
        let target = FnTarget::new(|ctx| {
            assert_eq!(ctx.cwd().rel(), "pkg/sub");
            assert_eq!(ctx.current_target(), Some("pkg/sub/Foo"));
            Ok(())
        });
        ctx.handle_target("pkg/sub/Foo", &target, &[], &[]).unwrap();
        assert_eq!(ctx.current_target(), None);
    }

    #[test]
    fn test_unexported_target_has_no_block() {
        let flags = locked_registry();
        let mut ctx = Context::new(layout(), &flags);
        let target = FnTarget::new(|ctx| {
            let out = ctx.cwd().join("x");
            ctx.add_build_step(BuildStep::command("touch x").out(out))
        });
        ctx.handle_target("helper", &target, &[], &[]).unwrap();
        let graph = ctx.into_graph();
        assert_eq!(graph.edges().len(), 1);
        assert!(graph.targets().is_empty());
    }

    #[test]
    fn test_exported_target_prints_relative_outputs() {
        let flags = locked_registry();
        let mut ctx = Context::new(layout(), &flags).with_working_dir("/build/CAFE0001");
        assert_eq!(ctx.working_dir(), FsPath::new("/build/CAFE0001"));
        let target = FnTarget::new(|ctx| {
            let out = ctx.cwd().join("foo.bin");
            ctx.add_build_step(BuildStep::command("touch").out(out))
        });
        ctx.handle_target("Foo", &target, &[], &[]).unwrap();

        let empty = FnTarget::new(|_| Ok(()));
        ctx.handle_target("Empty", &empty, &[], &[]).unwrap();

        let graph = ctx.into_graph();
        assert_eq!(graph.targets()[0].print, vec!["foo.bin"]);
        assert_eq!(graph.targets()[1].print, vec![NO_OUTPUTS]);
        assert!(graph.targets()[1].inputs.is_empty());
    }

    #[test]
    fn test_explicit_outputs_override_frontier() {
        let flags = locked_registry();
        let mut ctx = Context::new(layout(), &flags).with_working_dir("/build");
        let target = FnTarget::new(|ctx| {
            let out = ctx.out("a.bin");
            ctx.add_build_step(BuildStep::command("touch").out(out))
        })
        .with_outputs(vec![Path::from(layout().out("docs/index.html"))]);
        ctx.handle_target("Foo", &target, &[], &[]).unwrap();

        let graph = ctx.into_graph();
        let block = &graph.targets()[0];
        assert_eq!(block.print, vec!["CAFE0001/docs/index.html"]);
        assert_eq!(block.inputs, vec!["/build/CAFE0001/a.bin"]);
    }

    #[test]
    fn test_run_and_test_commands_receive_args() {
        let flags = locked_registry();
        let mut ctx = Context::new(layout(), &flags);
        let target = FnTarget::new(|_| Ok(()))
            .with_run("./app")
            .with_test("./app --selftest");
        let args = vec!["--fast".to_string()];
        ctx.handle_target("App", &target, &args, &[]).unwrap();

        let graph = ctx.into_graph();
        let block = &graph.targets()[0];
        assert_eq!(block.run.as_ref().unwrap().command, "./app --fast");
        assert_eq!(block.test.as_ref().unwrap().command, "./app --selftest");
    }

    #[test]
    fn test_target_dependency() {
        let flags = locked_registry();
        let mut ctx = Context::new(layout(), &flags).with_known_targets(["Foo", "helper"]);
        assert!(matches!(
            ctx.add_target_dependency("Nope").unwrap_err(),
            BuildError::Graph(GraphError::UnknownTarget { .. })
        ));
        assert!(matches!(
            ctx.add_target_dependency("helper").unwrap_err(),
            BuildError::Graph(GraphError::InvalidStep { .. })
        ));

        let target = FnTarget::new(|ctx| {
            ctx.add_target_dependency("Foo")?;
            ctx.add_target_dependency("Foo")
        });
        ctx.handle_target("All", &target, &[], &[]).unwrap();
        assert_eq!(ctx.into_graph().targets()[0].deps, vec!["Foo"]);
    }

    #[test]
    fn test_data_step_requires_single_output() {
        let tmp = TempDir::new().unwrap();
        let flags = locked_registry();
        let layout = temp_layout(&tmp);
        let mut ctx = Context::new(layout.clone(), &flags);
        let err = ctx
            .add_build_step(
                BuildStep::data("x")
                    .out(layout.out("a"))
                    .out(layout.out("b")),
            )
            .unwrap_err();
        assert!(matches!(err, BuildError::Graph(GraphError::InvalidStep { .. })));
    }

    #[test]
    fn test_script_and_data_are_written_as_blobs() {
        let tmp = TempDir::new().unwrap();
        let flags = locked_registry();
        let layout = temp_layout(&tmp);
        let mut ctx = Context::new(layout.clone(), &flags);

        ctx.add_build_step(BuildStep::script("#!/bin/sh\ntouch $1\n").out(layout.out("s")))
            .unwrap();
        ctx.add_build_step(BuildStep::data("hello").out(layout.out("greeting.txt"))).unwrap();

        let graph = ctx.into_graph();
        let blob_dir = tmp.path().join("build").join("DATA");
        let blobs: Vec<_> = std::fs::read_dir(&blob_dir).unwrap().collect();
        assert_eq!(blobs.len(), 2);

        let script_cmd = &graph.rules()[0].command;
        assert!(script_cmd.starts_with(&blob_dir.display().to_string()));
        let copy_cmd = &graph.rules()[1].command;
        assert!(copy_cmd.starts_with("cp \""));
        assert!(copy_cmd.ends_with(&format!("\"{}\"", layout.out("greeting.txt").absolute())));
    }

    #[test]
    fn test_shared_rule_step_variables() {
        let flags = locked_registry();
        let mut ctx = Context::new(layout(), &flags);
        let rule = BuildRule::new("cc", "gcc -MD -MF $depfile -c $in -o $out").deps("gcc");
        let step = BuildStep::with_rule(rule)
            .input(ctx.source("a.c"))
            .out(ctx.out("a.o"))
            .depfile(ctx.out("a.d"))
            .descr("CC a.c")
            .var("cflags", "-O2");
        ctx.add_build_step(step).unwrap();

        let graph = ctx.into_graph();
        let edge = &graph.edges()[0];
        assert_eq!(edge.rule, "cc");
        assert_eq!(edge.variables["depfile"], "/build/CAFE0001/a.d");
        assert_eq!(edge.variables["description"], "CC a.c");
        assert_eq!(edge.variables["cflags"], "-O2");
    }
}
