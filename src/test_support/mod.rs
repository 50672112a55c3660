//! Test utilities for dagen unit tests.
//!
//! Provides a fixed layout, a locked flag registry and [`FnTarget`], a
//! closure-backed target with configurable capabilities.

pub mod fixtures;

use std::path::Path as FsPath;

use tempfile::TempDir;

use crate::builder::context::Context;
use crate::builder::errors::BuildError;
use crate::core::flags::{ConfigHash, FlagRegistry};
use crate::core::path::{Layout, Path};
use crate::core::target::{Build, Run, Test};

pub use fixtures::*;

/// Configuration hash used by [`layout`].
pub const TEST_HASH: &str = "CAFE0001";

/// Layout rooted at `/src` and `/build`. Nothing may be written through it.
pub fn layout() -> Layout {
    Layout::new("/src", "/build", ConfigHash::new(TEST_HASH))
}

/// Layout rooted inside a temporary directory, for tests writing blobs.
pub fn temp_layout(tmp: &TempDir) -> Layout {
    Layout::new(
        path_str(&tmp.path().join("src")),
        path_str(&tmp.path().join("build")),
        ConfigHash::new(TEST_HASH),
    )
}

/// An empty, locked flag registry.
pub fn locked_registry() -> FlagRegistry {
    let mut registry = FlagRegistry::default();
    registry
        .lock(None)
        .expect("locking an empty registry cannot fail");
    registry
}

fn path_str(path: &FsPath) -> String {
    path.display().to_string()
}

type BuildFn = Box<dyn Fn(&mut Context<'_>) -> Result<(), BuildError>>;

/// Target whose build is a closure.
pub struct FnTarget {
    build: BuildFn,
    description: Option<String>,
    outputs: Option<Vec<Path>>,
    run: Option<String>,
    test: Option<String>,
}

impl FnTarget {
    pub fn new<F>(build: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> Result<(), BuildError> + 'static,
    {
        FnTarget {
            build: Box::new(build),
            description: None,
            outputs: None,
            run: None,
            test: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<Path>) -> Self {
        self.outputs = Some(outputs);
        self
    }

    /// Make the target runnable; the command receives run arguments appended.
    pub fn with_run(mut self, command: impl Into<String>) -> Self {
        self.run = Some(command.into());
        self
    }

    /// Make the target testable; the command receives test arguments appended.
    pub fn with_test(mut self, command: impl Into<String>) -> Self {
        self.test = Some(command.into());
        self
    }
}

fn with_args(command: &str, args: &[String]) -> String {
    std::iter::once(command.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

impl Build for FnTarget {
    fn build(&self, ctx: &mut Context<'_>) -> Result<(), BuildError> {
        (self.build)(ctx)
    }

    fn description(&self) -> Option<String> {
        self.description.clone()
    }

    fn outputs(&self) -> Option<Vec<Path>> {
        self.outputs.clone()
    }

    fn as_run(&self) -> Option<&dyn Run> {
        self.run.as_ref().map(|_| self as &dyn Run)
    }

    fn as_test(&self) -> Option<&dyn Test> {
        self.test.as_ref().map(|_| self as &dyn Test)
    }
}

impl Run for FnTarget {
    fn run_command(&self, _ctx: &Context<'_>, args: &[String]) -> Result<String, BuildError> {
        let command = self
            .run
            .as_deref()
            .ok_or_else(|| BuildError::target("target is not runnable"))?;
        Ok(with_args(command, args))
    }
}

impl Test for FnTarget {
    fn test_command(&self, _ctx: &Context<'_>, args: &[String]) -> Result<String, BuildError> {
        let command = self
            .test
            .as_deref()
            .ok_or_else(|| BuildError::target("target is not testable"))?;
        Ok(with_args(command, args))
    }
}
