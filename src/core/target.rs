//! Targets - what gets built.
//!
//! A target is any value implementing [`Build`]. Runnable, testable and
//! report targets additionally expose [`Run`], [`Test`] and [`Report`]
//! through the `as_run`, `as_test` and `as_report` probes, so capability
//! detection needs no downcasting.

use std::collections::BTreeMap;

use crate::builder::context::Context;
use crate::builder::errors::{BuildError, GraphError};
use crate::core::path::{dirname, Path};

/// Contract of every target.
pub trait Build {
    /// Emit the build steps of this target into the context.
    fn build(&self, ctx: &mut Context<'_>) -> Result<(), BuildError>;

    /// One-line description shown when listing targets.
    fn description(&self) -> Option<String> {
        None
    }

    /// Explicit outputs to print after the target is built.
    ///
    /// When `None`, the target's frontier is printed instead.
    fn outputs(&self) -> Option<Vec<Path>> {
        None
    }

    fn as_run(&self) -> Option<&dyn Run> {
        None
    }

    fn as_test(&self) -> Option<&dyn Test> {
        None
    }

    fn as_report(&self) -> Option<&dyn Report> {
        None
    }
}

/// A target that can be run after it is built.
pub trait Run {
    /// Shell command running the target with the given arguments.
    fn run_command(&self, ctx: &Context<'_>, args: &[String]) -> Result<String, BuildError>;
}

/// A target that can be tested after it is built.
pub trait Test {
    /// Shell command testing the target with the given arguments.
    fn test_command(&self, ctx: &Context<'_>, args: &[String]) -> Result<String, BuildError>;
}

/// Top-level targets, keyed by name.
///
/// Iteration is in lexicographic name order.
#[derive(Default)]
pub struct TargetSet {
    targets: BTreeMap<String, Box<dyn Build>>,
}

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target. Names must be unique.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        target: impl Build + 'static,
    ) -> Result<(), GraphError> {
        self.insert_boxed(name.into(), Box::new(target))
    }

    pub fn insert_boxed(&mut self, name: String, target: Box<dyn Build>) -> Result<(), GraphError> {
        if self.targets.contains_key(&name) {
            return Err(GraphError::DuplicateTarget { name });
        }
        self.targets.insert(name, target);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Build> {
        self.targets.get(name).map(|t| t.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Build)> {
        self.targets.iter().map(|(n, t)| (n.as_str(), t.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// A target summarizing the other targets of a run.
///
/// Report targets are selected only by a pattern equal to their name, and
/// are processed only when selected. The target returned by
/// [`Report::report`] is then built in their place.
pub trait Report {
    /// Target to build given every target and the names of the selected ones.
    fn report(
        &self,
        targets: &TargetSet,
        selected: &[String],
    ) -> Result<Box<dyn Build>, BuildError>;
}

/// A report aggregating every selected target that is not itself a report.
#[derive(Debug, Clone, Default)]
pub struct SelectionReport {
    pub description: Option<String>,
}

impl SelectionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Build for SelectionReport {
    fn build(&self, _ctx: &mut Context<'_>) -> Result<(), BuildError> {
        Ok(())
    }

    fn description(&self) -> Option<String> {
        self.description.clone()
    }

    fn as_report(&self) -> Option<&dyn Report> {
        Some(self)
    }
}

impl Report for SelectionReport {
    fn report(
        &self,
        targets: &TargetSet,
        selected: &[String],
    ) -> Result<Box<dyn Build>, BuildError> {
        let members = selected
            .iter()
            .filter(|name| targets.get(name).is_some_and(|t| t.as_report().is_none()));
        let mut group = TargetGroup::new(members.cloned());
        group.description = self.description.clone();
        Ok(Box::new(group))
    }
}

/// A target that only aggregates other top-level targets.
#[derive(Debug, Clone, Default)]
pub struct TargetGroup {
    pub targets: Vec<String>,
    pub description: Option<String>,
}

impl TargetGroup {
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TargetGroup {
            targets: targets.into_iter().map(Into::into).collect(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Build for TargetGroup {
    fn build(&self, ctx: &mut Context<'_>) -> Result<(), BuildError> {
        for target in &self.targets {
            ctx.add_target_dependency(target)?;
        }
        Ok(())
    }

    fn description(&self) -> Option<String> {
        self.description.clone()
    }
}

/// Whether a target is exported: the last `/` component of its name starts
/// with an upper-case letter.
pub fn is_exported(name: &str) -> bool {
    let base = name.rsplit('/').next().unwrap_or(name);
    base.chars().next().is_some_and(char::is_uppercase)
}

/// Relative directory of a target (`pkg/sub` for `pkg/sub/Foo`).
pub fn target_dir(name: &str) -> &str {
    dirname(name)
}
