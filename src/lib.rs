//! dagen - a Ninja build-graph generator
//!
//! This crate provides the core library functionality for dagen: typed
//! configuration flags, configuration-namespaced paths, the build engine
//! memoizing target steps, and the Ninja serializer.

pub mod builder;
pub mod core;
pub mod ops;
pub mod util;

/// Test utilities for dagen unit tests.
///
/// This module is only available when compiling with `--cfg test` or
/// running tests.
#[cfg(test)]
pub mod test_support;

pub use builder::{BuildError, Context};
pub use core::{Build, BuildStep, FlagRegistry, Manifest, TargetSet};
pub use util::context::GlobalContext;
