//! Build graph errors.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::core::flags::FlagError;

/// Inconsistency detected while constructing the build graph.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error(
        "incompatible redefinition of output `{output}`: first defined at {}, redefined at {}",
        first.join(" // "),
        second.join(" // ")
    )]
    #[diagnostic(
        code(dagen::graph::redefinition),
        help("Two different steps produce this output; give one of them another path")
    )]
    IncompatibleRedefinition {
        output: String,
        first: Vec<String>,
        second: Vec<String>,
    },

    #[error("rule `{name}` redefined with a different recipe")]
    #[diagnostic(code(dagen::graph::rule_conflict))]
    RuleConflict { name: String },

    #[error("invalid build step: {reason}")]
    #[diagnostic(code(dagen::graph::invalid_step))]
    InvalidStep { reason: String },

    #[error("unknown target `{name}`")]
    #[diagnostic(
        code(dagen::graph::unknown_target),
        help("Run `dagen targets` to see available targets")
    )]
    UnknownTarget { name: String },

    #[error("multiple targets with name `{name}`")]
    #[diagnostic(code(dagen::graph::duplicate_target))]
    DuplicateTarget { name: String },
}

impl GraphError {
    pub(crate) fn invalid_step(reason: impl Into<String>) -> Self {
        GraphError::InvalidStep {
            reason: reason.into(),
        }
    }
}

/// Error returned by [`Build::build`](crate::core::target::Build::build) and
/// the context operations it calls.
#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Flag(#[from] FlagError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error("failed to write {}: {source}", path.display())]
    #[diagnostic(code(dagen::build::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure reported by a target implementation.
    #[error("{0}")]
    #[diagnostic(code(dagen::build::target))]
    Target(String),
}

impl BuildError {
    pub fn target(msg: impl Into<String>) -> Self {
        BuildError::Target(msg.into())
    }
}
