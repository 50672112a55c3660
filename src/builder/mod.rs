//! Build graph construction.
//!
//! This module implements the engine targets emit their steps into, the
//! memoized graph it builds and the Ninja serializer.

pub mod blob;
pub mod context;
pub mod errors;
pub mod graph;
pub mod ninja;

pub use blob::BlobStore;
pub use context::Context;
pub use errors::{BuildError, GraphError};
pub use graph::BuildGraph;
