//! # Infrastructure Layer
//!
//! Implementations touching the outside world: the workspace file tree,
//! sandboxed child processes, and the HTTP generation backend.

pub mod executor;
pub mod llm;
pub mod store;
