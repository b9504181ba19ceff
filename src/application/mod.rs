//! # Application Layer
//!
//! Core orchestration: the agent iteration loop and the action parser that
//! feeds it.

pub mod engine;
pub mod parsing;
