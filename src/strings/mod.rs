//! # Strings Layer
//!
//! User- and model-facing text: prompt templates and formatting helpers.

pub mod prompts;
