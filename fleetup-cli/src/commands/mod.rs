//! CLI command implementations.

pub mod check;
pub mod common;
pub mod config;
pub mod daemon;
pub mod frequency;
pub mod queue;
pub mod status;
