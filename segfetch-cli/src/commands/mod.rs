//! CLI command implementations.

pub mod config;
pub mod get;
pub mod list;
