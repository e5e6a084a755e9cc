//! `RecPilot` CLI library.
//!
//! This crate provides the CLI interface and session control loop.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands};
pub use config::Config;
