//! CLI subcommand implementations.

pub mod final_export;
pub mod migrate;
pub mod serve;
pub mod status;
