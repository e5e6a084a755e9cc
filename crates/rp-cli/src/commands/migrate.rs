//! Implementation of the `recpilot migrate` command.

use std::io::Write;

use anyhow::{Context, Result};

use rp_core::Migration;
use rp_core::report_log;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<()> {
    let path = &config.report_path;
    let outcome = report_log::migrate(path)
        .with_context(|| format!("failed to migrate {}", path.display()))?;

    match outcome {
        Migration::Created => writeln!(writer, "Created marker log at {}", path.display())?,
        Migration::AlreadyCurrent => writeln!(writer, "Marker log is up to date: {}", path.display())?,
        Migration::Upgraded { rows } => {
            writeln!(writer, "Added take column to {rows} rows in {}", path.display())?;
        }
    }
    Ok(())
}
