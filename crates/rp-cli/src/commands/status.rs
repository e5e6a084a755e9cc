//! Status command for showing configuration and marker log statistics.

use std::collections::BTreeSet;
use std::io::Write;

use anyhow::Result;

use rp_core::report_log;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<()> {
    writeln!(writer, "RecPilot status")?;
    writeln!(writer, "Marker log: {}", config.report_path.display())?;
    writeln!(writer, "Exports: {}", config.exports_dir.display())?;
    match &config.recording_dir {
        Some(dir) if dir.is_dir() => writeln!(writer, "Recording directory: {}", dir.display())?,
        Some(dir) => writeln!(writer, "Recording directory: {} (missing, monitoring disabled)", dir.display())?,
        None => writeln!(writer, "Recording directory: not configured (monitoring disabled)")?,
    }
    writeln!(writer, "Timezone: UTC{}", config.zone())?;

    if !config.report_path.exists() {
        writeln!(writer, "No markers logged.")?;
        return Ok(());
    }

    let rows = report_log::read_rows(&config.report_path)?;
    if rows.is_empty() {
        writeln!(writer, "No markers logged.")?;
        return Ok(());
    }

    let sessions: BTreeSet<(&str, &str)> = rows
        .iter()
        .map(|row| (row.group_id.as_str(), row.session_label.as_str()))
        .collect();
    let legacy = rows.iter().any(|row| row.take_label.is_none());

    writeln!(writer, "Markers: {}", rows.len())?;
    writeln!(writer, "Sessions:")?;
    for (group, session) in sessions {
        let count = rows
            .iter()
            .filter(|row| row.group_id == group && row.session_label == session)
            .count();
        writeln!(writer, "- {group}/{session}: {count}")?;
    }
    if legacy {
        writeln!(writer, "Marker log predates take tracking; run `recpilot migrate`.")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use insta::assert_snapshot;

    use super::*;

    #[test]
    fn test_status_command_summarises_marker_log() {
        let temp = tempfile::tempdir().unwrap();
        let report_path = temp.path().join("report.csv");
        fs::write(
            &report_path,
            "timestamp,group,session,take,timecode,content,category\r\n\
             2024/05/01 10:00:00,G1,S1,1,00:00:01,a,Note\r\n\
             2024/05/01 10:00:05,G1,S1,1,00:00:06,b,Note\r\n\
             2024/05/01 11:00:00,G2,S1,2,00:01:00,c,Highlight\r\n",
        )
        .unwrap();
        let config = Config {
            recording_dir: Some(temp.path().join("zoom")),
            report_path,
            exports_dir: temp.path().join("exports"),
            utc_offset_minutes: Some(540),
        };

        let mut output = Vec::new();
        run(&mut output, &config).unwrap();

        let output = String::from_utf8(output).unwrap();
        let output = output.replace(&temp.path().display().to_string(), "[TEMP]");
        assert_snapshot!(output, @r"
        RecPilot status
        Marker log: [TEMP]/report.csv
        Exports: [TEMP]/exports
        Recording directory: [TEMP]/zoom (missing, monitoring disabled)
        Timezone: UTC+09:00
        Markers: 3
        Sessions:
        - G1/S1: 2
        - G2/S1: 1
        ");
    }

    #[test]
    fn test_status_command_without_log() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config {
            recording_dir: None,
            report_path: temp.path().join("report.csv"),
            exports_dir: temp.path().join("exports"),
            utc_offset_minutes: Some(0),
        };

        let mut output = Vec::new();
        run(&mut output, &config).unwrap();
        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("not configured"));
        assert!(output.ends_with("No markers logged.\n"));
    }
}
