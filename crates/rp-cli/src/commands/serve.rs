//! The session control loop.
//!
//! Reads one JSON request per line from the input and answers each with one
//! JSON line. Every response carries `success`; failures add `error` and the
//! loop keeps going.

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use rp_core::final_export::parse_epoch_millis;
use rp_core::markers::{created_at_label, timestamp_label};
use rp_core::report_log::{self, MISSING_TIMECODE};
use rp_core::{
    FinishedTake, MarkerExport, MarkerTable, OffsetReconciler, OffsetStatus, RecordingMonitor,
    ReportRow, SessionKey, sanitize_component,
};

use crate::Config;

/// Take labels accepted by the per-take export.
const EXPORTABLE_TAKES: [&str; 3] = ["1", "2", "3"];

/// A control request, tagged by `command`.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Request {
    Start(StartRequest),
    Offset(OffsetRequest),
    Status,
    Mark(MarkRequest),
    Export(ExportRequest),
    ExportSummary(SummaryRequest),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartRequest {
    pub group_id: String,
    pub session: String,
    /// Epoch milliseconds on the control clock.
    pub start_timestamp: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OffsetRequest {
    pub manual_offset_seconds: Option<Value>,
    pub clear: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarkRequest {
    pub group_id: String,
    pub session: String,
    pub take: Option<Value>,
    pub timecode: String,
    pub content: String,
    pub category: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportRequest {
    pub group_id: String,
    pub session: String,
    pub take: Option<Value>,
    pub summary: String,
    pub director: String,
    pub participants: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SummaryRequest {
    pub group_id: String,
    pub session: String,
    pub director: String,
    pub participants: Vec<String>,
    pub finished_takes: Vec<FinishedTake>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusView<'a> {
    #[serde(flatten)]
    status: &'a OffsetStatus,
    monitoring_path: Option<&'a Path>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportView<'a> {
    success: bool,
    filename: &'a str,
    saved_path: &'a Path,
    rows: usize,
    offset_seconds: f64,
    offset_source: rp_core::OffsetSource,
    recpilot_start_timestamp: &'a str,
    zoom_recording_timestamp: &'a str,
}

/// A logged marker as echoed back to the client.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkedRowView<'a> {
    timestamp: &'a str,
    group_id: &'a str,
    session: &'a str,
    take: &'a str,
    timecode: &'a str,
    content: &'a str,
    category: &'a str,
}

impl<'a> From<&'a ReportRow> for MarkedRowView<'a> {
    fn from(row: &'a ReportRow) -> Self {
        Self {
            timestamp: &row.timestamp,
            group_id: &row.group_id,
            session: &row.session_label,
            take: row.take_label.as_deref().unwrap_or(""),
            timecode: &row.timecode,
            content: &row.content,
            category: &row.category,
        }
    }
}

/// Loose take label: a string or a number.
fn take_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Shared state behind the control loop.
#[derive(Debug)]
pub struct SessionService {
    config: Config,
    zone: FixedOffset,
    reconciler: Arc<OffsetReconciler>,
    monitor: RecordingMonitor,
}

impl SessionService {
    /// Prepares the marker log and exports directory and starts monitoring.
    pub fn new(config: Config) -> Result<Self> {
        report_log::migrate(&config.report_path).context("failed to prepare marker log")?;
        fs::create_dir_all(&config.exports_dir).with_context(|| {
            format!("failed to create exports directory {}", config.exports_dir.display())
        })?;

        let reconciler = Arc::new(OffsetReconciler::new());
        let monitor = RecordingMonitor::start(config.recording_dir.as_deref(), Arc::clone(&reconciler));
        Ok(Self {
            zone: config.zone(),
            config,
            reconciler,
            monitor,
        })
    }

    pub fn reconciler(&self) -> &OffsetReconciler {
        &self.reconciler
    }

    /// Answers one raw request line.
    pub fn handle_line(&self, line: &str) -> Value {
        let outcome = serde_json::from_str::<Request>(line)
            .map_err(|e| anyhow!("invalid request: {e}"))
            .and_then(|request| self.handle(request));
        match outcome {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "request failed");
                json!({ "success": false, "error": format!("{e:#}") })
            }
        }
    }

    pub fn handle(&self, request: Request) -> Result<Value> {
        match request {
            Request::Start(req) => self.start(req),
            Request::Offset(req) => self.offset(req),
            Request::Status => self.with_status(),
            Request::Mark(req) => self.mark(req),
            Request::Export(req) => self.export(req),
            Request::ExportSummary(req) => self.export_summary(req),
        }
    }

    fn status_view(&self) -> Result<Value> {
        let status = self.reconciler.status();
        let view = StatusView {
            status: &status,
            monitoring_path: self.monitor.watched_path(),
        };
        serde_json::to_value(view).context("failed to serialize status")
    }

    fn with_status(&self) -> Result<Value> {
        Ok(json!({ "success": true, "status": self.status_view()? }))
    }

    fn start(&self, req: StartRequest) -> Result<Value> {
        let key = SessionKey::new(req.group_id, req.session)?;
        let Some(raw) = req.start_timestamp else {
            bail!("startTimestamp is required");
        };
        let start_time = parse_epoch_millis(&raw).context("invalid startTimestamp")?;
        self.reconciler.start_session(key, start_time);
        self.with_status()
    }

    fn offset(&self, req: OffsetRequest) -> Result<Value> {
        if req.clear {
            self.reconciler.set_manual_offset(None);
            return self.with_status();
        }
        let Some(raw) = req.manual_offset_seconds else {
            bail!("manualOffsetSeconds is required unless clearing");
        };
        let seconds = number(&raw).context("manualOffsetSeconds must be a number")?;
        self.reconciler.set_manual_offset(Some(seconds));
        self.with_status()
    }

    fn mark(&self, req: MarkRequest) -> Result<Value> {
        let key = SessionKey::new(req.group_id, req.session)?;
        let timecode = match req.timecode.trim() {
            "" => MISSING_TIMECODE.to_string(),
            tc => tc.to_string(),
        };
        let row = ReportRow {
            timestamp: created_at_label(Utc::now(), self.zone),
            group_id: key.group_id.to_string(),
            session_label: key.session_label.to_string(),
            take_label: Some(take_text(req.take.as_ref())),
            timecode,
            content: req.content.trim().to_string(),
            category: req.category.trim().to_string(),
        };
        report_log::append_row(&self.config.report_path, &row)?;
        tracing::debug!(%key, timecode = %row.timecode, "marker logged");
        Ok(json!({ "success": true, "row": MarkedRowView::from(&row) }))
    }

    /// Builds the shared export header from the live session.
    fn marker_export(&self, key: &SessionKey, director: &str, participants: Vec<String>) -> MarkerExport {
        let status = self.reconciler.status();
        MarkerExport {
            group_id: key.group_id.to_string(),
            session_label: key.session_label.to_string(),
            director: director.trim().to_string(),
            participants,
            offset: status.applied(),
            start_label: timestamp_label(status.start_time, self.zone),
            recording_label: timestamp_label(status.last_recording_timestamp, self.zone),
            created_at: created_at_label(Utc::now(), self.zone),
            ..MarkerExport::default()
        }
    }

    fn save(&self, filename: &str, table: &MarkerTable, export: &MarkerExport) -> Result<Value> {
        let path: PathBuf = self.config.exports_dir.join(filename);
        fs::write(&path, &table.bytes).with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), rows = table.row_count, "marker table exported");

        let view = ExportView {
            success: true,
            filename,
            saved_path: &path,
            rows: table.row_count,
            offset_seconds: export.offset.seconds,
            offset_source: export.offset.source,
            recpilot_start_timestamp: &export.start_label,
            zoom_recording_timestamp: &export.recording_label,
        };
        serde_json::to_value(view).context("failed to serialize export result")
    }

    fn export(&self, req: ExportRequest) -> Result<Value> {
        let key = SessionKey::new(req.group_id, req.session)?;
        let take = match take_text(req.take.as_ref()) {
            t if t.is_empty() => "1".to_string(),
            t => t,
        };
        if !EXPORTABLE_TAKES.contains(&take.as_str()) {
            bail!("take must be 1, 2 or 3");
        }

        let rows = report_log::read_rows(&self.config.report_path)?;
        let export = MarkerExport {
            take_label: take.clone(),
            summary: req.summary,
            ..self.marker_export(&key, &req.director, req.participants)
        };
        let table = export.generate(&rows).context("failed to render marker table")?;
        let filename = format!(
            "{}_{}_take{take}.csv",
            sanitize_component(key.group_id.as_str()),
            sanitize_component(key.session_label.as_str()),
        );
        self.save(&filename, &table, &export)
    }

    fn export_summary(&self, req: SummaryRequest) -> Result<Value> {
        let key = SessionKey::new(req.group_id, req.session)?;
        let rows = report_log::read_rows(&self.config.report_path)?;
        let export = self.marker_export(&key, &req.director, req.participants);
        let table = export
            .generate_session_summary(&req.finished_takes, &rows)
            .context("failed to render session summary")?;
        let filename = format!(
            "{}_{}_summary.csv",
            sanitize_component(key.group_id.as_str()),
            sanitize_component(key.session_label.as_str()),
        );
        self.save(&filename, &table, &export)
    }

    /// Stops the recording monitor.
    pub fn shutdown(&mut self) {
        self.monitor.stop();
    }
}

/// Serves requests from `input` until it is exhausted.
pub fn run<R: BufRead, W: Write>(service: &SessionService, input: R, output: &mut W) -> Result<()> {
    tracing::info!("session control loop started");
    for line in input.lines() {
        let line = line.context("failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = service.handle_line(&line);
        serde_json::to_writer(&mut *output, &response).context("failed to write response")?;
        writeln!(output)?;
        output.flush()?;
    }
    tracing::info!("session control loop finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use insta::assert_snapshot;
    use tempfile::TempDir;

    use super::*;

    fn service(temp: &TempDir) -> SessionService {
        SessionService::new(Config {
            recording_dir: None,
            report_path: temp.path().join("report.csv"),
            exports_dir: temp.path().join("exports"),
            utc_offset_minutes: Some(0),
        })
        .unwrap()
    }

    fn call(service: &SessionService, request: &Value) -> Value {
        service.handle_line(&request.to_string())
    }

    #[test]
    fn test_start_then_manual_offset_then_clear() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        let started = call(
            &service,
            &json!({ "command": "start", "groupId": "G1", "session": "S1", "startTimestamp": 1_714_557_600_000_i64 }),
        );
        assert_eq!(started["success"], true);
        assert_eq!(started["status"]["startTime"], "2024-05-01T10:00:00Z");
        assert_eq!(started["status"]["offsetSource"], "none");

        let set = call(&service, &json!({ "command": "offset", "manualOffsetSeconds": "-1.5" }));
        assert_eq!(set["status"]["effectiveOffsetSeconds"], -1.5);
        assert_eq!(set["status"]["offsetSource"], "manual");

        let cleared = call(&service, &json!({ "command": "offset", "clear": true }));
        assert_eq!(cleared["status"]["effectiveOffsetSeconds"], 0.0);
        assert_eq!(cleared["status"]["manualOffsetSeconds"], Value::Null);
    }

    #[test]
    fn test_invalid_requests_report_errors() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        let cases = [
            json!({ "command": "start", "groupId": " ", "session": "S1", "startTimestamp": 0 }),
            json!({ "command": "start", "groupId": "G1", "session": "S1" }),
            json!({ "command": "start", "groupId": "G1", "session": "S1", "startTimestamp": "soon" }),
            json!({ "command": "offset" }),
            json!({ "command": "offset", "manualOffsetSeconds": "abc" }),
            json!({ "command": "export", "groupId": "G1", "session": "S1", "take": 4 }),
            json!({ "command": "dance" }),
        ];
        for case in &cases {
            let response = call(&service, case);
            assert_eq!(response["success"], false, "{case}");
            assert!(response["error"].is_string());
        }
        assert_eq!(service.handle_line("not json")["success"], false);
    }

    #[test]
    fn test_status_includes_monitoring_path() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let status = call(&service, &json!({ "command": "status" }));

        assert_snapshot!(serde_json::to_string_pretty(&status).unwrap(), @r#"
        {
          "status": {
            "autoOffsetSeconds": null,
            "effectiveOffsetSeconds": 0.0,
            "groupId": null,
            "lastRecordingFile": null,
            "lastRecordingTimestamp": null,
            "manualOffsetSeconds": null,
            "monitoringPath": null,
            "offsetSource": "none",
            "session": null,
            "startTime": null
          },
          "success": true
        }
        "#);
    }

    #[test]
    fn test_marks_are_exported_with_the_live_offset() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        call(
            &service,
            &json!({ "command": "start", "groupId": "G1", "session": "S1", "startTimestamp": 1_714_557_600_000_i64 }),
        );
        service.reconciler().register_recording_event(
            Path::new("/zoom/a.mp4"),
            chrono::DateTime::from_timestamp_millis(1_714_557_605_200).unwrap(),
        );
        let marked = call(
            &service,
            &json!({ "command": "mark", "groupId": "G1", "session": "S1", "take": 1, "timecode": "00:00:10", "content": "laugh", "category": "Highlight" }),
        );
        assert_eq!(
            marked["row"],
            json!({
                "timestamp": marked["row"]["timestamp"],
                "groupId": "G1",
                "session": "S1",
                "take": "1",
                "timecode": "00:00:10",
                "content": "laugh",
                "category": "Highlight",
            })
        );
        call(
            &service,
            &json!({ "command": "mark", "groupId": "G1", "session": "S1", "take": "2", "content": "no timecode" }),
        );

        let exported = call(
            &service,
            &json!({ "command": "export", "groupId": "G1", "session": "S1", "take": "1", "summary": "ok" }),
        );
        assert_eq!(exported["success"], true);
        assert_eq!(exported["filename"], "G1_S1_take1.csv");
        assert_eq!(exported["rows"], 1);
        assert_eq!(exported["offsetSource"], "auto");
        assert_eq!(exported["recpilotStartTimestamp"], "2024/05/01 10:00:00.000");
        assert_eq!(exported["zoomRecordingTimestamp"], "2024/05/01 10:00:05.200");

        let csv = fs::read_to_string(temp.path().join("exports").join("G1_S1_take1.csv")).unwrap();
        assert!(csv.contains("Session Summary,ok / Offset +5.200s (auto),"));
        assert!(csv.contains("Highlight,laugh,00:00:15.200,00:00:15.200,"));

        let summary = call(
            &service,
            &json!({ "command": "export-summary", "groupId": "G1", "session": "S1", "finishedTakes": [{ "take": "1", "summary": "ok" }] }),
        );
        assert_eq!(summary["filename"], "G1_S1_summary.csv");
        assert_eq!(summary["rows"], 2);

        let log = report_log::read_rows(&temp.path().join("report.csv")).unwrap();
        assert_eq!(log[1].timecode, MISSING_TIMECODE);
    }

    #[test]
    fn test_run_answers_each_line() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let input = Cursor::new("{\"command\":\"status\"}\n\n{\"command\":\"offset\",\"clear\":true}\n");
        let mut output = Vec::new();

        run(&service, input, &mut output).unwrap();

        let output = String::from_utf8(output).unwrap();
        let responses: Vec<Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(|r| r["success"] == true));
    }
}
