//! Structured logging for the orchestration core.
//!
//! One `tracing` event/span per activity and workflow transition, not
//! `println!`. Follows the host's split of a compact console layer plus a
//! rolling JSON-lines file layer.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Engine,
    Worker,
    Scheduler,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Engine => "engine",
            ProcessKind::Worker => "worker",
            ProcessKind::Scheduler => "scheduler",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub process: String,
    pub logs_dir: String,
    pub initialized_at: DateTime<Utc>,
}

/// One structured field set for a lifecycle event. `component` names the
/// module (e.g. `"budget.admit"`, `"workflow.dag"`); `status` is a short
/// machine-checkable tag.
#[derive(Debug, Clone, Default)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub workflow_id: Option<&'a str>,
    pub task_id: Option<&'a str>,
    pub agent_id: Option<&'a str>,
    pub model: Option<&'a str>,
    pub status: Option<&'a str>,
    pub detail: Option<&'a str>,
}

pub fn emit_event(level: Level, process: ProcessKind, event: ObservabilityEvent<'_>) {
    macro_rules! log_at {
        ($macro_name:ident) => {
            tracing::$macro_name!(
                target: "orchestra.obs",
                process = process.as_str(),
                component = event.component,
                event = event.event,
                workflow_id = event.workflow_id.unwrap_or(""),
                task_id = event.task_id.unwrap_or(""),
                agent_id = event.agent_id.unwrap_or(""),
                model = event.model.unwrap_or(""),
                status = event.status.unwrap_or(""),
                detail = event.detail.unwrap_or(""),
                "observability_event"
            )
        };
    }
    match level {
        Level::ERROR => log_at!(error),
        Level::WARN => log_at!(warn),
        Level::DEBUG => log_at!(debug),
        Level::TRACE => log_at!(trace),
        Level::INFO => log_at!(info),
    }
}

/// Initializes a compact console layer plus a daily-rotated JSON file layer
/// under `logs_dir`. Returns a guard that must be held for the process
/// lifetime (dropping it stops the background flush).
pub fn init_process_logging(
    process: ProcessKind,
    logs_dir: &Path,
) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
    fs::create_dir_all(logs_dir)?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(format!("orchestra.{}", process.as_str()))
        .filename_suffix("jsonl")
        .build(logs_dir)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false);

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(true)
        .with_ansi(true);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    Ok((
        guard,
        LoggingInitInfo {
            process: process.as_str().to_string(),
            logs_dir: logs_dir.display().to_string(),
            initialized_at: Utc::now(),
        },
    ))
}

pub fn canonical_logs_dir_from_root(root: &Path) -> PathBuf {
    root.join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_logs_dir_joins_logs_folder() {
        let root = PathBuf::from("/tmp/orchestra-root");
        assert_eq!(
            canonical_logs_dir_from_root(&root),
            PathBuf::from("/tmp/orchestra-root").join("logs")
        );
    }

    #[test]
    fn emit_event_does_not_panic_without_subscriber() {
        emit_event(
            Level::INFO,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "test",
                component: "test.component",
                ..Default::default()
            },
        );
    }
}
