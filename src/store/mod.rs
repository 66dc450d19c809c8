//! Durable mirrors of the recording session: the per-process pending snapshot
//! used for crash recovery, the per-session `session.json` and `flow.yaml`.
//!
//! Every write goes to a temp file first and is renamed into place, so a crash
//! mid-write leaves the previous version intact.

pub mod snapshot;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::flow::generate_session_flow;
use crate::models::{CaptureMode, Platform, RecordingSession, SessionStatus};

pub use snapshot::SnapshotStore;

pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    fs::write(&temp_path, contents)
        .with_context(|| format!("failed to write {}", temp_path.display()))?;
    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "failed to move {} to {}",
            temp_path.display(),
            path.display()
        )
    })
}

/// Rewrite `<session-dir>/session.json`.
pub fn write_session_metadata(session: &RecordingSession) -> Result<()> {
    let json = serde_json::to_vec_pretty(session).context("failed to serialize session")?;
    write_atomic(&session.metadata_path(), &json)
}

/// Regenerate the session's flow file from its actions; returns the script.
pub fn write_flow(session: &RecordingSession) -> Result<String> {
    let flow = generate_session_flow(session);
    if let Some(path) = session.flow_path.as_deref() {
        write_atomic(path, flow.as_bytes())?;
    }
    Ok(flow)
}

pub fn read_session_metadata(path: &Path) -> Result<RecordingSession> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

/// A recorded session as a listing would show it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub platform: Platform,
    pub device_name: String,
    pub app_id: Option<String>,
    pub action_count: usize,
    pub capture_mode: CaptureMode,
    pub status: SessionStatus,
    pub session_dir: PathBuf,
}

impl From<&RecordingSession> for SessionSummary {
    fn from(session: &RecordingSession) -> Self {
        Self {
            id: session.id.clone(),
            name: session.name.clone(),
            started_at: session.started_at,
            ended_at: session.ended_at,
            platform: session.platform,
            device_name: session.device_name.clone(),
            app_id: session.app_id.clone(),
            action_count: session.actions.len(),
            capture_mode: session.capture_mode,
            status: session.status,
            session_dir: session.session_dir.clone(),
        }
    }
}

/// Every session under `sessions_dir` with a readable `session.json`, newest first.
pub fn list_sessions(sessions_dir: &Path) -> Result<Vec<SessionSummary>> {
    if !sessions_dir.exists() {
        return Ok(Vec::new());
    }

    let mut summaries = Vec::new();
    for entry in fs::read_dir(sessions_dir)
        .with_context(|| format!("failed to list {}", sessions_dir.display()))?
    {
        let entry = entry?;
        let metadata_path = entry.path().join("session.json");
        if !metadata_path.is_file() {
            continue;
        }
        match read_session_metadata(&metadata_path) {
            Ok(session) => summaries.push(SessionSummary::from(&session)),
            Err(err) => log::warn!("skipping unreadable session: {err:#}"),
        }
    }

    summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Ok(summaries)
}
