use serde::Serialize;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::CaptureSupervisor;
use crate::models::RecordingSession;
use crate::sensing::CaptureTarget;
use crate::store::{write_flow, write_session_metadata, SnapshotStore};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RecorderStatus {
    Idle,
    Recording,
    Stopping,
    Recoverable,
}

/// Screenshot of an action that finished after its session left the slot.
pub(crate) type LateScreenshot = Option<(String, PathBuf)>;

/// A session attached to running capture.
pub(crate) struct LiveSession {
    pub session: RecordingSession,
    pub supervisor: CaptureSupervisor,
    pub target: CaptureTarget,
    pub pump: JoinHandle<()>,
    pub pump_cancel: CancellationToken,
    pub pending_captures: Vec<JoinHandle<LateScreenshot>>,
    /// The flow text we last wrote, to tell native output apart from ours.
    pub last_written_flow: Option<String>,
}

impl LiveSession {
    /// Mirror the session to disk. Failures only cost durability.
    pub fn persist(&mut self, snapshots: &SnapshotStore) {
        if let Some(flow) = persist_session(&self.session, snapshots) {
            self.last_written_flow = Some(flow);
        }
    }
}

/// The one session the process owns.
pub(crate) enum SessionSlot {
    Idle,
    Live(Box<LiveSession>),
    /// Taken out for winding down; holds the session id until it is final.
    Stopping(String),
    /// Loaded from the pending snapshot; capture handles are gone.
    Recoverable(RecordingSession),
}

impl SessionSlot {
    pub fn status(&self) -> RecorderStatus {
        match self {
            SessionSlot::Idle => RecorderStatus::Idle,
            SessionSlot::Live(_) => RecorderStatus::Recording,
            SessionSlot::Stopping(_) => RecorderStatus::Stopping,
            SessionSlot::Recoverable(_) => RecorderStatus::Recoverable,
        }
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        match self {
            SessionSlot::Idle | SessionSlot::Stopping(_) => None,
            SessionSlot::Live(live) => Some(&live.session),
            SessionSlot::Recoverable(session) => Some(session),
        }
    }

    pub fn take(&mut self) -> SessionSlot {
        std::mem::replace(self, SessionSlot::Idle)
    }
}

/// Rewrite flow file, `session.json` and the pending snapshot. Returns the
/// flow text when the flow file was written.
pub(crate) fn persist_session(
    session: &RecordingSession,
    snapshots: &SnapshotStore,
) -> Option<String> {
    let flow = match write_flow(session) {
        Ok(flow) => Some(flow),
        Err(err) => {
            log_warn!("failed to write flow for session {}: {err:#}", session.id);
            None
        }
    };
    if let Err(err) = write_session_metadata(session) {
        log_warn!("failed to write metadata for session {}: {err:#}", session.id);
    }
    if let Err(err) = snapshots.save(session) {
        log_warn!("failed to write session snapshot: {err:#}");
    }
    flow
}
