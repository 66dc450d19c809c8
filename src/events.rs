use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::models::{CaptureMode, RecordedAction};

const EVENT_CAPACITY: usize = 256;

/// Notifications for whoever drives the recorder (an API layer, the CLI).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RecorderEvent {
    SessionStarted {
        session_id: String,
        capture_mode: CaptureMode,
    },
    ActionRecorded {
        session_id: String,
        action: RecordedAction,
    },
    ScreenshotCaptured {
        session_id: String,
        path: PathBuf,
        /// Captured for an action rather than by periodic polling.
        forced: bool,
    },
    CaptureModeChanged {
        session_id: String,
        capture_mode: CaptureMode,
    },
    SessionStopped {
        session_id: String,
        action_count: usize,
    },
}

/// Fire-and-forget broadcaster; sending with no subscribers is not an error.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RecorderEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn emit(&self, event: RecorderEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
