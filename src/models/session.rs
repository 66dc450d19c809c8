use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::action::{ActionKind, RecordedAction};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            _ => Err(anyhow::anyhow!("unknown platform '{value}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CaptureMode {
    Native,
    Manual,
}

impl CaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMode::Native => "native",
            CaptureMode::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Recording,
    Stopped,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Recording => "recording",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub id: String,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub device_id: String,
    pub device_name: String,
    pub platform: Platform,
    pub app_id: Option<String>,
    pub actions: Vec<RecordedAction>,
    pub session_dir: PathBuf,
    pub screenshots_dir: PathBuf,
    pub flow_path: Option<PathBuf>,
    pub video_path: Option<PathBuf>,
    pub capture_mode: CaptureMode,
    pub status: SessionStatus,
}

impl RecordingSession {
    pub fn metadata_path(&self) -> PathBuf {
        self.session_dir.join("session.json")
    }

    pub fn is_recording(&self) -> bool {
        self.status == SessionStatus::Recording
    }

    /// Append a new action with the next sequence id. A `launch` carrying an
    /// app id fills in the session's app id if it was still unknown.
    pub fn append_action(&mut self, kind: ActionKind) -> &RecordedAction {
        let kind = kind.normalized();
        let id = format!("act-{:04}", self.actions.len() + 1);

        if self.app_id.is_none() {
            if let ActionKind::Launch {
                app_id: Some(app_id),
            } = &kind
            {
                self.app_id = Some(app_id.clone());
            }
        }

        self.actions.push(RecordedAction::new(id, kind));
        let last = self.actions.len() - 1;
        &self.actions[last]
    }

    pub fn action_mut(&mut self, action_id: &str) -> Option<&mut RecordedAction> {
        self.actions.iter_mut().find(|action| action.id == action_id)
    }

    pub fn finish(&mut self, ended_at: DateTime<Utc>) {
        self.status = SessionStatus::Stopped;
        self.ended_at = Some(ended_at);
    }
}

#[cfg(test)]
pub(crate) fn sample_session(session_dir: &std::path::Path) -> RecordingSession {
    RecordingSession {
        id: "session-test".into(),
        name: "Checkout".into(),
        started_at: Utc::now(),
        ended_at: None,
        device_id: "emulator-5554".into(),
        device_name: "Pixel 7".into(),
        platform: Platform::Android,
        app_id: None,
        actions: Vec::new(),
        session_dir: session_dir.to_path_buf(),
        screenshots_dir: session_dir.join("screenshots"),
        flow_path: Some(session_dir.join("flow.yaml")),
        video_path: None,
        capture_mode: CaptureMode::Manual,
        status: SessionStatus::Recording,
    }
}
