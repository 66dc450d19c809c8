use thiserror::Error;

/// Recorder conditions callers are expected to tell apart; travels inside
/// `anyhow::Error`, recover it with `downcast_ref`.
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("recording already in progress (session {0})")]
    AlreadyRecording(String),
    #[error("no active recording session")]
    NoActiveSession,
    #[error("session {0} is still stopping")]
    Stopping(String),
    #[error("session {0} was recovered after a restart; only stop and export are possible")]
    RecoveredReadOnly(String),
    #[error("failed to set up session: {0}")]
    Setup(String),
}
