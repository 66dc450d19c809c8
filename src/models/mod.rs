pub mod action;
pub mod session;

pub use action::{ActionKind, Direction, Point, RecordedAction, TapTarget};
pub use session::{CaptureMode, Platform, RecordingSession, SessionStatus};
