pub mod controller;
pub mod error;
pub mod state;

pub use controller::{RecordingController, StartRequest, StoppedRecording};
pub use error::RecordingError;
pub use state::RecorderStatus;
