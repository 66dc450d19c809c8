pub mod controller;
pub mod loop_worker;
pub mod phash;
pub mod scheduler;

pub use controller::ScreenshotPoller;
pub use loop_worker::{capture_action_screenshot, screenshot_loop, CaptureTarget};
pub use scheduler::{CaptureBackoff, FrameDecision};
