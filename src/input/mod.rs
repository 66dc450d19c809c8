pub mod interpreter;
pub mod listener;

pub use interpreter::{AxisRanges, EventInterpreter, Gesture, ScreenSize};
pub use listener::spawn_event_listener;
