//! Capture strategy supervision: the native recorder subprocess, the manual
//! fallback and the gate serialising one-off tool invocations.

pub mod gate;
pub mod process;
pub mod supervisor;

pub use gate::ToolGate;
pub use process::{LifecycleEvent, ManagedProcess, ProcessEnd};
pub use supervisor::{
    native_tool_runnable, CaptureState, CaptureSupervisor, ShutdownReport, SupervisorChannels,
};
