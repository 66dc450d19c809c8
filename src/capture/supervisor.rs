use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{process::Command, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::device::{run_with_timeout, DeviceBridge};
use crate::input::{spawn_event_listener, EventInterpreter, Gesture};
use crate::models::{CaptureMode, RecordingSession};
use crate::sensing::{CaptureTarget, ScreenshotPoller};
use crate::settings::{NativeToolSettings, RecorderSettings};

use super::process::{LifecycleEvent, ManagedProcess, ProcessEnd};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Capture mode bookkeeping for one session.
///
/// `Native` can fall back to `Manual` exactly once and never returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureState {
    mode: CaptureMode,
    fallback_armed: bool,
    stopping: bool,
}

impl CaptureState {
    pub fn new(mode: CaptureMode) -> Self {
        Self {
            mode,
            fallback_armed: false,
            stopping: false,
        }
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn fallback_armed(&self) -> bool {
        self.fallback_armed
    }

    pub fn begin_stop(&mut self) {
        self.stopping = true;
    }

    /// The native recorder went away. True when the caller must start manual
    /// capture now.
    pub fn on_native_down(&mut self) -> bool {
        if self.stopping || self.fallback_armed || self.mode != CaptureMode::Native {
            return false;
        }
        self.fallback_armed = true;
        self.mode = CaptureMode::Manual;
        true
    }
}

/// Receivers the session pump drains.
pub struct SupervisorChannels {
    pub lifecycle: mpsc::UnboundedReceiver<LifecycleEvent>,
    pub gestures: mpsc::UnboundedReceiver<Gesture>,
}

#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub native: Option<ProcessEnd>,
    pub video_path: Option<PathBuf>,
}

struct ScreenRecording {
    process: ManagedProcess,
    remote_path: Option<String>,
    local_path: PathBuf,
}

struct EventListener {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Owns every capture resource of a live session: the native recorder or the
/// manual event listener, periodic screenshots and the screen recording.
pub struct CaptureSupervisor {
    state: CaptureState,
    device_id: String,
    bridge: Arc<dyn DeviceBridge>,
    settings: Arc<RecorderSettings>,
    native: Option<ManagedProcess>,
    listener: Option<EventListener>,
    screen_recording: Option<ScreenRecording>,
    poller: ScreenshotPoller,
    gesture_tx: mpsc::UnboundedSender<Gesture>,
}

impl CaptureSupervisor {
    /// Bring up capture for `session`. Nothing here is fatal: a native tool
    /// that cannot run leaves the session in manual mode.
    pub async fn start(
        session: &RecordingSession,
        target: CaptureTarget,
        settings: Arc<RecorderSettings>,
    ) -> (Self, SupervisorChannels) {
        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
        let (gesture_tx, gesture_rx) = mpsc::unbounded_channel();

        let native = match session.flow_path.as_deref() {
            Some(flow_path) if native_tool_runnable(&settings.native).await => {
                let command = native_record_command(&settings.native, flow_path, &session.device_id);
                match ManagedProcess::spawn(
                    "native recorder",
                    command,
                    Some(lifecycle_tx),
                    settings.stop_timeout(),
                ) {
                    Ok(process) => Some(process),
                    Err(err) => {
                        log_warn!("native recorder unavailable, using manual capture: {err:#}");
                        None
                    }
                }
            }
            _ => None,
        };

        let mode = if native.is_some() {
            CaptureMode::Native
        } else {
            CaptureMode::Manual
        };

        let mut supervisor = Self {
            state: CaptureState::new(mode),
            device_id: session.device_id.clone(),
            bridge: Arc::clone(&target.bridge),
            settings: Arc::clone(&settings),
            native,
            listener: None,
            screen_recording: None,
            poller: ScreenshotPoller::new(),
            gesture_tx,
        };

        if mode == CaptureMode::Manual {
            supervisor.start_event_listener().await;
        }

        if let Err(err) = supervisor
            .poller
            .start(target, settings.capture.clone())
        {
            log_warn!("periodic screenshots unavailable: {err:#}");
        }

        if settings.bridge.record_video {
            supervisor.start_screen_recording(&session.session_dir);
        }

        log_info!(
            "capture for session {} running in {} mode",
            session.id,
            mode.as_str()
        );

        (
            supervisor,
            SupervisorChannels {
                lifecycle: lifecycle_rx,
                gestures: gesture_rx,
            },
        )
    }

    pub fn mode(&self) -> CaptureMode {
        self.state.mode()
    }

    /// Whether anything is still capturing for this session.
    pub fn is_alive(&self) -> bool {
        let native = self.native.as_ref().map(ManagedProcess::is_alive);
        let listener = self
            .listener
            .as_ref()
            .map(|listener| !listener.handle.is_finished());
        native.unwrap_or(false) || listener.unwrap_or(false) || self.poller.is_running()
    }

    /// Apply one event from the lifecycle inbox. Returns the new mode when it
    /// changed.
    pub async fn handle_lifecycle(&mut self, event: LifecycleEvent) -> Option<CaptureMode> {
        match &event {
            LifecycleEvent::NativeExited { code } => {
                log_warn!("native recorder exited (code {:?})", code)
            }
            LifecycleEvent::NativeFailed { error } => {
                log_warn!("native recorder failed: {error}")
            }
        }

        if !self.state.on_native_down() {
            log_debug!("ignoring native lifecycle event, no fallback needed");
            return None;
        }

        log_info!("falling back to manual capture on {}", self.device_id);
        // The watcher has already finished; dropping is enough.
        self.native = None;
        self.start_event_listener().await;
        Some(self.state.mode())
    }

    async fn start_event_listener(&mut self) {
        let Some(command) = self.bridge.event_stream_command(&self.device_id) else {
            log_info!(
                "{} exposes no raw input events, periodic screenshots only",
                self.bridge.platform().as_str()
            );
            return;
        };

        let mut interpreter = EventInterpreter::new(self.settings.gestures.clone());
        match self.bridge.touch_geometry(&self.device_id).await {
            Ok(Some((screen, axes))) => {
                interpreter = interpreter.with_scaling(screen, axes);
            }
            Ok(None) => log_debug!("no touch geometry, using raw coordinates"),
            Err(err) => log_warn!("touch geometry lookup failed: {err:#}"),
        }

        let cancel_token = CancellationToken::new();
        match spawn_event_listener(
            command,
            interpreter,
            self.gesture_tx.clone(),
            cancel_token.clone(),
        ) {
            Ok(handle) => {
                self.listener = Some(EventListener {
                    handle,
                    cancel_token,
                })
            }
            Err(err) => log_warn!("event listener unavailable: {err:#}"),
        }
    }

    fn start_screen_recording(&mut self, session_dir: &Path) {
        let Some(plan) = self.bridge.screen_record_plan(&self.device_id, session_dir) else {
            return;
        };

        match ManagedProcess::spawn(
            "screen recorder",
            plan.command,
            None,
            self.settings.stop_timeout(),
        ) {
            Ok(process) => {
                self.screen_recording = Some(ScreenRecording {
                    process,
                    remote_path: plan.remote_path,
                    local_path: plan.local_path,
                })
            }
            Err(err) => log_warn!("screen recording unavailable: {err:#}"),
        }
    }

    /// Stop everything. Native recorder and screen recorder are stopped
    /// concurrently; every wait is bounded.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        self.state.begin_stop();

        if let Some(listener) = self.listener.take() {
            listener.cancel_token.cancel();
            if let Err(err) = listener.handle.await {
                log_warn!("event listener failed to join: {err}");
            }
        }

        if let Err(err) = self.poller.stop().await {
            log_warn!("{err:#}");
        }

        let native = self.native.take();
        let recording = self.screen_recording.take();
        let (native, video_path) = tokio::join!(
            stop_native(native),
            self.finish_screen_recording(recording)
        );

        ShutdownReport { native, video_path }
    }

    async fn finish_screen_recording(&self, recording: Option<ScreenRecording>) -> Option<PathBuf> {
        let recording = recording?;
        let label = recording.process.label().to_string();
        if let Err(err) = recording.process.stop().await {
            log_warn!("{label}: {err:#}");
        }

        if let Some(remote) = recording.remote_path.as_deref() {
            let pull = self
                .bridge
                .pull_file(&self.device_id, remote, &recording.local_path);
            match tokio::time::timeout(self.settings.pull_timeout(), pull).await {
                Ok(Ok(())) => {
                    if let Err(err) = self.bridge.remove_remote_file(&self.device_id, remote).await {
                        log_debug!("could not remove {remote}: {err:#}");
                    }
                }
                Ok(Err(err)) => log_warn!("failed to pull screen recording: {err:#}"),
                Err(_) => log_warn!(
                    "pulling screen recording timed out after {}s",
                    self.settings.pull_timeout().as_secs()
                ),
            }
        }

        recording
            .local_path
            .exists()
            .then_some(recording.local_path)
    }
}

async fn stop_native(native: Option<ManagedProcess>) -> Option<ProcessEnd> {
    let native = native?;
    match native.stop().await {
        Ok(end) => {
            log_info!("native recorder finished: {:?}", end);
            Some(end)
        }
        Err(err) => {
            log_warn!("{err:#}");
            None
        }
    }
}

fn native_record_command(settings: &NativeToolSettings, flow_path: &Path, device_id: &str) -> Command {
    let mut command = Command::new(&settings.program);
    command.args(settings.render_record_args(flow_path, device_id));
    command
}

/// Whether the native tool is installed and answers its probe in time.
pub async fn native_tool_runnable(settings: &NativeToolSettings) -> bool {
    if !settings.enabled {
        return false;
    }

    let mut probe = Command::new(&settings.program);
    probe.args(&settings.probe_args);
    let timeout = Duration::from_secs(settings.probe_timeout_secs.max(1));

    match run_with_timeout(probe, timeout).await {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            log_info!(
                "native tool probe exited with {}, using manual capture",
                output.status
            );
            false
        }
        Err(err) => {
            log_info!("native tool not runnable: {err:#}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_falls_back_once() {
        let mut state = CaptureState::new(CaptureMode::Native);
        assert!(state.on_native_down());
        assert_eq!(state.mode(), CaptureMode::Manual);
        assert!(state.fallback_armed());

        for _ in 0..5 {
            assert!(!state.on_native_down());
            assert_eq!(state.mode(), CaptureMode::Manual);
        }
    }

    #[test]
    fn manual_start_never_falls_back() {
        let mut state = CaptureState::new(CaptureMode::Manual);
        assert!(!state.on_native_down());
        assert!(!state.fallback_armed());
    }

    #[test]
    fn exit_during_stop_is_not_a_fallback() {
        let mut state = CaptureState::new(CaptureMode::Native);
        state.begin_stop();
        assert!(!state.on_native_down());
        assert_eq!(state.mode(), CaptureMode::Native);
    }

    #[tokio::test]
    async fn disabled_tool_is_not_runnable() {
        let settings = NativeToolSettings {
            enabled: false,
            program: "sh".into(),
            probe_args: vec!["-c".into(), "exit 0".into()],
            ..NativeToolSettings::default()
        };
        assert!(!native_tool_runnable(&settings).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_follows_exit_status() {
        let ok = NativeToolSettings {
            program: "sh".into(),
            probe_args: vec!["-c".into(), "exit 0".into()],
            ..NativeToolSettings::default()
        };
        let failing = NativeToolSettings {
            probe_args: vec!["-c".into(), "exit 1".into()],
            ..ok.clone()
        };
        let missing = NativeToolSettings {
            program: "/nonexistent/flowcap-native-tool".into(),
            ..ok.clone()
        };

        assert!(native_tool_runnable(&ok).await);
        assert!(!native_tool_runnable(&failing).await);
        assert!(!native_tool_runnable(&missing).await);
    }
}
