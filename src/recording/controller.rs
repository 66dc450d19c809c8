use std::{fs, sync::Arc};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    capture::{CaptureSupervisor, LifecycleEvent, ProcessEnd, SupervisorChannels, ToolGate},
    device::{BridgeSet, DeviceInfo},
    events::{EventBus, RecorderEvent},
    flow::{generate_session_flow, parse_flow, reconcile},
    input::Gesture,
    models::{
        ActionKind, CaptureMode, Platform, RecordedAction, RecordingSession, SessionStatus,
    },
    sensing::{capture_action_screenshot, CaptureTarget},
    settings::RecorderSettings,
    store::{write_atomic, write_flow, write_session_metadata, SnapshotStore},
};

use super::{
    error::RecordingError,
    state::{LateScreenshot, LiveSession, RecorderStatus, SessionSlot},
};

const ENABLE_LOGS: bool = true;
const NATIVE_FLOW_COPY: &str = "native_flow.yaml";

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub platform: Platform,
    pub device_id: String,
    /// Looked up from the bridge when absent.
    pub device_name: Option<String>,
    pub name: Option<String>,
    pub app_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedRecording {
    pub session: RecordingSession,
    pub flow: String,
}

/// Handle to the process-wide recorder. Clones share the same session slot.
#[derive(Clone)]
pub struct RecordingController {
    slot: Arc<Mutex<SessionSlot>>,
    settings: Arc<RecorderSettings>,
    bridges: BridgeSet,
    events: EventBus,
    snapshots: SnapshotStore,
    gate: ToolGate,
}

impl RecordingController {
    pub fn new(settings: RecorderSettings, bridges: BridgeSet) -> Self {
        let snapshots = SnapshotStore::new(settings.snapshot_path());
        Self {
            slot: Arc::new(Mutex::new(SessionSlot::Idle)),
            settings: Arc::new(settings),
            bridges,
            events: EventBus::new(),
            snapshots,
            gate: ToolGate::new(),
        }
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> RecorderStatus {
        self.slot.lock().await.status()
    }

    pub async fn current_session(&self) -> Option<RecordingSession> {
        self.slot.lock().await.session().cloned()
    }

    pub async fn list_devices(&self) -> Vec<DeviceInfo> {
        self.bridges.list_all_devices().await
    }

    /// Load a session left behind by a crash. Only stop and export work on it.
    pub async fn recover_pending(&self) -> Result<Option<RecordingSession>> {
        let Some(session) = self.snapshots.load() else {
            return Ok(None);
        };

        if !session.is_recording() {
            log_info!("clearing snapshot of finished session {}", session.id);
            self.snapshots.clear()?;
            return Ok(None);
        }

        let mut slot = self.slot.lock().await;
        if !matches!(*slot, SessionSlot::Idle) {
            log_warn!(
                "not recovering session {}: a session is already loaded",
                session.id
            );
            return Ok(None);
        }

        log_warn!(
            "recovered interrupted session {} with {} actions",
            session.id,
            session.actions.len()
        );
        *slot = SessionSlot::Recoverable(session.clone());
        Ok(Some(session))
    }

    pub async fn start_recording(&self, request: StartRequest) -> Result<RecordingSession> {
        let mut slot = self.slot.lock().await;

        match slot.take() {
            SessionSlot::Idle => {}
            SessionSlot::Live(live) if live.supervisor.is_alive() => {
                let session_id = live.session.id.clone();
                *slot = SessionSlot::Live(live);
                return Err(RecordingError::AlreadyRecording(session_id).into());
            }
            SessionSlot::Live(live) => {
                log_warn!(
                    "discarding stale session {}: its capture is gone",
                    live.session.id
                );
                self.discard_live(*live).await;
            }
            SessionSlot::Stopping(session_id) => {
                *slot = SessionSlot::Stopping(session_id.clone());
                return Err(RecordingError::AlreadyRecording(session_id).into());
            }
            SessionSlot::Recoverable(session) => {
                log_warn!("discarding recovered session {} for a new one", session.id);
                self.discard_session(session);
            }
        }

        let mut session = self.create_session(request).await?;
        let bridge = self.bridges.for_platform(session.platform);
        let target = CaptureTarget {
            session_id: session.id.clone(),
            device_id: session.device_id.clone(),
            screenshots_dir: session.screenshots_dir.clone(),
            bridge,
            events: self.events.clone(),
        };

        let (supervisor, channels) =
            CaptureSupervisor::start(&session, target.clone(), Arc::clone(&self.settings)).await;
        session.capture_mode = supervisor.mode();
        if let Err(err) = write_session_metadata(&session) {
            log_warn!("failed to write metadata for session {}: {err:#}", session.id);
        }

        let pump_cancel = CancellationToken::new();
        let pump = tokio::spawn(run_pump(
            self.clone(),
            session.id.clone(),
            channels,
            pump_cancel.clone(),
        ));

        *slot = SessionSlot::Live(Box::new(LiveSession {
            session: session.clone(),
            supervisor,
            target,
            pump,
            pump_cancel,
            pending_captures: Vec::new(),
            last_written_flow: None,
        }));
        drop(slot);

        log_info!(
            "recording session {} on {} ({}) in {} mode",
            session.id,
            session.device_name,
            session.platform.as_str(),
            session.capture_mode.as_str()
        );
        self.events.emit(RecorderEvent::SessionStarted {
            session_id: session.id.clone(),
            capture_mode: session.capture_mode,
        });

        Ok(session)
    }

    async fn create_session(&self, request: StartRequest) -> Result<RecordingSession> {
        let started_at = Utc::now();
        let id = Uuid::new_v4().to_string();
        let session_dir = self.settings.sessions_dir().join(&id);
        let screenshots_dir = session_dir.join("screenshots");

        let device_name = match request.device_name {
            Some(name) => name,
            None => self.lookup_device_name(request.platform, &request.device_id).await,
        };

        let session = RecordingSession {
            name: request
                .name
                .unwrap_or_else(|| format!("Recording {}", started_at.format("%Y-%m-%d %H:%M:%S"))),
            started_at,
            ended_at: None,
            device_id: request.device_id,
            device_name,
            platform: request.platform,
            app_id: request.app_id,
            actions: Vec::new(),
            flow_path: Some(session_dir.join("flow.yaml")),
            video_path: None,
            capture_mode: CaptureMode::Manual,
            status: SessionStatus::Recording,
            screenshots_dir: screenshots_dir.clone(),
            session_dir: session_dir.clone(),
            id,
        };

        let setup = fs::create_dir_all(&screenshots_dir)
            .with_context(|| format!("failed to create {}", screenshots_dir.display()))
            .and_then(|_| write_session_metadata(&session));

        if let Err(err) = setup {
            if session_dir.exists() {
                if let Err(cleanup) = fs::remove_dir_all(&session_dir) {
                    log_warn!("failed to remove partial session dir: {cleanup}");
                }
            }
            return Err(RecordingError::Setup(format!("{err:#}")).into());
        }

        Ok(session)
    }

    async fn lookup_device_name(&self, platform: Platform, device_id: &str) -> String {
        match self.bridges.for_platform(platform).list_devices().await {
            Ok(devices) => devices
                .into_iter()
                .find(|device| device.id == device_id)
                .map(|device| device.name)
                .unwrap_or_else(|| device_id.to_string()),
            Err(err) => {
                log_debug!("device lookup failed: {err:#}");
                device_id.to_string()
            }
        }
    }

    /// Append an action to the live session, mirror it to disk and request
    /// its screenshot in the background.
    pub async fn record_action(&self, kind: ActionKind) -> Result<RecordedAction> {
        let (session_id, action) = {
            let mut slot = self.slot.lock().await;
            let live = match &mut *slot {
                SessionSlot::Live(live) => live,
                SessionSlot::Recoverable(session) => {
                    return Err(RecordingError::RecoveredReadOnly(session.id.clone()).into())
                }
                SessionSlot::Stopping(session_id) => {
                    return Err(RecordingError::Stopping(session_id.clone()).into())
                }
                SessionSlot::Idle => return Err(RecordingError::NoActiveSession.into()),
            };

            let action = live.session.append_action(kind).clone();
            live.persist(&self.snapshots);

            if action.kind.carries_screenshot() {
                let sequence = live.session.actions.len();
                live.pending_captures.retain(|handle| !handle.is_finished());
                let handle =
                    self.spawn_action_capture(live.target.clone(), action.id.clone(), sequence);
                live.pending_captures.push(handle);
            }

            (live.session.id.clone(), action)
        };

        log_debug!("recorded {} as {}", action.kind.label(), action.id);
        self.events.emit(RecorderEvent::ActionRecorded {
            session_id,
            action: action.clone(),
        });
        Ok(action)
    }

    fn spawn_action_capture(
        &self,
        target: CaptureTarget,
        action_id: String,
        sequence: usize,
    ) -> JoinHandle<LateScreenshot> {
        let slot = Arc::clone(&self.slot);
        let snapshots = self.snapshots.clone();
        let timeout = self.settings.capture_timeout();

        tokio::spawn(async move {
            let path = match capture_action_screenshot(&target, sequence, timeout).await {
                Ok(path) => path,
                Err(err) => {
                    log_warn!("screenshot for {action_id} failed: {err:#}");
                    return None;
                }
            };

            let mut guard = slot.lock().await;
            if let SessionSlot::Live(live) = &mut *guard {
                if live.session.id == target.session_id {
                    if let Some(action) = live.session.action_mut(&action_id) {
                        action.screenshot_path = Some(path);
                    }
                    live.persist(&snapshots);
                    return None;
                }
            }
            Some((action_id, path))
        })
    }

    /// Tap through the device bridge. Serialised with every other direct tool
    /// invocation; recorded when it lands on the device being recorded.
    pub async fn inject_tap(
        &self,
        platform: Platform,
        device_id: &str,
        x: i32,
        y: i32,
    ) -> Result<Option<RecordedAction>> {
        let bridge = self.bridges.for_platform(platform);
        self.gate.run(bridge.inject_tap(device_id, x, y)).await?;

        let recording_here = {
            let slot = self.slot.lock().await;
            matches!(&*slot, SessionSlot::Live(live) if live.session.device_id == device_id)
        };
        if !recording_here {
            return Ok(None);
        }

        self.record_action(ActionKind::tap_at(x, y)).await.map(Some)
    }

    pub async fn export_flow(&self) -> Result<String> {
        let slot = self.slot.lock().await;
        slot.session()
            .map(generate_session_flow)
            .ok_or_else(|| RecordingError::NoActiveSession.into())
    }

    /// Stop capture, fold in the native recorder's flow when there is one and
    /// finalise the session. Completes in bounded time even if a recorder hangs.
    ///
    /// The slot reads `Stopping` until the session is final, so no other
    /// session can start capture in the meantime.
    pub async fn stop_recording(&self) -> Result<StoppedRecording> {
        let taken = {
            let mut slot = self.slot.lock().await;
            let taken = slot.take();
            match &taken {
                SessionSlot::Idle => return Err(RecordingError::NoActiveSession.into()),
                SessionSlot::Stopping(session_id) => {
                    *slot = SessionSlot::Stopping(session_id.clone());
                    return Err(RecordingError::Stopping(session_id.clone()).into());
                }
                SessionSlot::Live(live) => {
                    *slot = SessionSlot::Stopping(live.session.id.clone());
                }
                SessionSlot::Recoverable(session) => {
                    *slot = SessionSlot::Stopping(session.id.clone());
                }
            }
            taken
        };

        let session = match taken {
            SessionSlot::Live(live) => self.wind_down(*live).await,
            SessionSlot::Recoverable(session) => {
                log_info!("finalising recovered session {}", session.id);
                session
            }
            SessionSlot::Idle | SessionSlot::Stopping(_) => {
                return Err(RecordingError::NoActiveSession.into())
            }
        };

        let stopped = self.finalize(session);
        self.release_stopping(&stopped.session.id).await;
        Ok(stopped)
    }

    async fn release_stopping(&self, session_id: &str) {
        let mut slot = self.slot.lock().await;
        if matches!(&*slot, SessionSlot::Stopping(id) if id == session_id) {
            *slot = SessionSlot::Idle;
        }
    }

    async fn wind_down(&self, live: LiveSession) -> RecordingSession {
        let LiveSession {
            mut session,
            mut supervisor,
            pump,
            pump_cancel,
            pending_captures,
            last_written_flow,
            ..
        } = live;

        pump_cancel.cancel();
        if let Err(err) = pump.await {
            log_warn!("session pump failed to join: {err}");
        }

        let report = supervisor.shutdown().await;
        if report.native == Some(ProcessEnd::Killed) {
            log_warn!(
                "native recorder for {} had to be killed; its flow may be incomplete",
                session.id
            );
        }
        if report.video_path.is_some() {
            session.video_path = report.video_path;
        }

        for handle in pending_captures {
            match handle.await {
                Ok(Some((action_id, path))) => {
                    if let Some(action) = session.action_mut(&action_id) {
                        action.screenshot_path = Some(path);
                    }
                }
                Ok(None) => {}
                Err(err) => log_warn!("screenshot task failed to join: {err}"),
            }
        }

        if session.capture_mode == CaptureMode::Native {
            self.merge_native_flow(&mut session, last_written_flow.as_deref());
        }

        session
    }

    /// The native recorder writes its own script to the flow path on exit.
    /// Its actions win; local screenshots are attached in order.
    fn merge_native_flow(&self, session: &mut RecordingSession, last_written: Option<&str>) {
        let Some(flow_path) = session.flow_path.clone() else {
            return;
        };

        let script = match fs::read_to_string(&flow_path) {
            Ok(script) => script,
            Err(err) => {
                log_warn!("native recorder left no readable flow: {err}");
                return;
            }
        };
        if script.trim().is_empty() || Some(script.as_str()) == last_written {
            log_info!("native recorder did not write a flow, keeping local actions");
            return;
        }

        let copy_path = session.session_dir.join(NATIVE_FLOW_COPY);
        if let Err(err) = write_atomic(&copy_path, script.as_bytes()) {
            log_warn!("failed to keep native flow copy: {err:#}");
        }

        let parsed = parse_flow(&script);
        log_info!(
            "merging {} native actions with {} local actions",
            parsed.actions.len(),
            session.actions.len()
        );
        if session.app_id.is_none() {
            session.app_id = parsed.app_id;
        }
        let local = std::mem::take(&mut session.actions);
        session.actions = reconcile(parsed.actions, local);
    }

    fn finalize(&self, mut session: RecordingSession) -> StoppedRecording {
        session.finish(Utc::now());

        let flow = write_flow(&session).unwrap_or_else(|err| {
            log_error!("failed to write final flow for {}: {err:#}", session.id);
            generate_session_flow(&session)
        });
        if let Err(err) = write_session_metadata(&session) {
            log_warn!("failed to write metadata for {}: {err:#}", session.id);
        }
        if let Err(err) = self.snapshots.clear_for(&session.id) {
            log_warn!("failed to clear session snapshot: {err:#}");
        }

        log_info!(
            "session {} stopped with {} actions",
            session.id,
            session.actions.len()
        );
        self.events.emit(RecorderEvent::SessionStopped {
            session_id: session.id.clone(),
            action_count: session.actions.len(),
        });

        StoppedRecording { session, flow }
    }

    /// Tear down a live session that is being replaced. Called with the slot
    /// locked, so nothing here may wait on the slot.
    async fn discard_live(&self, live: LiveSession) {
        live.pump_cancel.cancel();
        live.pump.abort();
        for handle in &live.pending_captures {
            handle.abort();
        }
        let mut supervisor = live.supervisor;
        supervisor.shutdown().await;
        self.discard_session(live.session);
    }

    fn discard_session(&self, mut session: RecordingSession) {
        session.status = SessionStatus::Error;
        session.ended_at = Some(Utc::now());
        if let Err(err) = write_session_metadata(&session) {
            log_warn!("failed to mark session {} as failed: {err:#}", session.id);
        }
        if let Err(err) = self.snapshots.clear_for(&session.id) {
            log_warn!("failed to clear session snapshot: {err:#}");
        }
    }

    async fn apply_lifecycle(&self, session_id: &str, event: LifecycleEvent) {
        let mut slot = self.slot.lock().await;
        let SessionSlot::Live(live) = &mut *slot else {
            return;
        };
        if live.session.id != session_id {
            return;
        }

        let Some(mode) = live.supervisor.handle_lifecycle(event).await else {
            return;
        };
        live.session.capture_mode = mode;
        if let Err(err) = write_session_metadata(&live.session) {
            log_warn!("failed to write metadata for session {session_id}: {err:#}");
        }
        if !live.session.actions.is_empty() {
            if let Err(err) = self.snapshots.save(&live.session) {
                log_warn!("failed to write session snapshot: {err:#}");
            }
        }
        drop(slot);

        self.events.emit(RecorderEvent::CaptureModeChanged {
            session_id: session_id.to_string(),
            capture_mode: mode,
        });
    }

    async fn record_gesture(&self, gesture: Gesture) {
        if let Err(err) = self.record_action(gesture.into_action()).await {
            log_debug!("dropping gesture: {err:#}");
        }
    }
}

/// Serialises lifecycle events and detected gestures with caller-driven
/// mutations of the session.
async fn run_pump(
    controller: RecordingController,
    session_id: String,
    channels: SupervisorChannels,
    cancel_token: CancellationToken,
) {
    let SupervisorChannels {
        mut lifecycle,
        mut gestures,
    } = channels;

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            Some(event) = lifecycle.recv() => {
                controller.apply_lifecycle(&session_id, event).await;
            }
            Some(gesture) = gestures.recv() => {
                controller.record_gesture(gesture).await;
            }
            else => break,
        }
    }

    log_debug!("session pump for {session_id} finished");
}
