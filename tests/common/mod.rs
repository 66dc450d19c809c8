#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use flowcap_lib::{
    device::{BridgeSet, DeviceBridge, DeviceInfo, ScreenRecordPlan},
    models::Platform,
    settings::{NativeToolSettings, RecorderSettings},
    RecordingController, RecorderEvent,
};
use image::{Rgb, RgbImage};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{process::Command, sync::broadcast};

pub const DEVICE_ID: &str = "emulator-5554";
pub const REMOTE_VIDEO: &str = "/sdcard/flowcap_screen.mp4";
pub const VIDEO_FILE: &str = "screen.mp4";

/// A screen recorder played by `sh -c script`, with the local video path as
/// `$1`.
pub struct FakeScreenRecorder {
    pub script: String,
    /// Buffered on the device and pulled afterwards, like adb.
    pub on_device: bool,
    pub pull_hangs: bool,
}

/// Stands in for adb: a static grey screen, taps remembered in memory.
pub struct FakeBridge {
    event_script: Option<String>,
    screen_recorder: Option<FakeScreenRecorder>,
    pub screenshots: AtomicUsize,
    pub taps: Mutex<Vec<(i32, i32)>>,
    pub removed: Mutex<Vec<String>>,
}

impl FakeBridge {
    fn base() -> Self {
        Self {
            event_script: None,
            screen_recorder: None,
            screenshots: AtomicUsize::new(0),
            taps: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }

    pub fn new() -> Arc<Self> {
        Arc::new(Self::base())
    }

    /// Raw input events come from `sh -c script`.
    pub fn with_events(script: &str) -> Arc<Self> {
        Arc::new(Self {
            event_script: Some(script.to_string()),
            ..Self::base()
        })
    }

    pub fn with_screen_recorder(recorder: FakeScreenRecorder) -> Arc<Self> {
        Arc::new(Self {
            screen_recorder: Some(recorder),
            ..Self::base()
        })
    }
}

#[async_trait]
impl DeviceBridge for FakeBridge {
    fn platform(&self) -> Platform {
        Platform::Android
    }

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![DeviceInfo {
            id: DEVICE_ID.into(),
            name: "Pixel Test".into(),
            platform: Platform::Android,
        }])
    }

    async fn capture_screenshot(&self, _device_id: &str, dest: &Path) -> Result<()> {
        RgbImage::from_pixel(32, 32, Rgb([120, 120, 120])).save(dest)?;
        self.screenshots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pull_file(&self, _device_id: &str, _remote: &str, local: &Path) -> Result<()> {
        let hangs = self
            .screen_recorder
            .as_ref()
            .map(|recorder| recorder.pull_hangs)
            .unwrap_or(false);
        if hangs {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        std::fs::write(local, b"mp4")?;
        Ok(())
    }

    async fn remove_remote_file(&self, _device_id: &str, remote: &str) -> Result<()> {
        self.removed.lock().unwrap().push(remote.to_string());
        Ok(())
    }

    fn screen_record_plan(&self, _device_id: &str, session_dir: &Path) -> Option<ScreenRecordPlan> {
        let recorder = self.screen_recorder.as_ref()?;
        let local_path = session_dir.join(VIDEO_FILE);
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&recorder.script)
            .arg("screen")
            .arg(&local_path);
        Some(ScreenRecordPlan {
            command,
            remote_path: recorder.on_device.then(|| REMOTE_VIDEO.to_string()),
            local_path,
        })
    }

    async fn inject_tap(&self, _device_id: &str, x: i32, y: i32) -> Result<()> {
        self.taps.lock().unwrap().push((x, y));
        Ok(())
    }

    fn event_stream_command(&self, _device_id: &str) -> Option<Command> {
        let script = self.event_script.as_ref()?;
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        Some(command)
    }
}

pub fn no_native() -> NativeToolSettings {
    NativeToolSettings {
        enabled: false,
        ..NativeToolSettings::default()
    }
}

/// A native recorder played by `sh -c script`, with `extra` as `$1..`.
pub fn sh_native(script: &str, extra: &[&str]) -> NativeToolSettings {
    let mut record_args = vec!["-c".to_string(), script.to_string(), "native".to_string()];
    record_args.extend(extra.iter().map(|arg| arg.to_string()));
    NativeToolSettings {
        enabled: true,
        program: "sh".into(),
        record_args,
        probe_args: vec!["-c".into(), "exit 0".into()],
        probe_timeout_secs: 5,
    }
}

pub fn settings(data_dir: &Path, native: NativeToolSettings) -> RecorderSettings {
    let mut settings = RecorderSettings::default().with_data_dir(data_dir);
    settings.native = native;
    settings.stop_timeout_secs = 1;
    settings.capture.base_interval_ms = 50;
    settings.capture.max_interval_ms = 400;
    settings.capture.capture_timeout_secs = 5;
    settings.bridge.record_video = false;
    settings.bridge.pull_timeout_secs = 1;
    settings
}

pub fn controller(settings: RecorderSettings, bridge: Arc<FakeBridge>) -> RecordingController {
    RecordingController::new(settings, BridgeSet::new(bridge.clone(), bridge))
}

/// Wait for the first event matching `pred`.
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<RecorderEvent>,
    timeout: Duration,
    pred: F,
) -> Option<RecorderEvent>
where
    F: Fn(&RecorderEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

pub fn count_files(dir: &Path, prefix: &str) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
                .count()
        })
        .unwrap_or(0)
}
