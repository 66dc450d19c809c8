//! External device bridges. Every operation shells out to the platform tool
//! with a bounded timeout; a non-zero exit is a failed operation, never a crash.

pub mod android;
pub mod ios;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    process::{Output, Stdio},
    sync::Arc,
    time::Duration,
};
use tokio::process::Command;

use crate::input::{AxisRanges, ScreenSize};
use crate::models::Platform;
use crate::settings::RecorderSettings;

pub use android::AdbBridge;
pub use ios::SimctlBridge;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub platform: Platform,
}

/// A companion screen recording to start alongside a session.
pub struct ScreenRecordPlan {
    pub command: Command,
    /// Where the platform buffers the video on the device, if it has to be
    /// pulled afterwards.
    pub remote_path: Option<String>,
    /// Final location of the video on the host.
    pub local_path: PathBuf,
}

#[async_trait]
pub trait DeviceBridge: Send + Sync {
    fn platform(&self) -> Platform;

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Write a PNG of the current screen to `dest`.
    async fn capture_screenshot(&self, device_id: &str, dest: &Path) -> Result<()>;

    async fn pull_file(&self, device_id: &str, remote: &str, local: &Path) -> Result<()>;

    async fn inject_tap(&self, device_id: &str, x: i32, y: i32) -> Result<()>;

    /// Raw input event stream, when the platform exposes one.
    fn event_stream_command(&self, _device_id: &str) -> Option<Command> {
        None
    }

    /// Screen size and touch-panel axis ranges for scaling raw events.
    async fn touch_geometry(&self, _device_id: &str) -> Result<Option<(ScreenSize, AxisRanges)>> {
        Ok(None)
    }

    fn screen_record_plan(&self, _device_id: &str, _session_dir: &Path) -> Option<ScreenRecordPlan> {
        None
    }

    /// Remove a buffered on-device file once it has been pulled.
    async fn remove_remote_file(&self, _device_id: &str, _remote: &str) -> Result<()> {
        Ok(())
    }
}

/// One bridge per platform.
#[derive(Clone)]
pub struct BridgeSet {
    android: Arc<dyn DeviceBridge>,
    ios: Arc<dyn DeviceBridge>,
}

impl BridgeSet {
    pub fn new(android: Arc<dyn DeviceBridge>, ios: Arc<dyn DeviceBridge>) -> Self {
        Self { android, ios }
    }

    pub fn system(settings: &RecorderSettings) -> Self {
        Self {
            android: Arc::new(AdbBridge::new(&settings.bridge)),
            ios: Arc::new(SimctlBridge::new(&settings.bridge)),
        }
    }

    pub fn for_platform(&self, platform: Platform) -> Arc<dyn DeviceBridge> {
        match platform {
            Platform::Android => Arc::clone(&self.android),
            Platform::Ios => Arc::clone(&self.ios),
        }
    }

    /// Devices from every bridge; a failing bridge contributes nothing.
    pub async fn list_all_devices(&self) -> Vec<DeviceInfo> {
        let mut devices = Vec::new();
        for bridge in [&self.android, &self.ios] {
            match bridge.list_devices().await {
                Ok(found) => devices.extend(found),
                Err(err) => log::debug!(
                    "device listing failed for {}: {err:#}",
                    bridge.platform().as_str()
                ),
            }
        }
        devices
    }
}

/// Run `command` to completion, killing it if it outlives `timeout`.
pub async fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<Output> {
    let program = format!("{:?}", command.as_std().get_program());
    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    // Dropping the timed-out future drops the child, which kills it.
    tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| anyhow!("{program} timed out after {}s", timeout.as_secs_f32()))?
        .with_context(|| format!("failed to wait for {program}"))
}

/// Like [`run_with_timeout`], but a non-zero exit is an error carrying stderr.
pub async fn run_checked(command: Command, timeout: Duration) -> Result<Output> {
    let program = format!("{:?}", command.as_std().get_program());
    let output = run_with_timeout(command, timeout).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        );
    }
    Ok(output)
}
