use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::{collections::HashMap, path::Path, time::Duration};
use tokio::process::Command;

use super::{run_checked, DeviceBridge, DeviceInfo, ScreenRecordPlan};
use crate::models::Platform;
use crate::settings::BridgeSettings;

/// Booted iOS simulators through `xcrun simctl`, with `idb` for tap injection.
///
/// There is no raw event stream on this platform, so manual capture relies on
/// periodic screenshots alone.
pub struct SimctlBridge {
    xcrun: String,
    idb: String,
    timeout: Duration,
    record_video: bool,
}

#[derive(Debug, Deserialize)]
struct SimctlDeviceList {
    devices: HashMap<String, Vec<SimctlDevice>>,
}

#[derive(Debug, Deserialize)]
struct SimctlDevice {
    udid: String,
    name: String,
    state: String,
}

impl SimctlBridge {
    pub fn new(settings: &BridgeSettings) -> Self {
        Self {
            xcrun: settings.xcrun_path.clone(),
            idb: settings.idb_path.clone(),
            timeout: Duration::from_secs(settings.command_timeout_secs),
            record_video: settings.record_video,
        }
    }

    fn simctl(&self) -> Command {
        let mut command = Command::new(&self.xcrun);
        command.arg("simctl");
        command
    }
}

#[async_trait]
impl DeviceBridge for SimctlBridge {
    fn platform(&self) -> Platform {
        Platform::Ios
    }

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let mut command = self.simctl();
        command.args(["list", "devices", "booted", "--json"]);
        let output = run_checked(command, self.timeout).await?;
        parse_device_list(&String::from_utf8_lossy(&output.stdout))
    }

    async fn capture_screenshot(&self, device_id: &str, dest: &Path) -> Result<()> {
        let mut command = self.simctl();
        command
            .args(["io", device_id, "screenshot", "--type=png"])
            .arg(dest);
        run_checked(command, self.timeout).await?;
        Ok(())
    }

    /// Simulator storage already lives on the host.
    async fn pull_file(&self, _device_id: &str, remote: &str, local: &Path) -> Result<()> {
        tokio::fs::copy(remote, local)
            .await
            .with_context(|| format!("failed to copy {remote} to {}", local.display()))?;
        Ok(())
    }

    async fn inject_tap(&self, device_id: &str, x: i32, y: i32) -> Result<()> {
        let mut command = Command::new(&self.idb);
        command
            .args(["ui", "tap", "--udid", device_id])
            .arg(x.to_string())
            .arg(y.to_string());
        run_checked(command, self.timeout).await?;
        Ok(())
    }

    fn screen_record_plan(&self, device_id: &str, session_dir: &Path) -> Option<ScreenRecordPlan> {
        if !self.record_video {
            return None;
        }
        let local_path = session_dir.join("recording.mp4");
        let mut command = self.simctl();
        command
            .args(["io", device_id, "recordVideo", "--force"])
            .arg(&local_path);

        Some(ScreenRecordPlan {
            command,
            remote_path: None,
            local_path,
        })
    }
}

/// Parse `simctl list devices booted --json`.
pub fn parse_device_list(stdout: &str) -> Result<Vec<DeviceInfo>> {
    let list: SimctlDeviceList =
        serde_json::from_str(stdout).context("failed to parse simctl device list")?;

    let mut devices: Vec<DeviceInfo> = list
        .devices
        .into_values()
        .flatten()
        .filter(|device| device.state == "Booted")
        .map(|device| DeviceInfo {
            id: device.udid,
            name: device.name,
            platform: Platform::Ios,
        })
        .collect();
    devices.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_booted_simulators() {
        let json = r#"{
          "devices": {
            "com.apple.CoreSimulator.SimRuntime.iOS-17-2": [
              {"udid": "B1", "name": "iPhone 15", "state": "Booted", "isAvailable": true},
              {"udid": "S1", "name": "iPhone SE", "state": "Shutdown", "isAvailable": true}
            ],
            "com.apple.CoreSimulator.SimRuntime.iOS-16-4": [
              {"udid": "B2", "name": "iPad Air", "state": "Booted", "isAvailable": true}
            ]
          }
        }"#;

        let devices = parse_device_list(json).unwrap();
        let ids: Vec<_> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["B2", "B1"]);
        assert!(devices.iter().all(|d| d.platform == Platform::Ios));
    }

    #[test]
    fn malformed_listing_is_an_error() {
        assert!(parse_device_list("not json").is_err());
    }

    #[test]
    fn video_is_written_on_the_host() {
        let bridge = SimctlBridge::new(&BridgeSettings::default());
        let plan = bridge
            .screen_record_plan("B1", Path::new("/tmp/sessions/x"))
            .unwrap();
        assert!(plan.remote_path.is_none());
        assert!(bridge.event_stream_command("B1").is_none());
    }
}
