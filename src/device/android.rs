use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::{path::Path, time::Duration};
use tokio::process::Command;

use super::{run_checked, DeviceBridge, DeviceInfo, ScreenRecordPlan};
use crate::input::{AxisRanges, ScreenSize};
use crate::models::Platform;
use crate::settings::BridgeSettings;

const REMOTE_VIDEO_DIR: &str = "/sdcard";

/// Android emulators and devices through `adb`.
pub struct AdbBridge {
    adb: String,
    timeout: Duration,
    pull_timeout: Duration,
    record_video: bool,
}

impl AdbBridge {
    pub fn new(settings: &BridgeSettings) -> Self {
        Self {
            adb: settings.adb_path.clone(),
            timeout: Duration::from_secs(settings.command_timeout_secs),
            pull_timeout: Duration::from_secs(settings.pull_timeout_secs),
            record_video: settings.record_video,
        }
    }

    fn adb(&self, device_id: &str) -> Command {
        let mut command = Command::new(&self.adb);
        command.arg("-s").arg(device_id);
        command
    }

    async fn shell_output(&self, device_id: &str, args: &[&str]) -> Result<String> {
        let mut command = self.adb(device_id);
        command.arg("shell").args(args);
        let output = run_checked(command, self.timeout).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl DeviceBridge for AdbBridge {
    fn platform(&self) -> Platform {
        Platform::Android
    }

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let mut command = Command::new(&self.adb);
        command.args(["devices", "-l"]);
        let output = run_checked(command, self.timeout).await?;
        Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn capture_screenshot(&self, device_id: &str, dest: &Path) -> Result<()> {
        let mut command = self.adb(device_id);
        command.args(["exec-out", "screencap", "-p"]);
        let output = run_checked(command, self.timeout).await?;
        if output.stdout.is_empty() {
            bail!("screencap returned no data for {device_id}");
        }
        tokio::fs::write(dest, &output.stdout)
            .await
            .with_context(|| format!("failed to write screenshot {}", dest.display()))
    }

    async fn pull_file(&self, device_id: &str, remote: &str, local: &Path) -> Result<()> {
        let mut command = self.adb(device_id);
        command.arg("pull").arg(remote).arg(local);
        run_checked(command, self.pull_timeout).await?;
        Ok(())
    }

    async fn inject_tap(&self, device_id: &str, x: i32, y: i32) -> Result<()> {
        self.shell_output(device_id, &["input", "tap", &x.to_string(), &y.to_string()])
            .await
            .map(|_| ())
    }

    fn event_stream_command(&self, device_id: &str) -> Option<Command> {
        let mut command = self.adb(device_id);
        command.args(["shell", "getevent", "-lt"]);
        Some(command)
    }

    async fn touch_geometry(&self, device_id: &str) -> Result<Option<(ScreenSize, AxisRanges)>> {
        let size = self.shell_output(device_id, &["wm", "size"]).await?;
        let probe = self.shell_output(device_id, &["getevent", "-pl"]).await?;
        Ok(parse_screen_size(&size).zip(parse_axis_ranges(&probe)))
    }

    fn screen_record_plan(&self, device_id: &str, session_dir: &Path) -> Option<ScreenRecordPlan> {
        if !self.record_video {
            return None;
        }
        let session_name = session_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "session".into());
        let remote_path = format!("{REMOTE_VIDEO_DIR}/flowcap-{session_name}.mp4");

        let mut command = self.adb(device_id);
        command.args(["shell", "screenrecord", &remote_path]);

        Some(ScreenRecordPlan {
            command,
            remote_path: Some(remote_path),
            local_path: session_dir.join("recording.mp4"),
        })
    }

    async fn remove_remote_file(&self, device_id: &str, remote: &str) -> Result<()> {
        self.shell_output(device_id, &["rm", "-f", remote])
            .await
            .map(|_| ())
    }
}

/// Parse `adb devices -l`, keeping only devices in the `device` state.
pub fn parse_device_list(stdout: &str) -> Vec<DeviceInfo> {
    stdout
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let id = fields.next()?;
            if fields.next()? != "device" {
                return None;
            }
            let model = fields
                .find_map(|field| field.strip_prefix("model:"))
                .map(|model| model.replace('_', " "))
                .unwrap_or_else(|| id.to_string());
            Some(DeviceInfo {
                id: id.to_string(),
                name: model,
                platform: Platform::Android,
            })
        })
        .collect()
}

/// Parse `wm size`; an override size wins over the physical one.
pub fn parse_screen_size(stdout: &str) -> Option<ScreenSize> {
    let mut physical = None;
    let mut overridden = None;
    for line in stdout.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let Some((w, h)) = value.trim().split_once('x') else {
            continue;
        };
        let (Ok(width), Ok(height)) = (w.trim().parse(), h.trim().parse()) else {
            continue;
        };
        let size = ScreenSize { width, height };
        if label.contains("Override") {
            overridden = Some(size);
        } else {
            physical = Some(size);
        }
    }
    overridden.or(physical)
}

/// Pull the multi-touch axis maxima out of `getevent -pl`.
pub fn parse_axis_ranges(stdout: &str) -> Option<AxisRanges> {
    let max_for = |axis: &str| {
        stdout
            .lines()
            .find(|line| line.contains(axis))
            .and_then(|line| line.split("max ").nth(1))
            .and_then(|rest| rest.split(',').next())
            .and_then(|value| value.trim().parse::<i32>().ok())
    };
    Some(AxisRanges {
        max_x: max_for("ABS_MT_POSITION_X")?,
        max_y: max_for("ABS_MT_POSITION_Y")?,
    })
}
