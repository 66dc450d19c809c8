use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

const DATA_DIR_ENV: &str = "FLOWCAP_DATA_DIR";
const SNAPSHOT_FILE_NAME: &str = "pending_session.json";

/// How the native Maestro recorder is located and launched.
///
/// `record_args` may contain `{flow}` and `{device}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeToolSettings {
    pub enabled: bool,
    pub program: String,
    pub record_args: Vec<String>,
    pub probe_args: Vec<String>,
    pub probe_timeout_secs: u64,
}

impl Default for NativeToolSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "maestro".into(),
            record_args: vec![
                "--device".into(),
                "{device}".into(),
                "record".into(),
                "--local".into(),
                "{flow}".into(),
            ],
            probe_args: vec!["--version".into()],
            probe_timeout_secs: 10,
        }
    }
}

impl NativeToolSettings {
    pub fn render_record_args(&self, flow_path: &Path, device_id: &str) -> Vec<String> {
        let flow = flow_path.to_string_lossy();
        self.record_args
            .iter()
            .map(|arg| arg.replace("{flow}", &flow).replace("{device}", device_id))
            .collect()
    }
}

/// Periodic screenshot polling and dedup thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub base_interval_ms: u64,
    pub max_interval_ms: u64,
    /// Unchanged frames in a row before the interval doubles.
    pub unchanged_threshold: u32,
    /// Max hamming distance at which two frames count as identical.
    pub dedup_distance: u32,
    pub capture_timeout_secs: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            base_interval_ms: 1_500,
            max_interval_ms: 12_000,
            unchanged_threshold: 3,
            dedup_distance: 0,
            capture_timeout_secs: 10,
        }
    }
}

/// Tap/swipe/long-press classification cutoffs. A tunable policy, not a contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureSettings {
    pub swipe_threshold_px: i32,
    pub long_press_ms: u64,
}

impl Default for GestureSettings {
    fn default() -> Self {
        Self {
            swipe_threshold_px: 50,
            long_press_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub adb_path: String,
    pub xcrun_path: String,
    pub idb_path: String,
    pub command_timeout_secs: u64,
    pub pull_timeout_secs: u64,
    pub record_video: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            adb_path: "adb".into(),
            xcrun_path: "xcrun".into(),
            idb_path: "idb".into(),
            command_timeout_secs: 15,
            pull_timeout_secs: 30,
            record_video: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    pub data_dir: PathBuf,
    pub native: NativeToolSettings,
    pub capture: CaptureSettings,
    pub gestures: GestureSettings,
    pub bridge: BridgeSettings,
    /// Bound on waiting for a recorder subprocess after the interrupt.
    pub stop_timeout_secs: u64,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            native: NativeToolSettings::default(),
            capture: CaptureSettings::default(),
            gestures: GestureSettings::default(),
            bridge: BridgeSettings::default(),
            stop_timeout_secs: 5,
        }
    }
}

impl RecorderSettings {
    /// Load settings from `path` if it exists, then apply environment overrides.
    ///
    /// A file that fails to parse falls back to defaults rather than failing startup.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings from {}", path.display()))?;
                serde_json::from_str(&contents).unwrap_or_else(|err| {
                    log::warn!(
                        "Ignoring invalid settings file {}: {err}; using defaults",
                        path.display()
                    );
                    RecorderSettings::default()
                })
            }
            _ => RecorderSettings::default(),
        };

        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.trim().is_empty() {
                settings.data_dir = PathBuf::from(dir);
            }
        }

        Ok(settings)
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE_NAME)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge.command_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge.pull_timeout_secs)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture.capture_timeout_secs.max(1))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("flowcap"))
        .unwrap_or_else(|| PathBuf::from(".flowcap"))
}
