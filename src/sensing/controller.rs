use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::settings::CaptureSettings;

use super::loop_worker::{screenshot_loop, CaptureTarget};

/// Owns the periodic screenshot task of one session.
pub struct ScreenshotPoller {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl ScreenshotPoller {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start(&mut self, target: CaptureTarget, settings: CaptureSettings) -> Result<()> {
        if self.handle.is_some() {
            bail!("screenshot polling already active");
        }

        info!(
            "starting screenshot polling for session {} every {}ms",
            target.session_id, settings.base_interval_ms
        );

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(screenshot_loop(target, settings, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("screenshot loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for ScreenshotPoller {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScreenshotPoller {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }
}
