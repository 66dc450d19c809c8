use anyhow::{anyhow, Context, Result};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::device::DeviceBridge;
use crate::events::{EventBus, RecorderEvent};
use crate::settings::CaptureSettings;

use super::phash::compute_phash;
use super::scheduler::{CaptureBackoff, FrameDecision};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// What the capture tasks need to know about the session they serve.
#[derive(Clone)]
pub struct CaptureTarget {
    pub session_id: String,
    pub device_id: String,
    pub screenshots_dir: PathBuf,
    pub bridge: Arc<dyn DeviceBridge>,
    pub events: EventBus,
}

/// Poll the device screen until cancelled, keeping only frames that differ
/// from the last accepted one.
pub async fn screenshot_loop(
    target: CaptureTarget,
    settings: CaptureSettings,
    cancel_token: CancellationToken,
) {
    let mut backoff = CaptureBackoff::new(&settings);
    let capture_timeout = Duration::from_secs(settings.capture_timeout_secs.max(1));
    let mut frame_index: u64 = 0;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(backoff.interval()) => {
                frame_index += 1;
                let fut = perform_periodic_capture(&target, frame_index, &mut backoff);

                match tokio::time::timeout(capture_timeout, fut).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => log_warn!(
                        "periodic capture failed for session {}: {err:#}",
                        target.session_id
                    ),
                    Err(_) => log_warn!(
                        "periodic capture timeout (> {}s) session {}",
                        capture_timeout.as_secs(),
                        target.session_id
                    ),
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("screenshot loop shutting down for session {}", target.session_id);
                break;
            }
        }
    }
}

async fn perform_periodic_capture(
    target: &CaptureTarget,
    frame_index: u64,
    backoff: &mut CaptureBackoff,
) -> Result<()> {
    let capture_start = Instant::now();
    let path = target
        .screenshots_dir
        .join(format!("frame_{frame_index:05}.png"));

    target
        .bridge
        .capture_screenshot(&target.device_id, &path)
        .await?;

    let hash = match hash_file(&path).await {
        Ok(hash) => hash,
        Err(err) => {
            discard(&path).await;
            return Err(err);
        }
    };

    match backoff.observe(&hash) {
        FrameDecision::Accept => {
            log_debug!(
                "accepted frame {} in {}ms, next poll in {}ms",
                path.display(),
                capture_start.elapsed().as_millis(),
                backoff.interval().as_millis()
            );
            target.events.emit(RecorderEvent::ScreenshotCaptured {
                session_id: target.session_id.clone(),
                path,
                forced: false,
            });
        }
        FrameDecision::Discard => {
            discard(&path).await;
            log_debug!(
                "discarded unchanged frame {frame_index} ({} in a row), next poll in {}ms",
                backoff.unchanged_count(),
                backoff.interval().as_millis()
            );
        }
    }

    Ok(())
}

/// Capture a screenshot for an action. Always kept: forced captures never go
/// through dedup or backoff.
pub async fn capture_action_screenshot(
    target: &CaptureTarget,
    action_seq: usize,
    timeout: Duration,
) -> Result<PathBuf> {
    let path = target
        .screenshots_dir
        .join(format!("action_{action_seq:04}.png"));

    tokio::time::timeout(
        timeout,
        target.bridge.capture_screenshot(&target.device_id, &path),
    )
    .await
    .map_err(|_| anyhow!("action screenshot timed out after {}s", timeout.as_secs()))??;

    target.events.emit(RecorderEvent::ScreenshotCaptured {
        session_id: target.session_id.clone(),
        path: path.clone(),
        forced: true,
    });
    Ok(path)
}

async fn hash_file(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read screenshot {}", path.display()))?;
    tokio::task::spawn_blocking(move || compute_phash(&bytes))
        .await
        .context("phash worker join failed")?
}

async fn discard(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        log_debug!("could not remove {}: {err}", path.display());
    }
}
