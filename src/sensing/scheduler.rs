use std::time::Duration;

use crate::settings::CaptureSettings;

use super::phash::compute_hamming_distance;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDecision {
    Accept,
    Discard,
}

/// Dedup and adaptive throttling for periodic screenshots.
///
/// A frame matching the last accepted one is discarded; every
/// `unchanged_threshold` discards in a row double the polling interval up to
/// the maximum. Any change is accepted and snaps the interval back to base.
/// Ephemeral: a fresh instance is created for every session.
#[derive(Debug, Clone)]
pub struct CaptureBackoff {
    base: Duration,
    max: Duration,
    threshold: u32,
    dedup_distance: u32,
    interval: Duration,
    last_hash: Option<String>,
    unchanged: u32,
}

impl CaptureBackoff {
    pub fn new(settings: &CaptureSettings) -> Self {
        let base = Duration::from_millis(settings.base_interval_ms.max(1));
        Self {
            base,
            max: Duration::from_millis(settings.max_interval_ms).max(base),
            threshold: settings.unchanged_threshold.max(1),
            dedup_distance: settings.dedup_distance,
            interval: base,
            last_hash: None,
            unchanged: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn unchanged_count(&self) -> u32 {
        self.unchanged
    }

    pub fn observe(&mut self, hash: &str) -> FrameDecision {
        let unchanged = self
            .last_hash
            .as_deref()
            .map(|last| compute_hamming_distance(last, hash) <= self.dedup_distance)
            .unwrap_or(false);

        if unchanged {
            self.unchanged += 1;
            if self.unchanged >= self.threshold {
                self.interval = (self.interval * 2).min(self.max);
                self.unchanged = 0;
            }
            return FrameDecision::Discard;
        }

        self.last_hash = Some(hash.to_string());
        self.interval = self.base;
        self.unchanged = 0;
        FrameDecision::Accept
    }
}
