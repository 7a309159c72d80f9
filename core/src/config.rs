//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Immutable runtime configuration. The core never reads a CLI flag or an
//! `.env` file itself — a caller parses those and hands us a [`RawConfig`],
//! which [`ConfigSnapshot::validate`] turns into an immutable, cloneable
//! snapshot that every stage holds for the lifetime of the frames it
//! processes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::PipelineError;

/// Deserializable, not-yet-validated configuration. Mirrors [`ConfigSnapshot`]
/// field for field but carries no invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub capture_fps: f64,
    pub buffer_size: usize,
    pub spool_path: String,
    pub max_frame_age_secs: f64,
    pub motion_threshold_pct: f64,
    pub motion_gate_threshold_px: u32,
    pub min_region_area_px: u32,
    pub luminance_delta: u8,
    pub downscale_w: u32,
    pub downscale_h: u32,
    pub periodic_interval_frames: u64,
    pub min_interval_secs: f64,
    pub max_interval_secs: f64,
    pub classes: Vec<String>,
    pub min_confidence: f32,
    pub nms_iou: f32,
    pub use_presence_guard: bool,
    pub use_vision_summary: bool,
    pub presence_recheck_every: u64,
    pub iou_threshold: f32,
    pub distance_threshold: f32,
    pub max_lost_frames: u32,
    pub min_stable_frames: u32,
    pub pool_workers: usize,
    pub call_timeout_ms: u64,
    pub max_stale_frames: u64,
    pub alert_mode: AlertMode,
    pub digest_interval_secs: f64,
    pub cooldown_secs: f64,
    pub instant_min_interval_secs: f64,
    pub retention_frames: u64,
}

impl Default for RawConfig {
    fn default() -> Self {
        RawConfig {
            capture_fps: 5.0,
            buffer_size: 3,
            spool_path: "/dev/shm/lucidwatch".to_string(),
            max_frame_age_secs: 3.0,
            motion_threshold_pct: 1.0,
            motion_gate_threshold_px: 50,
            min_region_area_px: 100,
            luminance_delta: 25,
            downscale_w: 320,
            downscale_h: 240,
            periodic_interval_frames: 30,
            min_interval_secs: 0.2,
            max_interval_secs: 5.0,
            classes: Vec::new(),
            min_confidence: 0.25,
            nms_iou: 0.45,
            use_presence_guard: false,
            use_vision_summary: false,
            presence_recheck_every: 10,
            iou_threshold: 0.3,
            distance_threshold: 0.2,
            max_lost_frames: 10,
            min_stable_frames: 2,
            pool_workers: 2,
            call_timeout_ms: 5000,
            max_stale_frames: 5,
            alert_mode: AlertMode::Instant,
            digest_interval_secs: 60.0,
            cooldown_secs: 300.0,
            instant_min_interval_secs: 10.0,
            retention_frames: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMode {
    Instant,
    Digest,
    Summary,
}

/// Validated, immutable configuration shared (by cheap clone of the `Arc`)
/// across every stage. Replacing the snapshot mid-run does not affect frames
/// already in flight with the old one.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot(Arc<RawConfig>);

impl ConfigSnapshot {
    pub fn validate(raw: RawConfig) -> Result<Self, PipelineError> {
        if raw.capture_fps <= 0.0 {
            return Err(PipelineError::ConfigInvalid(
                "capture_fps must be positive".into(),
            ));
        }
        if raw.buffer_size == 0 {
            return Err(PipelineError::ConfigInvalid(
                "buffer_size must be at least 1".into(),
            ));
        }
        if raw.max_interval_secs < raw.min_interval_secs {
            return Err(PipelineError::ConfigInvalid(
                "max_interval_secs must be >= min_interval_secs".into(),
            ));
        }
        if raw.pool_workers == 0 {
            return Err(PipelineError::ConfigInvalid(
                "pool_workers must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&(raw.min_confidence as f64)) {
            return Err(PipelineError::ConfigInvalid(
                "min_confidence must be in [0,1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&(raw.nms_iou as f64)) {
            return Err(PipelineError::ConfigInvalid(
                "nms_iou must be in [0,1]".into(),
            ));
        }
        if raw.downscale_w == 0 || raw.downscale_h == 0 {
            return Err(PipelineError::ConfigInvalid(
                "downscale dimensions must be nonzero".into(),
            ));
        }
        if raw.max_lost_frames == 0 {
            return Err(PipelineError::ConfigInvalid(
                "max_lost_frames must be at least 1".into(),
            ));
        }
        Ok(ConfigSnapshot(Arc::new(raw)))
    }

    pub fn default_validated() -> Self {
        Self::validate(RawConfig::default()).expect("built-in defaults are always valid")
    }
}

impl std::ops::Deref for ConfigSnapshot {
    type Target = RawConfig;
    fn deref(&self) -> &RawConfig {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ConfigSnapshot::validate(RawConfig::default()).unwrap();
    }

    #[test]
    fn rejects_backwards_interval_bounds() {
        let mut raw = RawConfig::default();
        raw.min_interval_secs = 5.0;
        raw.max_interval_secs = 1.0;
        assert!(ConfigSnapshot::validate(raw).is_err());
    }

    #[test]
    fn rejects_zero_pool_workers() {
        let mut raw = RawConfig::default();
        raw.pool_workers = 0;
        assert!(ConfigSnapshot::validate(raw).is_err());
    }

    #[test]
    fn snapshot_clone_is_cheap_and_shares_data() {
        let a = ConfigSnapshot::default_validated();
        let b = a.clone();
        assert_eq!(a.capture_fps, b.capture_fps);
    }
}
