//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Progressively expensive detection stages, short-circuiting as soon as a
//! cheap stage is confident. Each external call is routed through an
//! [`crate::inference_pool::InferencePool`] so backpressure, per-call
//! timeouts, and staleness are handled uniformly rather than ad hoc.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{instrument, warn};

use super::interfaces::{DescribeOptions, DetectOptions, ObjectDetector, VisionLanguage};
use super::{non_max_suppression, Detection};
use crate::config::ConfigSnapshot;
use crate::error::PipelineError;
use crate::frame::FrameRef;
use crate::inference_pool::{InferenceOutcome, InferencePool};
use crate::motion::MotionRegion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    MotionOnly,
    Detector,
    PresenceAbsent,
    PresenceSkippedRecheckPending,
}

#[derive(Debug, Clone)]
pub struct CascadeResult {
    pub has_target: bool,
    pub detections: Vec<Detection>,
    pub summary: Option<String>,
    pub reason: Reason,
    pub stage_timings: Vec<(&'static str, Duration)>,
}

pub struct DetectionCascade {
    classes: Option<Vec<String>>,
    min_confidence: f32,
    nms_iou: f32,
    use_presence_guard: bool,
    use_vision_summary: bool,
    stage_budget: Duration,
    presence_recheck_every: u64,
    consecutive_absent: u64,
    frames_since_check: u64,
    detector: Option<Arc<dyn ObjectDetector>>,
    vision: Option<Arc<dyn VisionLanguage>>,
    detector_pool: InferencePool<Vec<Detection>>,
    detector_rx: mpsc::Receiver<InferenceOutcome<Vec<Detection>>>,
    vision_pool: InferencePool<String>,
    vision_rx: mpsc::Receiver<InferenceOutcome<String>>,
}

impl DetectionCascade {
    pub fn new(
        cfg: &ConfigSnapshot,
        detector: Option<Arc<dyn ObjectDetector>>,
        vision: Option<Arc<dyn VisionLanguage>>,
    ) -> Self {
        let (detector_pool, detector_rx) = InferencePool::new(cfg);
        let (vision_pool, vision_rx) = InferencePool::new(cfg);
        DetectionCascade {
            classes: if cfg.classes.is_empty() {
                None
            } else {
                Some(cfg.classes.clone())
            },
            min_confidence: cfg.min_confidence,
            nms_iou: cfg.nms_iou,
            use_presence_guard: cfg.use_presence_guard,
            use_vision_summary: cfg.use_vision_summary,
            stage_budget: Duration::from_millis(cfg.call_timeout_ms),
            presence_recheck_every: cfg.presence_recheck_every,
            consecutive_absent: 0,
            frames_since_check: 0,
            detector,
            vision,
            detector_pool,
            detector_rx,
            vision_pool,
            vision_rx,
        }
    }

    #[instrument(skip(self, frame, regions))]
    pub async fn run(&mut self, frame: &FrameRef, regions: &[MotionRegion]) -> CascadeResult {
        if regions.is_empty() && self.detector.is_none() {
            return CascadeResult {
                has_target: false,
                detections: Vec::new(),
                summary: None,
                reason: Reason::MotionOnly,
                stage_timings: Vec::new(),
            };
        }

        let mut timings = Vec::new();

        if self.detector.is_none() {
            let detections = regions
                .iter()
                .map(|r| Detection {
                    bbox: region_to_bbox(r, frame.width(), frame.height()),
                    class: "motion".to_string(),
                    confidence: r.confidence,
                    class_id: None,
                })
                .collect();
            return CascadeResult {
                has_target: true,
                detections,
                summary: None,
                reason: Reason::MotionOnly,
                stage_timings: timings,
            };
        }

        // Advances every frame that reaches this point, independent of
        // whether the recheck below is actually performed, so the backoff
        // window keeps moving instead of freezing on the first skip.
        self.frames_since_check += 1;

        if self.use_presence_guard && !self.should_recheck_presence() {
            return CascadeResult {
                has_target: false,
                detections: Vec::new(),
                summary: None,
                reason: Reason::PresenceSkippedRecheckPending,
                stage_timings: timings,
            };
        }

        let started = Instant::now();
        let options = DetectOptions {
            classes: self.classes.clone(),
            min_confidence: self.min_confidence,
            nms_iou: self.nms_iou,
        };
        let detections = self.run_detector_call(frame, options).await.unwrap_or_default();
        timings.push(("detector", started.elapsed()));

        let filtered: Vec<Detection> = detections
            .into_iter()
            .filter(|d| d.confidence >= self.min_confidence)
            .collect();
        let detections = non_max_suppression(filtered, self.nms_iou);
        let has_target = !detections.is_empty();

        self.frames_since_check = 0;
        if has_target {
            self.consecutive_absent = 0;
        } else {
            self.consecutive_absent += 1;
        }

        let summary = if has_target && self.use_vision_summary && self.vision.is_some() {
            let vstarted = Instant::now();
            let result = self.run_vision_call(frame).await;
            timings.push(("vision_summary", vstarted.elapsed()));
            result
        } else {
            None
        };

        CascadeResult {
            has_target,
            detections,
            summary,
            reason: Reason::Detector,
            stage_timings: timings,
        }
    }

    /// Submits a detection call through the pool and waits up to
    /// `stage_budget` for its outcome. A rejected submission (backpressure)
    /// or an exhausted wait both fall back to "no detections" rather than
    /// failing the frame.
    async fn run_detector_call(&mut self, frame: &FrameRef, options: DetectOptions) -> Option<Vec<Detection>> {
        let detector = self.detector.as_ref()?.clone();
        let frame_owned = frame.clone();
        if let Err(e) = self
            .detector_pool
            .submit(frame.seq, move || async move { detector.detect(&frame_owned, &options).await })
        {
            warn!(error = %e, "object detector call rejected");
            return None;
        }

        match tokio::time::timeout(self.stage_budget, self.detector_rx.recv()).await {
            Ok(Some(outcome)) => match outcome.result {
                Ok(dets) => Some(dets),
                Err(e) => {
                    warn!(error = %e, "object detector call failed");
                    None
                }
            },
            Ok(None) => {
                warn!("inference pool output channel closed");
                None
            }
            Err(_) => {
                let err = PipelineError::StageBudgetExceeded("detector");
                warn!(error = %err, "object detector exceeded stage budget");
                None
            }
        }
    }

    /// Same shape as [`Self::run_detector_call`] for the optional
    /// vision-language summary stage.
    async fn run_vision_call(&mut self, frame: &FrameRef) -> Option<String> {
        let vision = self.vision.as_ref()?.clone();
        let frame_owned = frame.clone();
        let opts = DescribeOptions {
            timeout_ms: self.stage_budget.as_millis() as u64,
            max_tokens: 64,
        };
        let prompt = "Describe what is visible in one short sentence.".to_string();
        if let Err(e) = self.vision_pool.submit(frame.seq, move || async move {
            vision.describe_image(&frame_owned, &prompt, &opts).await
        }) {
            warn!(error = %e, "vision summary call rejected");
            return None;
        }

        match tokio::time::timeout(self.stage_budget, self.vision_rx.recv()).await {
            Ok(Some(outcome)) => match outcome.result {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!(error = %e, "vision summary call failed");
                    None
                }
            },
            Ok(None) => {
                warn!("inference pool output channel closed");
                None
            }
            Err(_) => {
                let err = PipelineError::StageBudgetExceeded("vision_summary");
                warn!(error = %err, "vision summary exceeded stage budget");
                None
            }
        }
    }

    /// Presence-guard backoff: after enough consecutive "absent" verdicts,
    /// trust the guard's last word for `presence_recheck_every` frames
    /// before paying for a real detector call again. `frames_since_check`
    /// keeps advancing on skipped frames, so the modulo boundary is always
    /// reached rather than frozen on the first skip.
    fn should_recheck_presence(&self) -> bool {
        self.consecutive_absent == 0 || self.frames_since_check % self.presence_recheck_every == 0
    }
}

fn region_to_bbox(region: &MotionRegion, frame_w: u32, frame_h: u32) -> super::BoundingBox {
    let fw = frame_w.max(1) as f32;
    let fh = frame_h.max(1) as f32;
    super::BoundingBox {
        x: (region.x as f32 + region.w as f32 / 2.0) / fw,
        y: (region.y as f32 + region.h as f32 / 2.0) / fh,
        w: region.w as f32 / fw,
        h: region.h as f32 / fh,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelBuffer;
    use image::{ImageBuffer, Rgb};

    fn frame() -> FrameRef {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(100, 100, Rgb([0, 0, 0]));
        FrameRef::new(1, PixelBuffer::from_image(img))
    }

    #[tokio::test]
    async fn motion_only_mode_promotes_regions_to_detections() {
        let cfg = ConfigSnapshot::default_validated();
        let mut cascade = DetectionCascade::new(&cfg, None, None);
        let regions = vec![MotionRegion { x: 10, y: 10, w: 20, h: 20, confidence: 0.5 }];
        let result = cascade.run(&frame(), &regions).await;
        assert!(result.has_target);
        assert_eq!(result.detections.len(), 1);
        assert_eq!(result.detections[0].class, "motion");
        assert_eq!(result.reason, Reason::MotionOnly);
    }

    #[tokio::test]
    async fn no_regions_and_no_detector_reports_no_target() {
        let cfg = ConfigSnapshot::default_validated();
        let mut cascade = DetectionCascade::new(&cfg, None, None);
        let result = cascade.run(&frame(), &[]).await;
        assert!(!result.has_target);
    }

    struct AlwaysAbsent;

    #[async_trait::async_trait]
    impl ObjectDetector for AlwaysAbsent {
        async fn detect(
            &self,
            _frame: &FrameRef,
            _options: &DetectOptions,
        ) -> Result<Vec<Detection>, PipelineError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn presence_guard_recheck_window_keeps_advancing_after_a_skip() {
        let mut raw = crate::config::RawConfig::default();
        raw.use_presence_guard = true;
        raw.presence_recheck_every = 3;
        let cfg = ConfigSnapshot::validate(raw).unwrap();
        let mut cascade = DetectionCascade::new(&cfg, Some(Arc::new(AlwaysAbsent)), None);
        let regions = vec![MotionRegion { x: 0, y: 0, w: 5, h: 5, confidence: 0.1 }];

        let mut reasons = Vec::new();
        for _ in 0..6 {
            let result = cascade.run(&frame(), &regions).await;
            reasons.push(result.reason);
        }

        // Call 1 always checks (consecutive_absent starts at 0). Calls 2-3
        // skip while frames_since_check climbs to 3, call 4 rechecks, then
        // calls 5-6 skip again. A frozen counter would skip every call
        // after the first instead of ever reaching the modulo boundary.
        assert!(reasons.iter().any(|r| *r == Reason::PresenceSkippedRecheckPending));
        assert!(reasons.iter().filter(|r| **r == Reason::Detector).count() >= 2);
    }
}
