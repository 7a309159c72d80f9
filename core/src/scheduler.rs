//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Decides whether a frame is worth running through the detection cascade,
//! and adapts the target inter-frame interval from recent end-to-end
//! latency and motion activity.

use std::time::Duration;

use crate::config::ConfigSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MotionGate,
    LowMotion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Process { forced: bool },
    Skip(SkipReason),
}

pub struct AdaptiveScheduler {
    motion_gate_threshold_px: u32,
    skip_motion_threshold: f64,
    periodic_interval_frames: u64,
    min_interval: Duration,
    max_interval: Duration,
    frames_since_processed: u64,
    recent_latencies_ms: Vec<f64>,
    recompute_every: u64,
    target_interval: Duration,
    seen_first_frame: bool,
}

impl AdaptiveScheduler {
    pub fn new(cfg: &ConfigSnapshot) -> Self {
        let min_interval = Duration::from_secs_f64(cfg.min_interval_secs);
        AdaptiveScheduler {
            motion_gate_threshold_px: cfg.motion_gate_threshold_px,
            skip_motion_threshold: cfg.motion_threshold_pct,
            periodic_interval_frames: cfg.periodic_interval_frames,
            min_interval,
            max_interval: Duration::from_secs_f64(cfg.max_interval_secs),
            frames_since_processed: 0,
            recent_latencies_ms: Vec::new(),
            recompute_every: 10,
            target_interval: min_interval,
            seen_first_frame: false,
        }
    }

    pub fn decide(&mut self, motion_percent: f64, motion_area_px: u32) -> Decision {
        self.frames_since_processed += 1;

        // The very first frame has no predecessor to diff against, so motion
        // gating is meaningless; the scheduler always forces it through.
        if !self.seen_first_frame {
            self.seen_first_frame = true;
            self.frames_since_processed = 0;
            return Decision::Process { forced: true };
        }

        if self.frames_since_processed >= self.periodic_interval_frames {
            self.frames_since_processed = 0;
            return Decision::Process { forced: true };
        }
        if motion_area_px < self.motion_gate_threshold_px {
            return Decision::Skip(SkipReason::MotionGate);
        }
        if motion_percent < self.skip_motion_threshold {
            return Decision::Skip(SkipReason::LowMotion);
        }

        self.frames_since_processed = 0;
        Decision::Process { forced: false }
    }

    /// Feeds one frame's measured end-to-end processing latency into the
    /// cadence model; recomputes the target interval every `recompute_every`
    /// samples.
    pub fn record_latency(&mut self, latency: Duration, motion_percent: f64) {
        self.recent_latencies_ms.push(latency.as_secs_f64() * 1000.0);
        if self.recent_latencies_ms.len() < self.recompute_every as usize {
            return;
        }
        let avg_ms: f64 =
            self.recent_latencies_ms.iter().sum::<f64>() / self.recent_latencies_ms.len() as f64;
        self.recent_latencies_ms.clear();

        let base = Duration::from_secs_f64((avg_ms * 1.2 / 1000.0).clamp(
            self.min_interval.as_secs_f64(),
            self.max_interval.as_secs_f64(),
        ));
        let factor = if motion_percent >= 10.0 {
            0.5
        } else if motion_percent < 1.0 {
            2.0
        } else {
            1.0
        };
        let adjusted = base.mul_f64(factor);
        self.target_interval = adjusted.clamp(self.min_interval, self.max_interval);
    }

    pub fn target_interval(&self) -> Duration {
        self.target_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> AdaptiveScheduler {
        AdaptiveScheduler::new(&ConfigSnapshot::default_validated())
    }

    #[test]
    fn first_frame_is_always_forced() {
        let mut s = scheduler();
        let decision = s.decide(0.0, 0);
        assert_eq!(decision, Decision::Process { forced: true });
    }

    #[test]
    fn forces_processing_on_periodic_interval() {
        let mut s = scheduler();
        let _ = s.decide(0.0, 0); // consume the unconditional first-frame force
        let mut forced_seen = false;
        for _ in 0..30 {
            if let Decision::Process { forced: true } = s.decide(0.0, 0) {
                forced_seen = true;
                break;
            }
        }
        assert!(forced_seen);
    }

    #[test]
    fn skips_low_motion_between_forced_checks() {
        let mut s = scheduler();
        let _ = s.decide(100.0, 1000); // consume the unconditional first-frame force
        let decision = s.decide(0.1, 5);
        assert_eq!(decision, Decision::Skip(SkipReason::MotionGate));
    }

    #[test]
    fn processes_on_sufficient_motion() {
        let mut s = scheduler();
        let _ = s.decide(100.0, 1000); // consume the unconditional first-frame force
        let decision = s.decide(5.0, 1000);
        assert_eq!(decision, Decision::Process { forced: false });
    }
}
