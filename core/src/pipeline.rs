//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Top-level owner of every stage and the only component allowed to start
//! or stop them. Wires capture → motion → scheduler → cascade → tracker →
//! describer → alerter, tapping motion and tracking events onto the
//! telemetry bus, all inside one supervised tokio task.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{error, info, instrument, warn};

use crate::alert::Alerter;
use crate::capture::{self, CaptureHandle, DecodeHints};
use crate::config::ConfigSnapshot;
use crate::describe::Describer;
use crate::detect::DetectionCascade;
use crate::error::PipelineError;
use crate::frame::FrameRef;
use crate::motion::MotionAnalyzer;
use crate::producer::FrameProducer;
use crate::scheduler::{AdaptiveScheduler, Decision};
use crate::telemetry::{TelemetryBus, TelemetryPacket};
use crate::tracker::ObjectTracker;

/// Cooperative cancellation: stages poll `is_cancelled` between units of
/// work and stop promptly; `notified` lets a blocked waiter wake up early
/// rather than on its next poll interval.
#[derive(Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

pub const GRACEFUL_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

pub struct Supervisor {
    cfg: ConfigSnapshot,
    source_uri: String,
    spool_path: PathBuf,
    cascade: DetectionCascade,
    motion: MotionAnalyzer,
    scheduler: AdaptiveScheduler,
    tracker: ObjectTracker,
    describer: Describer,
    alerter: Alerter,
    bus: TelemetryBus,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(
        cfg: ConfigSnapshot,
        source_uri: String,
        cascade: DetectionCascade,
        describer: Describer,
        alerter: Alerter,
    ) -> Self {
        let spool_path = PathBuf::from(cfg.spool_path.clone());
        Supervisor {
            motion: MotionAnalyzer::new(&cfg),
            scheduler: AdaptiveScheduler::new(&cfg),
            tracker: ObjectTracker::new(&cfg),
            bus: TelemetryBus::new(100),
            cfg,
            source_uri,
            spool_path,
            cascade,
            describer,
            alerter,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn telemetry_bus(&mut self) -> &mut TelemetryBus {
        &mut self.bus
    }

    /// Feeds a single frame straight through the pipeline, bypassing the
    /// spool/capture subprocess entirely. Used by the in-process `file://`
    /// decode path, which already has decoded frames in hand.
    pub async fn ingest_frame(&mut self, frame: FrameRef) {
        self.process_frame(frame).await;
        self.alerter.tick().await;
    }

    /// Flushes any buffered alerts. Callers that never go through
    /// [`Supervisor::run`] (e.g. the file-mode path) call this once decoding
    /// finishes, in place of the full [`Supervisor::shutdown`] sequence.
    pub async fn flush_alerts(&mut self) {
        self.alerter.flush().await;
    }

    /// Runs until cancelled. On a fatal capture error (`DecoderUnavailable`),
    /// returns immediately; recoverable capture failures are retried with
    /// exponential backoff (1s, 2s, 4s, capped at 30s) inside this loop.
    #[instrument(skip(self))]
    pub async fn run(&mut self) -> Result<(), PipelineError> {
        let hints = DecodeHints {
            fps: self.cfg.capture_fps,
            scale: None,
            jpeg_quality: 2,
        };
        let connect_timeout = Duration::from_secs(10);
        let max_frame_age = Duration::from_secs_f64(self.cfg.max_frame_age_secs);

        let mut backoff = Duration::from_secs(1);
        let mut handle = self.start_capture(&hints, connect_timeout).await?;

        let (mut producer, rx) = FrameProducer::new(&self.cfg, self.spool_path.clone());
        let mut last_frame_at = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let (returned_producer, poll_result) = tokio::task::spawn_blocking(move || {
                let n = producer.poll_once();
                (producer, n)
            })
            .await
            .expect("poll_once blocking task does not panic");
            producer = returned_producer;

            match poll_result {
                Ok(n) if n > 0 => last_frame_at = Instant::now(),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "spool poll failed"),
            }

            while let Ok(frame) = rx.try_recv() {
                self.process_frame(frame).await;
            }

            self.alerter.tick().await;

            if last_frame_at.elapsed() > max_frame_age {
                warn!("watchdog: no new frame within max_frame_age, restarting capture");
                handle.stop();
                match self.restart_with_backoff(&hints, connect_timeout, &mut backoff).await {
                    Ok(h) => {
                        handle = h;
                        last_frame_at = Instant::now();
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => warn!(error = %e, "capture restart failed, will retry"),
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.scheduler.target_interval().max(Duration::from_millis(20))) => {}
                _ = self.cancel.cancelled() => {}
            }
        }

        self.shutdown(handle).await;
        Ok(())
    }

    async fn start_capture(
        &self,
        hints: &DecodeHints,
        connect_timeout: Duration,
    ) -> Result<CaptureHandle, PipelineError> {
        capture::start(
            &self.source_uri,
            self.spool_path.clone(),
            hints.clone(),
            connect_timeout,
        )
        .await
    }

    async fn restart_with_backoff(
        &self,
        hints: &DecodeHints,
        connect_timeout: Duration,
        backoff: &mut Duration,
    ) -> Result<CaptureHandle, PipelineError> {
        tokio::time::sleep(*backoff).await;
        *backoff = (*backoff * 2).min(Duration::from_secs(30));
        self.start_capture(hints, connect_timeout).await
    }

    async fn process_frame(&mut self, frame: FrameRef) {
        let started = Instant::now();
        let delta = self.motion.analyze(&frame);
        self.bus.publish(TelemetryPacket::from_frame_delta(&delta));

        let decision = self.scheduler.decide(delta.motion_percent, delta.motion_area_px);
        let process = matches!(decision, Decision::Process { .. });
        if !process {
            return;
        }

        let cascade_result = self.cascade.run(&frame, &delta.regions).await;
        if !cascade_result.has_target {
            self.scheduler
                .record_latency(started.elapsed(), delta.motion_percent);
            return;
        }

        let tracking = self.tracker.update(&cascade_result.detections);
        self.bus.publish(TelemetryPacket::from_tracking(
            frame.seq,
            tracking.active_count,
            &tracking.events,
        ));

        if let Some(mut observation) =
            self.describer.observe(&tracking, cascade_result.summary.as_deref())
        {
            observation.frame_seq = frame.seq;
            self.bus
                .publish(TelemetryPacket::from_observation(frame.seq, &observation));
            self.alerter.accept(observation).await;
        }

        self.scheduler
            .record_latency(started.elapsed(), delta.motion_percent);
    }

    async fn shutdown(&mut self, handle: CaptureHandle) {
        info!("shutting down pipeline");
        let deadline = tokio::time::Instant::now() + GRACEFUL_SHUTDOWN_DEADLINE;
        if tokio::time::timeout_at(deadline, self.alerter.flush())
            .await
            .is_err()
        {
            error!("alerter flush exceeded graceful shutdown deadline");
        }
        handle.stop();
    }
}
