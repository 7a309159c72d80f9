//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! A fixed-size worker pool that serializes outbound inference calls,
//! decoupling the capture/scheduling loop from remote-service latency.
//! Results are delivered on an output channel keyed by frame number so late
//! arrivals can be discarded by the consumer once they go stale.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tracing::warn;

use crate::config::ConfigSnapshot;
use crate::error::PipelineError;

pub struct InferenceJob<I> {
    pub frame_seq: u64,
    pub input: I,
}

pub struct InferenceOutcome<O> {
    pub frame_seq: u64,
    pub result: Result<O, PipelineError>,
}

/// Owns the worker semaphore and the output channel. Callers submit work via
/// [`InferencePool::submit`], which spawns a tokio task bounded by the
/// semaphore; submission itself never blocks — a full pool rejects with
/// `Backpressure`.
pub struct InferencePool<O> {
    semaphore: Arc<Semaphore>,
    out_tx: mpsc::Sender<InferenceOutcome<O>>,
    call_timeout: Duration,
    max_stale_frames: u64,
}

impl<O: Send + 'static> InferencePool<O> {
    pub fn new(cfg: &ConfigSnapshot) -> (Self, mpsc::Receiver<InferenceOutcome<O>>) {
        let capacity = cfg.pool_workers * 2;
        let (out_tx, out_rx) = mpsc::channel(capacity);
        (
            InferencePool {
                semaphore: Arc::new(Semaphore::new(cfg.pool_workers)),
                out_tx,
                call_timeout: Duration::from_millis(cfg.call_timeout_ms),
                max_stale_frames: cfg.max_stale_frames,
            },
            out_rx,
        )
    }

    /// Submits one inference call. Returns `Backpressure` immediately if no
    /// worker permit is free; otherwise spawns a task that runs `work` under
    /// the call timeout and posts the outcome.
    pub fn submit<F, Fut>(&self, frame_seq: u64, work: F) -> Result<(), PipelineError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<O, PipelineError>> + Send,
    {
        let permit = self
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| PipelineError::Backpressure)?;

        let out_tx = self.out_tx.clone();
        let timeout = self.call_timeout;
        tokio::spawn(async move {
            let _permit = permit;
            let result = match tokio::time::timeout(timeout, work()).await {
                Ok(r) => r,
                Err(_) => Err(PipelineError::InferenceTimeout(timeout)),
            };
            if out_tx.send(InferenceOutcome { frame_seq, result }).await.is_err() {
                warn!(frame_seq, "inference output channel closed, dropping result");
            }
        });
        Ok(())
    }

    /// Whether a result for `frame_seq` should still be honored given the
    /// pipeline's current frame number, or discarded as stale.
    pub fn is_stale(&self, frame_seq: u64, current_seq: u64) -> bool {
        current_seq.saturating_sub(frame_seq) > self.max_stale_frames
    }
}
