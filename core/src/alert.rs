//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Dispatches [`Observation`]s to abstract [`AlertSink`]s under one of three
//! policies. Concrete sinks (SMTP, chat webhooks) are integration surfaces
//! owned by the caller; this module only implements the dispatch/cooldown/
//! degraded-backoff logic around whatever sink is handed to it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use crate::config::AlertMode;
use crate::describe::Observation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Ok,
    TransientError,
    PermanentError,
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, payload: &AlertPayload) -> SendOutcome;
    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct AlertPayload {
    pub observations: Vec<Observation>,
}

struct SinkState {
    last_sent: Option<Instant>,
    degraded_until: Option<Instant>,
    last_payload_key: Option<String>,
    last_payload_at: Option<Instant>,
    /// Instant-mode observation held back by `instant_min_interval`, to be
    /// sent once `buffered_ready_at` elapses instead of dropped outright.
    buffered: Option<AlertPayload>,
    buffered_ready_at: Option<Instant>,
}

impl SinkState {
    fn new() -> Self {
        SinkState {
            last_sent: None,
            degraded_until: None,
            last_payload_key: None,
            last_payload_at: None,
            buffered: None,
            buffered_ready_at: None,
        }
    }
}

pub struct Alerter {
    mode: AlertMode,
    instant_min_interval: Duration,
    digest_interval: Duration,
    cooldown: Duration,
    sinks: Vec<Box<dyn AlertSink>>,
    sink_state: HashMap<String, SinkState>,
    pending: Vec<Observation>,
    last_digest_flush: Instant,
}

impl Alerter {
    pub fn new(
        mode: AlertMode,
        instant_min_interval: Duration,
        digest_interval: Duration,
        cooldown: Duration,
        sinks: Vec<Box<dyn AlertSink>>,
    ) -> Self {
        let sink_state = sinks
            .iter()
            .map(|s| (s.name().to_string(), SinkState::new()))
            .collect();
        Alerter {
            mode,
            instant_min_interval,
            digest_interval,
            cooldown,
            sinks,
            sink_state,
            pending: Vec::new(),
            last_digest_flush: Instant::now(),
        }
    }

    /// Feeds one observation into the policy. Under `Instant`, may dispatch
    /// immediately. Under `Digest`/`Summary`, only buffers; call
    /// [`Alerter::tick`] or [`Alerter::flush`] to actually send.
    pub async fn accept(&mut self, observation: Observation) {
        match self.mode {
            AlertMode::Instant => {
                self.dispatch(vec![observation]).await;
            }
            AlertMode::Digest | AlertMode::Summary => {
                self.pending.push(observation);
            }
        }
    }

    /// Called periodically by the supervisor; flushes a digest batch if the
    /// interval has elapsed, or releases any instant-mode observations that
    /// were held back by the per-sink cooldown and have now come due. No-op
    /// under `Summary`.
    pub async fn tick(&mut self) {
        match self.mode {
            AlertMode::Digest => {
                if self.last_digest_flush.elapsed() >= self.digest_interval && !self.pending.is_empty() {
                    let batch = std::mem::take(&mut self.pending);
                    self.dispatch(batch).await;
                    self.last_digest_flush = Instant::now();
                }
            }
            AlertMode::Instant => self.flush_due_buffers().await,
            AlertMode::Summary => {}
        }
    }

    /// Sends any per-sink buffered observation whose `buffered_ready_at` has
    /// elapsed, one sink at a time (each sink buffers independently).
    async fn flush_due_buffers(&mut self) {
        let now = Instant::now();
        for sink in &self.sinks {
            let name = sink.name().to_string();
            let Some(state) = self.sink_state.get_mut(&name) else {
                continue;
            };
            let Some(ready_at) = state.buffered_ready_at else {
                continue;
            };
            if now < ready_at {
                continue;
            }
            let Some(payload) = state.buffered.take() else {
                state.buffered_ready_at = None;
                continue;
            };
            state.buffered_ready_at = None;
            send_with_retry(sink.as_ref(), &payload, state, &name, self.cooldown).await;
        }
    }

    /// Called on shutdown: `Summary` mode only ever sends here; `Digest`
    /// flushes whatever remains buffered.
    pub async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        self.dispatch(batch).await;
    }

    async fn dispatch(&mut self, observations: Vec<Observation>) {
        if observations.is_empty() {
            return;
        }
        let payload = AlertPayload { observations };
        let key = payload_key(&payload);
        let now = Instant::now();

        for sink in &self.sinks {
            let name = sink.name().to_string();
            let state = self.sink_state.entry(name.clone()).or_insert_with(SinkState::new);

            if let Some(degraded_until) = state.degraded_until
                && now < degraded_until
            {
                continue;
            }

            if self.mode == AlertMode::Instant
                && let Some(last) = state.last_sent
                && now.duration_since(last) < self.instant_min_interval
            {
                // Don't drop it: hold the latest duplicate and release it
                // once the sink's cooldown window elapses.
                state.buffered = Some(payload.clone());
                state.buffered_ready_at = Some(last + self.instant_min_interval);
                continue;
            }

            if let Some(last_key) = &state.last_payload_key
                && *last_key == key
                && let Some(last_at) = state.last_payload_at
                && now.duration_since(last_at) < self.cooldown
            {
                continue;
            }

            send_with_retry(sink.as_ref(), &payload, state, &name, self.cooldown).await;
        }
    }
}

async fn send_with_retry(
    sink: &dyn AlertSink,
    payload: &AlertPayload,
    state: &mut SinkState,
    name: &str,
    cooldown: Duration,
) {
    let key = payload_key(payload);
    let mut attempts = 0;
    loop {
        attempts += 1;
        match sink.send(payload).await {
            SendOutcome::Ok => {
                let now = Instant::now();
                state.last_sent = Some(now);
                state.last_payload_key = Some(key.clone());
                state.last_payload_at = Some(now);
                break;
            }
            SendOutcome::TransientError if attempts < 3 => {
                let jitter_ms = rand::thread_rng().gen_range(50..250);
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                continue;
            }
            SendOutcome::TransientError => {
                warn!(sink = name, "alert sink exhausted retries");
                break;
            }
            SendOutcome::PermanentError => {
                warn!(sink = name, "alert sink reported permanent failure, degrading");
                state.degraded_until = Some(Instant::now() + cooldown);
                break;
            }
        }
    }
}

fn payload_key(payload: &AlertPayload) -> String {
    payload
        .observations
        .iter()
        .map(|o| o.summary.as_str())
        .collect::<Vec<_>>()
        .join("|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink {
        count: Arc<AtomicUsize>,
        outcome: SendOutcome,
    }

    #[async_trait]
    impl AlertSink for CountingSink {
        async fn send(&self, _payload: &AlertPayload) -> SendOutcome {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.outcome
        }
        fn name(&self) -> &str {
            "counting"
        }
    }

    fn observation(summary: &str) -> Observation {
        Observation {
            frame_seq: 1,
            timestamp: chrono::Utc::now(),
            summary: summary.to_string(),
            description: None,
            triggered: false,
            matched_triggers: vec![],
        }
    }

    #[tokio::test]
    async fn instant_mode_suppresses_duplicate_within_cooldown() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = CountingSink { count: count.clone(), outcome: SendOutcome::Ok };
        let mut alerter = Alerter::new(
            AlertMode::Instant,
            Duration::from_secs(10),
            Duration::from_secs(60),
            Duration::from_secs(300),
            vec![Box::new(sink)],
        );
        alerter.accept(observation("a cat sits still")).await;
        alerter.accept(observation("a cat sits still")).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn digest_mode_buffers_until_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = CountingSink { count: count.clone(), outcome: SendOutcome::Ok };
        let mut alerter = Alerter::new(
            AlertMode::Digest,
            Duration::from_secs(10),
            Duration::from_millis(1),
            Duration::from_secs(300),
            vec![Box::new(sink)],
        );
        alerter.accept(observation("a cat sits still")).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        alerter.tick().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn instant_mode_buffers_and_emits_duplicate_at_cooldown_boundary() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = CountingSink { count: count.clone(), outcome: SendOutcome::Ok };
        let mut alerter = Alerter::new(
            AlertMode::Instant,
            Duration::from_millis(20),
            Duration::from_secs(60),
            Duration::from_secs(300),
            vec![Box::new(sink)],
        );
        alerter.accept(observation("a cat sits still")).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Arrives inside the cooldown window: buffered, not dropped.
        alerter.accept(observation("a cat sits still")).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        alerter.tick().await;
        assert_eq!(count.load(Ordering::SeqCst), 1, "tick before the boundary must not emit early");

        tokio::time::sleep(Duration::from_millis(25)).await;
        alerter.tick().await;
        assert_eq!(count.load(Ordering::SeqCst), 2, "buffered duplicate emits once the cooldown elapses");
    }

    #[tokio::test]
    async fn permanent_error_degrades_sink() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = CountingSink { count: count.clone(), outcome: SendOutcome::PermanentError };
        let mut alerter = Alerter::new(
            AlertMode::Instant,
            Duration::from_secs(0),
            Duration::from_secs(60),
            Duration::from_secs(300),
            vec![Box::new(sink)],
        );
        alerter.accept(observation("a")).await;
        alerter.accept(observation("b")).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
