//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Two related but distinct responsibilities live here, as they do in the
//! teacher's own `logic/telemetry.rs`: a structured event type for ambient
//! observability, and a fan-out bus that gives live subscribers (a
//! dashboard, a debug CLI) a read-only view of what the pipeline is doing
//! right now.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::describe::Observation;
use crate::motion::{FrameDelta, MotionRegion};
use crate::tracker::Event as TrackEvent;

/// One structured telemetry event. Tagged so a JSON-lines sink (or
/// `tracing`'s own structured fields) can distinguish event kinds without a
/// separate schema per kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryPacket {
    Motion {
        frame_seq: u64,
        motion_percent: f64,
        region_count: usize,
    },
    Tracking {
        frame_seq: u64,
        active_count: usize,
        events: Vec<String>,
    },
    Observation {
        frame_seq: u64,
        summary: String,
        triggered: bool,
    },
}

impl TelemetryPacket {
    pub fn from_frame_delta(delta: &FrameDelta) -> Self {
        TelemetryPacket::Motion {
            frame_seq: delta.seq,
            motion_percent: delta.motion_percent,
            region_count: delta.regions.len(),
        }
    }

    pub fn from_tracking(frame_seq: u64, active_count: usize, events: &[TrackEvent]) -> Self {
        TelemetryPacket::Tracking {
            frame_seq,
            active_count,
            events: events
                .iter()
                .map(|e| match e {
                    TrackEvent::Entry(id) => format!("entry:{id}"),
                    TrackEvent::Exit(id) => format!("exit:{id}"),
                    TrackEvent::ZoneEnter(id, z) => format!("zone:{id}:{z}"),
                })
                .collect(),
        }
    }

    pub fn from_observation(frame_seq: u64, observation: &Observation) -> Self {
        TelemetryPacket::Observation {
            frame_seq,
            summary: observation.summary.clone(),
            triggered: observation.triggered,
        }
    }

    /// Canonical JSON-lines encoding, for a sink that persists telemetry to
    /// disk rather than just reading it off the bus.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Emits a `tracing` event for a packet at an appropriate level; this is the
/// ambient logging path every packet takes regardless of whether any bus
/// subscriber exists.
pub fn log_packet(packet: &TelemetryPacket) {
    match packet {
        TelemetryPacket::Motion { frame_seq, motion_percent, region_count } => {
            tracing::debug!(frame_seq, motion_percent, region_count, "motion");
        }
        TelemetryPacket::Tracking { frame_seq, active_count, events } => {
            tracing::debug!(frame_seq, active_count, event_count = events.len(), "tracking");
        }
        TelemetryPacket::Observation { frame_seq, summary, triggered } => {
            tracing::info!(frame_seq, summary = summary.as_str(), triggered, "observation");
        }
    }
}

struct Subscriber {
    tx: Sender<TelemetryPacket>,
}

/// Fan-out of telemetry packets to an arbitrary number of subscribers, each
/// with its own bounded, drop-oldest channel so one slow subscriber never
/// backs up another or the producer.
pub struct TelemetryBus {
    subscribers: Vec<Subscriber>,
    capacity: usize,
}

impl TelemetryBus {
    pub fn new(capacity: usize) -> Self {
        TelemetryBus { subscribers: Vec::new(), capacity }
    }

    pub fn subscribe(&mut self) -> Receiver<TelemetryPacket> {
        let (tx, rx) = bounded(self.capacity);
        self.subscribers.push(Subscriber { tx });
        rx
    }

    pub fn publish(&self, packet: TelemetryPacket) {
        log_packet(&packet);
        for sub in &self.subscribers {
            match sub.tx.try_send(packet.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(p)) => {
                    let _ = sub.tx.try_recv();
                    if sub.tx.try_send(p).is_err() {
                        warn!("telemetry subscriber channel closed mid-drop");
                    }
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

pub fn regions_summary(regions: &[MotionRegion]) -> String {
    regions
        .iter()
        .map(|r| format!("{}x{}@({},{})", r.w, r.h, r.x, r.y))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_receives_published_packet() {
        let mut bus = TelemetryBus::new(4);
        let rx = bus.subscribe();
        bus.publish(TelemetryPacket::Motion { frame_seq: 1, motion_percent: 5.0, region_count: 2 });
        let received = rx.try_recv().unwrap();
        assert!(matches!(received, TelemetryPacket::Motion { frame_seq: 1, .. }));
    }

    #[test]
    fn full_subscriber_channel_drops_oldest() {
        let mut bus = TelemetryBus::new(1);
        let rx = bus.subscribe();
        bus.publish(TelemetryPacket::Motion { frame_seq: 1, motion_percent: 0.0, region_count: 0 });
        bus.publish(TelemetryPacket::Motion { frame_seq: 2, motion_percent: 0.0, region_count: 0 });
        let received = rx.try_recv().unwrap();
        assert!(matches!(received, TelemetryPacket::Motion { frame_seq: 2, .. }));
        assert!(rx.try_recv().is_err());
    }
}
