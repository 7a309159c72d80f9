//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Watches the spool for new frames and emits them, in strictly increasing
//! sequence order, onto a bounded drop-oldest channel.

use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::config::ConfigSnapshot;
use crate::frame::{cleanup_spool, list_spool_frames, FrameRef, PixelBuffer};

pub struct FrameProducer {
    spool_path: PathBuf,
    retention: u64,
    last_seq: u64,
    tx: Sender<FrameRef>,
    overflows: u64,
}

impl FrameProducer {
    /// Capacity and retention come from the snapshot; overflow uses
    /// drop-oldest by discarding the queue head before pushing the newest.
    pub fn new(cfg: &ConfigSnapshot, spool_path: PathBuf) -> (Self, Receiver<FrameRef>) {
        let (tx, rx) = bounded(cfg.buffer_size);
        (
            FrameProducer {
                spool_path,
                retention: cfg.retention_frames,
                last_seq: 0,
                tx,
                overflows: 0,
            },
            rx,
        )
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflows
    }

    /// Scans the spool once for frames newer than `last_seq`, emits each in
    /// order, then evicts anything older than the retention window.
    pub fn poll_once(&mut self) -> std::io::Result<usize> {
        let mut emitted = 0;
        for (seq, path) in list_spool_frames(&self.spool_path)? {
            if seq <= self.last_seq {
                continue;
            }
            let bytes = match std::fs::read(&path) {
                Ok(b) => b,
                Err(e) => {
                    debug!(seq, error = %e, "spool frame vanished before read, skipping");
                    continue;
                }
            };
            let pixels = match PixelBuffer::decode_jpeg(&bytes) {
                Ok(p) => p,
                Err(e) => {
                    debug!(seq, error = %e, "failed to decode spool frame, skipping");
                    continue;
                }
            };
            let mut frame = FrameRef::new(seq, pixels);
            frame.source_path = Some(path);
            self.push(frame);
            self.last_seq = seq;
            emitted += 1;
        }
        if self.last_seq > self.retention {
            cleanup_spool(&self.spool_path, self.last_seq - self.retention)?;
        }
        Ok(emitted)
    }

    fn push(&mut self, frame: FrameRef) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                // Drop-oldest: make room by taking the head, then retry.
                if self.tx.try_recv().is_ok() {
                    self.overflows += 1;
                    warn!(overflows = self.overflows, "capture channel full, dropped oldest frame");
                }
                let _ = self.tx.try_send(frame);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_seq
    }
}

/// Age of the most recently seen frame; used by the watchdog to detect a
/// stalled or dead decoder (`WatchdogTimeout`).
pub fn frame_age(last_emitted_at: std::time::SystemTime) -> Duration {
    last_emitted_at.elapsed().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSnapshot;
    use image::{ImageBuffer, Rgb};

    fn write_jpeg(dir: &std::path::Path, seq: u64) {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(4, 4, Rgb([1, 2, 3]));
        img.save(dir.join(format!("frame_{seq:06}.jpg"))).unwrap();
    }

    #[test]
    fn emits_in_order_and_retains_window() {
        let dir = std::env::temp_dir().join(format!("lucidwatch-producer-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        for s in 1..=5u64 {
            write_jpeg(&dir, s);
        }

        let cfg = ConfigSnapshot::default_validated();
        let (mut producer, rx) = FrameProducer::new(&cfg, dir.clone());
        producer.poll_once().unwrap();

        let mut seqs = Vec::new();
        while let Ok(f) = rx.try_recv() {
            seqs.push(f.seq);
        }
        // buffer_size=3 means only the last 3 survive drop-oldest.
        assert_eq!(seqs, vec![3, 4, 5]);
        assert_eq!(producer.last_sequence(), 5);

        std::fs::remove_dir_all(&dir).ok();
    }
}
