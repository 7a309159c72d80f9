//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Spawns an external decoder writing successive JPEG frames into the spool,
//! in the continuous single-overwritten-file style. Restart/backoff lives in
//! [`crate::pipeline`]; this module only owns the child process handle.

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{DecodeHints, Source};
use crate::error::PipelineError;

pub struct SubprocessCapture {
    child: Child,
    alive: Arc<AtomicBool>,
}

impl SubprocessCapture {
    pub fn spawn(
        source: &Source,
        spool_path: &Path,
        hints: &DecodeHints,
    ) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(spool_path)?;
        for (_, path) in crate::frame::list_spool_frames(spool_path)? {
            let _ = std::fs::remove_file(path);
        }

        let pattern = spool_path.join("frame_%06d.jpg");
        let mut vf = format!("fps={}", hints.fps);
        if let Some((w, h)) = hints.scale {
            vf.push_str(&format!(",scale={w}:{h}"));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y");
        if matches!(source, Source::Rtsp(_)) {
            cmd.args(["-rtsp_transport", "tcp"]);
        }
        cmd.args(["-i", &source.input_arg()])
            .args(["-vf", &vf])
            .args(["-q:v", &hints.jpeg_quality.to_string()])
            .args(["-update", "1"])
            .arg(&pattern)
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = cmd
            .spawn()
            .map_err(|e| PipelineError::DecoderUnavailable(e.to_string()))?;

        Ok(SubprocessCapture {
            child,
            alive: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Kills the child immediately and reaps it. `std::process::Child` has
    /// no portable graceful-signal API, so there is no grace period here;
    /// callers relying on the decoder to flush its spool output before exit
    /// cannot assume one.
    pub fn stop(mut self) {
        self.alive.store(false, Ordering::Relaxed);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
