//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! `CaptureSource` owns the exclusive external decoder (or, for `rtsp://`,
//! an in-process preflight plus the same decoder) that keeps the spool
//! directory fed with JPEG frames. One `CaptureSource` per pipeline run.

mod rtsp;
mod subprocess;

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::PipelineError;

pub use subprocess::SubprocessCapture;

/// A parsed, validated source. Only the schemes named in the external
/// interface table are recognized.
#[derive(Debug, Clone)]
pub enum Source {
    Rtsp(Url),
    Http(Url),
    File(PathBuf),
    Device(String),
    Screen(Option<String>),
}

impl Source {
    pub fn parse(uri: &str) -> Result<Self, PipelineError> {
        if let Some(rest) = uri.strip_prefix("file://") {
            return Ok(Source::File(PathBuf::from(rest)));
        }
        if let Some(rest) = uri.strip_prefix("device://") {
            return Ok(Source::Device(rest.to_string()));
        }
        if let Some(rest) = uri.strip_prefix("screen://") {
            let region = if rest.is_empty() {
                None
            } else {
                Some(rest.to_string())
            };
            return Ok(Source::Screen(region));
        }
        let url = Url::parse(uri).map_err(|_| PipelineError::UnsupportedSource(uri.to_string()))?;
        match url.scheme() {
            "rtsp" => Ok(Source::Rtsp(url)),
            "http" | "https" => Ok(Source::Http(url)),
            other => Err(PipelineError::UnsupportedSource(other.to_string())),
        }
    }

    /// The `ffmpeg -i` argument equivalent for this source; every scheme
    /// (including `rtsp://`, after a successful preflight) is ultimately
    /// decoded by the same external subprocess. Device and screen sources
    /// are platform-specific and resolved by the caller's decode hints.
    pub fn input_arg(&self) -> String {
        match self {
            Source::Rtsp(u) => u.to_string(),
            Source::Http(u) => u.to_string(),
            Source::File(p) => p.display().to_string(),
            Source::Device(d) => d.clone(),
            Source::Screen(_) => "default_display".to_string(),
        }
    }
}

/// Runtime handle to a started capture; dropping it does not stop capture —
/// call [`CaptureHandle::stop`] explicitly so shutdown can be observed.
pub struct CaptureHandle {
    inner: SubprocessCapture,
}

impl CaptureHandle {
    pub fn stop(self) {
        self.inner.stop();
    }

    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }
}

#[derive(Debug, Clone)]
pub struct DecodeHints {
    pub fps: f64,
    pub scale: Option<(u32, u32)>,
    pub jpeg_quality: u8,
}

impl Default for DecodeHints {
    fn default() -> Self {
        DecodeHints {
            fps: 5.0,
            scale: None,
            jpeg_quality: 2,
        }
    }
}

/// Starts capture for `uri` into `spool_path`, blocking up to
/// `connect_timeout` for an RTSP handshake when applicable.
pub async fn start(
    uri: &str,
    spool_path: PathBuf,
    hints: DecodeHints,
    connect_timeout: Duration,
) -> Result<CaptureHandle, PipelineError> {
    let source = Source::parse(uri)?;
    if let Source::Rtsp(url) = &source {
        rtsp::preflight(url, connect_timeout).await?;
    }
    let inner = SubprocessCapture::spawn(&source, &spool_path, &hints)?;
    Ok(CaptureHandle { inner })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recognized_schemes() {
        assert!(matches!(
            Source::parse("file:///tmp/video.mp4").unwrap(),
            Source::File(_)
        ));
        assert!(matches!(
            Source::parse("device://cam0").unwrap(),
            Source::Device(_)
        ));
        assert!(matches!(
            Source::parse("screen://").unwrap(),
            Source::Screen(None)
        ));
        assert!(matches!(
            Source::parse("rtsp://cam.local/stream").unwrap(),
            Source::Rtsp(_)
        ));
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(matches!(
            Source::parse("ftp://example.com/x"),
            Err(PipelineError::UnsupportedSource(_))
        ));
    }
}
