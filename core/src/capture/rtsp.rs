//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! RTSP handshake preflight: confirms the camera answers DESCRIBE/SETUP
//! before the continuous decoder subprocess is spawned, so a misconfigured
//! or unreachable camera fails fast with `SourceUnreachable` rather than
//! silently retrying inside ffmpeg.

use std::time::Duration;

use retina::client::{Session, SessionOptions, SetupOptions};
use url::Url;

use crate::error::PipelineError;

pub async fn preflight(url: &Url, connect_timeout: Duration) -> Result<(), PipelineError> {
    let attempt = async {
        let mut session = Session::describe(url.clone(), SessionOptions::default())
            .await
            .map_err(|e| PipelineError::SourceUnreachable(connect_timeout, e.to_string()))?;

        let video_idx = session
            .streams()
            .iter()
            .position(|s| s.media() == "video")
            .ok_or_else(|| {
                PipelineError::SourceUnreachable(
                    connect_timeout,
                    "no video stream advertised".to_string(),
                )
            })?;

        session
            .setup(video_idx, SetupOptions::default())
            .await
            .map_err(|e| PipelineError::SourceUnreachable(connect_timeout, e.to_string()))?;

        Ok(())
    };

    match tokio::time::timeout(connect_timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::SourceUnreachable(
            connect_timeout,
            "handshake timed out".to_string(),
        )),
    }
}
