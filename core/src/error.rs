//! SPDX-License-Identifier: GPL-3.0-or-later

use std::time::Duration;

/// Error taxonomy for the pipeline. Recoverable variants are contained within
/// the stage that raised them and surfaced as telemetry; fatal variants
/// propagate to the [`crate::pipeline::Supervisor`] which initiates shutdown.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("decoder binary unavailable: {0}")]
    DecoderUnavailable(String),

    #[error("source unreachable after {0:?}: {1}")]
    SourceUnreachable(Duration, String),

    #[error("decoder process died: {0}")]
    DecoderDied(String),

    #[error("no new frame for {0:?}, watchdog fired")]
    WatchdogTimeout(Duration),

    #[error("inference queue full")]
    Backpressure,

    #[error("inference call exceeded {0:?}")]
    InferenceTimeout(Duration),

    #[error("transient inference failure: {0}")]
    InferenceTransient(String),

    #[error("permanent inference failure: {0}")]
    InferencePermanent(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("cascade stage {0} exceeded its budget")]
    StageBudgetExceeded(&'static str),

    #[error("unsupported source scheme: {0}")]
    UnsupportedSource(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether this error kind is contained locally (logged, counted, and the
    /// pipeline keeps running) or fatal (the supervisor must shut down).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::DecoderUnavailable(_) | PipelineError::ConfigInvalid(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
