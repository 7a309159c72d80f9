//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Real-time video-analysis pipeline core: frame ingest, motion gating,
//! adaptive scheduling, a detection cascade, multi-object tracking,
//! description deduplication, alert dispatch, and a telemetry fan-out bus.
//!
//! Command-line parsing, configuration file loading, HTML reporting,
//! concrete notification transports, and the specific vision-model wire
//! format are integration surfaces this crate does not implement — see
//! [`detect::ObjectDetector`], [`detect::VisionLanguage`] and
//! [`alert::AlertSink`] for the traits a caller implements to plug those in.

pub mod alert;
pub mod capture;
pub mod config;
pub mod describe;
pub mod detect;
pub mod error;
pub mod frame;
pub mod inference_pool;
pub mod motion;
pub mod pipeline;
pub mod producer;
pub mod scheduler;
pub mod telemetry;
pub mod tracker;

pub use config::{ConfigSnapshot, RawConfig};
pub use error::{PipelineError, Result};
pub use pipeline::{CancellationToken, Supervisor};
